#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use client::api::ApiClient;
use client::persistence::{
    MemorySessionPersistence, PersistedSession, PersistenceError, SessionPersistence,
};
use client::{AuthService, SessionStore};
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use shared::{
    CreateTaskRequest, LoginCredentials, SignupCredentials, Task, TaskStatus, UpdateTaskRequest,
    User, UserRole,
};
use tokio::net::TcpListener;
use url::Url;
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "admin@taskdeck.test";
pub const USER_EMAIL: &str = "user@taskdeck.test";
pub const PASSWORD: &str = "secret123";

/// Counts how often the session record is written and erased.
#[derive(Default)]
pub struct CountingPersistence {
    pub inner: MemorySessionPersistence,
    pub saves: AtomicUsize,
    pub clears: AtomicUsize,
}

impl CountingPersistence {
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl SessionPersistence for CountingPersistence {
    fn load(&self) -> Result<Option<PersistedSession>, PersistenceError> {
        self.inner.load()
    }

    fn save(&self, record: &PersistedSession) -> Result<(), PersistenceError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(record)
    }

    fn clear(&self) -> Result<(), PersistenceError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }
}

pub fn user(id: &str, role: UserRole) -> User {
    let now = Utc::now();
    User {
        id: id.to_owned(),
        name: format!("User {id}"),
        email: format!("{id}@taskdeck.test"),
        role,
        profile_picture: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn stored_session(token: &str, user: User) -> CountingPersistence {
    CountingPersistence {
        inner: MemorySessionPersistence::with_record(PersistedSession {
            access_token: token.to_owned(),
            user,
        }),
        ..Default::default()
    }
}

/// Polls until the backend has seen `count` task list requests.
pub async fn wait_for_task_list_calls(backend: &FakeBackend, count: usize) {
    while backend.state.task_list_calls.load(Ordering::SeqCst) < count {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn login_credentials(email: &str, password: &str) -> LoginCredentials {
    LoginCredentials {
        email: email.to_owned(),
        password: SecretString::from(password.to_owned()),
    }
}

/// Everything a test needs on the client side, wired against one backend.
pub struct TestClient {
    pub persistence: Arc<CountingPersistence>,
    pub session: SessionStore,
    pub auth: AuthService,
}

impl TestClient {
    pub fn new(base_url: Url) -> anyhow::Result<Self> {
        let persistence = Arc::new(CountingPersistence::default());
        let session = SessionStore::new(persistence.clone());
        session.hydrate();
        let client = ApiClient::new(base_url, session.clone()).context("api client")?;
        Ok(Self {
            persistence,
            session,
            auth: AuthService::new(client),
        })
    }

    pub fn client(&self) -> &ApiClient {
        self.auth.client()
    }

    pub async fn login_as(&self, email: &str) -> anyhow::Result<User> {
        let outcome = self
            .auth
            .login(login_credentials(email, PASSWORD))
            .await
            .context("login")?;
        Ok(outcome.user)
    }
}

struct Account {
    password: String,
    user: User,
}

#[derive(Default)]
pub struct BackendState {
    accounts: Mutex<HashMap<String, Account>>,
    tokens: Mutex<HashMap<String, String>>,
    tasks: Mutex<Vec<Task>>,
    pub authorization_headers: Mutex<Vec<Option<String>>>,
    pub profile_calls: AtomicUsize,
    pub task_list_calls: AtomicUsize,
    pub profile_delay: Mutex<Option<Duration>>,
    pub task_list_delay: Mutex<Option<Duration>>,
    pub uploads: Mutex<Vec<Bytes>>,
}

/// In-process stand-in for the REST backend, served on a loopback port.
pub struct FakeBackend {
    pub url: Url,
    pub state: Arc<BackendState>,
}

impl FakeBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(BackendState::default());
        state.add_account(ADMIN_EMAIL, "Ada Admin", UserRole::Admin);
        state.add_account(USER_EMAIL, "Uma User", UserRole::User);

        let app = Router::new()
            .route("/auth/signup", post(signup))
            .route("/auth/login", post(login))
            .route("/auth/profile", get(profile))
            .route("/tasks", get(list_tasks).post(create_task))
            .route(
                "/tasks/{id}",
                get(get_task).put(update_task).delete(delete_task),
            )
            .route("/users", get(list_users))
            .route(
                "/users/{id}",
                get(get_user).put(update_user).delete(delete_user),
            )
            .route("/users/{id}/profile-picture", post(upload_picture))
            .route("/errors/{kind}", get(error_response))
            .route("/slow", get(slow))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        let url = Url::parse(&format!("http://{address}"))?;
        Ok(Self { url, state })
    }

    pub fn client(&self) -> anyhow::Result<TestClient> {
        TestClient::new(self.url.clone())
    }

    /// Makes every issued token invalid, as if they all expired.
    pub fn revoke_tokens(&self) {
        self.state.tokens.lock().clear();
    }

    pub fn user_id(&self, email: &str) -> String {
        self.state.accounts.lock()[email].user.id.clone()
    }

    pub fn add_task(&self, owner_email: &str, title: &str, status: TaskStatus) -> Task {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: title.to_owned(),
            description: None,
            status,
            user_id: Some(self.user_id(owner_email)),
            created_at: now,
            updated_at: now,
        };
        self.state.tasks.lock().push(task.clone());
        task
    }

    pub fn last_authorization(&self) -> Option<String> {
        self.state
            .authorization_headers
            .lock()
            .last()
            .cloned()
            .flatten()
    }
}

impl BackendState {
    fn add_account(&self, email: &str, name: &str, role: UserRole) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            email: email.to_owned(),
            role,
            profile_picture: None,
            created_at: now,
            updated_at: now,
        };
        self.accounts.lock().insert(
            email.to_owned(),
            Account {
                password: PASSWORD.to_owned(),
                user: user.clone(),
            },
        );
        user
    }

    fn issue_token(&self, user: &User) -> String {
        let token = Uuid::new_v4().simple().to_string();
        self.tokens.lock().insert(token.clone(), user.id.clone());
        token
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<User, Response> {
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        self.authorization_headers.lock().push(authorization.clone());
        let user_id = authorization
            .as_deref()
            .and_then(|value| value.strip_prefix("Bearer "))
            .and_then(|token| self.tokens.lock().get(token).cloned())
            .ok_or_else(|| failure(StatusCode::UNAUTHORIZED, Some("Unauthorized"), None))?;
        self.find_user(&user_id)
            .ok_or_else(|| failure(StatusCode::UNAUTHORIZED, Some("Unauthorized"), None))
    }

    fn find_user(&self, id: &str) -> Option<User> {
        self.accounts
            .lock()
            .values()
            .find(|account| account.user.id == id)
            .map(|account| account.user.clone())
    }

    fn replace_user(&self, user: User) {
        if let Some(account) = self
            .accounts
            .lock()
            .values_mut()
            .find(|account| account.user.id == user.id)
        {
            account.user = user;
        }
    }
}

fn envelope(status: StatusCode, message: &str, data: Value) -> Response {
    (
        status,
        Json(json!({"success": true, "message": message, "data": data, "error": null})),
    )
        .into_response()
}

fn failure(status: StatusCode, message: Option<&str>, error: Option<&str>) -> Response {
    (
        status,
        Json(json!({"success": false, "message": message, "data": null, "error": error})),
    )
        .into_response()
}

async fn signup(
    State(state): State<Arc<BackendState>>,
    Json(payload): Json<SignupCredentials>,
) -> Response {
    if state.accounts.lock().contains_key(&payload.email) {
        return failure(
            StatusCode::CONFLICT,
            Some("Conflict"),
            Some("Email already exists"),
        );
    }
    let user = state.add_account(&payload.email, &payload.name, UserRole::User);
    if let Some(account) = state.accounts.lock().get_mut(&payload.email) {
        account.password = payload.password.expose_secret().to_owned();
    }
    let token = state.issue_token(&user);
    envelope(
        StatusCode::CREATED,
        "User registered successfully",
        json!({"user": user, "access_token": token}),
    )
}

async fn login(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(payload): Json<LoginCredentials>,
) -> Response {
    state.authorization_headers.lock().push(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned),
    );
    let user = {
        let accounts = state.accounts.lock();
        match accounts.get(&payload.email) {
            Some(account) if account.password == payload.password.expose_secret() => {
                account.user.clone()
            }
            _ => {
                return failure(
                    StatusCode::UNAUTHORIZED,
                    Some("Unauthorized"),
                    Some("Invalid credentials"),
                )
            }
        }
    };
    let token = state.issue_token(&user);
    envelope(
        StatusCode::OK,
        "Login successful",
        json!({"user": user, "access_token": token}),
    )
}

async fn profile(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    let user = match state.authorize(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    state.profile_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *state.profile_delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let user = state.find_user(&user.id).unwrap_or(user);
    envelope(StatusCode::OK, "Profile retrieved", json!({"user": user}))
}

async fn list_tasks(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.task_list_calls.fetch_add(1, Ordering::SeqCst);
    let delay = *state.task_list_delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    let user = match state.authorize(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let tasks: Vec<Task> = state
        .tasks
        .lock()
        .iter()
        .filter(|task| user.is_admin() || task.user_id.as_deref() == Some(user.id.as_str()))
        .cloned()
        .collect();
    envelope(StatusCode::OK, "Tasks retrieved", json!(tasks))
}

async fn get_task(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = state.authorize(&headers) {
        return response;
    }
    match state.tasks.lock().iter().find(|task| task.id == id) {
        Some(task) => envelope(StatusCode::OK, "Task retrieved", json!(task)),
        None => failure(
            StatusCode::NOT_FOUND,
            Some("Not Found"),
            Some("Task not found"),
        ),
    }
}

async fn create_task(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateTaskRequest>,
) -> Response {
    let user = match state.authorize(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4().to_string(),
        title: payload.title,
        description: payload.description,
        status: payload.status.unwrap_or_default(),
        user_id: Some(user.id),
        created_at: now,
        updated_at: now,
    };
    state.tasks.lock().push(task.clone());
    envelope(StatusCode::CREATED, "Task created successfully", json!(task))
}

async fn update_task(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTaskRequest>,
) -> Response {
    if let Err(response) = state.authorize(&headers) {
        return response;
    }
    let mut tasks = state.tasks.lock();
    let Some(task) = tasks.iter_mut().find(|task| task.id == id) else {
        return failure(StatusCode::NOT_FOUND, Some("Not Found"), Some("Task not found"));
    };
    if let Some(title) = payload.title {
        task.title = title;
    }
    if let Some(description) = payload.description {
        task.description = Some(description);
    }
    if let Some(status) = payload.status {
        task.status = status;
    }
    task.updated_at = Utc::now();
    envelope(StatusCode::OK, "Task updated successfully", json!(task))
}

async fn delete_task(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = state.authorize(&headers) {
        return response;
    }
    let mut tasks = state.tasks.lock();
    let before = tasks.len();
    tasks.retain(|task| task.id != id);
    if tasks.len() == before {
        return failure(StatusCode::NOT_FOUND, Some("Not Found"), Some("Task not found"));
    }
    envelope(StatusCode::OK, "Task deleted successfully", Value::Null)
}

async fn list_users(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    let user = match state.authorize(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    if !user.is_admin() {
        return failure(
            StatusCode::FORBIDDEN,
            Some("Forbidden"),
            Some("Forbidden resource"),
        );
    }
    let users: Vec<User> = state
        .accounts
        .lock()
        .values()
        .map(|account| account.user.clone())
        .collect();
    envelope(StatusCode::OK, "Users retrieved", json!(users))
}

async fn get_user(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = state.authorize(&headers) {
        return response;
    }
    match state.find_user(&id) {
        Some(user) => envelope(StatusCode::OK, "User retrieved", json!(user)),
        None => failure(StatusCode::NOT_FOUND, Some("Not Found"), Some("User not found")),
    }
}

async fn update_user(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    let caller = match state.authorize(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    if !caller.is_admin() && caller.id != id {
        return failure(
            StatusCode::FORBIDDEN,
            Some("Forbidden"),
            Some("Forbidden resource"),
        );
    }
    let Some(mut user) = state.find_user(&id) else {
        return failure(StatusCode::NOT_FOUND, Some("Not Found"), Some("User not found"));
    };
    if let Some(name) = payload.get("name").and_then(Value::as_str) {
        user.name = name.to_owned();
    }
    if let Some(email) = payload.get("email").and_then(Value::as_str) {
        user.email = email.to_owned();
    }
    if let Some(role) = payload
        .get("role")
        .and_then(Value::as_str)
        .and_then(|role| role.parse::<UserRole>().ok())
    {
        user.role = role;
    }
    user.updated_at = Utc::now();
    state.replace_user(user.clone());
    envelope(StatusCode::OK, "User updated successfully", json!(user))
}

async fn delete_user(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = state.authorize(&headers) {
        return response;
    }
    state
        .accounts
        .lock()
        .retain(|_, account| account.user.id != id);
    envelope(StatusCode::OK, "User deleted successfully", Value::Null)
}

async fn upload_picture(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    if let Err(response) = state.authorize(&headers) {
        return response;
    }
    let Some(mut user) = state.find_user(&id) else {
        return failure(StatusCode::NOT_FOUND, Some("Not Found"), Some("User not found"));
    };
    state.uploads.lock().push(body);
    user.profile_picture = Some(format!("/uploads/{id}.png"));
    state.replace_user(user.clone());
    envelope(StatusCode::OK, "Profile picture uploaded", json!(user))
}

async fn error_response(Path(kind): Path<String>) -> Response {
    match kind.as_str() {
        "both" => failure(StatusCode::BAD_REQUEST, Some("M"), Some("E")),
        "message" => failure(StatusCode::BAD_REQUEST, Some("M"), None),
        "validation" => (
            StatusCode::BAD_REQUEST,
            Json(json!({"message": ["title should not be empty", "title must be a string"]})),
        )
            .into_response(),
        "server" => failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            Some("Database unavailable"),
            None,
        ),
        "forbidden" => failure(
            StatusCode::FORBIDDEN,
            Some("Forbidden"),
            Some("Forbidden resource"),
        ),
        "rejected" => (
            StatusCode::OK,
            Json(json!({"success": false, "message": "", "data": null, "error": "Upload refused"})),
        )
            .into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "").into_response(),
    }
}

async fn slow() -> Response {
    tokio::time::sleep(Duration::from_secs(30)).await;
    envelope(StatusCode::OK, "Too late", Value::Null)
}
