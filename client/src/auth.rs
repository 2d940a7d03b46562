use std::path::Path;

use secrecy::{ExposeSecret, SecretString};
use shared::{AuthResponse, LoginCredentials, SignupCredentials, UpdateProfileRequest, User};
use tracing::{debug, info, warn};

use crate::api::{auth_api, ApiClient, ApiError, ApiReply, Result};
use crate::cache::{QueryFamily, QueryKey};
use crate::user_session::SessionStore;

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_PICTURE_BYTES: u64 = 5 * 1024 * 1024;

const PICTURE_TYPES: [(&str, &str); 5] = [
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct AuthOutcome {
    pub user: User,
    pub message: String,
}

/// Changes requested from the profile view. Unchanged fields are dropped
/// before anything is sent.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub password: Option<SecretString>,
    pub password_confirmation: Option<SecretString>,
}

/// Signup, login, logout and profile flows on top of the API client and the
/// session store.
#[derive(Clone)]
pub struct AuthService {
    client: ApiClient,
}

impl AuthService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn session(&self) -> &SessionStore {
        self.client.session()
    }

    pub async fn signup(&self, credentials: SignupCredentials) -> Result<AuthOutcome> {
        validate_signup(&credentials)?;
        let reply = auth_api::signup(&self.client, &credentials)
            .await
            .inspect_err(|error| {
                warn!(email = %credentials.email, %error, "Signup failed");
            })?;
        self.start_session(reply, "Account created successfully!")
    }

    pub async fn login(&self, credentials: LoginCredentials) -> Result<AuthOutcome> {
        validate_login(&credentials)?;
        let reply = auth_api::login(&self.client, &credentials)
            .await
            .inspect_err(|error| {
                warn!(email = %credentials.email, %error, "Login failed");
            })?;
        self.start_session(reply, "Logged in successfully!")
    }

    /// Ends the session locally and forgets every server-derived value.
    /// Needs no network round trip.
    pub fn logout(&self) {
        self.client.session().clear_auth();
        self.client.cache().clear();
        info!("User logged out");
    }

    /// Current user, served from the cache while fresh.
    pub async fn get_profile(&self) -> Result<User> {
        self.ensure_authenticated()?;
        if let Some(user) = self.client.cached::<User>(&QueryKey::Profile) {
            return Ok(user);
        }
        self.refresh_profile().await
    }

    /// Fetches the current user and refreshes the session copy, unless the
    /// session changed while the request was in flight.
    pub async fn refresh_profile(&self) -> Result<User> {
        self.ensure_authenticated()?;
        let reply = auth_api::get_profile(&self.client).await?;
        let user = reply.response.data.clone();
        self.client
            .remember(QueryKey::Profile, &user, reply.epoch);
        self.client
            .session()
            .update_user_in_epoch(user.clone(), reply.epoch);
        debug!(user_id = %user.id, "Profile refreshed");
        Ok(user)
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User> {
        let current = self.current_user()?;
        let request = profile_request(&current, update)?;
        let reply = auth_api::update_profile(&self.client, &current.id, &request)
            .await?
            .accepted("Failed to update profile")?;
        Ok(self.apply_user(reply))
    }

    pub async fn upload_profile_picture(&self, path: &Path) -> Result<User> {
        let current = self.current_user()?;
        let content_type = picture_content_type(path)?;
        let size = tokio::fs::metadata(path).await?.len();
        if size > MAX_PICTURE_BYTES {
            return Err(ApiError::validation("Image size must be less than 5MB"));
        }
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_owned());
        let reply = auth_api::upload_profile_picture(
            &self.client,
            &current.id,
            &file_name,
            content_type,
            bytes,
        )
        .await?
        .accepted("Failed to upload profile picture")?;
        Ok(self.apply_user(reply))
    }

    fn start_session(&self, reply: ApiReply<AuthResponse>, fallback: &str) -> Result<AuthOutcome> {
        let message = Some(reply.response.message)
            .filter(|message| !message.trim().is_empty())
            .unwrap_or_else(|| fallback.to_owned());
        let AuthResponse { user, access_token } = reply.response.data;
        self.client.cache().clear();
        self.client
            .session()
            .set_auth(user.clone(), access_token)?;
        info!(user_id = %user.id, role = %user.role, "User authenticated");
        Ok(AuthOutcome { user, message })
    }

    fn apply_user(&self, reply: ApiReply<User>) -> User {
        let user = reply.response.data;
        let cache = self.client.cache();
        cache.invalidate(&QueryKey::Profile);
        cache.invalidate_family(QueryFamily::Users);
        self.client
            .session()
            .update_user_in_epoch(user.clone(), reply.epoch);
        user
    }

    fn ensure_authenticated(&self) -> Result<()> {
        if self.client.session().is_authenticated() {
            Ok(())
        } else {
            Err(ApiError::NotAuthenticated)
        }
    }

    fn current_user(&self) -> Result<User> {
        self.ensure_authenticated()?;
        self.client
            .session()
            .user()
            .ok_or(ApiError::NotAuthenticated)
    }
}

fn validate_login(credentials: &LoginCredentials) -> Result<()> {
    let mut errors: Vec<&'static str> = Vec::new();
    if credentials.email.trim().is_empty() {
        errors.push("Email is required");
    } else if !credentials.email.contains('@') {
        errors.push("Email is invalid");
    }
    if credentials.password.expose_secret().is_empty() {
        errors.push("Password is required");
    }
    validation_result(errors)
}

fn validate_signup(credentials: &SignupCredentials) -> Result<()> {
    let mut errors: Vec<&'static str> = Vec::new();
    if credentials.name.trim().is_empty() {
        errors.push("Name is required");
    }
    if credentials.email.trim().is_empty() {
        errors.push("Email is required");
    } else if !credentials.email.contains('@') {
        errors.push("Email is invalid");
    }
    if credentials.password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH {
        errors.push("Password must be at least 6 characters long");
    }
    validation_result(errors)
}

fn profile_request(current: &User, update: ProfileUpdate) -> Result<UpdateProfileRequest> {
    if let Some(password) = &update.password {
        let confirmed = update
            .password_confirmation
            .as_ref()
            .map_or(true, |confirmation| {
                confirmation.expose_secret() == password.expose_secret()
            });
        if !confirmed {
            return Err(ApiError::validation("New passwords do not match"));
        }
        if password.expose_secret().chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ApiError::validation(
                "Password must be at least 6 characters long",
            ));
        }
    }
    let name = update
        .name
        .map(|name| name.trim().to_owned())
        .filter(|name| name != &current.name);
    if name.as_deref().is_some_and(str::is_empty) {
        return Err(ApiError::validation("Name is required"));
    }
    let request = UpdateProfileRequest {
        name,
        password: update.password,
    };
    if request.is_empty() {
        return Err(ApiError::validation("No changes to save"));
    }
    Ok(request)
}

fn picture_content_type(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .map(|extension| extension.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    PICTURE_TYPES
        .iter()
        .find(|(known, _)| *known == extension)
        .map(|(_, content_type)| *content_type)
        .ok_or_else(|| {
            ApiError::validation("Only image files (jpg, jpeg, png, gif, webp) are allowed")
        })
}

fn validation_result(errors: Vec<&'static str>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(errors.join("; ")))
    }
}
