use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Deserialize;
use shared::{AuthResponse, LoginCredentials, SignupCredentials, UpdateProfileRequest, User};
use tracing::info;

use super::{ApiClient, ApiReply, Auth, Result};

/// `/auth/profile` answers either `data: {user}` or the bare user.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProfileData {
    Wrapped { user: User },
    Bare(User),
}

impl From<ProfileData> for User {
    fn from(value: ProfileData) -> Self {
        match value {
            ProfileData::Wrapped { user } => user,
            ProfileData::Bare(user) => user,
        }
    }
}

pub async fn signup(
    client: &ApiClient,
    credentials: &SignupCredentials,
) -> Result<ApiReply<AuthResponse>> {
    info!(email = %credentials.email, "Api signup");
    client
        .post("auth/signup", credentials, Auth::Anonymous)
        .await
}

pub async fn login(
    client: &ApiClient,
    credentials: &LoginCredentials,
) -> Result<ApiReply<AuthResponse>> {
    info!(email = %credentials.email, "Api login");
    client
        .post("auth/login", credentials, Auth::Anonymous)
        .await
}

pub async fn get_profile(client: &ApiClient) -> Result<ApiReply<User>> {
    let reply = client.get::<ProfileData>("auth/profile").await?;
    info!("Api get profile");
    Ok(reply.map(User::from))
}

pub async fn update_profile(
    client: &ApiClient,
    user_id: &str,
    request: &UpdateProfileRequest,
) -> Result<ApiReply<User>> {
    info!(user_id, "Api update profile");
    client.put(&format!("users/{user_id}"), request).await
}

/// Sends the picture as the `file` part of a multipart form.
pub async fn upload_profile_picture(
    client: &ApiClient,
    user_id: &str,
    file_name: &str,
    content_type: &str,
    bytes: Vec<u8>,
) -> Result<ApiReply<User>> {
    let path = format!("users/{user_id}/profile-picture");
    let part = Part::bytes(bytes)
        .file_name(file_name.to_owned())
        .mime_str(content_type)?;
    let form = Form::new().part("file", part);
    let builder = client
        .http()
        .request(Method::POST, client.endpoint(&path)?)
        .multipart(form);
    info!(user_id, file_name, "Api upload profile picture");
    client.dispatch(builder, &path, Auth::Bearer).await
}
