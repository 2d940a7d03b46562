use shared::{ApiResponse, UpdateUserRequest, User};
use tracing::info;

use super::{ApiClient, ApiError, Result};
use crate::cache::{QueryFamily, QueryKey};

pub async fn get_users(client: &ApiClient) -> Result<Vec<User>> {
    if let Some(users) = client.cached::<Vec<User>>(&QueryKey::Users) {
        return Ok(users);
    }
    let reply = client.get::<Vec<User>>("users").await?;
    info!(count = reply.response.data.len(), "Api get users");
    client.remember(QueryKey::Users, &reply.response.data, reply.epoch);
    Ok(reply.data())
}

pub async fn get_user(client: &ApiClient, id: &str) -> Result<User> {
    let key = QueryKey::User(id.to_owned());
    if let Some(user) = client.cached::<User>(&key) {
        return Ok(user);
    }
    let reply = client.get::<User>(&format!("users/{id}")).await?;
    info!(user_id = id, "Api get user by id");
    client.remember(key, &reply.response.data, reply.epoch);
    Ok(reply.data())
}

/// Updates any user. When the target is the logged-in user the session copy
/// is refreshed too.
pub async fn update_user(
    client: &ApiClient,
    id: &str,
    request: &UpdateUserRequest,
) -> Result<ApiResponse<User>> {
    let reply = client
        .put::<_, User>(&format!("users/{id}"), request)
        .await?;
    info!(user_id = id, "Api update user");
    let cache = client.cache();
    cache.invalidate_family(QueryFamily::Users);
    cache.invalidate(&QueryKey::Profile);
    let session = client.session();
    if session.user().is_some_and(|current| current.id == id) {
        session.update_user_in_epoch(reply.response.data.clone(), reply.epoch);
    }
    Ok(reply.response)
}

pub async fn delete_user(client: &ApiClient, id: &str) -> Result<ApiResponse<Option<User>>> {
    if client.session().user().is_some_and(|current| current.id == id) {
        return Err(ApiError::validation("You cannot delete your own account!"));
    }
    let reply = client
        .delete::<Option<User>>(&format!("users/{id}"))
        .await?;
    info!(user_id = id, "Api delete user");
    client.cache().invalidate_family(QueryFamily::Users);
    Ok(reply.response)
}
