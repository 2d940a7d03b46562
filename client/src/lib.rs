pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod navigation;
pub mod persistence;
pub mod router;
pub mod user_session;

pub use api::{ApiClient, ApiError, AuthEvent};
pub use auth::AuthService;
pub use config::Config;
pub use user_session::{SessionStore, UserSession};
