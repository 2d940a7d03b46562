use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use url::Url;

use crate::api::{ApiClient, Result};
use crate::auth::AuthService;
use crate::persistence::FileSessionPersistence;
use crate::user_session::SessionStore;

const SESSION_DIR: &str = ".taskdeck";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, Args)]
pub struct Config {
    #[arg(
        long,
        help = "Base URL of the task backend",
        env = "TASKDECK_API_URL",
        default_value = "http://localhost:3000"
    )]
    pub api_url: Url,

    #[arg(
        long,
        help = "Where the session is persisted, defaults to ~/.taskdeck/session.json",
        env = "TASKDECK_SESSION_FILE"
    )]
    pub session_file: Option<PathBuf>,
}

impl Config {
    pub fn session_file(&self) -> PathBuf {
        if let Some(path) = &self.session_file {
            return path.clone();
        }
        let mut path = home::home_dir().unwrap_or_default();
        path.push(SESSION_DIR);
        path.push(SESSION_FILE);
        path
    }

    /// Wires a session store backed by the session file, hydrates it and
    /// returns the auth service on top of it.
    pub fn connect(&self) -> Result<AuthService> {
        let persistence = FileSessionPersistence::new(self.session_file());
        let session = SessionStore::new(Arc::new(persistence));
        session.hydrate();
        let client = ApiClient::new(self.api_url.clone(), session)?;
        Ok(AuthService::new(client))
    }
}
