use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::AuthEvent;
use crate::router::Route;

pub trait Navigator: Send + Sync {
    fn current(&self) -> Route;
    fn navigate(&self, route: Route);
}

/// In-memory navigation history.
#[derive(Debug)]
pub struct History {
    stack: Mutex<Vec<Route>>,
}

impl History {
    pub fn new(start: Route) -> Self {
        Self {
            stack: Mutex::new(vec![start]),
        }
    }

    pub fn entries(&self) -> Vec<Route> {
        self.stack.lock().clone()
    }
}

impl Navigator for History {
    fn current(&self) -> Route {
        self.stack.lock().last().copied().unwrap_or(Route::Home)
    }

    fn navigate(&self, route: Route) {
        debug!(%route, "Navigate");
        self.stack.lock().push(route);
    }
}

/// Turns session invalidation events into a redirect to the login view.
pub struct NavigationListener<N: ?Sized> {
    navigator: Arc<N>,
}

impl<N: Navigator + ?Sized> NavigationListener<N> {
    pub fn new(navigator: Arc<N>) -> Self {
        Self { navigator }
    }

    /// Returns the route navigated to, if any. Being on the login view
    /// already is not a reason to navigate again.
    pub fn handle(&self, event: AuthEvent) -> Option<Route> {
        match event {
            AuthEvent::Invalidated => {
                if self.navigator.current() == Route::Login {
                    debug!("Session invalidated while on the login view");
                    return None;
                }
                info!("Session invalidated, redirecting to login");
                self.navigator.navigate(Route::Login);
                Some(Route::Login)
            }
        }
    }

    /// Handles every event already queued on `events` without waiting.
    pub fn drain(&self, events: &mut broadcast::Receiver<AuthEvent>) -> Vec<Route> {
        let mut redirects = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => redirects.extend(self.handle(event)),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Navigation listener lagged behind");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        redirects
    }

    pub async fn run(self, mut events: broadcast::Receiver<AuthEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.handle(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Navigation listener lagged behind");
                }
                Err(RecvError::Closed) => {
                    debug!("Auth event channel closed, navigation listener stopped");
                    break;
                }
            }
        }
    }
}

impl<N: Navigator + ?Sized + 'static> NavigationListener<N> {
    pub fn spawn(self, events: broadcast::Receiver<AuthEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }
}
