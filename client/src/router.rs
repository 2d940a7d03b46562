use std::fmt;

use shared::UserRole;
use tracing::info;

use crate::navigation::Navigator;
use crate::user_session::{SessionStore, UserSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    Login,
    Signup,
    Dashboard,
    Tasks,
    Users,
    Profile,
    NotFound,
}

/// Where authenticated users land and where the guard sends anyone who may
/// not see the view they asked for.
pub const DEFAULT_AUTHENTICATED_ROUTE: Route = Route::Dashboard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    /// Landing view, authenticated users are sent on to the dashboard.
    Anonymous,
    Authenticated,
    Role(UserRole),
}

impl Route {
    pub fn from_path(path: &str) -> Route {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        match trimmed {
            "" => Route::Home,
            "/login" => Route::Login,
            "/signup" => Route::Signup,
            "/dashboard" => Route::Dashboard,
            "/dashboard/tasks" => Route::Tasks,
            "/dashboard/users" => Route::Users,
            "/dashboard/profile" => Route::Profile,
            _ => Route::NotFound,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Login => "/login",
            Route::Signup => "/signup",
            Route::Dashboard => "/dashboard",
            Route::Tasks => "/dashboard/tasks",
            Route::Users => "/dashboard/users",
            Route::Profile => "/dashboard/profile",
            Route::NotFound => "/404",
        }
    }

    pub fn access(&self) -> Access {
        match self {
            Route::Home => Access::Anonymous,
            Route::Login | Route::Signup | Route::NotFound => Access::Public,
            Route::Dashboard | Route::Tasks | Route::Profile => Access::Authenticated,
            Route::Users => Access::Role(UserRole::Admin),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// The session has not been restored yet, render nothing.
    Unresolved,
    Allowed,
    Redirect(Route),
}

/// Decides whether `route` may render for `session`. Has to run on every
/// render since the session can be cleared underneath a mounted view.
pub fn evaluate(route: Route, hydrated: bool, session: &UserSession) -> GuardDecision {
    if !hydrated {
        return GuardDecision::Unresolved;
    }
    let logged = session.logged();
    match route.access() {
        Access::Public => GuardDecision::Allowed,
        Access::Anonymous if logged => GuardDecision::Redirect(DEFAULT_AUTHENTICATED_ROUTE),
        Access::Anonymous => GuardDecision::Allowed,
        Access::Authenticated | Access::Role(_) if !logged => GuardDecision::Redirect(Route::Login),
        Access::Authenticated => GuardDecision::Allowed,
        Access::Role(role) if session.role() == Some(role) => GuardDecision::Allowed,
        Access::Role(_) => GuardDecision::Redirect(DEFAULT_AUTHENTICATED_ROUTE),
    }
}

pub fn guard(route: Route, session: &SessionStore) -> GuardDecision {
    evaluate(route, session.is_hydrated(), &session.snapshot())
}

/// Evaluates the guard for the navigator's current view and follows any
/// redirect.
pub fn enforce<N: Navigator + ?Sized>(navigator: &N, session: &SessionStore) -> GuardDecision {
    let route = navigator.current();
    let decision = guard(route, session);
    if let GuardDecision::Redirect(target) = decision {
        info!(from = %route, to = %target, "Route guard redirect");
        navigator.navigate(target);
    }
    decision
}
