use nanobanana_contracts::session::{SessionContext, LOGIN_COOKIE_KEY};

use crate::config::Credentials;

const LOGGED_IN: &str = "1";

/// Single-account login remembered through the `logged_in` cookie.
#[derive(Debug, Clone)]
pub struct Authenticator {
    credentials: Credentials,
}

impl Authenticator {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn is_authenticated(&self, session: &SessionContext) -> bool {
        session.cookie(LOGIN_COOKIE_KEY).as_deref() == Some(LOGGED_IN)
    }

    /// Checks the pair and, on success, remembers the login and makes sure the client has a
    /// session id. Cookie failures only cost persistence, never the login itself.
    pub fn login(&self, session: &mut SessionContext, username: &str, password: &str) -> bool {
        if username != self.credentials.username || password != self.credentials.password {
            tracing::info!("login rejected");
            return false;
        }
        if let Err(err) = session.set_cookie(LOGIN_COOKIE_KEY, LOGGED_IN) {
            tracing::warn!(error = %err, "could not persist login cookie");
        }
        session.browser_session_id(true);
        true
    }

    pub fn logout(&self, session: &mut SessionContext) {
        if let Err(err) = session.remove_cookie(LOGIN_COOKIE_KEY) {
            tracing::warn!(error = %err, "could not remove login cookie");
        }
    }
}
