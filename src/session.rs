use cookie::{time::Duration, Cookie, SameSite};
use serde::{Deserialize, Serialize};

use crate::id::uuid_newtype;
use crate::time::Timestamp;
use crate::user::UserId;

uuid_newtype!(SessionId);

pub const SESSION_COOKIE: &str = "sid";

/// Idle window, slid forward on every request that presents the session.
pub const SESSION_TTL_SECS: i64 = 60 * 60;

/// Server-side session record, addressed by the `sid` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: Option<UserId>,
    /// one-shot confirmation, cleared when rendered
    pub success: Option<String>,
    pub expires: Timestamp,
}

impl Session {
    pub fn new(now: Timestamp) -> Self {
        Self {
            id: SessionId::new(),
            user_id: None,
            success: None,
            expires: now.plus_secs(SESSION_TTL_SECS),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires <= now
    }
}

pub fn cookie(id: &SessionId, secure: bool) -> String {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::seconds(SESSION_TTL_SECS))
        .build()
        .to_string()
}

pub fn expired_cookie(secure: bool) -> String {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(Duration::ZERO)
        .build()
        .to_string()
}
