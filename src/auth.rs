use log::error;
use serde::Deserialize;

/// bcrypt work factor for stored passwords.
pub const HASH_COST: u32 = 10;

#[derive(Deserialize)]
pub struct Registration {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Salted one-way hash; each call picks a fresh salt.
pub fn hash_password(password: &str) -> Result<String, ()> {
    bcrypt::hash(password, HASH_COST).map_err(|e| {
        error!("couldn't hash password: {e:?}");
    })
}

/// A malformed stored hash counts as a mismatch.
pub fn verify_password(password: &str, pwhash: &str) -> bool {
    bcrypt::verify(password, pwhash).unwrap_or_else(|e| {
        error!("couldn't verify password: {e:?}");
        false
    })
}
