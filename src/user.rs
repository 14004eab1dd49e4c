use serde::{Deserialize, Serialize};

use crate::id::uuid_newtype;

uuid_newtype!(UserId);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    /// bcrypt digest, salt included
    pub pwhash: String,
}
