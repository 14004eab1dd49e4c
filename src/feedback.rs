use serde::{Deserialize, Serialize};

use crate::id::uuid_newtype;
use crate::time::Timestamp;
use crate::user::UserId;

uuid_newtype!(FeedbackId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: FeedbackId,
    pub name: String,
    pub email: String,
    pub message: String,
    /// The user logged in at submission time, if any. Not an owner: the
    /// user may since have disappeared.
    pub submitted_by: Option<UserId>,
    pub created: Timestamp,
}

/// The three user-editable fields. Missing form fields become empty
/// strings; content is deliberately not validated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedbackForm {
    pub name: String,
    pub email: String,
    pub message: String,
}

/// Who a feedback is attributed to, resolved at read time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitter {
    Anonymous,
    User(String),
    /// `submitted_by` points at a user that no longer exists
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Attributed {
    pub feedback: Feedback,
    pub submitter: Submitter,
}

impl Feedback {
    pub fn new(form: FeedbackForm, submitted_by: Option<UserId>, created: Timestamp) -> Self {
        let FeedbackForm {
            name,
            email,
            message,
        } = form;

        Self {
            id: FeedbackId::new(),
            name,
            email,
            message,
            submitted_by,
            created,
        }
    }

    /// Case-insensitive substring match on name or email. `needle` must
    /// already be lowercased; an empty needle matches everything.
    pub fn matches(&self, needle: &str) -> bool {
        needle.is_empty()
            || self.name.to_lowercase().contains(needle)
            || self.email.to_lowercase().contains(needle)
    }
}

/// Newest first. Ties keep their relative order.
pub fn newest_first(feedbacks: &mut [Feedback]) {
    feedbacks.sort_by(|a, b| b.created.cmp(&a.created));
}
