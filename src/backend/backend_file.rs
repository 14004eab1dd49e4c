use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, error, info};
use serde::{de::DeserializeOwned, Serialize};

use crate::backend::{FindError, InsertError};
use crate::feedback::{newest_first, Feedback, FeedbackForm, FeedbackId};
use crate::session::{Session, SessionId, SESSION_TTL_SECS};
use crate::time::Timestamp;
use crate::user::{User, UserId};

mod jsonl;

/// Document store over a data directory, one JSON-lines file per
/// collection. Every operation holds the store lock for its whole
/// read-modify-write, so each is atomic with respect to the others.
pub struct Backend {
    root: PathBuf,
    lock: Mutex<()>,
}

#[derive(Debug, Clone, Copy)]
enum Collection {
    Users,
    Feedback,
    Sessions,
}

impl Collection {
    fn file_name(self) -> &'static str {
        match self {
            Self::Users => "users.jsonl",
            Self::Feedback => "feedback.jsonl",
            Self::Sessions => "sessions.jsonl",
        }
    }
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Result<Self, ()> {
        fs::create_dir_all(data_dir).map_err(|e| {
            error!("couldn't create data dir {data_dir:?}: {e:?}");
        })?;

        info!("Using {data_dir:?}");

        Ok(Self {
            root: data_dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }
}

impl Backend {
    fn lock(&self) -> Result<MutexGuard<'_, ()>, ()> {
        self.lock.lock().map_err(|_| {
            error!("store lock poisoned");
        })
    }

    fn load<T: DeserializeOwned>(&self, collection: Collection) -> Result<Vec<T>, ()> {
        let path = self.root.join(collection.file_name());
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => {
                error!("open {path:?}: {e:?}");
                return Err(());
            }
        };

        jsonl::read(file).map_err(|()| {
            error!("couldn't parse {path:?}");
        })
    }

    /// Replaces the collection, via a rename so readers never see a partial file.
    fn store<T: Serialize>(&self, collection: Collection, docs: &[T]) -> Result<(), ()> {
        let path = self.root.join(collection.file_name());
        let tmp = path.with_extension("jsonl.tmp");

        let write = || -> std::io::Result<()> {
            let file = File::create(&tmp)?;
            jsonl::write(file, docs)?;
            fs::rename(&tmp, &path)
        };

        write().map_err(|e| {
            error!("write {path:?}: {e:?}");
        })
    }
}

impl Backend {
    /// Fails with `Conflict` if the username is taken.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        pwhash: &str,
    ) -> Result<User, InsertError> {
        let _guard = self.lock().map_err(|()| InsertError::Internal)?;
        let mut users: Vec<User> = self
            .load(Collection::Users)
            .map_err(|()| InsertError::Internal)?;

        if users.iter().any(|u| u.username == username) {
            return Err(InsertError::Conflict);
        }

        let user = User {
            id: UserId::new(),
            username: username.into(),
            email: email.into(),
            pwhash: pwhash.into(),
        };
        users.push(user.clone());

        self.store(Collection::Users, &users)
            .map_err(|()| InsertError::Internal)?;

        Ok(user)
    }

    pub async fn find_user(&self, username: &str) -> Result<User, FindError> {
        let _guard = self.lock().map_err(|()| FindError::Internal)?;
        let users: Vec<User> = self
            .load(Collection::Users)
            .map_err(|()| FindError::Internal)?;

        users
            .into_iter()
            .find(|u| u.username == username)
            .ok_or(FindError::NotFound)
    }

    /// Users matching any of `ids`; unknown ids are skipped.
    pub async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, ()> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let _guard = self.lock()?;
        let users: Vec<User> = self.load(Collection::Users)?;

        Ok(users.into_iter().filter(|u| ids.contains(&u.id)).collect())
    }
}

impl Backend {
    pub async fn insert_feedback(&self, feedback: &Feedback) -> Result<(), ()> {
        let _guard = self.lock()?;
        let mut all: Vec<Feedback> = self.load(Collection::Feedback)?;

        all.push(feedback.clone());
        self.store(Collection::Feedback, &all)
    }

    /// Newest first.
    pub async fn all_feedback(&self) -> Result<Vec<Feedback>, ()> {
        let _guard = self.lock()?;
        let mut all: Vec<Feedback> = self.load(Collection::Feedback)?;

        // stored in insertion order, so reversing first keeps same-second
        // submissions newest first after the stable sort
        all.reverse();
        newest_first(&mut all);
        Ok(all)
    }

    pub async fn find_feedback(&self, id: &FeedbackId) -> Result<Feedback, FindError> {
        let _guard = self.lock().map_err(|()| FindError::Internal)?;
        let all: Vec<Feedback> = self
            .load(Collection::Feedback)
            .map_err(|()| FindError::Internal)?;

        all.into_iter()
            .find(|fb| fb.id == *id)
            .ok_or(FindError::NotFound)
    }

    /// Overwrites name, email and message; `created` and `submitted_by` are kept.
    pub async fn update_feedback(
        &self,
        id: &FeedbackId,
        update: &FeedbackForm,
    ) -> Result<(), FindError> {
        let _guard = self.lock().map_err(|()| FindError::Internal)?;
        let mut all: Vec<Feedback> = self
            .load(Collection::Feedback)
            .map_err(|()| FindError::Internal)?;

        let fb = all
            .iter_mut()
            .find(|fb| fb.id == *id)
            .ok_or(FindError::NotFound)?;

        fb.name = update.name.clone();
        fb.email = update.email.clone();
        fb.message = update.message.clone();

        self.store(Collection::Feedback, &all)
            .map_err(|()| FindError::Internal)
    }

    pub async fn delete_feedback(&self, id: &FeedbackId) -> Result<(), FindError> {
        let _guard = self.lock().map_err(|()| FindError::Internal)?;
        let mut all: Vec<Feedback> = self
            .load(Collection::Feedback)
            .map_err(|()| FindError::Internal)?;

        let before = all.len();
        all.retain(|fb| fb.id != *id);
        if all.len() == before {
            return Err(FindError::NotFound);
        }

        self.store(Collection::Feedback, &all)
            .map_err(|()| FindError::Internal)
    }
}

impl Backend {
    /// Looks up a live session and slides its expiry forward. Expired
    /// sessions, this one or any other, are removed; this one is then
    /// reported as absent.
    pub async fn touch_session(
        &self,
        id: &SessionId,
        now: Timestamp,
    ) -> Result<Option<Session>, ()> {
        let _guard = self.lock()?;
        let mut sessions: Vec<Session> = self.load(Collection::Sessions)?;
        let dropped = drop_expired(&mut sessions, now);

        let Some(pos) = sessions.iter().position(|s| s.id == *id) else {
            if dropped > 0 {
                self.store(Collection::Sessions, &sessions)?;
            }
            return Ok(None);
        };

        sessions[pos].expires = now.plus_secs(SESSION_TTL_SECS);
        let session = sessions[pos].clone();
        self.store(Collection::Sessions, &sessions)?;

        Ok(Some(session))
    }

    /// Inserts or replaces the whole record.
    pub async fn save_session(&self, session: &Session, now: Timestamp) -> Result<(), ()> {
        let _guard = self.lock()?;
        let mut sessions: Vec<Session> = self.load(Collection::Sessions)?;
        drop_expired(&mut sessions, now);

        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(s) => *s = session.clone(),
            None => sessions.push(session.clone()),
        }

        self.store(Collection::Sessions, &sessions)
    }

    /// Sets the flash message on an existing session. Returns false, and
    /// stores nothing, when the session is gone.
    pub async fn set_success(&self, id: &SessionId, message: &str) -> Result<bool, ()> {
        let _guard = self.lock()?;
        let mut sessions: Vec<Session> = self.load(Collection::Sessions)?;

        let Some(pos) = sessions.iter().position(|s| s.id == *id) else {
            return Ok(false);
        };
        sessions[pos].success = Some(message.into());

        self.store(Collection::Sessions, &sessions)?;
        Ok(true)
    }

    pub async fn delete_session(&self, id: &SessionId) -> Result<(), ()> {
        let _guard = self.lock()?;
        let mut sessions: Vec<Session> = self.load(Collection::Sessions)?;

        sessions.retain(|s| s.id != *id);
        self.store(Collection::Sessions, &sessions)
    }

    /// Returns the flash message and clears it in the same operation.
    pub async fn take_success(&self, id: &SessionId) -> Result<Option<String>, ()> {
        let _guard = self.lock()?;
        let mut sessions: Vec<Session> = self.load(Collection::Sessions)?;

        let taken = sessions
            .iter_mut()
            .find(|s| s.id == *id)
            .and_then(|s| s.success.take());

        if taken.is_some() {
            self.store(Collection::Sessions, &sessions)?;
        }

        Ok(taken)
    }

    pub async fn purge_expired_sessions(&self, now: Timestamp) -> Result<usize, ()> {
        let _guard = self.lock()?;
        let mut sessions: Vec<Session> = self.load(Collection::Sessions)?;

        let purged = drop_expired(&mut sessions, now);
        if purged > 0 {
            self.store(Collection::Sessions, &sessions)?;
        }

        Ok(purged)
    }
}

/// The session file is rewritten on every request, so expired records are
/// dropped whenever it is.
fn drop_expired(sessions: &mut Vec<Session>, now: Timestamp) -> usize {
    let before = sessions.len();
    sessions.retain(|s| !s.is_expired(now));

    let dropped = before - sessions.len();
    if dropped > 0 {
        debug!("dropped {dropped} expired sessions");
    }
    dropped
}
