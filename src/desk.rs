use std::collections::HashMap;
use std::{result, sync::Arc};

use log::{debug, error, info, trace, warn};
use warp::http;

use crate::auth::{self, Credentials, Registration};
use crate::backend::{Backend, FindError, InsertError};
use crate::dashboard::{self, DayCounts};
use crate::feedback::{Attributed, Feedback, FeedbackForm, FeedbackId, Submitter};
use crate::session::{Session, SessionId};
use crate::time::Timestamp;
use crate::user::UserId;

pub const UPDATED: &str = "Feedback updated successfully!";
pub const DELETED: &str = "Feedback deleted successfully!";

pub struct FeedbackDesk(Backend);

/// Proof that the request carries a session bound to a user. Only
/// obtainable through [`FeedbackDesk::authenticate`].
pub struct DeskAuthed {
    desk: Arc<FeedbackDesk>,
    session: Session,
    user_id: UserId,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    NotFound,
    Unauthorized,
}

pub type Result<T> = result::Result<T, Error>;

impl Into<http::StatusCode> for Error {
    fn into(self) -> http::StatusCode {
        match self {
            Self::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound => http::StatusCode::NOT_FOUND,
            Self::Unauthorized => http::StatusCode::FOUND,
        }
    }
}

impl warp::reject::Reject for Error {}

impl From<FindError> for Error {
    fn from(e: FindError) -> Self {
        match e {
            FindError::NotFound => Error::NotFound,
            FindError::Internal => Error::Internal,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered(UserId),
    UsernameTaken,
}

#[derive(Debug)]
pub enum LoginOutcome {
    /// a fresh session, bound to the user
    LoggedIn(Session),
    /// unknown user and wrong password are deliberately indistinguishable
    InvalidCredentials,
}

#[derive(Debug)]
pub struct Dashboard {
    pub feedbacks: Vec<Feedback>,
    pub counts: DayCounts,
    pub search: String,
}

#[derive(Debug)]
pub struct AdminList {
    pub feedbacks: Vec<Attributed>,
    pub success: Option<String>,
}

impl FeedbackDesk {
    pub fn new(backend: Backend) -> Self {
        Self(backend)
    }

    /// Resolves the session cookie. Unknown, malformed and expired ids all
    /// mean "anonymous"; a live session has its idle expiry extended.
    pub async fn load_session(&self, cookie: Option<&str>) -> Result<Option<Session>> {
        let Some(cookie) = cookie else {
            return Ok(None);
        };

        let Ok(id) = cookie.parse::<SessionId>() else {
            debug!("ignoring malformed session cookie");
            return Ok(None);
        };

        self.0
            .touch_session(&id, now()?)
            .await
            .map_err(|()| Error::Internal)
    }

    pub async fn register(&self, registration: Registration) -> Result<RegisterOutcome> {
        let Registration {
            username,
            email,
            password,
        } = registration;

        // cheap early out; the insert below is what actually enforces uniqueness
        match self.0.find_user(&username).await {
            Ok(_) => {
                info!("{username} register: username taken");
                return Ok(RegisterOutcome::UsernameTaken);
            }
            Err(FindError::NotFound) => {}
            Err(FindError::Internal) => return Err(Error::Internal),
        }

        let pwhash = blocking(move || auth::hash_password(&password)).await?;

        match self.0.create_user(&username, &email, &pwhash).await {
            Ok(user) => {
                info!("{username} registered");
                Ok(RegisterOutcome::Registered(user.id))
            }
            Err(InsertError::Conflict) => {
                info!("{username} register: lost race for username");
                Ok(RegisterOutcome::UsernameTaken)
            }
            Err(InsertError::Internal) => Err(Error::Internal),
        }
    }

    /// On success any existing session is replaced by a fresh one.
    pub async fn login(
        &self,
        credentials: Credentials,
        current: Option<Session>,
    ) -> Result<LoginOutcome> {
        let Credentials { username, password } = credentials;

        let user = match self.0.find_user(&username).await {
            Ok(user) => user,
            Err(FindError::NotFound) => {
                info!("{username} login: no such user");
                return Ok(LoginOutcome::InvalidCredentials);
            }
            Err(FindError::Internal) => {
                error!("couldn't authenticate user {username}");
                return Err(Error::Internal);
            }
        };

        let pwhash = user.pwhash;
        if !blocking(move || Ok(auth::verify_password(&password, &pwhash))).await? {
            info!("{username} login: wrong password");
            return Ok(LoginOutcome::InvalidCredentials);
        }

        if let Some(old) = current {
            self.0
                .delete_session(&old.id)
                .await
                .map_err(|()| Error::Internal)?;
        }

        let now = now()?;
        let mut session = Session::new(now);
        session.user_id = Some(user.id);
        self.0
            .save_session(&session, now)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{username} login: new session");
        Ok(LoginOutcome::LoggedIn(session))
    }

    /// Removes the session record entirely.
    pub async fn logout(&self, session: Option<Session>) -> Result<()> {
        let Some(session) = session else {
            trace!("logout without a session");
            return Ok(());
        };

        info!("logout of session {}", session.id);
        self.0
            .delete_session(&session.id)
            .await
            .map_err(|()| Error::Internal)
    }

    /// Anyone may submit. Content is stored as given, empty fields
    /// included; there is no validation by policy.
    pub async fn submit(&self, form: FeedbackForm, session: Option<&Session>) -> Result<Feedback> {
        let submitted_by = session.and_then(|s| s.user_id);
        let feedback = Feedback::new(form, submitted_by, now()?);

        self.0
            .insert_feedback(&feedback)
            .await
            .map_err(|()| Error::Internal)?;

        info!(
            "feedback {} submitted{}",
            feedback.id,
            if submitted_by.is_some() { " by a user" } else { "" }
        );
        Ok(feedback)
    }

    /// The login gate. Reads the session, never changes it.
    pub fn authenticate(self: &Arc<Self>, session: Option<Session>) -> Result<DeskAuthed> {
        let Some(session) = session else {
            trace!("no session, redirecting to login");
            return Err(Error::Unauthorized);
        };

        let Some(user_id) = session.user_id else {
            trace!("session {} not logged in", session.id);
            return Err(Error::Unauthorized);
        };

        Ok(DeskAuthed {
            desk: Arc::clone(self),
            session,
            user_id,
        })
    }

    pub async fn purge_expired_sessions(&self) -> Result<usize> {
        self.0
            .purge_expired_sessions(now()?)
            .await
            .map_err(|()| Error::Internal)
    }
}

impl DeskAuthed {
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session.id
    }

    fn backend(&self) -> &Backend {
        &self.desk.0
    }

    /// Every feedback, newest first, with the submitter's username looked
    /// up at read time.
    pub async fn list_all(&self) -> Result<Vec<Attributed>> {
        let feedbacks = self
            .backend()
            .all_feedback()
            .await
            .map_err(|()| Error::Internal)?;

        let mut ids: Vec<UserId> = feedbacks.iter().filter_map(|fb| fb.submitted_by).collect();
        ids.sort();
        ids.dedup();

        let usernames: HashMap<UserId, String> = self
            .backend()
            .users_by_ids(&ids)
            .await
            .map_err(|()| Error::Internal)?
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect();

        Ok(feedbacks
            .into_iter()
            .map(|feedback| {
                let submitter = match feedback.submitted_by {
                    None => Submitter::Anonymous,
                    Some(id) => match usernames.get(&id) {
                        Some(name) => Submitter::User(name.clone()),
                        None => {
                            warn!("feedback {} references missing user {id}", feedback.id);
                            Submitter::Unknown
                        }
                    },
                };
                Attributed {
                    feedback,
                    submitter,
                }
            })
            .collect())
    }

    /// Feedback whose name or email contains `search`, ignoring case,
    /// newest first. Not scoped to the caller: every logged-in user sees
    /// everyone's feedback.
    pub async fn list_filtered(&self, search: &str) -> Result<Vec<Feedback>> {
        let needle = search.to_lowercase();

        let mut feedbacks = self
            .backend()
            .all_feedback()
            .await
            .map_err(|()| Error::Internal)?;

        feedbacks.retain(|fb| fb.matches(&needle));

        trace!("search {search:?}: {} matches", feedbacks.len());
        Ok(feedbacks)
    }

    pub async fn dashboard(&self, search: String) -> Result<Dashboard> {
        let feedbacks = self.list_filtered(&search).await?;
        let counts = dashboard::per_day(&feedbacks);

        Ok(Dashboard {
            feedbacks,
            counts,
            search,
        })
    }

    /// The full list plus the pending confirmation, which is consumed.
    pub async fn admin_feedbacks(&self) -> Result<AdminList> {
        let feedbacks = self.list_all().await?;
        let success = self
            .backend()
            .take_success(&self.session.id)
            .await
            .map_err(|()| Error::Internal)?;

        Ok(AdminList { feedbacks, success })
    }

    pub async fn get(&self, id: &FeedbackId) -> Result<Feedback> {
        Ok(self.backend().find_feedback(id).await?)
    }

    pub async fn update(&self, id: &FeedbackId, form: &FeedbackForm) -> Result<()> {
        self.backend().update_feedback(id, form).await?;

        info!("feedback {id} updated by {}", self.user_id);
        self.flash(UPDATED).await
    }

    pub async fn delete(&self, id: &FeedbackId) -> Result<()> {
        self.backend().delete_feedback(id).await?;

        info!("feedback {id} deleted by {}", self.user_id);
        self.flash(DELETED).await
    }

    /// Only updates a session that still exists: a logout racing this
    /// request must not bring the session back.
    async fn flash(&self, message: &str) -> Result<()> {
        let set = self
            .backend()
            .set_success(&self.session.id, message)
            .await
            .map_err(|()| Error::Internal)?;

        if !set {
            debug!("session {} gone before flash {message:?}", self.session.id);
        }
        Ok(())
    }
}

fn now() -> Result<Timestamp> {
    Timestamp::now().map_err(|()| Error::Internal)
}

/// Runs slow hashing work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> result::Result<T, ()> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("blocking task failed: {e:?}");
            Error::Internal
        })?
        .map_err(|()| Error::Internal)
}

#[cfg(test)]
pub mod test {
    use super::*;

    use crate::backend::test::create_backend;
    use tempfile::TempDir;

    pub async fn create_desk() -> (Arc<FeedbackDesk>, TempDir) {
        let (backend, dir) = create_backend().await;
        (Arc::new(FeedbackDesk::new(backend)), dir)
    }

    fn registration(username: &str, password: &str) -> Registration {
        Registration {
            username: username.into(),
            email: format!("{username}@example.org"),
            password: password.into(),
        }
    }

    fn credentials(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    fn form(name: &str, email: &str) -> FeedbackForm {
        FeedbackForm {
            name: name.into(),
            email: email.into(),
            message: format!("from {name}"),
        }
    }

    async fn logged_in(desk: &Arc<FeedbackDesk>, username: &str) -> DeskAuthed {
        desk.register(registration(username, "pw")).await.unwrap();

        let LoginOutcome::LoggedIn(session) =
            desk.login(credentials(username, "pw"), None).await.unwrap()
        else {
            panic!("expected login");
        };

        desk.authenticate(Some(session)).unwrap()
    }

    #[tokio::test]
    async fn register_then_login() {
        let (desk, _dir) = create_desk().await;

        let RegisterOutcome::Registered(user_id) =
            desk.register(registration("ada", "s3cret")).await.unwrap()
        else {
            panic!("expected registration");
        };

        let LoginOutcome::LoggedIn(session) =
            desk.login(credentials("ada", "s3cret"), None).await.unwrap()
        else {
            panic!("expected login");
        };
        assert_eq!(session.user_id, Some(user_id));

        // and the stored session resolves back to the user
        let loaded = desk
            .load_session(Some(&session.id.to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(desk.authenticate(Some(loaded)).unwrap().user_id(), user_id);
    }

    #[tokio::test]
    async fn stored_password_is_hashed() {
        let (desk, _dir) = create_desk().await;

        desk.register(registration("ada", "s3cret")).await.unwrap();

        let user = desk.0.find_user("ada").await.unwrap();
        assert_ne!(user.pwhash, "s3cret");
        assert!(auth::verify_password("s3cret", &user.pwhash));
    }

    #[tokio::test]
    async fn duplicate_username() {
        let (desk, _dir) = create_desk().await;

        desk.register(registration("ada", "one")).await.unwrap();
        let outcome = desk.register(registration("ada", "two")).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::UsernameTaken);

        // the first password still works, the second was never stored
        assert!(matches!(
            desk.login(credentials("ada", "one"), None).await.unwrap(),
            LoginOutcome::LoggedIn(_)
        ));
        assert!(matches!(
            desk.login(credentials("ada", "two"), None).await.unwrap(),
            LoginOutcome::InvalidCredentials
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_has_one_winner() {
        let (desk, _dir) = create_desk().await;

        let attempts: Vec<_> = (0..6)
            .map(|i| {
                let desk = Arc::clone(&desk);
                tokio::spawn(async move {
                    desk.register(registration("race", &format!("pw{i}")))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if let RegisterOutcome::Registered(_) = attempt.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn invalid_credentials_are_indistinguishable() {
        let (desk, _dir) = create_desk().await;

        desk.register(registration("ada", "right")).await.unwrap();

        let unknown = desk.login(credentials("bob", "right"), None).await.unwrap();
        let wrong = desk.login(credentials("ada", "wrong"), None).await.unwrap();

        assert!(matches!(unknown, LoginOutcome::InvalidCredentials));
        assert!(matches!(wrong, LoginOutcome::InvalidCredentials));
    }

    #[tokio::test]
    async fn login_replaces_existing_session() {
        let (desk, _dir) = create_desk().await;
        desk.register(registration("ada", "pw")).await.unwrap();

        let LoginOutcome::LoggedIn(first) =
            desk.login(credentials("ada", "pw"), None).await.unwrap()
        else {
            panic!("expected login");
        };
        let LoginOutcome::LoggedIn(second) = desk
            .login(credentials("ada", "pw"), Some(first.clone()))
            .await
            .unwrap()
        else {
            panic!("expected login");
        };

        assert_ne!(first.id, second.id);
        assert!(desk
            .load_session(Some(&first.id.to_string()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn logout_destroys_session() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;
        let cookie = authed.session.id.to_string();

        desk.logout(Some(authed.session.clone())).await.unwrap();

        let replayed = desk.load_session(Some(&cookie)).await.unwrap();
        assert!(replayed.is_none());
        assert_eq!(desk.authenticate(replayed).err(), Some(Error::Unauthorized));
    }

    #[tokio::test]
    async fn logout_during_edit_stays_logged_out() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;
        let cookie = authed.session_id().to_string();
        let fb = desk.submit(form("Alice", "a@x"), None).await.unwrap();

        // another request logs out after this one passed the gate
        desk.logout(Some(authed.session.clone())).await.unwrap();
        authed.delete(&fb.id).await.unwrap();
        authed
            .update(&FeedbackId::new(), &form("x", "x"))
            .await
            .unwrap_err();

        assert!(desk.load_session(Some(&cookie)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn gate() {
        let (desk, _dir) = create_desk().await;

        assert_eq!(desk.authenticate(None).err(), Some(Error::Unauthorized));

        // a session without a user, e.g. one only carrying a flash
        let anonymous = Session::new(Timestamp::from_i64(1));
        assert_eq!(
            desk.authenticate(Some(anonymous)).err(),
            Some(Error::Unauthorized)
        );

        assert!(desk.load_session(Some("not-a-uuid")).await.unwrap().is_none());
        assert!(desk
            .load_session(Some(&SessionId::new().to_string()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn submit_attribution() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;

        let by_user = desk
            .submit(form("Ada", "ada@example.org"), Some(&authed.session))
            .await
            .unwrap();
        let anon = desk.submit(form("Anon", "anon@example.org"), None).await.unwrap();

        assert_eq!(by_user.submitted_by, Some(authed.user_id()));
        assert_eq!(anon.submitted_by, None);

        let all = authed.list_all().await.unwrap();
        let submitter = |id: FeedbackId| {
            all.iter()
                .find(|a| a.feedback.id == id)
                .map(|a| a.submitter.clone())
                .unwrap()
        };
        assert_eq!(submitter(by_user.id), Submitter::User("ada".into()));
        assert_eq!(submitter(anon.id), Submitter::Anonymous);
    }

    #[tokio::test]
    async fn submit_accepts_empty_fields() {
        let (desk, _dir) = create_desk().await;

        let fb = desk.submit(FeedbackForm::default(), None).await.unwrap();

        assert_eq!(fb.name, "");
        assert_eq!(fb.message, "");
    }

    #[tokio::test]
    async fn dangling_submitter_is_unknown() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;

        let mut ghost = Session::new(Timestamp::from_i64(1));
        ghost.user_id = Some(UserId::new());
        desk.submit(form("Ghost", "g@example.org"), Some(&ghost))
            .await
            .unwrap();

        let all = authed.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].submitter, Submitter::Unknown);
    }

    #[tokio::test]
    async fn filtering() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;

        for (name, email) in [
            ("Alice", "alice@example.org"),
            ("Bob", "bob@EXAMPLE.org"),
            ("Carol", "carol@elsewhere.net"),
        ] {
            desk.submit(form(name, email), None).await.unwrap();
        }

        let names = |fbs: Vec<Feedback>| {
            let mut names: Vec<_> = fbs.into_iter().map(|f| f.name).collect();
            names.sort();
            names
        };

        let everything = names(authed.list_filtered("").await.unwrap());
        let all: Vec<_> = authed
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.feedback)
            .collect();
        assert_eq!(everything, names(all));
        assert_eq!(everything.len(), 3);

        assert_eq!(names(authed.list_filtered("example").await.unwrap()), ["Alice", "Bob"]);
        assert_eq!(names(authed.list_filtered("CAROL").await.unwrap()), ["Carol"]);
        assert_eq!(names(authed.list_filtered("o").await.unwrap()), ["Alice", "Bob", "Carol"]);
        assert!(authed.list_filtered("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dashboard_counts_follow_filter() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;

        desk.submit(form("Alice", "a@x"), None).await.unwrap();
        desk.submit(form("Bob", "b@x"), None).await.unwrap();

        let all = authed.dashboard(String::new()).await.unwrap();
        assert_eq!(all.counts.counts.iter().sum::<u32>(), 2);

        let bob = authed.dashboard("bob".into()).await.unwrap();
        assert_eq!(bob.feedbacks.len(), 1);
        assert_eq!(bob.counts.counts.iter().sum::<u32>(), 1);
        assert_eq!(bob.search, "bob");
    }

    #[tokio::test]
    async fn update_and_delete() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;

        let fb = desk
            .submit(form("Alice", "a@x"), Some(&authed.session))
            .await
            .unwrap();

        authed.update(&fb.id, &form("Alicia", "alicia@x")).await.unwrap();
        let updated = authed.get(&fb.id).await.unwrap();
        assert_eq!(updated.name, "Alicia");
        assert_eq!(updated.message, "from Alicia");
        assert_eq!(updated.created, fb.created);
        assert_eq!(updated.submitted_by, fb.submitted_by);

        authed.delete(&fb.id).await.unwrap();
        assert_eq!(authed.get(&fb.id).await.err(), Some(Error::NotFound));
        assert_eq!(authed.delete(&fb.id).await.err(), Some(Error::NotFound));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;
        let existing = desk.submit(form("Alice", "a@x"), None).await.unwrap();

        let missing = FeedbackId::new();
        assert_eq!(
            authed.update(&missing, &form("x", "y")).await.err(),
            Some(Error::NotFound)
        );

        // nothing changed, and no confirmation was queued
        let admin = authed.admin_feedbacks().await.unwrap();
        assert_eq!(admin.feedbacks.len(), 1);
        assert_eq!(admin.feedbacks[0].feedback, existing);
        assert_eq!(admin.success, None);
    }

    #[tokio::test]
    async fn confirmation_is_shown_once() {
        let (desk, _dir) = create_desk().await;
        let authed = logged_in(&desk, "ada").await;
        let fb = desk.submit(form("Alice", "a@x"), None).await.unwrap();

        authed.delete(&fb.id).await.unwrap();

        let first = authed.admin_feedbacks().await.unwrap();
        assert_eq!(first.success.as_deref(), Some(DELETED));

        let second = authed.admin_feedbacks().await.unwrap();
        assert_eq!(second.success, None);
    }
}
