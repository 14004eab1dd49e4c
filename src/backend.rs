#[derive(Debug)]
pub enum FindError {
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum InsertError {
    /// a uniqueness constraint rejected the insert
    Conflict,
    Internal,
}

#[cfg(feature = "backend-sql")]
mod backend_sql;
#[cfg(feature = "backend-sql")]
pub use backend_sql::*;

#[cfg(not(feature = "backend-sql"))]
mod backend_file;
#[cfg(not(feature = "backend-sql"))]
pub use backend_file::*;


#[cfg(test)]
mod backend_test {
    use super::test::create_backend;
    use super::*;
    use crate::feedback::{Feedback, FeedbackForm};
    use crate::session::{Session, SESSION_TTL_SECS};
    use crate::time::Timestamp;
    use crate::user::UserId;

    fn form(name: &str) -> FeedbackForm {
        FeedbackForm {
            name: name.into(),
            email: format!("{name}@example.org"),
            message: "msg".into(),
        }
    }

    #[tokio::test]
    async fn users() {
        let (backend, _dir) = create_backend().await;

        let user = backend.create_user("ada", "ada@example.org", "hash").await.unwrap();
        assert_eq!(user.username, "ada");

        let found = backend.find_user("ada").await.unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.pwhash, "hash");

        assert!(matches!(
            backend.find_user("bob").await,
            Err(FindError::NotFound)
        ));

        assert!(matches!(
            backend.create_user("ada", "other@example.org", "hash2").await,
            Err(InsertError::Conflict)
        ));

        let bob = backend.create_user("bob", "bob@example.org", "h").await.unwrap();
        let mut found = backend.users_by_ids(&[bob.id, UserId::new(), user.id]).await.unwrap();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        let names: Vec<_> = found.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["ada", "bob"]);

        assert!(backend.users_by_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn feedback_crud() {
        let (backend, _dir) = create_backend().await;

        let older = Feedback::new(form("a"), None, Timestamp::from_i64(10));
        let newer = Feedback::new(form("b"), Some(UserId::new()), Timestamp::from_i64(20));
        backend.insert_feedback(&older).await.unwrap();
        backend.insert_feedback(&newer).await.unwrap();

        let all = backend.all_feedback().await.unwrap();
        assert_eq!(all, [newer.clone(), older.clone()]);

        assert_eq!(backend.find_feedback(&older.id).await.unwrap(), older);

        backend.update_feedback(&older.id, &form("c")).await.unwrap();
        let updated = backend.find_feedback(&older.id).await.unwrap();
        assert_eq!(updated.name, "c");
        assert_eq!(updated.email, "c@example.org");
        assert_eq!(updated.created, older.created);
        assert_eq!(updated.submitted_by, older.submitted_by);

        backend.delete_feedback(&older.id).await.unwrap();
        assert!(matches!(
            backend.find_feedback(&older.id).await,
            Err(FindError::NotFound)
        ));
        assert!(matches!(
            backend.delete_feedback(&older.id).await,
            Err(FindError::NotFound)
        ));
        assert!(matches!(
            backend.update_feedback(&older.id, &form("d")).await,
            Err(FindError::NotFound)
        ));

        assert_eq!(backend.all_feedback().await.unwrap(), [newer]);
    }

    #[tokio::test]
    async fn sessions() {
        let (backend, _dir) = create_backend().await;
        let now = Timestamp::from_i64(1000);

        let mut session = Session::new(now);
        session.user_id = Some(UserId::new());
        backend.save_session(&session, now).await.unwrap();

        // touching slides the expiry
        let later = now.plus_secs(600);
        let touched = backend.touch_session(&session.id, later).await.unwrap().unwrap();
        assert_eq!(touched.user_id, session.user_id);
        assert_eq!(touched.expires, Session::new(later).expires);

        // flash is one-shot
        assert!(backend.set_success(&session.id, "done").await.unwrap());
        assert_eq!(
            backend.take_success(&session.id).await.unwrap().as_deref(),
            Some("done")
        );
        assert_eq!(backend.take_success(&session.id).await.unwrap(), None);

        backend.delete_session(&session.id).await.unwrap();
        assert!(backend.touch_session(&session.id, later).await.unwrap().is_none());

        // a flash can't resurrect a deleted session
        assert!(!backend.set_success(&session.id, "late").await.unwrap());
        assert!(backend.touch_session(&session.id, later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_sessions() {
        let (backend, _dir) = create_backend().await;
        let now = Timestamp::from_i64(1000);

        let stale = Session::new(now);
        let fresh = Session::new(now.plus_secs(1800));
        backend.save_session(&stale, now).await.unwrap();
        backend.save_session(&fresh, now).await.unwrap();

        let after = stale.expires;
        assert!(backend.touch_session(&stale.id, after).await.unwrap().is_none());
        // and it's gone for good
        assert!(backend.touch_session(&stale.id, now).await.unwrap().is_none());

        let purged = backend.purge_expired_sessions(fresh.expires).await.unwrap();
        assert_eq!(purged, 1);
        assert!(backend.touch_session(&fresh.id, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn saving_sweeps_expired_sessions() {
        let (backend, _dir) = create_backend().await;
        let then = Timestamp::from_i64(1000);

        for _ in 0..5 {
            backend.save_session(&Session::new(then), then).await.unwrap();
        }

        let now = then.plus_secs(2 * SESSION_TTL_SECS);
        let live = Session::new(now);
        backend.save_session(&live, now).await.unwrap();

        // nothing left for the periodic purge
        assert_eq!(backend.purge_expired_sessions(now).await.unwrap(), 0);
        assert!(backend.touch_session(&live.id, now).await.unwrap().is_some());
    }
}
