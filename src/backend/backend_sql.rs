use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};

use sqlx::{
    sqlite::SqliteConnectOptions, FromRow, Pool, Sqlite, SqlitePool, Transaction,
};

use log::{debug, error, info};

use crate::backend::{FindError, InsertError};
use crate::feedback::{Feedback, FeedbackForm, FeedbackId};
use crate::session::{Session, SessionId, SESSION_TTL_SECS};
use crate::time::Timestamp;
use crate::user::{User, UserId};

type Result<T> = std::result::Result<T, ()>;

/// Extended result code for a violated UNIQUE constraint.
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

pub struct Backend(pub Pool<Sqlite>);

fn into_sql(path: &Path) -> PathBuf {
    path.join("feedback.sqlite")
}

impl Backend {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).map_err(|e| {
            error!("couldn't create data dir {data_dir:?}: {e:?}");
        })?;

        let db_path = into_sql(data_dir);
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            error!("couldn't open {db_path:?}: {e:?}");
        })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                error!("migration: {e:?}");
            })?;

        info!("Using {db_path:?}");
        Ok(Self(pool))
    }
}

impl Backend {
    async fn transact<'t, T, R, F>(&self, transaction: T) -> Result<R>
    where
        T: FnOnce(Transaction<'t, Sqlite>) -> F,
        F: Future<Output = Result<(Transaction<'t, Sqlite>, R)>>,
    {
        let tx = self.0.begin().await.map_err(|e| {
            error!("error beginning transaction: {:?}", e);
        })?;

        let (tx, r) = transaction(tx).await?;

        tx.commit().await.map_err(|e| {
            error!("error committing transaction: {:?}", e);
        })?;

        Ok(r)
    }
}

#[derive(FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    pwhash: String,
}

#[derive(FromRow)]
struct FeedbackRow {
    id: String,
    name: String,
    email: String,
    message: String,
    submitted_by: Option<String>,
    created: Timestamp,
}

#[derive(FromRow)]
struct SessionRow {
    id: String,
    user_id: Option<String>,
    success: Option<String>,
    expires: Timestamp,
}

fn parse_id<I: std::str::FromStr<Err = ()>>(s: &str) -> Result<I> {
    s.parse().map_err(|()| {
        error!("invalid stored id {s:?}");
    })
}

impl TryFrom<UserRow> for User {
    type Error = ();

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: parse_id(&row.id)?,
            username: row.username,
            email: row.email,
            pwhash: row.pwhash,
        })
    }
}

impl TryFrom<FeedbackRow> for Feedback {
    type Error = ();

    fn try_from(row: FeedbackRow) -> Result<Self> {
        Ok(Feedback {
            id: parse_id(&row.id)?,
            name: row.name,
            email: row.email,
            message: row.message,
            submitted_by: row.submitted_by.as_deref().map(parse_id).transpose()?,
            created: row.created,
        })
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = ();

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Session {
            id: parse_id(&row.id)?,
            user_id: row.user_id.as_deref().map(parse_id).transpose()?,
            success: row.success,
            expires: row.expires,
        })
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE),
        _ => false,
    }
}

impl Backend {
    /// Fails with `Conflict` if the username is taken.
    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        pwhash: &str,
    ) -> std::result::Result<User, InsertError> {
        let user = User {
            id: UserId::new(),
            username: username.into(),
            email: email.into(),
            pwhash: pwhash.into(),
        };

        sqlx::query(
            "
            INSERT INTO users
            (id, username, email, pwhash)
            VALUES
            (?, ?, ?, ?)
            ",
        )
        .bind(user.id.to_string())
        .bind(username)
        .bind(email)
        .bind(pwhash)
        .execute(&self.0)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                InsertError::Conflict
            } else {
                error!("insert user: {e:?}");
                InsertError::Internal
            }
        })?;

        Ok(user)
    }

    pub async fn find_user(&self, username: &str) -> std::result::Result<User, FindError> {
        let row: UserRow = sqlx::query_as(
            "
            SELECT *
            FROM users
            WHERE username = ?
            ",
        )
        .bind(username)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("find user: {e:?}");
                FindError::Internal
            }
        })?;

        row.try_into().map_err(|()| FindError::Internal)
    }

    /// Users matching any of `ids`; unknown ids are skipped.
    pub async fn users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let sql = format!(
            "SELECT * FROM users WHERE id IN ({})",
            vec!["?"; ids.len()].join(", ")
        );

        let mut query = sqlx::query_as::<_, UserRow>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }

        query
            .fetch_all(&self.0)
            .await
            .map_err(|e| {
                error!("couldn't look up users: {e:?}");
            })?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }
}

impl Backend {
    pub async fn insert_feedback(&self, feedback: &Feedback) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO feedback
            (id, name, email, message, submitted_by, created)
            VALUES
            (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(feedback.id.to_string())
        .bind(&feedback.name)
        .bind(&feedback.email)
        .bind(&feedback.message)
        .bind(feedback.submitted_by.map(|id| id.to_string()))
        .bind(feedback.created)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("error inserting feedback: {e:?}");
        })
    }

    /// Newest first.
    pub async fn all_feedback(&self) -> Result<Vec<Feedback>> {
        sqlx::query_as::<_, FeedbackRow>(
            "
            SELECT *
            FROM feedback
            ORDER BY created DESC, rowid DESC
            ",
        )
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting feedback: {e:?}");
        })?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    pub async fn find_feedback(&self, id: &FeedbackId) -> std::result::Result<Feedback, FindError> {
        let row: FeedbackRow = sqlx::query_as(
            "
            SELECT *
            FROM feedback
            WHERE id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("find feedback {id}: {e:?}");
                FindError::Internal
            }
        })?;

        row.try_into().map_err(|()| FindError::Internal)
    }

    /// Overwrites name, email and message; `created` and `submitted_by` are kept.
    pub async fn update_feedback(
        &self,
        id: &FeedbackId,
        update: &FeedbackForm,
    ) -> std::result::Result<(), FindError> {
        let done = sqlx::query(
            "
            UPDATE feedback
            SET name = ?, email = ?, message = ?
            WHERE id = ?
            ",
        )
        .bind(&update.name)
        .bind(&update.email)
        .bind(&update.message)
        .bind(id.to_string())
        .execute(&self.0)
        .await
        .map_err(|e| {
            error!("update feedback {id}: {e:?}");
            FindError::Internal
        })?;

        match done.rows_affected() {
            0 => Err(FindError::NotFound),
            _ => Ok(()),
        }
    }

    pub async fn delete_feedback(&self, id: &FeedbackId) -> std::result::Result<(), FindError> {
        let done = sqlx::query("DELETE FROM feedback WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.0)
            .await
            .map_err(|e| {
                error!("delete feedback {id}: {e:?}");
                FindError::Internal
            })?;

        match done.rows_affected() {
            0 => Err(FindError::NotFound),
            _ => Ok(()),
        }
    }
}

impl Backend {
    /// Looks up a live session and slides its expiry forward. Expired
    /// sessions are removed and reported as absent.
    pub async fn touch_session(&self, id: &SessionId, now: Timestamp) -> Result<Option<Session>> {
        let id_str = id.to_string();

        self.transact(|mut tx| async move {
            let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
                .bind(&id_str)
                .fetch_optional(&mut tx)
                .await
                .map_err(|e| {
                    error!("couldn't query for session {id_str}: {e:?}");
                })?;

            let Some(row) = row else {
                return Ok((tx, None));
            };
            let mut session = Session::try_from(row)?;

            if session.is_expired(now) {
                debug!("session {id_str} expired");
                sqlx::query("DELETE FROM sessions WHERE id = ?")
                    .bind(&id_str)
                    .execute(&mut tx)
                    .await
                    .map_err(|e| {
                        error!("couldn't remove expired session: {e:?}");
                    })?;
                return Ok((tx, None));
            }

            session.expires = now.plus_secs(SESSION_TTL_SECS);
            sqlx::query("UPDATE sessions SET expires = ? WHERE id = ?")
                .bind(session.expires)
                .bind(&id_str)
                .execute(&mut tx)
                .await
                .map_err(|e| {
                    error!("couldn't refresh session: {e:?}");
                })?;

            Ok((tx, Some(session)))
        })
        .await
    }

    /// Inserts or replaces the whole record, dropping expired sessions
    /// in the same transaction.
    pub async fn save_session(&self, session: &Session, now: Timestamp) -> Result<()> {
        let id_str = session.id.to_string();

        self.transact(|mut tx| async move {
            sqlx::query("DELETE FROM sessions WHERE expires <= ?")
                .bind(now)
                .execute(&mut tx)
                .await
                .map_err(|e| {
                    error!("couldn't drop expired sessions: {e:?}");
                })?;

            sqlx::query(
                "
                INSERT INTO sessions
                (id, user_id, success, expires)
                VALUES
                (?, ?, ?, ?)
                ON CONFLICT (id)
                DO
                    UPDATE SET
                        user_id = excluded.user_id,
                        success = excluded.success,
                        expires = excluded.expires
                ",
            )
            .bind(&id_str)
            .bind(session.user_id.map(|id| id.to_string()))
            .bind(&session.success)
            .bind(session.expires)
            .execute(&mut tx)
            .await
            .map_err(|e| {
                error!("save session {id_str}: {e:?}");
            })?;

            Ok((tx, ()))
        })
        .await
    }

    /// Sets the flash message on an existing session. Returns false when
    /// there is no such session; nothing is inserted.
    pub async fn set_success(&self, id: &SessionId, message: &str) -> Result<bool> {
        sqlx::query("UPDATE sessions SET success = ? WHERE id = ?")
            .bind(message)
            .bind(id.to_string())
            .execute(&self.0)
            .await
            .map(|done| done.rows_affected() > 0)
            .map_err(|e| {
                error!("set flash for {id}: {e:?}");
            })
    }

    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.0)
            .await
            .map(|_| ())
            .map_err(|e| {
                error!("delete session: {e:?}");
            })
    }

    /// Returns the flash message and clears it in the same transaction.
    pub async fn take_success(&self, id: &SessionId) -> Result<Option<String>> {
        let id_str = id.to_string();

        self.transact(|mut tx| async move {
            let success: Option<Option<String>> =
                sqlx::query_scalar("SELECT success FROM sessions WHERE id = ?")
                    .bind(&id_str)
                    .fetch_optional(&mut tx)
                    .await
                    .map_err(|e| {
                        error!("couldn't read flash for {id_str}: {e:?}");
                    })?;

            let success = success.flatten();
            if success.is_some() {
                sqlx::query("UPDATE sessions SET success = NULL WHERE id = ?")
                    .bind(&id_str)
                    .execute(&mut tx)
                    .await
                    .map_err(|e| {
                        error!("couldn't clear flash for {id_str}: {e:?}");
                    })?;
            }

            Ok((tx, success))
        })
        .await
    }

    pub async fn purge_expired_sessions(&self, now: Timestamp) -> Result<usize> {
        sqlx::query("DELETE FROM sessions WHERE expires <= ?")
            .bind(now)
            .execute(&self.0)
            .await
            .map(|done| done.rows_affected() as usize)
            .map_err(|e| {
                error!("purge sessions: {e:?}");
            })
    }
}
