use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, trace};
use serde::Deserialize;
use warp::http::{header, StatusCode, Uri};
use warp::reply::{self, Response};
use warp::{Filter, Rejection, Reply};

use crate::auth::{Credentials, Registration};
use crate::desk::{DeskAuthed, Error, FeedbackDesk, LoginOutcome, RegisterOutcome};
use crate::feedback::{FeedbackForm, FeedbackId};
use crate::session::{self, Session, SESSION_COOKIE};
use crate::views;

const FORM_LIMIT: u64 = 16 * 1024;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    search: String,
}

pub fn routes(
    desk: Arc<FeedbackDesk>,
    secure: bool,
    static_dir: PathBuf,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let index = warp::path::end()
        .and(warp::get())
        .map(|| reply::html(views::index()));

    let submit = warp::path!("submit")
        .and(warp::post())
        .and(form::<FeedbackForm>())
        .and(session(&desk))
        .and(with_desk(&desk))
        .and_then(submit);

    let register = {
        let page = warp::path!("register")
            .and(warp::get())
            .map(|| reply::html(views::register()));

        let create = warp::path!("register")
            .and(warp::post())
            .and(form::<Registration>())
            .and(with_desk(&desk))
            .and_then(register);

        page.or(create)
    };

    let login = {
        let page = warp::path!("login")
            .and(warp::get())
            .map(|| reply::html(views::login()));

        let attempt = warp::path!("login")
            .and(warp::post())
            .and(form::<Credentials>())
            .and(session(&desk))
            .and(with_desk(&desk))
            .and(with_secure(secure))
            .and_then(login);

        page.or(attempt)
    };

    let logout = warp::path!("logout")
        .and(warp::get())
        .and(session(&desk))
        .and(with_desk(&desk))
        .and(with_secure(secure))
        .and_then(logout);

    let dashboard = warp::path!("dashboard")
        .and(warp::get())
        .and(authed(&desk))
        .and(warp::query::<SearchQuery>())
        .and(with_secure(secure))
        .and_then(dashboard);

    let admin = {
        let list = warp::path!("admin" / "feedbacks")
            .and(warp::get())
            .and(authed(&desk))
            .and(with_secure(secure))
            .and_then(admin_feedbacks);

        let edit = warp::path!("feedbacks" / String / "edit")
            .and(warp::get())
            .and(authed(&desk))
            .and(with_secure(secure))
            .and_then(edit_feedback);

        let update = warp::path!("feedbacks" / String / "update")
            .and(warp::post())
            .and(authed(&desk))
            .and(form::<FeedbackForm>())
            .and(with_secure(secure))
            .and_then(update_feedback);

        let delete = warp::path!("feedbacks" / String / "delete")
            .and(warp::post())
            .and(authed(&desk))
            .and(with_secure(secure))
            .and_then(delete_feedback);

        list.or(edit).or(update).or(delete)
    };

    let assets = warp::get().and(warp::fs::dir(static_dir));

    index
        .or(submit)
        .or(register)
        .or(login)
        .or(logout)
        .or(dashboard)
        .or(admin)
        .or(assets)
        .recover(recover)
        .with(warp::log("feedback_desk"))
}

fn with_desk(
    desk: &Arc<FeedbackDesk>,
) -> impl Filter<Extract = (Arc<FeedbackDesk>,), Error = Infallible> + Clone {
    let desk = Arc::clone(desk);
    warp::any().map(move || Arc::clone(&desk))
}

fn with_secure(secure: bool) -> impl Filter<Extract = (bool,), Error = Infallible> + Clone {
    warp::any().map(move || secure)
}

fn form<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

/// The caller's session, if the cookie names a live one.
fn session(
    desk: &Arc<FeedbackDesk>,
) -> impl Filter<Extract = (Option<Session>,), Error = Rejection> + Clone {
    warp::cookie::optional::<String>(SESSION_COOKIE)
        .and(with_desk(desk))
        .and_then(|cookie: Option<String>, desk: Arc<FeedbackDesk>| async move {
            desk.load_session(cookie.as_deref())
                .await
                .map_err(Rejection::from)
        })
}

/// Rejects with `Error::Unauthorized` unless logged in; `recover` turns
/// that into a redirect to the login page.
fn authed(desk: &Arc<FeedbackDesk>) -> impl Filter<Extract = (DeskAuthed,), Error = Rejection> + Clone {
    session(desk)
        .and(with_desk(desk))
        .and_then(|session, desk: Arc<FeedbackDesk>| async move {
            desk.authenticate(session).map_err(Rejection::from)
        })
}

fn redirect(to: &'static str) -> impl Reply {
    warp::redirect::found(Uri::from_static(to))
}

/// Re-sends the session cookie so the browser's copy slides along with
/// the server-side idle expiry.
fn keep_alive(reply: impl Reply, authed: &DeskAuthed, secure: bool) -> Response {
    reply::with_header(
        reply,
        header::SET_COOKIE,
        session::cookie(authed.session_id(), secure),
    )
    .into_response()
}

fn html_with_status(page: String, status: StatusCode) -> Response {
    reply::with_status(reply::html(page), status).into_response()
}

fn parse_id(id: &str) -> Result<FeedbackId, Rejection> {
    id.parse().map_err(|()| {
        trace!("malformed feedback id {id:?}");
        Rejection::from(Error::NotFound)
    })
}

async fn submit(
    form: FeedbackForm,
    session: Option<Session>,
    desk: Arc<FeedbackDesk>,
) -> Result<Response, Rejection> {
    desk.submit(form, session.as_ref()).await?;

    Ok(reply::html(views::thanks()).into_response())
}

async fn register(
    registration: Registration,
    desk: Arc<FeedbackDesk>,
) -> Result<Response, Rejection> {
    let page = match desk.register(registration).await? {
        RegisterOutcome::Registered(_) => {
            views::message("Registration successful.", Some(("/login", "Login")))
        }
        RegisterOutcome::UsernameTaken => views::message("Username already exists", None),
    };

    Ok(reply::html(page).into_response())
}

async fn login(
    credentials: Credentials,
    current: Option<Session>,
    desk: Arc<FeedbackDesk>,
    secure: bool,
) -> Result<Response, Rejection> {
    match desk.login(credentials, current).await? {
        LoginOutcome::LoggedIn(session) => Ok(reply::with_header(
            redirect("/dashboard"),
            header::SET_COOKIE,
            session::cookie(&session.id, secure),
        )
        .into_response()),
        LoginOutcome::InvalidCredentials => {
            Ok(reply::html(views::message("Invalid credentials", Some(("/login", "Try again"))))
                .into_response())
        }
    }
}

async fn logout(
    session: Option<Session>,
    desk: Arc<FeedbackDesk>,
    secure: bool,
) -> Result<Response, Rejection> {
    desk.logout(session).await?;

    Ok(reply::with_header(
        redirect("/login"),
        header::SET_COOKIE,
        session::expired_cookie(secure),
    )
    .into_response())
}

async fn dashboard(
    authed: DeskAuthed,
    query: SearchQuery,
    secure: bool,
) -> Result<Response, Rejection> {
    trace!("dashboard for {}, search {:?}", authed.user_id(), query.search);
    let dash = authed.dashboard(query.search).await?;

    Ok(keep_alive(reply::html(views::dashboard(&dash)), &authed, secure))
}

async fn admin_feedbacks(authed: DeskAuthed, secure: bool) -> Result<Response, Rejection> {
    let list = authed.admin_feedbacks().await?;

    Ok(keep_alive(reply::html(views::feedbacks(&list)), &authed, secure))
}

async fn edit_feedback(
    id: String,
    authed: DeskAuthed,
    secure: bool,
) -> Result<Response, Rejection> {
    let feedback = authed.get(&parse_id(&id)?).await?;

    Ok(keep_alive(reply::html(views::edit_feedback(&feedback)), &authed, secure))
}

async fn update_feedback(
    id: String,
    authed: DeskAuthed,
    form: FeedbackForm,
    secure: bool,
) -> Result<Response, Rejection> {
    authed.update(&parse_id(&id)?, &form).await?;

    Ok(keep_alive(redirect("/admin/feedbacks"), &authed, secure))
}

async fn delete_feedback(
    id: String,
    authed: DeskAuthed,
    secure: bool,
) -> Result<Response, Rejection> {
    authed.delete(&parse_id(&id)?).await?;

    Ok(keep_alive(redirect("/admin/feedbacks"), &authed, secure))
}

/// Domain errors become pages; anything else is left to warp.
async fn recover(rejection: Rejection) -> Result<Response, Rejection> {
    let Some(&e) = rejection.find::<Error>() else {
        return Err(rejection);
    };

    let status: StatusCode = e.into();
    Ok(match e {
        Error::Unauthorized => redirect("/login").into_response(),
        Error::NotFound => html_with_status(views::message("Feedback not found", None), status),
        Error::Internal => {
            error!("request failed with an internal error");
            html_with_status(views::message("Something went wrong.", None), status)
        }
    })
}
