use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};

mod args;
mod auth;
mod backend;
mod dashboard;
mod desk;
mod feedback;
mod id;
mod routes;
mod session;
mod time;
mod user;
mod views;

use args::Args;
use backend::Backend;
use desk::FeedbackDesk;

const SESSION_PURGE_SECS: u64 = 60 * 60;

#[tokio::main]
async fn main() -> ExitCode {
    // before anything reads the environment
    let dotenv = dotenvy::dotenv();

    pretty_env_logger::formatted_builder()
        .parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "feedback_desk=info".into()))
        .init();

    match dotenv {
        Ok(path) => info!("loaded {path:?}"),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("couldn't load .env: {e}"),
    }

    let args = Args::parse();

    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid listen address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Ok(backend) = Backend::new(args.data_dir()).await else {
        error!("couldn't open storage at {:?}", args.data_dir());
        return ExitCode::FAILURE;
    };
    let desk = Arc::new(FeedbackDesk::new(backend));

    spawn_session_purge(Arc::clone(&desk));

    let routes = routes::routes(desk, args.secure(), args.static_dir().to_path_buf());

    let (addr, server) =
        match warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal()) {
            Ok(bound) => bound,
            Err(e) => {
                error!("couldn't listen on {addr}: {e}");
                return ExitCode::FAILURE;
            }
        };

    info!("listening on http://{addr}");
    server.await;
    info!("shut down");

    ExitCode::SUCCESS
}

/// Sweeps expired sessions now and then every hour, so records whose
/// cookie never comes back don't pile up.
fn spawn_session_purge(desk: Arc<FeedbackDesk>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SESSION_PURGE_SECS));

        loop {
            interval.tick().await;

            match desk.purge_expired_sessions().await {
                Ok(0) => {}
                Ok(n) => info!("purged {n} expired sessions"),
                Err(e) => warn!("couldn't purge expired sessions: {e:?}"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("couldn't listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
        info!("received ctrl-c, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                error!("couldn't listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
