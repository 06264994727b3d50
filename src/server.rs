//! Local report server, started in the background by the publisher and
//! polled until it answers.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use tracing::{info, warn};

use crate::config::Config;
use crate::formatter::html::render_index;
use crate::handshake::write_pid;
use crate::snapshot::SnapshotStore;

#[derive(Clone)]
pub struct ServerState {
    config: Arc<Config>,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn store(&self) -> SnapshotStore {
        SnapshotStore::new(&self.config.data_dir)
    }

    /// The report page, `None` when no snapshot exists yet. An unreadable
    /// latest snapshot is an error, never a fallback to an older one.
    pub fn render(&self) -> Result<Option<String>> {
        let store = self.store();
        let Some(latest) = store.latest()? else {
            return Ok(None);
        };
        let history = store.history()?;
        let html = render_index(&latest, &history, &self.config.report)
            .context("failed to render report")?;
        Ok(Some(html))
    }

    pub fn latest_json(&self) -> Result<Option<String>> {
        self.store().latest()?.map(|s| s.to_json()).transpose()
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/latest.json", get(latest))
        .with_state(state)
}

async fn index(State(state): State<ServerState>) -> Response {
    match state.render() {
        Ok(Some(html)) => Html(html).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No data").into_response(),
        Err(e) => internal_error(e),
    }
}

async fn latest(State(state): State<ServerState>) -> Response {
    match state.latest_json() {
        Ok(Some(json)) => ([(header::CONTENT_TYPE, "application/json")], json).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "No data").into_response(),
        Err(e) => internal_error(e),
    }
}

fn internal_error(e: anyhow::Error) -> Response {
    warn!("{e:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
}

/// Record this process in the publish pid file and serve until killed.
pub fn serve(config: Config) -> Result<()> {
    config.ensure_data_dir()?;
    let pid_file = config.data_path(&config.publish.pid_file);
    write_pid(&pid_file, std::process::id())?;

    let port = config.report.port;
    let state = ServerState::new(config);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("failed to bind 127.0.0.1:{port}"))?;
        info!("serving report on http://127.0.0.1:{port}/");
        axum::serve(listener, router(state))
            .await
            .context("report server failed")
    })
}
