//! # Agora
//!
//! Community forum backend: accounts, posts with comments, votes and
//! revisions, full-text search, and admin dashboard stats. Serves a JSON API
//! under `/api`; rendering is the frontend's problem.
//!
//!
//!
//! # Notes
//!
//! ## Redis + Meilisearch
//! In theory, Meilisearch alone could hold everything including vote state
//! and counters. But it is fundamentally a search engine, not a database:
//! atomic counter updates and single-document lookups carry too much
//! overhead there, and votes arrive far more often than searches.
//!
//! Instead, Redis holds the documents and the counters. It gives atomic
//! increments and O(1) lookups; Meilisearch only mirrors the searchable
//! fields and is rebuilt from Redis at startup, so the index volume is
//! disposable. Search results lag writes by one sync, which is acceptable
//! for a forum.
//!
//! ## Consistency
//! Document saves are compare-and-swap on a version counter, so two votes
//! landing on the same post serialize instead of losing one. See
//! [`database`] for the layout and [`votes`] for the tally rules.
use std::time::Duration;

use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod routes;
pub mod search;
pub mod state;
pub mod utils;
pub mod votes;

use state::AppState;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await;

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let app = Router::new()
        .route("/api/health", get(routes::content::health))
        .nest("/api/auth", routes::auth::router())
        .nest("/api/posts", routes::posts::router())
        .nest("/api/content", routes::content::router())
        .layer(cors)
        .with_state(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
