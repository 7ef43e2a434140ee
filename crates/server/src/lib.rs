pub mod catalog;
pub mod clients;
pub mod config;
pub mod error;
pub mod routes;
pub mod session;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::ChallengeCatalog;
use crate::clients::uci_engine::SharedEngine;
use crate::config::Config;
use crate::session::SignedCookieStore;

pub fn app(config: Config, catalog: ChallengeCatalog) -> Router {
    let store = Arc::new(SignedCookieStore::from_config(&config));
    let engine = config
        .stockfish_path
        .as_ref()
        .map(|path| Arc::new(SharedEngine::new(path.clone(), config.bot_depth, config.engine_timeout)));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/daily-challenge", get(routes::daily_challenge::page))
        .route(
            "/daily-challenge/htmx/no-selection",
            get(routes::daily_challenge::no_selection),
        )
        .route(
            "/daily-challenge/htmx/pieces/select",
            get(routes::daily_challenge::select_piece),
        )
        .route(
            "/daily-challenge/htmx/pieces/{from}/move/{to}",
            post(routes::daily_challenge::move_piece),
        )
        .route("/daily-challenge/htmx/bot/move", post(routes::daily_challenge::bot_move))
        .route(
            "/daily-challenge/htmx/restart/ask-confirmation",
            post(routes::daily_challenge::restart_ask_confirmation),
        )
        .route("/daily-challenge/htmx/restart/do", post(routes::daily_challenge::restart))
        .route("/daily-challenge/htmx/undo", post(routes::daily_challenge::undo))
        .route(
            "/daily-challenge/htmx/solution/see",
            post(routes::daily_challenge::see_solution),
        )
        .route(
            "/daily-challenge/htmx/solution/play",
            post(routes::daily_challenge::play_solution),
        )
        .layer(Extension(config))
        .layer(Extension(Arc::new(catalog)))
        .layer(Extension(store))
        .layer(Extension(engine))
        .layer(cors)
}
