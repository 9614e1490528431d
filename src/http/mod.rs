use std::sync::Arc;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
};

pub mod middleware;
pub mod routes;
pub mod websocket;

use crate::{configs::Config, events::BroadcastBus, supervisor::Supervisor};

const API_V1: &str = "/v1";

/// Shared state of the HTTP surface.
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub events: BroadcastBus,
    pub config: Arc<Config>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let v1_routes = Router::new()
        .route("/info", get(routes::get_info))
        .route("/stations", get(routes::list_stations))
        .route("/guilds", get(routes::list_guilds))
        .route("/guilds/{guild_id}", get(routes::get_guild))
        .route("/guilds/{guild_id}/join", post(routes::join_guild))
        .route("/guilds/{guild_id}/station", post(routes::select_station))
        .route("/guilds/{guild_id}/volume", put(routes::set_volume))
        .route("/guilds/{guild_id}/pause", post(routes::pause))
        .route("/guilds/{guild_id}/resume", post(routes::resume))
        .route("/guilds/{guild_id}/stop", post(routes::stop))
        .route("/events", get(websocket::events_handler));

    Router::new()
        .nest(API_V1, v1_routes)
        .layer(from_fn_with_state(state.clone(), middleware::check_auth))
        .layer(from_fn(middleware::add_response_headers))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
