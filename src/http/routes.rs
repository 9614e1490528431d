use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::{
    common::{
        banner::BuildInfo,
        errors::{ErrorResponse, RadioError, RadioResult},
        types::{ChannelId, GuildId, StationId},
    },
    protocol::SessionSnapshot,
    storage::StationStore,
};

/// A core error paired with the request path, rendered as JSON.
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn from_radio(err: &RadioError, uri: &Uri) -> Self {
        let body = ErrorResponse::from_radio(err, uri.path());
        Self {
            status: StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        }
    }

    fn bad_request(message: impl Into<String>, uri: &Uri) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorResponse::new(400, "Bad Request", message, uri.path()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_guild(raw: &str, uri: &Uri) -> ApiResult<GuildId> {
    raw.parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid guild id: {}", raw), uri))
}

fn respond<T>(result: RadioResult<T>, uri: &Uri) -> ApiResult<T> {
    result.map_err(|err| ApiError::from_radio(&err, uri))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub build: BuildInfo,
    pub online: bool,
    pub active_guilds: usize,
    pub last_heartbeat: u64,
    pub event_subscribers: usize,
}

/// GET /v1/info
pub async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let sup = &state.supervisor;
    Json(InfoResponse {
        build: BuildInfo::default(),
        online: sup.is_online(),
        active_guilds: sup.active_guilds().len(),
        last_heartbeat: sup.health().last_heartbeat(),
        event_subscribers: state.events.subscriber_count(),
    })
}

/// GET /v1/stations
pub async fn list_stations(State(state): State<Arc<AppState>>, uri: Uri) -> ApiResult<Response> {
    let stations = respond(state.supervisor.context().store.list_stations().await, &uri)?;
    Ok(Json(stations).into_response())
}

/// GET /v1/guilds
pub async fn list_guilds(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSnapshot>> {
    Json(state.supervisor.snapshots())
}

/// GET /v1/guilds/{guildId}
pub async fn get_guild(
    Path(guild_id): Path<String>,
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> ApiResult<Json<SessionSnapshot>> {
    let guild = parse_guild(&guild_id, &uri)?;
    state
        .supervisor
        .session_snapshot(guild)
        .map(Json)
        .ok_or_else(|| ApiError::from_radio(&RadioError::SessionNotFound(guild), &uri))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub voice_channel_id: ChannelId,
    #[serde(default)]
    pub control_channel_id: Option<ChannelId>,
}

/// POST /v1/guilds/{guildId}/join
pub async fn join_guild(
    Path(guild_id): Path<String>,
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Json(body): Json<JoinRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let guild = parse_guild(&guild_id, &uri)?;
    info!("POST {} voice={}", uri.path(), body.voice_channel_id);
    let session = respond(
        state
            .supervisor
            .join_and_setup(guild, body.voice_channel_id, body.control_channel_id)
            .await,
        &uri,
    )?;
    Ok(Json(session.snapshot()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationRequest {
    pub station_id: StationId,
}

/// POST /v1/guilds/{guildId}/station
pub async fn select_station(
    Path(guild_id): Path<String>,
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Json(body): Json<StationRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let guild = parse_guild(&guild_id, &uri)?;
    info!("POST {} station={}", uri.path(), body.station_id);
    respond(state.supervisor.select_station(guild, body.station_id).await, &uri)?;
    snapshot_of(&state, guild, &uri)
}

#[derive(Deserialize)]
pub struct VolumeRequest {
    pub volume: i64,
}

/// PUT /v1/guilds/{guildId}/volume
pub async fn set_volume(
    Path(guild_id): Path<String>,
    State(state): State<Arc<AppState>>,
    uri: Uri,
    Json(body): Json<VolumeRequest>,
) -> ApiResult<Json<SessionSnapshot>> {
    let guild = parse_guild(&guild_id, &uri)?;
    respond(state.supervisor.set_volume(guild, body.volume).await, &uri)?;
    snapshot_of(&state, guild, &uri)
}

/// POST /v1/guilds/{guildId}/pause
pub async fn pause(
    Path(guild_id): Path<String>,
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> ApiResult<Json<SessionSnapshot>> {
    let guild = parse_guild(&guild_id, &uri)?;
    respond(state.supervisor.pause(guild).await, &uri)?;
    snapshot_of(&state, guild, &uri)
}

/// POST /v1/guilds/{guildId}/resume
pub async fn resume(
    Path(guild_id): Path<String>,
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> ApiResult<Json<SessionSnapshot>> {
    let guild = parse_guild(&guild_id, &uri)?;
    respond(state.supervisor.resume(guild).await, &uri)?;
    snapshot_of(&state, guild, &uri)
}

/// POST /v1/guilds/{guildId}/stop
pub async fn stop(
    Path(guild_id): Path<String>,
    State(state): State<Arc<AppState>>,
    uri: Uri,
) -> ApiResult<Json<SessionSnapshot>> {
    let guild = parse_guild(&guild_id, &uri)?;
    respond(state.supervisor.stop(guild).await, &uri)?;
    snapshot_of(&state, guild, &uri)
}

fn snapshot_of(state: &AppState, guild: GuildId, uri: &Uri) -> ApiResult<Json<SessionSnapshot>> {
    state
        .supervisor
        .session_snapshot(guild)
        .map(Json)
        .ok_or_else(|| ApiError::from_radio(&RadioError::SessionNotFound(guild), uri))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::*;
    use crate::{
        events::BroadcastBus,
        http::router,
        supervisor::Supervisor,
        testing::{FakeConnector, FakeGateway, fast_config, guild, harness, hub_channel},
    };

    const PASSWORD: &str = "youshallnotpass";

    async fn serve() -> (String, Arc<Supervisor>) {
        let config = fast_config();
        let h = harness(config.clone());
        let (gateway, _events) = FakeGateway::new(vec![guild(1, 3)]);
        h.ctx.replace_gateway(Some(gateway));
        let supervisor = Supervisor::new(h.ctx.clone(), FakeConnector::new(vec![]));

        let state = Arc::new(AppState {
            supervisor: supervisor.clone(),
            events: BroadcastBus::new(16),
            config: Arc::new(config),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        (format!("http://{}/v1", addr), supervisor)
    }

    #[tokio::test]
    async fn requests_without_password_are_rejected() {
        let (base, _sup) = serve().await;
        let client = reqwest::Client::new();

        let missing = client.get(format!("{}/guilds", base)).send().await.unwrap();
        assert_eq!(missing.status(), 401);

        let wrong = client
            .get(format!("{}/guilds", base))
            .header("Authorization", "nope")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 401);
    }

    #[tokio::test]
    async fn unknown_guild_returns_typed_error() {
        let (base, _sup) = serve().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/guilds/1/pause", base))
            .header("Authorization", PASSWORD)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "SessionNotFound");
        assert_eq!(body["path"], "/v1/guilds/1/pause");
    }

    #[tokio::test]
    async fn join_select_and_volume_over_http() {
        let (base, sup) = serve().await;
        let client = reqwest::Client::new();

        let joined: Value = client
            .post(format!("{}/guilds/1/join", base))
            .header("Authorization", PASSWORD)
            .json(&json!({ "voiceChannelId": hub_channel(1).to_string() }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(joined["state"], "ready");
        assert_eq!(joined["guildId"], "1");

        let playing: Value = client
            .post(format!("{}/guilds/1/station", base))
            .header("Authorization", PASSWORD)
            .json(&json!({ "stationId": 5 }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(playing["state"], "playing");
        assert_eq!(playing["currentStation"], 5);

        let rejected = client
            .put(format!("{}/guilds/1/volume", base))
            .header("Authorization", PASSWORD)
            .json(&json!({ "volume": 101 }))
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), 400);
        assert_eq!(sup.session_snapshot(GuildId(1)).unwrap().volume, 75);
    }

    #[tokio::test]
    async fn malformed_guild_id_is_a_bad_request() {
        let (base, _sup) = serve().await;
        let resp = reqwest::Client::new()
            .get(format!("{}/guilds/general", base))
            .header("Authorization", PASSWORD)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}
