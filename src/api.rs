// src/api.rs
//! Admin HTTP surface over source management, forwarding rules and cycles.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::history::CycleHistory;
use crate::model::{ChannelId, ForwardingRule, GuildId, NewForwardingRule, NewSource, RuleId, Source};
use crate::pipeline::{CycleReport, CycleScope, Pipeline};
use crate::sources::{SourceError, SourceService};

#[derive(Clone)]
pub struct AppState {
    pub sources: Arc<SourceService>,
    pub pipeline: Arc<Pipeline>,
    pub history: Arc<CycleHistory>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/sources", get(list_sources).post(add_source))
        .route("/sources/{guild}/{name}", get(get_source).delete(remove_source))
        .route("/sources/{guild}/{name}/pause", post(pause_source))
        .route("/sources/{guild}/{name}/resume", post(resume_source))
        .route("/sources/{guild}/{name}/channel", post(set_source_channel))
        .route(
            "/guilds/{guild}/channel",
            get(get_guild_channel).put(put_guild_channel).delete(clear_guild_channel),
        )
        .route("/forwarding", get(list_rules).post(add_rule))
        .route("/forwarding/{id}", axum::routing::delete(remove_rule))
        .route("/forwarding/{id}/pause", post(pause_rule))
        .route("/forwarding/{id}/resume", post(resume_rule))
        .route("/cycles", get(list_cycles))
        .route("/cycles/run", post(run_cycle))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

pub struct ApiError(SourceError);

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SourceError::NotFound { .. } | SourceError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            SourceError::Duplicate(_) => StatusCode::CONFLICT,
            SourceError::Repo(_) => StatusCode::SERVICE_UNAVAILABLE,
            SourceError::Discovery(_) | SourceError::Analysis(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_REQUEST,
        };
        let mut body = json!({ "error": self.0.to_string() });
        if let SourceError::NotFound {
            suggestion: Some(s), ..
        } = &self.0
        {
            body["suggestion"] = json!(s);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct GuildFilter {
    guild: Option<GuildId>,
}

async fn list_sources(State(st): State<AppState>, Query(q): Query<GuildFilter>) -> ApiResult<Json<Vec<Source>>> {
    Ok(Json(st.sources.list_sources(q.guild).await?))
}

async fn add_source(
    State(st): State<AppState>,
    Json(new): Json<NewSource>,
) -> ApiResult<(StatusCode, Json<Source>)> {
    let src = st.sources.add_source(new).await?;
    Ok((StatusCode::CREATED, Json(src)))
}

async fn get_source(
    State(st): State<AppState>,
    Path((guild, name)): Path<(GuildId, String)>,
) -> ApiResult<Json<Source>> {
    Ok(Json(st.sources.get_source(guild, &name).await?))
}

async fn remove_source(
    State(st): State<AppState>,
    Path((guild, name)): Path<(GuildId, String)>,
) -> ApiResult<Json<Source>> {
    Ok(Json(st.sources.remove_source(guild, &name).await?))
}

async fn pause_source(
    State(st): State<AppState>,
    Path((guild, name)): Path<(GuildId, String)>,
) -> ApiResult<Json<Source>> {
    Ok(Json(st.sources.pause_source(guild, &name).await?))
}

async fn resume_source(
    State(st): State<AppState>,
    Path((guild, name)): Path<(GuildId, String)>,
) -> ApiResult<Json<Source>> {
    Ok(Json(st.sources.resume_source(guild, &name).await?))
}

#[derive(Deserialize)]
struct ChannelBody {
    channel: Option<ChannelId>,
}

async fn set_source_channel(
    State(st): State<AppState>,
    Path((guild, name)): Path<(GuildId, String)>,
    Json(body): Json<ChannelBody>,
) -> ApiResult<Json<Source>> {
    Ok(Json(st.sources.set_source_channel(guild, &name, body.channel).await?))
}

async fn get_guild_channel(
    State(st): State<AppState>,
    Path(guild): Path<GuildId>,
) -> ApiResult<Json<serde_json::Value>> {
    let channel = st.sources.guild_channel(guild).await?;
    Ok(Json(json!({ "guild": guild, "channel": channel })))
}

async fn put_guild_channel(
    State(st): State<AppState>,
    Path(guild): Path<GuildId>,
    Json(body): Json<ChannelBody>,
) -> ApiResult<StatusCode> {
    st.sources.set_guild_channel(guild, body.channel).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_guild_channel(State(st): State<AppState>, Path(guild): Path<GuildId>) -> ApiResult<StatusCode> {
    st.sources.set_guild_channel(guild, None).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_rules(
    State(st): State<AppState>,
    Query(q): Query<GuildFilter>,
) -> ApiResult<Json<Vec<ForwardingRule>>> {
    Ok(Json(st.sources.list_forwarding_rules(q.guild).await?))
}

async fn add_rule(
    State(st): State<AppState>,
    Json(new): Json<NewForwardingRule>,
) -> ApiResult<(StatusCode, Json<ForwardingRule>)> {
    let rule = st.sources.add_forwarding_rule(new).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn remove_rule(State(st): State<AppState>, Path(id): Path<RuleId>) -> ApiResult<StatusCode> {
    st.sources.remove_forwarding_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn pause_rule(State(st): State<AppState>, Path(id): Path<RuleId>) -> ApiResult<Json<ForwardingRule>> {
    Ok(Json(st.sources.set_rule_paused(id, true).await?))
}

async fn resume_rule(State(st): State<AppState>, Path(id): Path<RuleId>) -> ApiResult<Json<ForwardingRule>> {
    Ok(Json(st.sources.set_rule_paused(id, false).await?))
}

#[derive(Deserialize)]
struct CyclesQuery {
    limit: Option<usize>,
}

async fn list_cycles(State(st): State<AppState>, Query(q): Query<CyclesQuery>) -> Json<Vec<CycleReport>> {
    Json(st.history.snapshot_last_n(q.limit.unwrap_or(10).min(100)))
}

#[derive(Deserialize)]
struct RunQuery {
    scope: Option<String>,
}

async fn run_cycle(State(st): State<AppState>, Query(q): Query<RunQuery>) -> Response {
    let scope = match q.scope.as_deref().unwrap_or("content") {
        "content" => CycleScope::Content,
        "repositories" | "github" => CycleScope::Repositories,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("unknown scope '{other}'") })),
            )
                .into_response()
        }
    };
    match st.pipeline.run_cycle(scope).await {
        Ok(report) => {
            st.history.push(report.clone());
            Json(report).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
