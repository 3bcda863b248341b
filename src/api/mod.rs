// HTTP API routes (match outcomes, match gates, awards, season close-out)

use std::future::Future;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Json, Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::competition::{Competition, Placement};
use crate::cooldown::MatchRequest;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::model::{MatchRecord, MatchType, Participants, PlayerProfile, Side};
use crate::season::OfficialRanker;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CooldownRequest {
    pub home: Side,
    pub away: Side,
    pub match_type: MatchType,
}

#[derive(Deserialize, Default)]
pub struct AchievementsRequest {
    #[serde(default)]
    pub context_ids: Vec<String>,
}

#[derive(Deserialize)]
pub struct TrophiesRequest {
    pub rankings: Vec<Placement>,
    /// Competition metadata; looked up by path id when absent.
    #[serde(default)]
    pub competition: Option<Competition>,
}

#[derive(Deserialize)]
pub struct FinalizeSeasonRequest {
    pub rankers: Vec<OfficialRanker>,
}

#[derive(Deserialize)]
pub struct UpsertPlayerRequest {
    pub display_name: String,
    #[serde(default)]
    pub self_assessed_level: Option<String>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    /// Deadline for a single engine operation.
    pub operation_timeout: Duration,
}

// ── Error helper ──────────────────────────────────────────────────────

fn json_error(status: StatusCode, code: &str, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg, "code": code })))
}

fn status_for(e: &EngineError) -> StatusCode {
    match e {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::Dependency(_) | EngineError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn engine_error(e: EngineError) -> Response {
    let status = status_for(&e);
    if status.is_server_error() {
        tracing::error!("Engine operation failed: {e}");
    }
    let mut response = json_error(status, e.code(), &e.to_string()).into_response();
    if e.is_retryable() {
        response
            .headers_mut()
            .insert("retry-after", axum::http::HeaderValue::from_static("1"));
    }
    response
}

fn respond<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(json!(body))).into_response(),
        Err(e) => engine_error(e),
    }
}

/// Run one engine operation under the configured deadline.
async fn run<T>(state: &AppState, op: impl Future<Output = Result<T>>) -> Result<T> {
    metrics::OPERATIONS_IN_FLIGHT.inc();
    let result = tokio::time::timeout(state.operation_timeout, op).await;
    metrics::OPERATIONS_IN_FLIGHT.dec();
    result.unwrap_or_else(|_| Err(EngineError::Timeout(state.operation_timeout.as_secs())))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(engine: Engine, operation_timeout: Duration) -> Router {
    let state = AppState {
        engine,
        operation_timeout,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Registration
        .route("/api/players/{id}", put(upsert_player))
        .route("/api/competitions/{id}", put(upsert_competition))
        // Matches
        .route("/api/matches/outcome", post(process_match_outcome))
        .route("/api/matches/cooldown", post(validate_cooldown))
        .route("/api/matches/validate", post(validate_match_request))
        // Awards
        .route(
            "/api/players/{id}/achievements",
            post(check_and_award_achievements),
        )
        .route(
            "/api/competitions/{id}/trophies",
            post(award_placement_trophies),
        )
        .route("/api/seasons/{id}/finalize", post(finalize_season))
        .layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = metrics::normalize_path(req.uri().path());
    let timer = metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint.as_str()])
        .start_timer();

    let response = next.run(req).await;

    timer.observe_duration();
    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[
            method.as_str(),
            endpoint.as_str(),
            response.status().as_str(),
        ])
        .inc();
    response
}

// ── Service handlers ──────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "club-ratings" }))
}

async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::gather_metrics(),
    )
}

// ── Registration handlers ─────────────────────────────────────────────

async fn upsert_player(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpsertPlayerRequest>,
) -> Response {
    let engine = &state.engine;
    let result = run(&state, async {
        let mut profile = PlayerProfile::new(id.clone(), req.display_name);
        profile.self_assessed_level = req.self_assessed_level;
        engine.register_player(&profile).await?;
        engine
            .store()
            .get_player(&id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("player {id}")))
    })
    .await;
    respond(result)
}

async fn upsert_competition(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(competition): Json<Competition>,
) -> Response {
    if competition.id != id {
        return json_error(
            StatusCode::BAD_REQUEST,
            "validation",
            "competition id does not match path",
        )
        .into_response();
    }
    let result = run(&state, async {
        state.engine.upsert_competition(&competition).await?;
        Ok(competition.clone())
    })
    .await;
    respond(result)
}

// ── Match handlers ────────────────────────────────────────────────────

async fn process_match_outcome(
    State(state): State<AppState>,
    Json(record): Json<MatchRecord>,
) -> Response {
    respond(run(&state, state.engine.process_match_outcome(record)).await)
}

async fn validate_cooldown(
    State(state): State<AppState>,
    Json(req): Json<CooldownRequest>,
) -> Response {
    let participants = Participants {
        home: req.home,
        away: req.away,
    };
    respond(
        run(
            &state,
            state.engine.validate_cooldown(&participants, req.match_type),
        )
        .await,
    )
}

async fn validate_match_request(
    State(state): State<AppState>,
    Json(req): Json<MatchRequest>,
) -> Response {
    respond(run(&state, state.engine.validate_match_request(&req)).await)
}

// ── Award handlers ────────────────────────────────────────────────────

async fn check_and_award_achievements(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
    Json(req): Json<AchievementsRequest>,
) -> Response {
    let result = run(
        &state,
        state
            .engine
            .check_and_award_achievements(&player_id, &req.context_ids),
    )
    .await;
    respond(result.map(|badge_ids| json!({ "player_id": player_id, "awarded": badge_ids })))
}

async fn award_placement_trophies(
    State(state): State<AppState>,
    Path(competition_id): Path<String>,
    Json(req): Json<TrophiesRequest>,
) -> Response {
    let engine = &state.engine;
    let result = run(&state, async {
        match &req.competition {
            Some(c) if c.id != competition_id => Err(EngineError::Validation(
                "competition id does not match path".into(),
            )),
            Some(c) => engine.award_placement_trophies(&req.rankings, c).await,
            None => {
                engine
                    .award_competition_trophies(&competition_id, &req.rankings)
                    .await
            }
        }
    })
    .await;
    respond(result)
}

async fn finalize_season(
    State(state): State<AppState>,
    Path(season_id): Path<String>,
    Json(req): Json<FinalizeSeasonRequest>,
) -> Response {
    respond(run(&state, state.engine.finalize_season(&season_id, &req.rankers)).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use axum::http::Method;
    use serde_json::Value;
    use tower::util::ServiceExt;

    fn app() -> Router {
        router(Engine::local(EngineSettings::default()), Duration::from_secs(5))
    }

    async fn send(app: Router, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        let resp = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&EngineError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&EngineError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&EngineError::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&EngineError::Timeout(1)),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let state = AppState {
            engine: Engine::local(EngineSettings::default()),
            operation_timeout: Duration::from_millis(10),
        };
        let result: Result<()> = run(&state, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(EngineError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(app(), Method::GET, "/health", Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_player_is_404() {
        let (status, body) = send(
            app(),
            Method::POST,
            "/api/players/ghost/achievements",
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn test_bad_match_shape_is_400() {
        let (status, body) = send(
            app(),
            Method::POST,
            "/api/matches/outcome",
            json!({
                "id": "m1",
                "home": { "leader": "a", "partner": "b" },
                "away": { "leader": "c" },
                "match_type": "singles",
                "context": "global",
                "winner": "home",
                "played_at": "2026-10-01T10:00:00Z"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation");
    }

    #[tokio::test]
    async fn test_competition_path_mismatch_is_400() {
        let (status, _) = send(
            app(),
            Method::PUT,
            "/api/competitions/cup",
            json!({
                "id": "other",
                "name": "Other",
                "kind": "public",
                "match_type": "singles"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
