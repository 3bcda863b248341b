// HTTP surface tests: drive the router with tower's oneshot.

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use club_ratings::config::EngineSettings;
use club_ratings::{api, metrics, Engine};

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, json)
}

fn app() -> Router {
    api::router(Engine::local(EngineSettings::default()), Duration::from_secs(5))
}

async fn register(app: &Router, id: &str) {
    let (status, body) = call(
        app,
        Method::PUT,
        &format!("/api/players/{id}"),
        Some(json!({ "display_name": id, "self_assessed_level": "4" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

fn played_recently() -> String {
    (chrono::Utc::now() - chrono::Duration::minutes(5)).to_rfc3339()
}

#[tokio::test]
async fn test_match_to_trophies_over_http() {
    let app = app();
    for id in ["ana", "ben"] {
        register(&app, id).await;
    }

    let (status, body) = call(
        &app,
        Method::PUT,
        "/api/competitions/spring-ladder",
        Some(json!({
            "id": "spring-ladder",
            "name": "Spring Ladder",
            "kind": "league",
            "club_id": "north",
            "match_type": "singles",
            "participants": ["ana", "ben"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/matches/outcome",
        Some(json!({
            "id": "m1",
            "home": { "leader": "ana" },
            "away": { "leader": "ben" },
            "match_type": "singles",
            "context": "club:north",
            "competition": "league",
            "winner": "home",
            "score": "6-2 6-2",
            "played_at": played_recently()
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["per_player"]["ana"]["new"], 1208);
    assert_eq!(body["per_player"]["ben"]["delta"], -8);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/matches/cooldown",
        Some(json!({
            "home": { "leader": "ben" },
            "away": { "leader": "ana" },
            "match_type": "singles"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["conflicting_match_id"], "m1");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/competitions/spring-ladder/trophies",
        Some(json!({
            "rankings": [
                { "player_id": "ana", "rank": 1 },
                { "player_id": "ben", "rank": 2 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body.as_array().map(Vec::len), Some(2));
    assert_eq!(body[0]["trophy_id"], "spring-ladder_ana_winner");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/players/ana/achievements",
        Some(json!({ "context_ids": ["north"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let awarded: Vec<&str> = body["awarded"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(awarded.contains(&"league_master_bronze"));
    assert!(awarded.contains(&"champion_bronze"));

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/competitions/spring-ladder/trophies",
        Some(json!({
            "rankings": [
                { "player_id": "ben", "rank": 1 },
                { "player_id": "ana", "rank": 2 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = call(
        &app,
        Method::PUT,
        "/api/players/ana",
        Some(json!({ "display_name": "Ana Maria" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Ana Maria");
    assert_eq!(body["placement"]["championships"], 1);
}

#[tokio::test]
async fn test_error_statuses() {
    let app = app();

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/competitions/ghost-cup/trophies",
        Some(json!({ "rankings": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/matches/validate",
        Some(json!({
            "match_type": "singles",
            "home": { "leader": "ana" },
            "level_range": "somewhere in the middle",
            "host_level": "4"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/seasons/2026-Q4/finalize",
        Some(json!({
            "rankers": [
                { "player_id": "ana", "rating": 1300, "season_matches_played": 4, "starting_grade": 4.0 },
                { "player_id": "ana", "rating": 1200, "season_matches_played": 2, "starting_grade": 4.0 }
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn test_open_request_skips_cooldown() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/matches/validate",
        Some(json!({
            "match_type": "singles",
            "home": { "leader": "ana" },
            "level_range": "3-5",
            "host_level": "4"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
    assert_eq!(body["cooldown"], Value::Null);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    metrics::register_metrics();
    let app = app();
    let (status, _) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    let text = body.as_str().unwrap_or_default();
    assert!(text.contains("club_ratings_api_requests_total"));
}
