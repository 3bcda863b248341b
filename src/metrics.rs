// Prometheus metrics definitions for the club ratings engine.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Engine operations currently executing behind the HTTP layer.
    pub static ref OPERATIONS_IN_FLIGHT: IntGauge =
        IntGauge::new("club_ratings_operations_in_flight", "Engine operations currently executing").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Matches committed, by match type and whether they were ranked.
    pub static ref MATCHES_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("club_ratings_matches_processed_total", "Matches committed"),
        &["match_type", "ranked"],
    )
    .unwrap();

    /// Optimistic-concurrency conflicts seen while committing.
    pub static ref COMMIT_CONFLICTS_TOTAL: IntCounter = IntCounter::new(
        "club_ratings_commit_conflicts_total",
        "Write conflicts seen while committing",
    )
    .unwrap();

    /// Match requests rejected by the cooldown rule, by match type.
    pub static ref COOLDOWN_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("club_ratings_cooldown_rejections_total", "Match requests rejected by cooldown"),
        &["match_type"],
    )
    .unwrap();

    /// Cooldown lookups that failed and were allowed through.
    pub static ref COOLDOWN_LOOKUP_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "club_ratings_cooldown_lookup_failures_total",
        "Cooldown lookups that failed open",
    )
    .unwrap();

    /// Skill gate violations, by violation code.
    pub static ref SKILL_GATE_VIOLATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("club_ratings_skill_gate_violations_total", "Skill gate violations"),
        &["code"],
    )
    .unwrap();

    /// Badges newly inserted, by tier.
    pub static ref BADGES_AWARDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("club_ratings_badges_awarded_total", "Badges awarded"),
        &["tier"],
    )
    .unwrap();

    /// Trophies newly inserted, by trophy type.
    pub static ref TROPHIES_AWARDED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("club_ratings_trophies_awarded_total", "Trophies awarded"),
        &["trophy_type"],
    )
    .unwrap();

    /// Notifications the notifier failed to deliver.
    pub static ref NOTIFICATION_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "club_ratings_notification_failures_total",
        "Notifications that failed to dispatch",
    )
    .unwrap();

    /// Seasons moved to closed.
    pub static ref SEASONS_FINALIZED_TOTAL: IntCounter = IntCounter::new(
        "club_ratings_seasons_finalized_total",
        "Seasons finalized",
    )
    .unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("club_ratings_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Absolute rating change per participant per ranked match.
    pub static ref RATING_DELTA: Histogram = Histogram::with_opts(
        HistogramOpts::new("club_ratings_rating_delta", "Absolute rating change per participant")
            .buckets(vec![0.0, 2.0, 4.0, 8.0, 12.0, 16.0, 24.0, 32.0]),
    )
    .unwrap();

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "club_ratings_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Safe to call more than
/// once; repeated registrations are logged and skipped.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(OPERATIONS_IN_FLIGHT.clone()),
        Box::new(MATCHES_PROCESSED_TOTAL.clone()),
        Box::new(COMMIT_CONFLICTS_TOTAL.clone()),
        Box::new(COOLDOWN_REJECTIONS_TOTAL.clone()),
        Box::new(COOLDOWN_LOOKUP_FAILURES_TOTAL.clone()),
        Box::new(SKILL_GATE_VIOLATIONS_TOTAL.clone()),
        Box::new(BADGES_AWARDED_TOTAL.clone()),
        Box::new(TROPHIES_AWARDED_TOTAL.clone()),
        Box::new(NOTIFICATION_FAILURES_TOTAL.clone()),
        Box::new(SEASONS_FINALIZED_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(RATING_DELTA.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::debug!("Metric registration skipped: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Normalize a URL path for metric labels: replace the id segment after a
/// collection name with `:id` to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    const COLLECTIONS: [&str; 3] = ["players", "competitions", "seasons"];
    let mut previous = "";
    path.split('/')
        .map(|segment| {
            let out = if COLLECTIONS.contains(&previous) && !segment.is_empty() {
                ":id"
            } else {
                segment
            };
            previous = segment;
            out
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/matches/outcome"), "/api/matches/outcome");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_normalize_path_with_ids() {
        assert_eq!(
            normalize_path("/api/players/p-17/achievements"),
            "/api/players/:id/achievements"
        );
        assert_eq!(
            normalize_path("/api/seasons/2026-Q4/finalize"),
            "/api/seasons/:id/finalize"
        );
    }

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("club_ratings_"));
    }

    #[test]
    fn test_metric_increments() {
        OPERATIONS_IN_FLIGHT.inc();
        OPERATIONS_IN_FLIGHT.dec();

        MATCHES_PROCESSED_TOTAL
            .with_label_values(&["singles", "true"])
            .inc();
        COMMIT_CONFLICTS_TOTAL.inc();
        COOLDOWN_REJECTIONS_TOTAL.with_label_values(&["doubles"]).inc();
        COOLDOWN_LOOKUP_FAILURES_TOTAL.inc();
        BADGES_AWARDED_TOTAL.with_label_values(&["gold"]).inc();
        TROPHIES_AWARDED_TOTAL.with_label_values(&["winner"]).inc();
        NOTIFICATION_FAILURES_TOTAL.inc();

        RATING_DELTA.observe(16.0);
        API_REQUEST_DURATION_SECONDS
            .with_label_values(&["/api/matches/outcome"])
            .observe(0.05);
        API_REQUESTS_TOTAL
            .with_label_values(&["POST", "/api/matches/outcome", "200"])
            .inc();
    }
}
