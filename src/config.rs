// Application configuration, loaded from environment variables and CLI flags.

use std::time::Duration;

use crate::elo::{RatingBounds, BASELINE_RATING, RATING_MAX, RATING_MIN};
use crate::history::DEFAULT_HISTORY_CAP;
use crate::k_factor::KPolicyMode;

/// Knobs the rating engine itself reads.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub bounds: RatingBounds,
    /// Rating assumed for a player with no rating in a scope yet.
    pub baseline: i32,
    /// Max history rows kept per (player, scope).
    pub history_cap: usize,
    /// Read-compute-commit attempts before a conflict is surfaced.
    pub commit_attempts: u32,
    pub commit_backoff: Duration,
    pub k_policy: KPolicyMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bounds: RatingBounds::new(RATING_MIN, RATING_MAX),
            baseline: BASELINE_RATING,
            history_cap: DEFAULT_HISTORY_CAP,
            commit_attempts: 3,
            commit_backoff: Duration::from_millis(25),
            k_policy: KPolicyMode::default(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Whether to run in local mode (in-memory store, nothing persisted).
    pub local_mode: bool,
    /// Deadline applied to every engine operation behind the HTTP layer.
    pub operation_timeout: Duration,
    pub engine: EngineSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:club_ratings.db?mode=rwc".to_string(),
            port: 3000,
            local_mode: false,
            operation_timeout: Duration::from_secs(10),
            engine: EngineSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - SQLite connection string (default: `sqlite:club_ratings.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `CLUB_RATINGS_LOCAL_MODE` - Set to `true` to use the in-memory store
    /// - `RATING_MIN` / `RATING_MAX` - Rating bounds (default: 800 / 3000)
    /// - `RATING_BASELINE` - Starting rating (default: 1200)
    /// - `HISTORY_CAP` - History rows kept per player and scope (default: 100)
    /// - `COMMIT_ATTEMPTS` - Match commit attempts on conflict (default: 3)
    /// - `COMMIT_BACKOFF_MS` - Base retry backoff (default: 25)
    /// - `OPERATION_TIMEOUT_SECS` - Per-operation deadline (default: 10)
    /// - `K_POLICY` - `per_competition` or `unified` (default: `per_competition`)
    ///
    /// CLI flags:
    /// - `--local` - Enable local mode (same as `CLUB_RATINGS_LOCAL_MODE=true`)
    /// - `--port <PORT>` - Override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// Build a config from CLI args and an environment lookup.
    pub fn from_sources(args: &[String], env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let parsed = |key: &str| env(key).and_then(|v| v.trim().parse::<i64>().ok());

        let database_url = env("DATABASE_URL").unwrap_or(defaults.database_url);

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| env("PORT").and_then(|v| v.parse().ok()))
            .unwrap_or(defaults.port);

        let local_mode = args.iter().any(|a| a == "--local")
            || env("CLUB_RATINGS_LOCAL_MODE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        let operation_timeout = parsed("OPERATION_TIMEOUT_SECS")
            .filter(|v| *v > 0)
            .map(|v| Duration::from_secs(v as u64))
            .unwrap_or(defaults.operation_timeout);

        let base = defaults.engine;
        let min = parsed("RATING_MIN").map_or(base.bounds.min, |v| v as i32);
        let max = parsed("RATING_MAX").map_or(base.bounds.max, |v| v as i32);
        let bounds = RatingBounds::new(min, max);

        let k_policy = match env("K_POLICY") {
            Some(v) => KPolicyMode::from_str_name(v.trim()).unwrap_or_else(|| {
                tracing::warn!("Unknown K_POLICY '{v}', using per_competition");
                KPolicyMode::PerCompetition
            }),
            None => base.k_policy,
        };

        let engine = EngineSettings {
            bounds,
            baseline: bounds.clamp(parsed("RATING_BASELINE").map_or(base.baseline, |v| v as i32)),
            history_cap: parsed("HISTORY_CAP")
                .filter(|v| *v > 0)
                .map_or(base.history_cap, |v| v as usize),
            commit_attempts: parsed("COMMIT_ATTEMPTS")
                .filter(|v| *v > 0)
                .map_or(base.commit_attempts, |v| v as u32),
            commit_backoff: parsed("COMMIT_BACKOFF_MS")
                .filter(|v| *v >= 0)
                .map_or(base.commit_backoff, |v| Duration::from_millis(v as u64)),
            k_policy,
        };

        Config {
            database_url,
            port,
            local_mode,
            operation_timeout,
            engine,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(args: &[&str], vars: &[(&str, &str)]) -> Config {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_sources(&args, |key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&["club-ratings"], &[]);
        assert_eq!(config.port, 3000);
        assert!(!config.local_mode);
        assert_eq!(config.engine.bounds, RatingBounds::new(800, 3000));
        assert_eq!(config.engine.baseline, 1200);
        assert_eq!(config.engine.history_cap, 100);
        assert_eq!(config.engine.commit_attempts, 3);
        assert_eq!(config.engine.k_policy, KPolicyMode::PerCompetition);
    }

    #[test]
    fn test_cli_overrides_env() {
        let config = load(
            &["club-ratings", "--port", "8080", "--local"],
            &[("PORT", "9000")],
        );
        assert_eq!(config.port, 8080);
        assert!(config.local_mode);
    }

    #[test]
    fn test_engine_settings_from_env() {
        let config = load(
            &["club-ratings"],
            &[
                ("RATING_MIN", "900"),
                ("RATING_MAX", "2500"),
                ("RATING_BASELINE", "3000"),
                ("HISTORY_CAP", "50"),
                ("COMMIT_ATTEMPTS", "5"),
                ("K_POLICY", "unified"),
                ("OPERATION_TIMEOUT_SECS", "3"),
            ],
        );
        assert_eq!(config.engine.bounds, RatingBounds::new(900, 2500));
        // Baseline is pulled inside the bounds.
        assert_eq!(config.engine.baseline, 2500);
        assert_eq!(config.engine.history_cap, 50);
        assert_eq!(config.engine.commit_attempts, 5);
        assert_eq!(config.engine.k_policy, KPolicyMode::Unified);
        assert_eq!(config.operation_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(
            &["club-ratings"],
            &[("HISTORY_CAP", "0"), ("K_POLICY", "chaos"), ("PORT", "x")],
        );
        assert_eq!(config.engine.history_cap, 100);
        assert_eq!(config.engine.k_policy, KPolicyMode::PerCompetition);
        assert_eq!(config.port, 3000);
    }
}
