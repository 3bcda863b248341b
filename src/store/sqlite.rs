// SQLite-backed Store (via sqlx).
//
// Timestamps are stored as fixed-width RFC 3339 text so that string order
// matches chronological order.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};

use super::{MatchCommit, Store};
use crate::competition::{Competition, CompetitionKind};
use crate::elo::Outcome;
use crate::error::{EngineError, Result};
use crate::model::{
    Badge, BadgeTier, HistoryEntry, MatchRecord, MatchType, PlacementStats, PlayerId,
    PlayerProfile, PlayerRating, RatingChangeEvent, RatingContext, RatingKey, SeasonRecord,
    SeasonState, SeasonStatus, Trophy, TrophyType,
};

// ── Row types ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct PlayerRow {
    id: String,
    display_name: String,
    self_assessed_level: Option<String>,
    championships: i64,
    runner_ups: i64,
    best_finish: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct PlacementRow {
    championships: i64,
    runner_ups: i64,
    best_finish: Option<i64>,
}

#[derive(Debug, sqlx::FromRow)]
struct RatingRow {
    player_id: String,
    context: String,
    match_type: String,
    current_rating: i64,
    peak_rating: i64,
    matches_played: i64,
    version: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    match_id: String,
    player_id: String,
    context: String,
    match_type: String,
    opponent_id: String,
    old_rating: i64,
    new_rating: i64,
    delta: i64,
    k_factor: i64,
    recorded_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    player_id: String,
    scope: String,
    match_id: String,
    match_type: String,
    competition: String,
    result: String,
    opponent_ids: String,
    played_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct BadgeRow {
    id: String,
    player_id: String,
    achievement_id: String,
    tier: String,
    points: i64,
    unlocked_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct CompetitionRow {
    id: String,
    name: String,
    kind: String,
    club_id: Option<String>,
    match_type: String,
}

#[derive(Debug, sqlx::FromRow)]
struct TrophyRow {
    id: String,
    competition_id: String,
    player_id: String,
    trophy_type: String,
    rank: i64,
    season: String,
    awarded_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SeasonRow {
    id: String,
    status: String,
    updated_at: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct SeasonRecordRow {
    season_id: String,
    player_id: String,
    wins: i64,
    losses: i64,
    draws: i64,
}

// ── Column codecs ─────────────────────────────────────────────────────

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt("timestamp", &format!("{value}: {e}")))
}

fn corrupt(column: &str, value: &str) -> EngineError {
    EngineError::Dependency(format!("corrupt {column} column: {value}"))
}

fn count(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn parse_with<T>(column: &str, value: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| corrupt(column, value))
}

fn outcome_str(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Win => "win",
        Outcome::Draw => "draw",
        Outcome::Loss => "loss",
    }
}

fn parse_outcome(s: &str) -> Option<Outcome> {
    match s {
        "win" => Some(Outcome::Win),
        "draw" => Some(Outcome::Draw),
        "loss" => Some(Outcome::Loss),
        _ => None,
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl PlacementRow {
    fn into_stats(self) -> PlacementStats {
        PlacementStats {
            championships: count(self.championships),
            runner_ups: count(self.runner_ups),
            best_finish: self.best_finish.map(count),
        }
    }
}

impl PlayerRow {
    fn into_profile(self) -> PlayerProfile {
        PlayerProfile {
            id: self.id,
            display_name: self.display_name,
            self_assessed_level: self.self_assessed_level,
            placement: PlacementStats {
                championships: count(self.championships),
                runner_ups: count(self.runner_ups),
                best_finish: self.best_finish.map(count),
            },
        }
    }
}

impl RatingRow {
    fn into_rating(self) -> Result<PlayerRating> {
        Ok(PlayerRating {
            context: parse_with("context", &self.context, RatingContext::parse)?,
            match_type: parse_with("match_type", &self.match_type, MatchType::from_str_name)?,
            player_id: self.player_id,
            current: self.current_rating as i32,
            peak: self.peak_rating as i32,
            matches_played: count(self.matches_played),
            version: u64::try_from(self.version).unwrap_or(0),
        })
    }
}

impl EventRow {
    fn into_event(self) -> Result<RatingChangeEvent> {
        Ok(RatingChangeEvent {
            context: parse_with("context", &self.context, RatingContext::parse)?,
            match_type: parse_with("match_type", &self.match_type, MatchType::from_str_name)?,
            recorded_at: parse_ts(&self.recorded_at)?,
            match_id: self.match_id,
            player_id: self.player_id,
            opponent_id: self.opponent_id,
            old_rating: self.old_rating as i32,
            new_rating: self.new_rating as i32,
            delta: self.delta as i32,
            k_factor: self.k_factor as i32,
        })
    }
}

impl HistoryRow {
    fn into_entry(self) -> Result<HistoryEntry> {
        Ok(HistoryEntry {
            scope: parse_with("scope", &self.scope, RatingContext::parse)?,
            match_type: parse_with("match_type", &self.match_type, MatchType::from_str_name)?,
            competition: parse_with(
                "competition",
                &self.competition,
                CompetitionKind::from_str_name,
            )?,
            result: parse_with("result", &self.result, parse_outcome)?,
            opponent_ids: serde_json::from_str(&self.opponent_ids)?,
            played_at: parse_ts(&self.played_at)?,
            player_id: self.player_id,
            match_id: self.match_id,
        })
    }
}

impl BadgeRow {
    fn into_badge(self) -> Result<Badge> {
        Ok(Badge {
            tier: parse_with("tier", &self.tier, BadgeTier::from_str_name)?,
            unlocked_at: parse_ts(&self.unlocked_at)?,
            id: self.id,
            player_id: self.player_id,
            achievement_id: self.achievement_id,
            points: count(self.points),
        })
    }
}

impl TrophyRow {
    fn into_trophy(self) -> Result<Trophy> {
        Ok(Trophy {
            trophy_type: parse_with("trophy_type", &self.trophy_type, TrophyType::from_str_name)?,
            awarded_at: parse_ts(&self.awarded_at)?,
            id: self.id,
            competition_id: self.competition_id,
            player_id: self.player_id,
            rank: count(self.rank),
            season: self.season,
        })
    }
}

impl SeasonRow {
    fn into_state(self) -> Result<SeasonState> {
        Ok(SeasonState {
            status: parse_with("status", &self.status, SeasonStatus::from_str_name)?,
            updated_at: self.updated_at.as_deref().map(parse_ts).transpose()?,
            id: self.id,
        })
    }
}

impl From<SeasonRecordRow> for SeasonRecord {
    fn from(row: SeasonRecordRow) -> Self {
        Self {
            season_id: row.season_id,
            player_id: row.player_id,
            wins: count(row.wins),
            losses: count(row.losses),
            draws: count(row.draws),
        }
    }
}

// ── Store ─────────────────────────────────────────────────────────────

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to `:memory:` opens its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS players (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                self_assessed_level TEXT,
                championships INTEGER NOT NULL DEFAULT 0,
                runner_ups INTEGER NOT NULL DEFAULT 0,
                best_finish INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS placement_lookup (
                player_id TEXT PRIMARY KEY,
                championships INTEGER NOT NULL DEFAULT 0,
                runner_ups INTEGER NOT NULL DEFAULT 0,
                best_finish INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS player_ratings (
                player_id TEXT NOT NULL,
                context TEXT NOT NULL,
                match_type TEXT NOT NULL,
                current_rating INTEGER NOT NULL,
                peak_rating INTEGER NOT NULL,
                matches_played INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (player_id, context, match_type)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                match_type TEXT NOT NULL,
                context TEXT NOT NULL,
                ranked INTEGER NOT NULL,
                played_at TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS match_participants (
                match_id TEXT NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
                player_id TEXT NOT NULL,
                PRIMARY KEY (match_id, player_id)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_match_participants_player ON match_participants(player_id)",
            r#"
            CREATE TABLE IF NOT EXISTS rating_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id TEXT NOT NULL,
                player_id TEXT NOT NULL,
                context TEXT NOT NULL,
                match_type TEXT NOT NULL,
                opponent_id TEXT NOT NULL,
                old_rating INTEGER NOT NULL,
                new_rating INTEGER NOT NULL,
                delta INTEGER NOT NULL,
                k_factor INTEGER NOT NULL,
                recorded_at TEXT NOT NULL,
                UNIQUE(match_id, player_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS match_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player_id TEXT NOT NULL,
                scope TEXT NOT NULL,
                match_id TEXT NOT NULL,
                match_type TEXT NOT NULL,
                competition TEXT NOT NULL,
                result TEXT NOT NULL,
                opponent_ids TEXT NOT NULL DEFAULT '[]',
                played_at TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_match_history_log ON match_history(player_id, scope, played_at)",
            r#"
            CREATE TABLE IF NOT EXISTS badges (
                player_id TEXT NOT NULL,
                id TEXT NOT NULL,
                achievement_id TEXT NOT NULL,
                tier TEXT NOT NULL,
                points INTEGER NOT NULL,
                unlocked_at TEXT NOT NULL,
                PRIMARY KEY (player_id, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS competitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                club_id TEXT,
                match_type TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS competition_participants (
                competition_id TEXT NOT NULL REFERENCES competitions(id) ON DELETE CASCADE,
                player_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (competition_id, player_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS trophies (
                id TEXT PRIMARY KEY,
                competition_id TEXT NOT NULL,
                player_id TEXT NOT NULL,
                trophy_type TEXT NOT NULL,
                rank INTEGER NOT NULL,
                season TEXT NOT NULL,
                awarded_at TEXT NOT NULL
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_trophies_podium ON trophies(competition_id, trophy_type) WHERE trophy_type IN ('winner', 'runner_up')",
            r#"
            CREATE TABLE IF NOT EXISTS seasons (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'open',
                updated_at TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS season_records (
                season_id TEXT NOT NULL,
                player_id TEXT NOT NULL,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                draws INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (season_id, player_id)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn participants_for(&self, ids: &[String]) -> Result<HashMap<String, Vec<PlayerId>>> {
        let mut by_competition: HashMap<String, Vec<PlayerId>> = HashMap::new();
        if ids.is_empty() {
            return Ok(by_competition);
        }
        let sql = format!(
            "SELECT competition_id, player_id FROM competition_participants WHERE competition_id IN ({}) ORDER BY competition_id, position",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        for (competition_id, player_id) in query.fetch_all(&self.pool).await? {
            by_competition
                .entry(competition_id)
                .or_default()
                .push(player_id);
        }
        Ok(by_competition)
    }

    async fn assemble_competitions(&self, rows: Vec<CompetitionRow>) -> Result<Vec<Competition>> {
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut participants = self.participants_for(&ids).await?;
        rows.into_iter()
            .map(|row| {
                Ok(Competition {
                    kind: parse_with("kind", &row.kind, CompetitionKind::from_str_name)?,
                    match_type: parse_with(
                        "match_type",
                        &row.match_type,
                        MatchType::from_str_name,
                    )?,
                    participants: participants.remove(&row.id).unwrap_or_default(),
                    id: row.id,
                    name: row.name,
                    club_id: row.club_id,
                })
            })
            .collect()
    }
}

async fn insert_history(
    conn: &mut SqliteConnection,
    entries: &[HistoryEntry],
    cap: usize,
) -> Result<()> {
    let cap = cap.max(1) as i64;
    for entry in entries {
        let scope = entry.scope.to_string();
        sqlx::query(
            "INSERT INTO match_history (player_id, scope, match_id, match_type, competition, result, opponent_ids, played_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.player_id)
        .bind(&scope)
        .bind(&entry.match_id)
        .bind(entry.match_type.as_str())
        .bind(entry.competition.to_str_name())
        .bind(outcome_str(entry.result))
        .bind(serde_json::to_string(&entry.opponent_ids)?)
        .bind(ts(entry.played_at))
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM match_history
            WHERE player_id = ? AND scope = ? AND id NOT IN (
                SELECT id FROM match_history
                WHERE player_id = ? AND scope = ?
                ORDER BY played_at DESC, id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(&entry.player_id)
        .bind(&scope)
        .bind(&entry.player_id)
        .bind(&scope)
        .bind(cap)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn write_rating(conn: &mut SqliteConnection, rating: &PlayerRating) -> Result<()> {
    let context = rating.context.to_string();
    let stale = || {
        EngineError::Conflict(format!(
            "rating {}/{}/{} changed since version {}",
            rating.player_id,
            context,
            rating.match_type.as_str(),
            rating.version
        ))
    };

    if rating.version == 0 {
        // First write for this key; a concurrent first write trips the
        // primary key and maps to a conflict.
        sqlx::query(
            "INSERT INTO player_ratings (player_id, context, match_type, current_rating, peak_rating, matches_played, version, updated_at) VALUES (?, ?, ?, ?, ?, ?, 1, datetime('now'))",
        )
        .bind(&rating.player_id)
        .bind(&context)
        .bind(rating.match_type.as_str())
        .bind(rating.current)
        .bind(rating.peak)
        .bind(rating.matches_played as i64)
        .execute(&mut *conn)
        .await
        .map_err(|e| match EngineError::from(e) {
            EngineError::Conflict(_) => stale(),
            other => other,
        })?;
        return Ok(());
    }

    let result = sqlx::query(
        "UPDATE player_ratings SET current_rating = ?, peak_rating = ?, matches_played = ?, version = version + 1, updated_at = datetime('now') WHERE player_id = ? AND context = ? AND match_type = ? AND version = ?",
    )
    .bind(rating.current)
    .bind(rating.peak)
    .bind(rating.matches_played as i64)
    .bind(&rating.player_id)
    .bind(&context)
    .bind(rating.match_type.as_str())
    .bind(rating.version as i64)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(stale());
    }
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    // ── Players ──────────────────────────────────────────────────────

    async fn get_player(&self, player_id: &str) -> Result<Option<PlayerProfile>> {
        let row = sqlx::query_as::<_, PlayerRow>(
            "SELECT id, display_name, self_assessed_level, championships, runner_ups, best_finish FROM players WHERE id = ?",
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PlayerRow::into_profile))
    }

    async fn upsert_player(&self, profile: &PlayerProfile) -> Result<()> {
        let placement = profile.placement;
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO players (id, display_name, self_assessed_level, championships, runner_ups, best_finish)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                self_assessed_level = excluded.self_assessed_level
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.display_name)
        .bind(&profile.self_assessed_level)
        .bind(placement.championships as i64)
        .bind(placement.runner_ups as i64)
        .bind(placement.best_finish.map(|b| b as i64))
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO placement_lookup (player_id, championships, runner_ups, best_finish) VALUES (?, ?, ?, ?)",
        )
        .bind(&profile.id)
        .bind(placement.championships as i64)
        .bind(placement.runner_ups as i64)
        .bind(placement.best_finish.map(|b| b as i64))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn placement_lookup(&self, player_id: &str) -> Result<Option<PlacementStats>> {
        let row = sqlx::query_as::<_, PlacementRow>(
            "SELECT championships, runner_ups, best_finish FROM placement_lookup WHERE player_id = ?",
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PlacementRow::into_stats))
    }

    // ── Ratings ──────────────────────────────────────────────────────

    async fn get_rating(&self, key: &RatingKey) -> Result<Option<PlayerRating>> {
        let row = sqlx::query_as::<_, RatingRow>(
            "SELECT player_id, context, match_type, current_rating, peak_rating, matches_played, version FROM player_ratings WHERE player_id = ? AND context = ? AND match_type = ?",
        )
        .bind(&key.player_id)
        .bind(key.context.to_string())
        .bind(key.match_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(RatingRow::into_rating).transpose()
    }

    async fn rating_events(&self, player_id: &str, limit: usize) -> Result<Vec<RatingChangeEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT match_id, player_id, context, match_type, opponent_id, old_rating, new_rating, delta, k_factor, recorded_at FROM rating_events WHERE player_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(player_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(EventRow::into_event).collect()
    }

    async fn commit_match(&self, commit: &MatchCommit) -> Result<()> {
        let record = &commit.record;
        let mut tx = self.pool.begin().await?;

        let seen: Option<i64> = sqlx::query_scalar("SELECT 1 FROM matches WHERE id = ?")
            .bind(&record.id)
            .fetch_optional(&mut *tx)
            .await?;
        if seen.is_some() {
            return Err(EngineError::Validation(format!(
                "match {} was already processed",
                record.id
            )));
        }

        for rating in &commit.ratings {
            write_rating(&mut tx, rating).await?;
        }

        for event in &commit.events {
            sqlx::query(
                "INSERT INTO rating_events (match_id, player_id, context, match_type, opponent_id, old_rating, new_rating, delta, k_factor, recorded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&event.match_id)
            .bind(&event.player_id)
            .bind(event.context.to_string())
            .bind(event.match_type.as_str())
            .bind(&event.opponent_id)
            .bind(event.old_rating)
            .bind(event.new_rating)
            .bind(event.delta)
            .bind(event.k_factor)
            .bind(ts(event.recorded_at))
            .execute(&mut *tx)
            .await?;
        }

        insert_history(&mut tx, &commit.history, commit.history_cap).await?;

        for result in &commit.season_results {
            let (wins, losses, draws) = match result.outcome {
                Outcome::Win => (1, 0, 0),
                Outcome::Loss => (0, 1, 0),
                Outcome::Draw => (0, 0, 1),
            };
            sqlx::query(
                r#"
                INSERT INTO season_records (season_id, player_id, wins, losses, draws)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(season_id, player_id) DO UPDATE SET
                    wins = wins + excluded.wins,
                    losses = losses + excluded.losses,
                    draws = draws + excluded.draws
                "#,
            )
            .bind(&result.season_id)
            .bind(&result.player_id)
            .bind(wins)
            .bind(losses)
            .bind(draws)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO matches (id, match_type, context, ranked, played_at, body) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.match_type.as_str())
        .bind(record.context.to_string())
        .bind(record.ranked)
        .bind(ts(record.played_at))
        .bind(serde_json::to_string(record)?)
        .execute(&mut *tx)
        .await?;

        for player in record.participants().all() {
            sqlx::query("INSERT INTO match_participants (match_id, player_id) VALUES (?, ?)")
                .bind(&record.id)
                .bind(player)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // ── Matches ──────────────────────────────────────────────────────

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchRecord>> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM matches WHERE id = ?")
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
    }

    async fn matches_since(
        &self,
        player_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MatchRecord>> {
        let bodies: Vec<String> = sqlx::query_scalar(
            "SELECT m.body FROM matches m JOIN match_participants p ON p.match_id = m.id WHERE p.player_id = ? AND m.played_at >= ? ORDER BY m.played_at DESC",
        )
        .bind(player_id)
        .bind(ts(since))
        .fetch_all(&self.pool)
        .await?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(EngineError::from))
            .collect()
    }

    // ── History ──────────────────────────────────────────────────────

    async fn recent_history(
        &self,
        player_id: &str,
        scope: &RatingContext,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            "SELECT player_id, scope, match_id, match_type, competition, result, opponent_ids, played_at FROM match_history WHERE player_id = ? AND scope = ? ORDER BY played_at DESC, id DESC LIMIT ?",
        )
        .bind(player_id)
        .bind(scope.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    // ── Badges ───────────────────────────────────────────────────────

    async fn badges_for_player(&self, player_id: &str) -> Result<Vec<Badge>> {
        let rows = sqlx::query_as::<_, BadgeRow>(
            "SELECT id, player_id, achievement_id, tier, points, unlocked_at FROM badges WHERE player_id = ? ORDER BY id",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(BadgeRow::into_badge).collect()
    }

    async fn insert_badge_if_absent(&self, badge: &Badge) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO badges (player_id, id, achievement_id, tier, points, unlocked_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&badge.player_id)
        .bind(&badge.id)
        .bind(&badge.achievement_id)
        .bind(badge.tier.as_str())
        .bind(badge.points as i64)
        .bind(ts(badge.unlocked_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    // ── Competitions ─────────────────────────────────────────────────

    async fn upsert_competition(&self, competition: &Competition) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO competitions (id, name, kind, club_id, match_type)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                club_id = excluded.club_id,
                match_type = excluded.match_type
            "#,
        )
        .bind(&competition.id)
        .bind(&competition.name)
        .bind(competition.kind.to_str_name())
        .bind(&competition.club_id)
        .bind(competition.match_type.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM competition_participants WHERE competition_id = ?")
            .bind(&competition.id)
            .execute(&mut *tx)
            .await?;
        for (position, player) in competition.participants.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO competition_participants (competition_id, player_id, position) VALUES (?, ?, ?)",
            )
            .bind(&competition.id)
            .bind(player)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_competitions(&self, ids: &[String]) -> Result<Vec<Competition>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, name, kind, club_id, match_type FROM competitions WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, CompetitionRow>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        self.assemble_competitions(rows).await
    }

    async fn competitions_for_player(&self, player_id: &str) -> Result<Vec<Competition>> {
        let rows = sqlx::query_as::<_, CompetitionRow>(
            "SELECT c.id, c.name, c.kind, c.club_id, c.match_type FROM competitions c JOIN competition_participants p ON p.competition_id = c.id WHERE p.player_id = ? ORDER BY c.id",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        self.assemble_competitions(rows).await
    }

    // ── Trophies ─────────────────────────────────────────────────────

    async fn trophies_for_player(&self, player_id: &str) -> Result<Vec<Trophy>> {
        let rows = sqlx::query_as::<_, TrophyRow>(
            "SELECT id, competition_id, player_id, trophy_type, rank, season, awarded_at FROM trophies WHERE player_id = ? ORDER BY awarded_at, id",
        )
        .bind(player_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TrophyRow::into_trophy).collect()
    }

    async fn commit_trophies(&self, trophies: &[Trophy]) -> Result<Vec<Trophy>> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::new();

        for trophy in trophies {
            if trophy.trophy_type.is_podium() {
                let holder: Option<String> = sqlx::query_scalar(
                    "SELECT player_id FROM trophies WHERE competition_id = ? AND trophy_type = ? AND player_id <> ?",
                )
                .bind(&trophy.competition_id)
                .bind(trophy.trophy_type.as_str())
                .bind(&trophy.player_id)
                .fetch_optional(&mut *tx)
                .await?;
                if let Some(holder) = holder {
                    return Err(podium_taken(trophy, &holder));
                }
            }

            let result = sqlx::query(
                "INSERT OR IGNORE INTO trophies (id, competition_id, player_id, trophy_type, rank, season, awarded_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&trophy.id)
            .bind(&trophy.competition_id)
            .bind(&trophy.player_id)
            .bind(trophy.trophy_type.as_str())
            .bind(trophy.rank as i64)
            .bind(&trophy.season)
            .bind(ts(trophy.awarded_at))
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                continue;
            }

            if let Some(rank) = trophy.trophy_type.placement_rank() {
                let row = sqlx::query_as::<_, PlacementRow>(
                    "SELECT championships, runner_ups, best_finish FROM players WHERE id = ?",
                )
                .bind(&trophy.player_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("player {}", trophy.player_id)))?;

                let mut placement = row.into_stats();
                placement.record(rank);
                sqlx::query(
                    "UPDATE players SET championships = ?, runner_ups = ?, best_finish = ? WHERE id = ?",
                )
                .bind(placement.championships as i64)
                .bind(placement.runner_ups as i64)
                .bind(placement.best_finish.map(|b| b as i64))
                .bind(&trophy.player_id)
                .execute(&mut *tx)
                .await?;
                write_placement_lookup(&mut tx, &trophy.player_id, &placement).await?;
            }
            inserted.push(trophy.clone());
        }

        tx.commit().await?;
        Ok(inserted)
    }

    // ── Seasons ──────────────────────────────────────────────────────

    async fn get_season(&self, season_id: &str) -> Result<Option<SeasonState>> {
        let row = sqlx::query_as::<_, SeasonRow>(
            "SELECT id, status, updated_at FROM seasons WHERE id = ?",
        )
        .bind(season_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(SeasonRow::into_state).transpose()
    }

    async fn transition_season(
        &self,
        season_id: &str,
        from: SeasonStatus,
        to: SeasonStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = if from == SeasonStatus::Open {
            // A season with no row yet is open.
            sqlx::query(
                r#"
                INSERT INTO seasons (id, status, updated_at) VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    updated_at = excluded.updated_at
                WHERE seasons.status = 'open'
                "#,
            )
            .bind(season_id)
            .bind(to.as_str())
            .bind(ts(at))
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("UPDATE seasons SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(to.as_str())
                .bind(ts(at))
                .bind(season_id)
                .bind(from.as_str())
                .execute(&self.pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(EngineError::Conflict(format!(
                "season {season_id} is not {}",
                from.as_str()
            )));
        }
        Ok(())
    }

    async fn season_records(
        &self,
        season_id: &str,
        player_ids: &[PlayerId],
    ) -> Result<Vec<SeasonRecord>> {
        if player_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT season_id, player_id, wins, losses, draws FROM season_records WHERE season_id = ? AND player_id IN ({})",
            placeholders(player_ids.len())
        );
        let mut query = sqlx::query_as::<_, SeasonRecordRow>(&sql).bind(season_id);
        for id in player_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(SeasonRecord::from).collect())
    }
}

fn podium_taken(trophy: &Trophy, holder: &str) -> EngineError {
    EngineError::Validation(format!(
        "{} of {} is already awarded to {holder}",
        trophy.trophy_type.as_str(),
        trophy.competition_id
    ))
}

async fn write_placement_lookup(
    conn: &mut SqliteConnection,
    player_id: &str,
    placement: &PlacementStats,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO placement_lookup (player_id, championships, runner_ups, best_finish)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(player_id) DO UPDATE SET
            championships = excluded.championships,
            runner_ups = excluded.runner_ups,
            best_finish = excluded.best_finish
        "#,
    )
    .bind(player_id)
    .bind(placement.championships as i64)
    .bind(placement.runner_ups as i64)
    .bind(placement.best_finish.map(|b| b as i64))
    .execute(&mut *conn)
    .await?;
    Ok(())
}
