use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

/// Initialise (or migrate) the local SQLite database at `db_path`.
/// Creates all tables if they don't exist.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let url = format!("sqlite:{db_path}?mode=rwc");
    let pool = SqlitePool::connect(&url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS station_configs (
            id          TEXT    PRIMARY KEY,
            name        TEXT    NOT NULL,
            styles_json TEXT    NOT NULL DEFAULT '[]',
            enabled     INTEGER DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS sequence_config (
            id            INTEGER PRIMARY KEY DEFAULT 1,
            sequence_json TEXT    NOT NULL DEFAULT '[]'
        );

        CREATE TABLE IF NOT EXISTS scheduled_sequences (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            name           TEXT    NOT NULL,
            start_hour     INTEGER NOT NULL,
            start_minute   INTEGER NOT NULL,
            end_hour       INTEGER NOT NULL,
            end_minute     INTEGER NOT NULL,
            week_days_json TEXT    NOT NULL DEFAULT '[]',
            sequence_json  TEXT    NOT NULL DEFAULT '[]',
            enabled        INTEGER DEFAULT 1,
            priority       INTEGER DEFAULT 0,
            created_at     DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS fixed_content (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            item_json TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS engine_settings (
            id            INTEGER PRIMARY KEY DEFAULT 1,
            settings_json TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS block_log (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            logged_at      INTEGER NOT NULL,
            block_time     TEXT    NOT NULL,
            kind           TEXT    NOT NULL,
            title          TEXT    NOT NULL DEFAULT '',
            artist         TEXT    NOT NULL DEFAULT '',
            station        TEXT    NOT NULL DEFAULT '',
            reason         TEXT,
            style          TEXT,
            substitute_for TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_block_log_time
            ON block_log (logged_at);

        CREATE TABLE IF NOT EXISTS build_history (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            built_at        INTEGER NOT NULL,
            block_label     TEXT    NOT NULL,
            slots_processed INTEGER NOT NULL DEFAULT 0,
            slots_found     INTEGER NOT NULL DEFAULT 0,
            slots_missing   INTEGER NOT NULL DEFAULT 0,
            program_name    TEXT    NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS missing_songs (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT    NOT NULL,
            artist      TEXT    NOT NULL,
            station     TEXT    NOT NULL DEFAULT '',
            reported_at INTEGER NOT NULL,
            UNIQUE(title, artist)
        );
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

// ── Engine settings ───────────────────────────────────────────────────────────

fn default_wildcard() -> String {
    "coringa".to_string()
}

fn default_quality() -> String {
    "high".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Terminal fallback token — bare, unquoted, no extension.
    #[serde(default = "default_wildcard")]
    pub wildcard_code: String,
    /// Folder the weekday grade files are written to.
    #[serde(default)]
    pub output_folder: String,
    /// Folders scanned by the local library resolver.
    #[serde(default)]
    pub music_folders: Vec<String>,
    /// Anti-repetition window for incremental builds, minutes.
    #[serde(default)]
    pub repetition_window_minutes: u32,
    /// Auto-build fires when the next block boundary is this close (1-10).
    #[serde(default)]
    pub auto_build_lead_minutes: u32,
    #[serde(default)]
    pub downloads_enabled: bool,
    #[serde(default = "default_quality")]
    pub download_quality: String,
    /// JIT deadline during full-day generation, seconds.
    #[serde(default)]
    pub jit_timeout_full_day_secs: u64,
    /// JIT deadline during incremental builds, seconds (up to 12 minutes).
    #[serde(default)]
    pub jit_timeout_incremental_secs: u64,
    /// Extend the one-download-per-level policy to later candidates.
    #[serde(default)]
    pub jit_retry_per_candidate: bool,
    /// Encoding artifacts stripped before sanitization.
    #[serde(default)]
    pub filter_chars: String,
    /// The two stations of the early-morning alternating block.
    #[serde(default)]
    pub alternating_stations: (String, String),
    #[serde(default)]
    pub happy_hour_folders: Vec<String>,
    #[serde(default)]
    pub late_night_folders: Vec<String>,
    #[serde(default)]
    pub night_program_folder: String,
    #[serde(default)]
    pub supabase_url: String,
    #[serde(default)]
    pub supabase_anon_key: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            wildcard_code: default_wildcard(),
            output_folder: ".".to_string(),
            music_folders: Vec::new(),
            repetition_window_minutes: 60,
            auto_build_lead_minutes: 10,
            downloads_enabled: false,
            download_quality: default_quality(),
            jit_timeout_full_day_secs: 30,
            jit_timeout_incremental_secs: 720,
            jit_retry_per_candidate: false,
            filter_chars: String::new(),
            alternating_stations: ("BH FM".to_string(), "98 FM".to_string()),
            happy_hour_folders: Vec::new(),
            late_night_folders: Vec::new(),
            night_program_folder: String::new(),
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
        }
    }
}

impl EngineSettings {
    pub fn normalized(mut self) -> Self {
        if self.wildcard_code.trim().is_empty() {
            self.wildcard_code = default_wildcard();
        }
        if self.output_folder.trim().is_empty() {
            self.output_folder = ".".to_string();
        }
        if self.repetition_window_minutes == 0 {
            self.repetition_window_minutes = 60;
        }
        self.auto_build_lead_minutes = self.auto_build_lead_minutes.clamp(1, 10);
        if self.jit_timeout_full_day_secs == 0 {
            self.jit_timeout_full_day_secs = 30;
        }
        self.jit_timeout_incremental_secs = self.jit_timeout_incremental_secs.clamp(1, 720);
        self
    }
}

pub async fn load_settings(pool: &SqlitePool) -> Result<EngineSettings, sqlx::Error> {
    let row: Option<String> =
        sqlx::query_scalar("SELECT settings_json FROM engine_settings WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    Ok(row
        .and_then(|j| serde_json::from_str::<EngineSettings>(&j).ok())
        .unwrap_or_default()
        .normalized())
}

pub async fn save_settings(pool: &SqlitePool, settings: &EngineSettings) -> Result<(), sqlx::Error> {
    let normalized = settings.clone().normalized();
    let json = serde_json::to_string(&normalized).unwrap_or_else(|_| "{}".to_string());

    sqlx::query(
        r#"
        INSERT INTO engine_settings (id, settings_json)
        VALUES (1, ?)
        ON CONFLICT(id) DO UPDATE SET settings_json = excluded.settings_json
        "#,
    )
    .bind(json)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn settings_default_when_absent() {
        let pool = test_pool().await;
        let settings = load_settings(&pool).await.unwrap();
        assert_eq!(settings.wildcard_code, "coringa");
        assert_eq!(settings.repetition_window_minutes, 60);
        assert_eq!(settings.auto_build_lead_minutes, 10);
    }

    #[tokio::test]
    async fn settings_roundtrip_and_normalize() {
        let pool = test_pool().await;
        let mut settings = EngineSettings::default();
        settings.wildcard_code = "  ".to_string();
        settings.auto_build_lead_minutes = 99;
        settings.jit_timeout_incremental_secs = 9_999;
        save_settings(&pool, &settings).await.unwrap();

        let loaded = load_settings(&pool).await.unwrap();
        assert_eq!(loaded.wildcard_code, "coringa");
        assert_eq!(loaded.auto_build_lead_minutes, 10);
        assert_eq!(loaded.jit_timeout_incremental_secs, 720);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();
    }
}
