use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::grade::line::block_label;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockLogKind {
    Used,
    Skipped,
    Substituted,
    Missing,
    Fixed,
}

impl BlockLogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Used => "used",
            Self::Skipped => "skipped",
            Self::Substituted => "substituted",
            Self::Missing => "missing",
            Self::Fixed => "fixed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "used" => Self::Used,
            "skipped" => Self::Skipped,
            "substituted" => Self::Substituted,
            "fixed" => Self::Fixed,
            _ => Self::Missing,
        }
    }
}

/// One audit entry for one slot decision within a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockLogItem {
    /// Block start, minutes-of-day.
    pub block_minutes: u32,
    pub kind: BlockLogKind,
    pub title: String,
    pub artist: String,
    pub station: String,
    pub reason: Option<String>,
    pub style: Option<String>,
    /// Station the entry substitutes for, when filled from another source.
    pub substitute_for: Option<String>,
}

impl BlockLogItem {
    pub fn new(block_minutes: u32, kind: BlockLogKind) -> Self {
        Self {
            block_minutes,
            kind,
            title: String::new(),
            artist: String::new(),
            station: String::new(),
            reason: None,
            style: None,
            substitute_for: None,
        }
    }
}

/// Coarse per-block build record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildHistoryRecord {
    pub built_at: i64,
    pub block_label: String,
    pub slots_processed: u32,
    pub slots_found: u32,
    pub slots_missing: u32,
    pub program_name: String,
}

// ── Persistence ───────────────────────────────────────────────────────────────

/// Persist a block's audit trail and mirror it to the console log.
pub async fn insert_block_log(pool: &SqlitePool, items: &[BlockLogItem]) -> Result<(), sqlx::Error> {
    let now = now_ts();
    for item in items {
        let label = block_label(item.block_minutes);
        sqlx::query(
            r#"
            INSERT INTO block_log (
                logged_at, block_time, kind, title, artist, station, reason, style, substitute_for
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(now)
        .bind(&label)
        .bind(item.kind.as_str())
        .bind(&item.title)
        .bind(&item.artist)
        .bind(&item.station)
        .bind(&item.reason)
        .bind(&item.style)
        .bind(&item.substitute_for)
        .execute(pool)
        .await?;

        match item.kind {
            BlockLogKind::Missing => log::warn!(
                "[{label}] missing: {} - {} ({})",
                item.artist,
                item.title,
                item.station
            ),
            BlockLogKind::Skipped => log::debug!(
                "[{label}] skipped: {} - {} ({})",
                item.artist,
                item.title,
                item.reason.as_deref().unwrap_or("")
            ),
            kind => log::info!(
                "[{label}] {}: {} - {} ({})",
                kind.as_str(),
                item.artist,
                item.title,
                item.reason.as_deref().unwrap_or(&item.station)
            ),
        }
    }
    Ok(())
}

pub async fn get_block_log(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<Vec<BlockLogItem>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT block_time, kind, title, artist, station, reason, style, substitute_for \
         FROM block_log ORDER BY id DESC LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| BlockLogItem {
            block_minutes: crate::grade::line::parse_block_label(r.get::<&str, _>("block_time"))
                .unwrap_or(0),
            kind: BlockLogKind::from_str(r.get::<&str, _>("kind")),
            title: r.get("title"),
            artist: r.get("artist"),
            station: r.get("station"),
            reason: r.get("reason"),
            style: r.get("style"),
            substitute_for: r.get("substitute_for"),
        })
        .collect())
}

pub async fn insert_build_history(
    pool: &SqlitePool,
    record: &BuildHistoryRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO build_history (built_at, block_label, slots_processed, slots_found, slots_missing, program_name) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(record.built_at)
    .bind(&record.block_label)
    .bind(record.slots_processed as i64)
    .bind(record.slots_found as i64)
    .bind(record.slots_missing as i64)
    .bind(&record.program_name)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a song the library couldn't produce, for manual curation.
/// Repeated reports of the same song refresh the timestamp.
pub async fn report_missing_song(
    pool: &SqlitePool,
    title: &str,
    artist: &str,
    station: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO missing_songs (title, artist, station, reported_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(title, artist) DO UPDATE SET
          station = excluded.station,
          reported_at = excluded.reported_at
        "#,
    )
    .bind(title)
    .bind(artist)
    .bind(station)
    .bind(now_ts())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_missing_songs(
    pool: &SqlitePool,
    limit: i64,
) -> Result<Vec<(String, String, String)>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT title, artist, station FROM missing_songs ORDER BY reported_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| (r.get("title"), r.get("artist"), r.get("station")))
        .collect())
}

fn now_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::local::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn block_log_roundtrip() {
        let pool = test_pool().await;
        let mut item = BlockLogItem::new(10 * 60, BlockLogKind::Used);
        item.title = "Song A".to_string();
        item.artist = "Artist X".to_string();
        item.station = "BH FM".to_string();
        item.reason = Some("station_pool".to_string());
        insert_block_log(&pool, &[item]).await.unwrap();

        let logged = get_block_log(&pool, 10, 0).await.unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].kind, BlockLogKind::Used);
        assert_eq!(logged[0].block_minutes, 600);
        assert_eq!(logged[0].title, "Song A");
    }

    #[tokio::test]
    async fn missing_song_reports_dedupe() {
        let pool = test_pool().await;
        report_missing_song(&pool, "Song A", "Artist X", "BH FM")
            .await
            .unwrap();
        report_missing_song(&pool, "Song A", "Artist X", "98 FM")
            .await
            .unwrap();

        let missing = get_missing_songs(&pool, 10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].2, "98 FM");
    }

    #[tokio::test]
    async fn build_history_insert() {
        let pool = test_pool().await;
        insert_build_history(
            &pool,
            &BuildHistoryRecord {
                built_at: 123,
                block_label: "08:00".to_string(),
                slots_processed: 10,
                slots_found: 9,
                slots_missing: 1,
                program_name: "Programação Musical".to_string(),
            },
        )
        .await
        .unwrap();
    }
}
