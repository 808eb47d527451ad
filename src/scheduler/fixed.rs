/// Fixed-content catalog
///
/// Named inserts (news, horoscope, ads, ...) scheduled into specific blocks
/// at a configured position within the token list.
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::grade::line::InsertPosition;

// ── Model ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedKind {
    News,
    Horoscope,
    Traffic,
    Weather,
    Ad,
    Ranking,
    Civic,
    Other,
}

impl FixedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Horoscope => "horoscope",
            Self::Traffic => "traffic",
            Self::Weather => "weather",
            Self::Ad => "ad",
            Self::Ranking => "ranking",
            Self::Civic => "civic",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DayPattern {
    #[default]
    All,
    Weekday,
    Weekend,
}

impl DayPattern {
    pub fn matches(self, weekday_idx: u8) -> bool {
        match self {
            Self::All => true,
            Self::Weekday => weekday_idx <= 4,
            Self::Weekend => weekday_idx >= 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedContentItem {
    pub id: Option<i64>,
    pub name: String,
    pub file_name: String,
    pub kind: FixedKind,
    #[serde(default)]
    pub day_pattern: DayPattern,
    pub time_slots: Vec<TimeSlot>,
    pub position: InsertPosition,
    pub enabled: bool,
    #[serde(default)]
    pub ranking_count: Option<u32>,
}

// ── DB helpers ────────────────────────────────────────────────────────────────

pub async fn get_fixed_content(pool: &SqlitePool) -> Result<Vec<FixedContentItem>, sqlx::Error> {
    let rows = sqlx::query("SELECT id, item_json FROM fixed_content ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .filter_map(|r| {
            let id: i64 = r.get("id");
            let mut item: FixedContentItem =
                serde_json::from_str(r.get::<&str, _>("item_json")).ok()?;
            item.id = Some(id);
            Some(item)
        })
        .collect())
}

pub async fn upsert_fixed_content(
    pool: &SqlitePool,
    item: &FixedContentItem,
) -> Result<i64, sqlx::Error> {
    let json = serde_json::to_string(item).unwrap_or_default();
    let result = if let Some(id) = item.id {
        sqlx::query("UPDATE fixed_content SET item_json = ? WHERE id = ?")
            .bind(&json)
            .bind(id)
            .execute(pool)
            .await?;
        id
    } else {
        let r = sqlx::query("INSERT INTO fixed_content (item_json) VALUES (?)")
            .bind(&json)
            .execute(pool)
            .await?;
        r.last_insert_rowid()
    };
    Ok(result)
}

pub async fn delete_fixed_content(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM fixed_content WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Block applicability ───────────────────────────────────────────────────────

/// Fixed items that belong in the block starting at `hour:minute`.
pub fn fixed_for_block(
    items: &[FixedContentItem],
    hour: u32,
    minute: u32,
    weekday_idx: u8,
) -> Vec<&FixedContentItem> {
    items
        .iter()
        .filter(|i| i.enabled && i.day_pattern.matches(weekday_idx))
        .filter(|i| {
            i.time_slots
                .iter()
                .any(|t| t.hour == hour && t.minute == minute)
        })
        .collect()
}
