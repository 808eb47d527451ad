/// Station configuration and resolution
///
/// Maps a sequence slot's symbolic source onto a concrete station name and
/// its song pool. Matching runs an ordered chain of strategies and reports
/// which one hit; an empty result is an expected transient condition (the
/// station simply hasn't been observed recently), logged and never thrown.
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::pool::{SongEntry, StationPools};

// ── Config model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: String,
    pub name: String,
    /// Coarse genre tags used for cross-station substitution affinity.
    pub styles: Vec<String>,
    pub enabled: bool,
}

// ── DB helpers ────────────────────────────────────────────────────────────────

pub async fn get_stations(pool: &SqlitePool) -> Result<Vec<StationConfig>, sqlx::Error> {
    let rows = sqlx::query("SELECT id, name, styles_json, enabled FROM station_configs ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|r| StationConfig {
            id: r.get("id"),
            name: r.get("name"),
            styles: serde_json::from_str(r.get::<&str, _>("styles_json")).unwrap_or_default(),
            enabled: r.get::<i64, _>("enabled") != 0,
        })
        .collect())
}

pub async fn upsert_station(pool: &SqlitePool, station: &StationConfig) -> Result<(), sqlx::Error> {
    let styles_json = serde_json::to_string(&station.styles).unwrap_or_default();
    sqlx::query(
        "INSERT INTO station_configs (id, name, styles_json, enabled) VALUES (?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, styles_json = excluded.styles_json, enabled = excluded.enabled",
    )
    .bind(&station.id)
    .bind(&station.name)
    .bind(&styles_json)
    .bind(station.enabled as i64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_station(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM station_configs WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// Short-ID table inherited from the first generation of sequence configs;
/// old sequences still reference stations by these codes.
const LEGACY_STATIONS: &[(&str, &str)] = &[
    ("bh", "BH FM"),
    ("98", "98 FM"),
    ("itatiaia", "Itatiaia"),
    ("clube", "Clube FM"),
    ("band", "Band FM"),
    ("extra", "Extra FM"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Legacy,
    Uuid,
    Exact,
    CaseInsensitive,
    Fuzzy,
    None,
}

impl ResolvedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Uuid => "uuid",
            Self::Exact => "exact",
            Self::CaseInsensitive => "case_insensitive",
            Self::Fuzzy => "fuzzy",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedStation {
    pub station_name: String,
    pub songs: Vec<SongEntry>,
    pub resolved_by: ResolvedBy,
}

fn normalize_label(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn pool_for(name: &str, pools: &StationPools) -> Vec<SongEntry> {
    pools.get(name).cloned().unwrap_or_default()
}

/// Resolve a slot's symbolic source to a station name and its pool.
pub fn resolve_station(
    radio_source: &str,
    pools: &StationPools,
    stations: &[StationConfig],
) -> ResolvedStation {
    let source = radio_source.trim();

    // 1. Legacy short-ID table.
    if let Some((_, name)) = LEGACY_STATIONS
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(source))
    {
        return ResolvedStation {
            station_name: name.to_string(),
            songs: pool_for(name, pools),
            resolved_by: ResolvedBy::Legacy,
        };
    }

    // 2. Configured station id.
    if let Some(station) = stations.iter().find(|s| s.id == source) {
        return ResolvedStation {
            station_name: station.name.clone(),
            songs: pool_for(&station.name, pools),
            resolved_by: ResolvedBy::Uuid,
        };
    }

    // 3. Exact pool key.
    if pools.contains_key(source) {
        return ResolvedStation {
            station_name: source.to_string(),
            songs: pool_for(source, pools),
            resolved_by: ResolvedBy::Exact,
        };
    }

    // 4. Case-insensitive pool key.
    if let Some(name) = pools.keys().find(|k| k.eq_ignore_ascii_case(source)) {
        let name = name.clone();
        return ResolvedStation {
            songs: pool_for(&name, pools),
            station_name: name,
            resolved_by: ResolvedBy::CaseInsensitive,
        };
    }

    // 5. Normalized-substring fuzzy match.
    let source_norm = normalize_label(source);
    if !source_norm.is_empty() {
        if let Some(name) = pools.keys().find(|k| {
            let key_norm = normalize_label(k);
            key_norm.contains(&source_norm) || source_norm.contains(&key_norm)
        }) {
            let name = name.clone();
            return ResolvedStation {
                songs: pool_for(&name, pools),
                station_name: name,
                resolved_by: ResolvedBy::Fuzzy,
            };
        }
    }

    log::debug!("station source '{source}' resolved to nothing");
    ResolvedStation {
        station_name: source.to_string(),
        songs: Vec::new(),
        resolved_by: ResolvedBy::None,
    }
}
