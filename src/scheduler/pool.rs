/// Song Pool Builder
///
/// Turns raw observed-song records (what the monitored stations actually
/// played) into deduplicated per-station pools tagged with freshness and the
/// station's style. Pools are rebuilt per build; selection never mutates an
/// entry in place.
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::station::StationConfig;

/// Observed records considered per build.
pub const MAX_OBSERVED_RECORDS: usize = 2000;

/// Per-station pool cap after dedup.
pub const MAX_SONGS_PER_STATION: usize = 150;

/// Window for the "playing right now elsewhere" selection level, seconds.
pub const FRESHNESS_WINDOW_SECS: i64 = 30 * 60;

// ── Records ───────────────────────────────────────────────────────────────────

/// One raw observation from the song-pool source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedSong {
    pub title: String,
    pub artist: String,
    pub station: String,
    /// Unix seconds.
    pub observed_at: i64,
}

/// A pool entry. `filename` stays empty until selection resolves it against
/// the library; selection works on copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SongEntry {
    pub title: String,
    pub artist: String,
    pub station: String,
    pub style: String,
    pub filename: String,
    pub observed_at: i64,
}

/// Read-only popularity snapshot row, pre-sorted by plays descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSong {
    pub title: String,
    pub artist: String,
    pub plays: u32,
    pub style: String,
}

/// Identity key shared by the dedup rules and the trackers.
pub fn song_key(title: &str, artist: &str) -> String {
    format!("{}|{}", title.trim().to_lowercase(), artist.trim().to_lowercase())
}

// ── Pool construction ─────────────────────────────────────────────────────────

pub type StationPools = HashMap<String, Vec<SongEntry>>;

/// Build per-station pools from raw observations.
///
/// Keeps the most recent observation per (title, artist) per station, caps
/// each station, and sorts most-recently-observed first. The style tag comes
/// from the station's configuration when one matches by name.
pub fn build_station_pools(records: &[ObservedSong], stations: &[StationConfig]) -> StationPools {
    let mut sorted: Vec<&ObservedSong> = records
        .iter()
        .take(MAX_OBSERVED_RECORDS)
        .filter(|r| !r.title.trim().is_empty() && !r.station.trim().is_empty())
        .collect();
    sorted.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));

    let mut pools: StationPools = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    for record in sorted {
        let station = record.station.trim().to_string();
        let dedup_key = format!("{}|{}", station.to_lowercase(), song_key(&record.title, &record.artist));
        if !seen.insert(dedup_key) {
            continue;
        }

        let pool = pools.entry(station.clone()).or_default();
        if pool.len() >= MAX_SONGS_PER_STATION {
            continue;
        }
        pool.push(SongEntry {
            title: record.title.trim().to_string(),
            artist: record.artist.trim().to_string(),
            station: station.clone(),
            style: station_style(&station, stations),
            filename: String::new(),
            observed_at: record.observed_at,
        });
    }

    pools
}

/// First style tag configured for a station, empty when unknown.
pub fn station_style(station: &str, stations: &[StationConfig]) -> String {
    stations
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(station))
        .and_then(|s| s.styles.first().cloned())
        .unwrap_or_default()
}

/// All pool entries across stations, most recent first.
pub fn all_songs(pools: &StationPools) -> Vec<SongEntry> {
    let mut all: Vec<SongEntry> = pools.values().flatten().cloned().collect();
    all.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
    all
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(title: &str, artist: &str, station: &str, at: i64) -> ObservedSong {
        ObservedSong {
            title: title.to_string(),
            artist: artist.to_string(),
            station: station.to_string(),
            observed_at: at,
        }
    }

    fn stations() -> Vec<StationConfig> {
        vec![StationConfig {
            id: "st-1".to_string(),
            name: "BH FM".to_string(),
            styles: vec!["sertanejo".to_string()],
            enabled: true,
        }]
    }

    #[test]
    fn dedups_per_station_keeping_most_recent() {
        let records = vec![
            obs("Song A", "Artist X", "BH FM", 100),
            obs("song a", "ARTIST X", "BH FM", 200),
            obs("Song A", "Artist X", "98 FM", 150),
        ];
        let pools = build_station_pools(&records, &stations());
        assert_eq!(pools["BH FM"].len(), 1);
        assert_eq!(pools["BH FM"][0].observed_at, 200);
        assert_eq!(pools["98 FM"].len(), 1);
    }

    #[test]
    fn tags_style_from_station_config() {
        let pools = build_station_pools(&[obs("A", "B", "BH FM", 1)], &stations());
        assert_eq!(pools["BH FM"][0].style, "sertanejo");
        let pools = build_station_pools(&[obs("A", "B", "Unknown FM", 1)], &stations());
        assert_eq!(pools["Unknown FM"][0].style, "");
    }

    #[test]
    fn caps_each_station_pool() {
        let records: Vec<ObservedSong> = (0..400)
            .map(|i| obs(&format!("S{i}"), "A", "BH FM", i))
            .collect();
        let pools = build_station_pools(&records, &stations());
        assert_eq!(pools["BH FM"].len(), MAX_SONGS_PER_STATION);
        // Most recent first.
        assert_eq!(pools["BH FM"][0].title, "S399");
    }

    #[test]
    fn skips_blank_rows() {
        let records = vec![obs("", "A", "BH FM", 1), obs("T", "A", "  ", 1)];
        let pools = build_station_pools(&records, &stations());
        assert!(pools.is_empty());
    }

    #[test]
    fn all_songs_is_globally_fresh_first() {
        let records = vec![
            obs("A", "X", "BH FM", 10),
            obs("B", "Y", "98 FM", 30),
            obs("C", "Z", "BH FM", 20),
        ];
        let pools = build_station_pools(&records, &stations());
        let all = all_songs(&pools);
        let titles: Vec<&str> = all.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "C", "A"]);
    }
}
