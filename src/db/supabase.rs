/// `db/supabase.rs` — observed-song and ranking source
///
/// Reads the rows the station monitor pushes into Supabase: `scraped_songs`
/// (what each monitored station played, newest first) and `song_ranking`
/// (the persisted popularity snapshot). Everything is read-only here.
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;

use crate::scheduler::pool::{ObservedSong, RankingSong};

// ── Seam ──────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait SongPoolSource: Send + Sync {
    /// Most recent observed plays across all monitored stations.
    async fn recent_songs(&self, limit: u32) -> Result<Vec<ObservedSong>, String>;
    /// Popularity snapshot; the engine only ever sorts it by plays.
    async fn ranking(&self) -> Result<Vec<RankingSong>, String>;
}

// ── Supabase response shapes ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScrapedSongRow {
    #[serde(default)]
    station_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RankingRow {
    #[serde(default)]
    title: String,
    #[serde(default)]
    artist: String,
    #[serde(default)]
    plays: u32,
    #[serde(default)]
    style: String,
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct SupabaseSource {
    base_url: String,
    anon_key: String,
    client: reqwest::Client,
}

impl SupabaseSource {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.anon_key.is_empty()
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, String> {
        if !self.is_configured() {
            return Err("supabase source not configured".to_string());
        }
        let url = format!("{}/rest/v1/{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| format!("supabase request failed: {e}"))?;

        resp.json::<Vec<T>>()
            .await
            .map_err(|e| format!("supabase JSON parse error: {e}"))
    }
}

#[async_trait]
impl SongPoolSource for SupabaseSource {
    async fn recent_songs(&self, limit: u32) -> Result<Vec<ObservedSong>, String> {
        let rows: Vec<ScrapedSongRow> = self
            .get_rows(&format!(
                "scraped_songs?select=station_name,title,artist,created_at&order=created_at.desc&limit={limit}"
            ))
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let (artist, title) = coerce_artist_title(&r.artist, &r.title);
                ObservedSong {
                    title,
                    artist,
                    station: r.station_name,
                    observed_at: parse_timestamp(r.created_at.as_deref()),
                }
            })
            .collect())
    }

    async fn ranking(&self) -> Result<Vec<RankingSong>, String> {
        let rows: Vec<RankingRow> = self
            .get_rows("song_ranking?select=title,artist,plays,style&order=plays.desc")
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| RankingSong {
                title: r.title,
                artist: r.artist,
                plays: r.plays,
                style: r.style,
            })
            .collect())
    }
}

// ── Row coercion ──────────────────────────────────────────────────────────────

const UNKNOWN_ARTIST: &str = "Desconhecido";
const LABEL_SEPARATORS: &[&str] = &[" - ", " – ", " — ", " | "];

/// Split a raw "Artist - Title" label the way the station monitor does.
pub fn split_song_label(text: &str) -> (String, String) {
    let text = text.trim();
    for sep in LABEL_SEPARATORS {
        if let Some((artist, title)) = text.split_once(sep) {
            return (artist.trim().to_string(), title.trim().to_string());
        }
    }
    (UNKNOWN_ARTIST.to_string(), text.to_string())
}

/// Some monitor sources only fill `title` with the whole display label;
/// recover the artist from it when the artist column is empty or unknown.
fn coerce_artist_title(artist: &str, title: &str) -> (String, String) {
    let artist = artist.trim();
    if !artist.is_empty() && artist != UNKNOWN_ARTIST {
        return (artist.to_string(), title.trim().to_string());
    }
    split_song_label(title)
}

fn parse_timestamp(raw: Option<&str>) -> i64 {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp())
        .unwrap_or(0)
}
