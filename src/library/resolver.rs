/// Library Resolver Adapter
///
/// Wraps the external library collaborator with title/artist normalization
/// and batched, concurrency-limited dispatch. The adapter fails open: an
/// erroring collaborator counts as "exists" so block assembly never stalls —
/// a wrong filename surfaces on the missing-song report, a stalled build
/// surfaces nowhere.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::scheduler::pool::song_key;

/// Batch lookups fan out at most this many concurrent calls; the collaborator
/// is a cross-process channel with per-call overhead.
pub const BATCH_CHUNK: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct LibraryHit {
    pub exists: bool,
    pub filename: Option<String>,
}

#[async_trait]
pub trait LibraryResolver: Send + Sync {
    /// Report whether a matching audio file exists and under which exact
    /// on-disk name. Unknown folders yield `exists = false`, not an error.
    async fn check_one(&self, artist: &str, title: &str) -> Result<LibraryHit, String>;
}

// ── Normalization ─────────────────────────────────────────────────────────────

const TITLE_QUALIFIERS: &[&str] = &[
    "live",
    "ao vivo",
    "remix",
    "remaster",
    "radio edit",
    "acoustic",
    "acústic",
    "explicit",
    "clean",
    "feat",
    "ft.",
    "ft ",
    "versão",
    "bonus",
];

const FEAT_MARKERS: &[&str] = &[
    " feat.",
    " feat ",
    " ft.",
    " ft ",
    " featuring ",
    " part.",
    " part ",
    " participação ",
];

/// Strip parenthetical/bracketed qualifiers — "(Live)", "[Remix]",
/// "(feat. X)" — and any bare featuring tail from a title.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut chars = title.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '(' || c == '[' {
            let close = if c == '(' { ')' } else { ']' };
            let mut group = String::new();
            for g in chars.by_ref() {
                if g == close {
                    break;
                }
                group.push(g);
            }
            let group_lc = group.to_lowercase();
            if TITLE_QUALIFIERS.iter().any(|q| group_lc.contains(q)) {
                continue;
            }
            out.push(c);
            out.push_str(&group);
            out.push(close);
        } else {
            out.push(c);
        }
    }
    truncate_at_feat(&out).trim().to_string()
}

/// Truncate an artist at the first featuring-clause marker.
pub fn normalize_artist(artist: &str) -> String {
    truncate_at_feat(artist).trim().to_string()
}

fn truncate_at_feat(s: &str) -> &str {
    let lower = s.to_lowercase();
    let cut = FEAT_MARKERS
        .iter()
        .filter_map(|m| lower.find(m))
        .min()
        .unwrap_or(s.len());
    if cut < s.len() && s.is_char_boundary(cut) {
        &s[..cut]
    } else {
        s
    }
}

/// The on-disk name convention when the collaborator reports existence
/// without an explicit filename.
pub fn default_filename(artist: &str, title: &str) -> String {
    format!("{} - {}.mp3", artist.trim(), title.trim())
}

// ── Adapter ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct LibraryAdapter {
    resolver: Arc<dyn LibraryResolver>,
}

impl LibraryAdapter {
    pub fn new(resolver: Arc<dyn LibraryResolver>) -> Self {
        Self { resolver }
    }

    /// Single check: normalized strings first, raw fallback, fail open.
    pub async fn exists(&self, artist: &str, title: &str) -> LibraryHit {
        let norm_artist = normalize_artist(artist);
        let norm_title = normalize_title(title);

        if norm_artist != artist || norm_title != title {
            match self.resolver.check_one(&norm_artist, &norm_title).await {
                Ok(hit) if hit.exists => return hit,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("library check failed for '{norm_artist} - {norm_title}': {e}");
                    return LibraryHit {
                        exists: true,
                        filename: Some(default_filename(artist, title)),
                    };
                }
            }
        }

        match self.resolver.check_one(artist, title).await {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("library check failed for '{artist} - {title}': {e}");
                LibraryHit {
                    exists: true,
                    filename: Some(default_filename(artist, title)),
                }
            }
        }
    }

    /// Batch check keyed by lowercased `artist|title`. Input is deduplicated
    /// and dispatched in chunks of [`BATCH_CHUNK`] concurrent lookups.
    pub async fn exists_batch(&self, entries: &[(String, String)]) -> HashMap<String, LibraryHit> {
        let mut unique: Vec<(String, String)> = Vec::new();
        let mut seen = HashMap::new();
        for (artist, title) in entries {
            let key = song_key(title, artist);
            if seen.insert(key, ()).is_none() {
                unique.push((artist.clone(), title.clone()));
            }
        }

        let mut results = HashMap::with_capacity(unique.len());
        for chunk in unique.chunks(BATCH_CHUNK) {
            let futures = chunk
                .iter()
                .map(|(artist, title)| self.exists(artist, title));
            let hits = join_all(futures).await;
            for ((artist, title), hit) in chunk.iter().zip(hits) {
                results.insert(song_key(title, artist), hit);
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapResolver {
        known: HashMap<String, String>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl MapResolver {
        fn new(songs: &[(&str, &str)]) -> Self {
            let known = songs
                .iter()
                .map(|(artist, title)| {
                    (
                        song_key(title, artist),
                        default_filename(artist, title).to_uppercase(),
                    )
                })
                .collect();
            Self {
                known,
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl LibraryResolver for MapResolver {
        async fn check_one(&self, artist: &str, title: &str) -> Result<LibraryHit, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("channel closed".to_string());
            }
            Ok(match self.known.get(&song_key(title, artist)) {
                Some(filename) => LibraryHit {
                    exists: true,
                    filename: Some(filename.clone()),
                },
                None => LibraryHit::default(),
            })
        }
    }

    #[test]
    fn title_normalization_strips_qualifiers() {
        assert_eq!(normalize_title("Song A (Live)"), "Song A");
        assert_eq!(normalize_title("Song A [Remix] (Radio Edit)"), "Song A");
        assert_eq!(normalize_title("Song A (Acoustic Version)"), "Song A");
        assert_eq!(normalize_title("Song A feat. Someone"), "Song A");
        assert_eq!(normalize_title("Song A (Part Two)"), "Song A (Part Two)");
    }

    #[test]
    fn artist_normalization_truncates_featuring_tail() {
        assert_eq!(normalize_artist("Artist X feat. Artist Y"), "Artist X");
        assert_eq!(normalize_artist("Artist X ft. Y"), "Artist X");
        assert_eq!(normalize_artist("Artist X part. Y"), "Artist X");
        assert_eq!(normalize_artist("Artist X"), "Artist X");
    }

    #[tokio::test]
    async fn normalized_lookup_first_then_raw() {
        // Library only knows the clean title; the observed one carries "(Live)".
        let resolver = Arc::new(MapResolver::new(&[("Artist X", "Song A")]));
        let adapter = LibraryAdapter::new(resolver);
        let hit = adapter.exists("Artist X", "Song A (Live)").await;
        assert!(hit.exists);
        assert_eq!(hit.filename.as_deref(), Some("ARTIST X - SONG A.MP3"));
    }

    #[tokio::test]
    async fn raw_fallback_when_normalized_misses() {
        // Library indexed the raw name including the qualifier.
        let resolver = Arc::new(MapResolver::new(&[("Artist X", "Song A (Live)")]));
        let adapter = LibraryAdapter::new(resolver);
        let hit = adapter.exists("Artist X", "Song A (Live)").await;
        assert!(hit.exists);
    }

    #[tokio::test]
    async fn adapter_errors_fail_open() {
        let mut resolver = MapResolver::new(&[]);
        resolver.fail = true;
        let adapter = LibraryAdapter::new(Arc::new(resolver));
        let hit = adapter.exists("Artist X", "Song A").await;
        assert!(hit.exists);
        assert_eq!(hit.filename.as_deref(), Some("Artist X - Song A.mp3"));
    }

    #[tokio::test]
    async fn batch_dedups_and_keys_by_artist_title() {
        let resolver = Arc::new(MapResolver::new(&[("Artist X", "Song A")]));
        let adapter = LibraryAdapter::new(resolver.clone());

        let entries = vec![
            ("Artist X".to_string(), "Song A".to_string()),
            ("artist x".to_string(), "song a".to_string()),
            ("Artist Y".to_string(), "Song B".to_string()),
        ];
        let map = adapter.exists_batch(&entries).await;
        assert_eq!(map.len(), 2);
        assert!(map[&song_key("Song A", "Artist X")].exists);
        assert!(!map[&song_key("Song B", "Artist Y")].exists);
        // Two unique entries, one call each (names need no normalization pass).
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }
}
