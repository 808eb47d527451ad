/// Song Selection Engine
///
/// Resolves one sequence slot to one output file token by walking a fixed
/// priority hierarchy. Every level is attempted only if the previous one
/// produced nothing, and the wildcard code terminates the chain so a block
/// line is always complete. Misses can trigger a just-in-time download raced
/// against a deadline, and queue the song for carry-over into a later block.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::analytics::audit::{BlockLogItem, BlockLogKind};
use crate::db::local::EngineSettings;
use crate::grade::line::{quote_token, sanitize_filename};
use crate::library::downloader::{download_with_deadline, DownloadService};
use crate::library::resolver::{default_filename, LibraryAdapter};
use crate::scheduler::carryover::{CarryOverQueue, CarryOverSong};
use crate::scheduler::pool::{
    all_songs, song_key, RankingSong, SongEntry, StationPools, FRESHNESS_WINDOW_SECS,
};
use crate::scheduler::repetition::RepetitionTracker;
use crate::scheduler::sequence::{
    SequenceSlot, SOURCE_GENERIC_FIXED, SOURCE_RANDOM_POOL, SOURCE_RANKING_BLOCK,
};
use crate::scheduler::station::{resolve_station, StationConfig};

/// Ranking positions 1..=25 form the top segment; the rest is secondary.
pub const TOP_RANKING_CUT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    FullDay,
    Incremental,
}

/// One finished block: the rendered line plus its audit trail.
#[derive(Debug, Clone)]
pub struct BlockResult {
    pub line: String,
    pub logs: Vec<BlockLogItem>,
}

// ── Priority hierarchy ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionLevel {
    StationPool,
    CarryOver,
    FreshnessWindow,
    TopRanked,
    SecondaryRanked,
    StyleAffinity,
    GeneralPool,
    RandomRanking,
    Wildcard,
}

impl SelectionLevel {
    pub const ORDER: [SelectionLevel; 9] = [
        Self::StationPool,
        Self::CarryOver,
        Self::FreshnessWindow,
        Self::TopRanked,
        Self::SecondaryRanked,
        Self::StyleAffinity,
        Self::GeneralPool,
        Self::RandomRanking,
        Self::Wildcard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StationPool => "station_pool",
            Self::CarryOver => "carry_over",
            Self::FreshnessWindow => "freshness_window",
            Self::TopRanked => "top_ranked",
            Self::SecondaryRanked => "secondary_ranked",
            Self::StyleAffinity => "style_affinity",
            Self::GeneralPool => "general_pool",
            Self::RandomRanking => "random_ranking",
            Self::Wildcard => "wildcard",
        }
    }
}

/// Reserved slot sources skip the station-bound levels entirely.
fn levels_for_source(source: &str) -> &'static [SelectionLevel] {
    if source.eq_ignore_ascii_case(SOURCE_RANDOM_POOL) {
        &[
            SelectionLevel::GeneralPool,
            SelectionLevel::RandomRanking,
            SelectionLevel::Wildcard,
        ]
    } else if source.eq_ignore_ascii_case(SOURCE_RANKING_BLOCK) {
        &[
            SelectionLevel::TopRanked,
            SelectionLevel::SecondaryRanked,
            SelectionLevel::RandomRanking,
            SelectionLevel::Wildcard,
        ]
    } else {
        &SelectionLevel::ORDER
    }
}

// ── Context and per-block state ───────────────────────────────────────────────

pub struct SelectionContext<'a> {
    pub pools: &'a StationPools,
    pub ranking: &'a [RankingSong],
    pub stations: &'a [StationConfig],
    pub settings: &'a EngineSettings,
    pub mode: BuildMode,
    /// Block start, minutes-of-day.
    pub block_minutes: u32,
    /// Wall clock, unix seconds.
    pub now_unix: i64,
    pub library: &'a LibraryAdapter,
    pub downloader: Option<Arc<dyn DownloadService>>,
    pub seed: u64,
}

/// Per-block selection state: in-block dedup (by song key AND by artist),
/// the one-JIT-per-level budget, and the audit trail.
#[derive(Default)]
pub struct SelectionState {
    used_keys: HashSet<String>,
    used_artists: HashSet<String>,
    jit_spent: HashSet<&'static str>,
    pub logs: Vec<BlockLogItem>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Why a candidate can't go into this block, or None when it can.
    pub fn block_reason(
        &self,
        title: &str,
        artist: &str,
        ctx: &SelectionContext<'_>,
        repetition: &RepetitionTracker,
    ) -> Option<&'static str> {
        if self.used_keys.contains(&song_key(title, artist)) {
            return Some("already in block");
        }
        if self.used_artists.contains(&artist.trim().to_lowercase()) {
            return Some("artist already in block");
        }
        if repetition.is_recently_used(
            title,
            artist,
            ctx.block_minutes,
            ctx.mode == BuildMode::FullDay,
        ) {
            return Some("repetition window");
        }
        None
    }

    pub fn mark_used(
        &mut self,
        title: &str,
        artist: &str,
        repetition: &mut RepetitionTracker,
        block_minutes: u32,
    ) {
        self.used_keys.insert(song_key(title, artist));
        self.used_artists.insert(artist.trim().to_lowercase());
        repetition.mark_used(title, artist, block_minutes);
    }
}

// ── Seeded shuffle ────────────────────────────────────────────────────────────

/// Seed for the explicitly-randomized levels; tests pin their own.
pub fn pseudo_seed() -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    (nanos as u64) ^ ((nanos >> 64) as u64)
}

/// Fisher-Yates order driven by a xorshift stream.
pub fn shuffled_indices(len: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut s = seed | 1;
    for i in (1..len).rev() {
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        let j = (s % (i as u64 + 1)) as usize;
        order.swap(i, j);
    }
    order
}

// ── Slot selection ────────────────────────────────────────────────────────────

/// Resolve one sequence slot to one final token.
pub async fn select_song_for_slot(
    slot: &SequenceSlot,
    ctx: &SelectionContext<'_>,
    repetition: &mut RepetitionTracker,
    carry_over: &mut CarryOverQueue,
    state: &mut SelectionState,
) -> String {
    // Fixed-content slots bypass the hierarchy.
    if let Some(file) = slot.custom_file_name.as_deref().filter(|f| !f.trim().is_empty()) {
        let token = quote_token(&sanitize_filename(file, &ctx.settings.filter_chars));
        let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Fixed);
        item.title = file.to_string();
        item.reason = Some("sequence fixed file".to_string());
        state.logs.push(item);
        return token;
    }
    if slot.radio_source.eq_ignore_ascii_case(SOURCE_GENERIC_FIXED) {
        let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Missing);
        item.reason = Some("generic fixed slot without file".to_string());
        state.logs.push(item);
        return ctx.settings.wildcard_code.clone();
    }

    let resolved = resolve_station(&slot.radio_source, ctx.pools, ctx.stations);
    let mut selector = SlotSelector {
        ctx,
        repetition,
        carry_over,
        state,
        station_name: resolved.station_name,
        station_songs: resolved.songs,
    };

    for level in levels_for_source(&slot.radio_source) {
        if let Some(token) = selector.try_level(*level).await {
            return token;
        }
    }

    // Wildcard terminates every level list, so this is unreachable.
    ctx.settings.wildcard_code.clone()
}

struct SlotSelector<'a, 'b> {
    ctx: &'b SelectionContext<'a>,
    repetition: &'b mut RepetitionTracker,
    carry_over: &'b mut CarryOverQueue,
    state: &'b mut SelectionState,
    station_name: String,
    station_songs: Vec<SongEntry>,
}

impl<'a> SlotSelector<'a, '_> {
    async fn try_level(&mut self, level: SelectionLevel) -> Option<String> {
        match level {
            SelectionLevel::StationPool => self.station_pool().await,
            SelectionLevel::CarryOver => self.carry_over_level().await,
            SelectionLevel::FreshnessWindow => self.freshness_window().await,
            SelectionLevel::TopRanked => self.ranked_segment(level, true).await,
            SelectionLevel::SecondaryRanked => self.ranked_segment(level, false).await,
            SelectionLevel::StyleAffinity => self.style_affinity().await,
            SelectionLevel::GeneralPool => self.general_pool().await,
            SelectionLevel::RandomRanking => self.random_ranking().await,
            SelectionLevel::Wildcard => Some(self.wildcard()),
        }
    }

    // Level 1: the slot's own station, most recently observed first.
    async fn station_pool(&mut self) -> Option<String> {
        let songs = self.station_songs.clone();
        for entry in &songs {
            if let Some(reason) = self.skip_reason(&entry.title, &entry.artist) {
                log_repetition_skip(self.state, self.ctx.block_minutes, entry, reason);
                continue;
            }

            let hit = self.ctx.library.exists(&entry.artist, &entry.title).await;
            if hit.exists {
                return Some(self.accept(
                    SelectionLevel::StationPool,
                    &entry.title,
                    &entry.artist,
                    &entry.station,
                    &entry.style,
                    hit.filename,
                ));
            }

            self.note_missing(entry);
            if self.jit_fetch(SelectionLevel::StationPool, &entry.artist, &entry.title).await {
                let recheck = self.ctx.library.exists(&entry.artist, &entry.title).await;
                if recheck.exists {
                    return Some(self.accept(
                        SelectionLevel::StationPool,
                        &entry.title,
                        &entry.artist,
                        &entry.station,
                        &entry.style,
                        recheck.filename,
                    ));
                }
            }
            self.carry_over.add(CarryOverSong {
                title: entry.title.clone(),
                artist: entry.artist.clone(),
                station: entry.station.clone(),
                style: entry.style.clone(),
                added_at: self.ctx.now_unix,
                target_block: (self.ctx.block_minutes + 30) % 1440,
            });
        }
        None
    }

    // Level 2: promoted carry-overs for this station.
    async fn carry_over_level(&mut self) -> Option<String> {
        let ready = self
            .carry_over
            .take_ready_for(&self.station_name, self.ctx.now_unix);
        for entry in ready {
            if self.skip_reason(&entry.title, &entry.artist).is_some() {
                continue;
            }
            let hit = self.ctx.library.exists(&entry.artist, &entry.title).await;
            if hit.exists {
                return Some(self.accept(
                    SelectionLevel::CarryOver,
                    &entry.title,
                    &entry.artist,
                    &entry.station,
                    &entry.style,
                    hit.filename,
                ));
            }
        }
        None
    }

    // Level 3: what's playing right now anywhere else.
    async fn freshness_window(&mut self) -> Option<String> {
        let cutoff = self.ctx.now_unix - FRESHNESS_WINDOW_SECS;
        let fresh: Vec<SongEntry> = all_songs(self.ctx.pools)
            .into_iter()
            .filter(|s| s.observed_at >= cutoff)
            .collect();
        self.first_existing(SelectionLevel::FreshnessWindow, &fresh, false)
            .await
    }

    // Levels 4/5: the ranking split at position 25.
    async fn ranked_segment(&mut self, level: SelectionLevel, top: bool) -> Option<String> {
        let sorted = self.ranking_sorted();
        let slice: Vec<&RankingSong> = if top {
            sorted.iter().take(TOP_RANKING_CUT).copied().collect()
        } else {
            sorted.iter().skip(TOP_RANKING_CUT).copied().collect()
        };
        self.first_existing_ranked(level, &slice).await
    }

    // Level 6: other stations sharing this station's style.
    async fn style_affinity(&mut self) -> Option<String> {
        let own_styles: Vec<String> = self
            .ctx
            .stations
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(&self.station_name))
            .map(|s| s.styles.iter().map(|t| t.to_lowercase()).collect())
            .unwrap_or_default();
        if own_styles.is_empty() {
            return None;
        }

        let mut candidates: Vec<SongEntry> = Vec::new();
        for station in self.ctx.stations {
            if station.name.eq_ignore_ascii_case(&self.station_name) {
                continue;
            }
            if !station
                .styles
                .iter()
                .any(|t| own_styles.contains(&t.to_lowercase()))
            {
                continue;
            }
            if let Some(pool) = self.ctx.pools.get(&station.name) {
                candidates.extend(pool.iter().cloned());
            }
        }
        candidates.sort_by(|a, b| b.observed_at.cmp(&a.observed_at));
        self.first_existing(SelectionLevel::StyleAffinity, &candidates, true)
            .await
    }

    // Level 7: any unused song across all stations, freshest first.
    async fn general_pool(&mut self) -> Option<String> {
        let candidates = all_songs(self.ctx.pools);
        self.first_existing(SelectionLevel::GeneralPool, &candidates, true)
            .await
    }

    // Level 8: a shuffled ranking entry.
    async fn random_ranking(&mut self) -> Option<String> {
        let sorted = self.ranking_sorted();
        let order = shuffled_indices(sorted.len(), self.ctx.seed ^ self.ctx.block_minutes as u64);
        let shuffled: Vec<&RankingSong> = order.into_iter().map(|i| sorted[i]).collect();
        self.first_existing_ranked(SelectionLevel::RandomRanking, &shuffled)
            .await
    }

    // Level 9: the terminal fallback; never fails.
    fn wildcard(&mut self) -> String {
        let mut item = BlockLogItem::new(self.ctx.block_minutes, BlockLogKind::Substituted);
        item.station = self.station_name.clone();
        item.reason = Some("wildcard".to_string());
        item.substitute_for = Some(self.station_name.clone());
        self.state.logs.push(item);
        self.ctx.settings.wildcard_code.clone()
    }

    // ── Shared helpers ────────────────────────────────────────────────────────

    fn skip_reason(&self, title: &str, artist: &str) -> Option<&'static str> {
        self.state
            .block_reason(title, artist, self.ctx, self.repetition)
    }

    fn ranking_sorted(&self) -> Vec<&'a RankingSong> {
        let mut sorted: Vec<&'a RankingSong> = self.ctx.ranking.iter().collect();
        sorted.sort_by(|a, b| b.plays.cmp(&a.plays));
        sorted
    }

    async fn first_existing(
        &mut self,
        level: SelectionLevel,
        candidates: &[SongEntry],
        jit: bool,
    ) -> Option<String> {
        for entry in candidates {
            if self.skip_reason(&entry.title, &entry.artist).is_some() {
                continue;
            }
            let hit = self.ctx.library.exists(&entry.artist, &entry.title).await;
            if hit.exists {
                return Some(self.accept(
                    level,
                    &entry.title,
                    &entry.artist,
                    &entry.station,
                    &entry.style,
                    hit.filename,
                ));
            }
            if jit && self.jit_fetch(level, &entry.artist, &entry.title).await {
                let recheck = self.ctx.library.exists(&entry.artist, &entry.title).await;
                if recheck.exists {
                    return Some(self.accept(
                        level,
                        &entry.title,
                        &entry.artist,
                        &entry.station,
                        &entry.style,
                        recheck.filename,
                    ));
                }
            }
        }
        None
    }

    async fn first_existing_ranked(
        &mut self,
        level: SelectionLevel,
        candidates: &[&RankingSong],
    ) -> Option<String> {
        for entry in candidates {
            if self.skip_reason(&entry.title, &entry.artist).is_some() {
                continue;
            }
            let hit = self.ctx.library.exists(&entry.artist, &entry.title).await;
            if hit.exists {
                return Some(self.accept(
                    level,
                    &entry.title,
                    &entry.artist,
                    "ranking",
                    &entry.style,
                    hit.filename,
                ));
            }
        }
        None
    }

    fn accept(
        &mut self,
        level: SelectionLevel,
        title: &str,
        artist: &str,
        station: &str,
        style: &str,
        filename: Option<String>,
    ) -> String {
        let filename = filename.unwrap_or_else(|| default_filename(artist, title));
        let token = quote_token(&sanitize_filename(&filename, &self.ctx.settings.filter_chars));

        self.state
            .mark_used(title, artist, self.repetition, self.ctx.block_minutes);

        let kind = if level == SelectionLevel::StationPool {
            BlockLogKind::Used
        } else {
            BlockLogKind::Substituted
        };
        let mut item = BlockLogItem::new(self.ctx.block_minutes, kind);
        item.title = title.to_string();
        item.artist = artist.to_string();
        item.station = station.to_string();
        item.reason = Some(level.as_str().to_string());
        item.style = (!style.is_empty()).then(|| style.to_string());
        if kind == BlockLogKind::Substituted {
            item.substitute_for = Some(self.station_name.clone());
        }
        self.state.logs.push(item);

        token
    }

    fn note_missing(&mut self, entry: &SongEntry) {
        let mut item = BlockLogItem::new(self.ctx.block_minutes, BlockLogKind::Missing);
        item.title = entry.title.clone();
        item.artist = entry.artist.clone();
        item.station = entry.station.clone();
        item.reason = Some("not in library".to_string());
        item.style = (!entry.style.is_empty()).then(|| entry.style.clone());
        self.state.logs.push(item);
    }

    async fn jit_fetch(&mut self, level: SelectionLevel, artist: &str, title: &str) -> bool {
        if !self.ctx.settings.downloads_enabled {
            return false;
        }
        let Some(downloader) = self.ctx.downloader.clone() else {
            return false;
        };
        if !self.ctx.settings.jit_retry_per_candidate
            && self.state.jit_spent.contains(level.as_str())
        {
            return false;
        }
        self.state.jit_spent.insert(level.as_str());

        let deadline = match self.ctx.mode {
            BuildMode::FullDay => Duration::from_secs(self.ctx.settings.jit_timeout_full_day_secs),
            BuildMode::Incremental => {
                Duration::from_secs(self.ctx.settings.jit_timeout_incremental_secs)
            }
        };
        let folder = self
            .ctx
            .settings
            .music_folders
            .first()
            .cloned()
            .unwrap_or_else(|| self.ctx.settings.output_folder.clone());

        download_with_deadline(
            &downloader,
            artist,
            title,
            &folder,
            &self.ctx.settings.download_quality,
            deadline,
        )
        .await
    }
}

fn log_repetition_skip(
    state: &mut SelectionState,
    block_minutes: u32,
    entry: &SongEntry,
    reason: &'static str,
) {
    if reason != "repetition window" {
        return;
    }
    let mut item = BlockLogItem::new(block_minutes, BlockLogKind::Skipped);
    item.title = entry.title.clone();
    item.artist = entry.artist.clone();
    item.station = entry.station.clone();
    item.reason = Some(reason.to_string());
    state.logs.push(item);
}
