/// Special Program Generators
///
/// Fixed time windows where a whole block is produced at once instead of the
/// slot-by-slot walk: the mandatory civic broadcast, ranking-driven segments,
/// the overnight mix, the alternating morning block, folder-sourced segments
/// and the nightly edition program. Every generator returns the same
/// `BlockResult` shape as the general engine.
use crate::analytics::audit::{BlockLogItem, BlockLogKind};
use crate::db::supabase::split_song_label;
use crate::grade::file::{FileSurface, WEEKDAY_STEMS};
use crate::grade::line::{block_label, quote_token, sanitize_filename, BlockLine};
use crate::library::resolver::default_filename;
use crate::scheduler::pool::{all_songs, song_key, RankingSong};
use crate::scheduler::repetition::RepetitionTracker;
use crate::scheduler::selection::{
    shuffled_indices, BlockResult, SelectionContext, SelectionState,
};
use crate::scheduler::station::resolve_station;

/// Songs in an overnight mix block.
const OVERNIGHT_SONGS: usize = 10;

/// Entries emitted by one top-ranked block.
const TOP_RANKED_SONGS: usize = 10;

/// The edition program cycles through this many numbered editions.
const EDITION_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderSegment {
    HappyHour,
    LateNight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialProgram {
    /// 21:00 on weekdays, mandatory, exempt from sanitization.
    Civic,
    /// 18:00 / 18:30 — fillers interleaved with fixed ranking positions.
    RankingInterlude(usize),
    /// 20:00 / 20:30 — ranking entries offset by slot index.
    TopRanked(usize),
    /// 00:00–04:30 — shuffled all-station mix.
    OvernightMix,
    /// 05:00–07:30 — strict two-station alternation.
    Alternating,
    /// 17:00–17:30 and 23:00–23:30 — songs listed straight from folders.
    FolderSourced(FolderSegment),
    /// 22:00 / 22:30 — numbered edition lead-in plus one folder.
    Edition,
}

/// The hard-coded schedule of blocks that bypass normal selection.
pub fn special_program_for(minutes: u32, weekday_idx: u8) -> Option<SpecialProgram> {
    match minutes {
        0..=270 => Some(SpecialProgram::OvernightMix),
        300..=450 => Some(SpecialProgram::Alternating),
        1020 | 1050 => Some(SpecialProgram::FolderSourced(FolderSegment::HappyHour)),
        1080 => Some(SpecialProgram::RankingInterlude(0)),
        1110 => Some(SpecialProgram::RankingInterlude(1)),
        1200 => Some(SpecialProgram::TopRanked(0)),
        1230 => Some(SpecialProgram::TopRanked(1)),
        1260 if weekday_idx <= 4 => Some(SpecialProgram::Civic),
        1320 | 1350 => Some(SpecialProgram::Edition),
        1380 | 1410 => Some(SpecialProgram::FolderSourced(FolderSegment::LateNight)),
        _ => None,
    }
}

/// Build a complete block for a special program window.
pub async fn generate_special_block(
    program: SpecialProgram,
    ctx: &SelectionContext<'_>,
    files: &dyn FileSurface,
    weekday_idx: u8,
    day_of_year: u32,
    slot_count: usize,
    repetition: &mut RepetitionTracker,
) -> BlockResult {
    match program {
        SpecialProgram::Civic => civic_block(ctx.block_minutes),
        SpecialProgram::RankingInterlude(slot) => {
            ranking_interlude(ctx, weekday_idx, slot, repetition)
        }
        SpecialProgram::TopRanked(slot) => top_ranked_block(ctx, slot, repetition),
        SpecialProgram::OvernightMix => overnight_mix(ctx, repetition).await,
        SpecialProgram::Alternating => alternating_block(ctx, slot_count, repetition).await,
        SpecialProgram::FolderSourced(segment) => {
            folder_block(ctx, files, segment, slot_count, repetition)
        }
        SpecialProgram::Edition => {
            edition_block(ctx, files, weekday_idx, day_of_year, slot_count, repetition)
        }
    }
}

// ── Civic ─────────────────────────────────────────────────────────────────────

fn civic_block(minutes: u32) -> BlockResult {
    // Required broadcast; the line is emitted verbatim, no sanitizer.
    let line = format!(
        "{} (ID=Voz do Brasil) \"A VOZ DO BRASIL.MP3\"",
        block_label(minutes)
    );
    let mut item = BlockLogItem::new(minutes, BlockLogKind::Fixed);
    item.title = "A Voz do Brasil".to_string();
    item.reason = Some("mandatory civic broadcast".to_string());
    BlockResult {
        line,
        logs: vec![item],
    }
}

// ── Ranking interlude ─────────────────────────────────────────────────────────

fn ranking_interlude(
    ctx: &SelectionContext<'_>,
    weekday_idx: u8,
    slot: usize,
    repetition: &mut RepetitionTracker,
) -> BlockResult {
    // 1-based chart positions per window.
    let positions: [usize; 2] = if slot == 0 { [2, 5] } else { [8, 9] };
    let day = WEEKDAY_STEMS[(weekday_idx as usize).min(6)];
    let sorted = ranking_sorted(ctx.ranking);

    let mut state = SelectionState::new();
    let mut tokens = Vec::new();
    let fillers = [
        format!("PARADAO ABERTURA {day}.MP3"),
        format!("PARADAO ENCERRAMENTO {day}.MP3"),
    ];

    for (filler, position) in fillers.iter().zip(positions) {
        tokens.push(quote_token(&sanitize_filename(
            filler,
            &ctx.settings.filter_chars,
        )));
        let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Fixed);
        item.title = filler.clone();
        item.reason = Some("ranking interlude filler".to_string());
        state.logs.push(item);

        tokens.push(ranked_token(ctx, &sorted, position - 1, repetition, &mut state));
    }

    finish(ctx.block_minutes, "Paradão", tokens, state)
}

// ── Top-ranked block ──────────────────────────────────────────────────────────

fn top_ranked_block(
    ctx: &SelectionContext<'_>,
    slot: usize,
    repetition: &mut RepetitionTracker,
) -> BlockResult {
    let offset = slot * 10;
    let sorted = ranking_sorted(ctx.ranking);
    let mut state = SelectionState::new();
    let mut tokens = Vec::new();

    let mut index = offset;
    while tokens.len() < TOP_RANKED_SONGS && index < sorted.len() {
        let entry = sorted[index];
        index += 1;
        if state
            .block_reason(&entry.title, &entry.artist, ctx, repetition)
            .is_some()
        {
            continue;
        }
        tokens.push(accept_ranked(ctx, entry, repetition, &mut state));
    }
    while tokens.len() < TOP_RANKED_SONGS {
        tokens.push(ctx.settings.wildcard_code.clone());
    }

    finish(ctx.block_minutes, "As Mais Tocadas", tokens, state)
}

// ── Overnight mix ─────────────────────────────────────────────────────────────

async fn overnight_mix(
    ctx: &SelectionContext<'_>,
    repetition: &mut RepetitionTracker,
) -> BlockResult {
    let pool = all_songs(ctx.pools);
    let order = shuffled_indices(pool.len(), ctx.seed ^ ctx.block_minutes as u64);

    let mut state = SelectionState::new();
    let mut picked = Vec::new();
    for idx in order {
        if picked.len() >= OVERNIGHT_SONGS {
            break;
        }
        let entry = &pool[idx];
        if state
            .block_reason(&entry.title, &entry.artist, ctx, repetition)
            .is_some()
        {
            continue;
        }
        state.mark_used(&entry.title, &entry.artist, repetition, ctx.block_minutes);
        picked.push(entry.clone());
    }

    // One batched existence check for the whole block.
    let lookups: Vec<(String, String)> = picked
        .iter()
        .map(|e| (e.artist.clone(), e.title.clone()))
        .collect();
    let hits = ctx.library.exists_batch(&lookups).await;

    let mut tokens = Vec::new();
    for entry in &picked {
        let hit = hits.get(&song_key(&entry.title, &entry.artist));
        match hit.filter(|h| h.exists) {
            Some(hit) => {
                let filename = hit
                    .filename
                    .clone()
                    .unwrap_or_else(|| default_filename(&entry.artist, &entry.title));
                tokens.push(quote_token(&sanitize_filename(
                    &filename,
                    &ctx.settings.filter_chars,
                )));
                let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Used);
                item.title = entry.title.clone();
                item.artist = entry.artist.clone();
                item.station = entry.station.clone();
                item.reason = Some("overnight mix".to_string());
                state.logs.push(item);
            }
            None => {
                tokens.push(ctx.settings.wildcard_code.clone());
                let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Missing);
                item.title = entry.title.clone();
                item.artist = entry.artist.clone();
                item.station = entry.station.clone();
                item.reason = Some("not in library".to_string());
                state.logs.push(item);
            }
        }
    }
    while tokens.len() < OVERNIGHT_SONGS {
        tokens.push(ctx.settings.wildcard_code.clone());
    }

    finish(ctx.block_minutes, "Madrugada Total", tokens, state)
}

// ── Alternating two-station block ─────────────────────────────────────────────

async fn alternating_block(
    ctx: &SelectionContext<'_>,
    slot_count: usize,
    repetition: &mut RepetitionTracker,
) -> BlockResult {
    let (first, second) = (
        ctx.settings.alternating_stations.0.clone(),
        ctx.settings.alternating_stations.1.clone(),
    );
    let pools = [
        resolve_station(&first, ctx.pools, ctx.stations).songs,
        resolve_station(&second, ctx.pools, ctx.stations).songs,
    ];
    let names = [first, second];
    let mut cursors = [0usize, 0usize];

    let mut state = SelectionState::new();
    let mut tokens = Vec::new();

    for position in 0..slot_count.max(1) {
        let side = position % 2;
        let pool = &pools[side];
        let mut chosen = None;

        while cursors[side] < pool.len() {
            let entry = &pool[cursors[side]];
            cursors[side] += 1;
            if state
                .block_reason(&entry.title, &entry.artist, ctx, repetition)
                .is_some()
            {
                continue;
            }
            let hit = ctx.library.exists(&entry.artist, &entry.title).await;
            if !hit.exists {
                continue;
            }
            chosen = Some((entry.clone(), hit.filename));
            break;
        }

        match chosen {
            Some((entry, filename)) => {
                state.mark_used(&entry.title, &entry.artist, repetition, ctx.block_minutes);
                let filename =
                    filename.unwrap_or_else(|| default_filename(&entry.artist, &entry.title));
                tokens.push(quote_token(&sanitize_filename(
                    &filename,
                    &ctx.settings.filter_chars,
                )));
                let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Used);
                item.title = entry.title;
                item.artist = entry.artist;
                item.station = names[side].clone();
                item.reason = Some("alternating block".to_string());
                state.logs.push(item);
            }
            None => {
                // Per-station wildcard so curation knows which feed ran dry.
                tokens.push(format!("{}{}", ctx.settings.wildcard_code, side + 1));
                let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Substituted);
                item.station = names[side].clone();
                item.reason = Some("station pool exhausted".to_string());
                state.logs.push(item);
            }
        }
    }

    finish(ctx.block_minutes, "Manhã em Dose Dupla", tokens, state)
}

// ── Folder-sourced segments ───────────────────────────────────────────────────

fn folder_block(
    ctx: &SelectionContext<'_>,
    files: &dyn FileSurface,
    segment: FolderSegment,
    slot_count: usize,
    repetition: &mut RepetitionTracker,
) -> BlockResult {
    let (folders, name) = match segment {
        FolderSegment::HappyHour => (&ctx.settings.happy_hour_folders, "Happy Hour"),
        FolderSegment::LateNight => (&ctx.settings.late_night_folders, "Madrugada Romântica"),
    };

    let mut state = SelectionState::new();
    let listings = shuffled_listings(files, folders, ctx.seed ^ ctx.block_minutes as u64);
    let tokens = fill_from_listings(ctx, listings, slot_count, repetition, &mut state, name);
    finish(ctx.block_minutes, name, tokens, state)
}

// ── Edition program ───────────────────────────────────────────────────────────

fn edition_block(
    ctx: &SelectionContext<'_>,
    files: &dyn FileSurface,
    weekday_idx: u8,
    day_of_year: u32,
    slot_count: usize,
    repetition: &mut RepetitionTracker,
) -> BlockResult {
    let edition = (day_of_year % EDITION_COUNT) + 1;
    let day = WEEKDAY_STEMS[(weekday_idx as usize).min(6)];
    let lead = format!("CLUBE DA NOITE ED{edition} {day}.MP3");

    let mut state = SelectionState::new();
    let mut tokens = vec![quote_token(&sanitize_filename(
        &lead,
        &ctx.settings.filter_chars,
    ))];
    let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Fixed);
    item.title = lead;
    item.reason = Some("edition lead-in".to_string());
    state.logs.push(item);

    let folders = vec![ctx.settings.night_program_folder.clone()];
    let listings = shuffled_listings(files, &folders, ctx.seed ^ ctx.block_minutes as u64);
    let songs = fill_from_listings(
        ctx,
        listings,
        slot_count.saturating_sub(1).max(1),
        repetition,
        &mut state,
        "Clube da Noite",
    );
    tokens.extend(songs);

    finish(ctx.block_minutes, "Clube da Noite", tokens, state)
}

// ── Shared helpers ────────────────────────────────────────────────────────────

fn finish(
    minutes: u32,
    program: &str,
    tokens: Vec<String>,
    state: SelectionState,
) -> BlockResult {
    let line = BlockLine {
        minutes,
        program: program.to_string(),
        tokens,
    };
    BlockResult {
        line: line.render(),
        logs: state.logs,
    }
}

fn ranking_sorted(ranking: &[RankingSong]) -> Vec<&RankingSong> {
    let mut sorted: Vec<&RankingSong> = ranking.iter().collect();
    sorted.sort_by(|a, b| b.plays.cmp(&a.plays));
    sorted
}

fn ranked_token(
    ctx: &SelectionContext<'_>,
    sorted: &[&RankingSong],
    index: usize,
    repetition: &mut RepetitionTracker,
    state: &mut SelectionState,
) -> String {
    match sorted.get(index) {
        Some(entry) => accept_ranked(ctx, entry, repetition, state),
        None => ctx.settings.wildcard_code.clone(),
    }
}

fn accept_ranked(
    ctx: &SelectionContext<'_>,
    entry: &RankingSong,
    repetition: &mut RepetitionTracker,
    state: &mut SelectionState,
) -> String {
    state.mark_used(&entry.title, &entry.artist, repetition, ctx.block_minutes);
    let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Used);
    item.title = entry.title.clone();
    item.artist = entry.artist.clone();
    item.station = "ranking".to_string();
    item.style = (!entry.style.is_empty()).then(|| entry.style.clone());
    item.reason = Some("ranking position".to_string());
    state.logs.push(item);

    quote_token(&sanitize_filename(
        &default_filename(&entry.artist, &entry.title),
        &ctx.settings.filter_chars,
    ))
}

/// Shuffle each folder's listing, then interleave the folders round-robin.
fn shuffled_listings(files: &dyn FileSurface, folders: &[String], seed: u64) -> Vec<String> {
    let mut per_folder: Vec<Vec<String>> = Vec::new();
    for (idx, folder) in folders.iter().enumerate() {
        if folder.trim().is_empty() {
            continue;
        }
        let listing = match files.list_files(folder, "mp3") {
            Ok(listing) => listing,
            Err(e) => {
                log::warn!("program folder '{folder}' not listable: {e}");
                continue;
            }
        };
        let order = shuffled_indices(listing.len(), seed.wrapping_add(idx as u64));
        per_folder.push(order.into_iter().map(|i| listing[i].clone()).collect());
    }

    let mut interleaved = Vec::new();
    let longest = per_folder.iter().map(Vec::len).max().unwrap_or(0);
    for i in 0..longest {
        for listing in &per_folder {
            if let Some(name) = listing.get(i) {
                interleaved.push(name.clone());
            }
        }
    }
    interleaved
}

fn fill_from_listings(
    ctx: &SelectionContext<'_>,
    listings: Vec<String>,
    slot_count: usize,
    repetition: &mut RepetitionTracker,
    state: &mut SelectionState,
    program: &str,
) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut iter = listings.into_iter();

    while tokens.len() < slot_count.max(1) {
        let Some(filename) = iter.next() else {
            tokens.push(ctx.settings.wildcard_code.clone());
            let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Substituted);
            item.reason = Some(format!("{program} folders exhausted"));
            state.logs.push(item);
            continue;
        };

        let stem = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&filename);
        let (artist, title) = split_song_label(stem);
        if state
            .block_reason(&title, &artist, ctx, repetition)
            .is_some()
        {
            continue;
        }
        state.mark_used(&title, &artist, repetition, ctx.block_minutes);
        tokens.push(quote_token(&sanitize_filename(
            &filename,
            &ctx.settings.filter_chars,
        )));

        let mut item = BlockLogItem::new(ctx.block_minutes, BlockLogKind::Used);
        item.title = title;
        item.artist = artist;
        item.station = program.to_string();
        item.reason = Some("folder listing".to_string());
        state.logs.push(item);
    }
    tokens
}
