/// Build Orchestrator
///
/// Drives full-day (48-block) generation with progressive persistence, the
/// incremental current/next-block rebuild, and the recurring auto-build
/// timer. Only one build runs at a time; a second trigger is ignored.
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Local, Timelike};
use sqlx::sqlite::SqlitePool;

use crate::analytics::audit::{self, BlockLogKind, BuildHistoryRecord};
use crate::db::local::{self, EngineSettings};
use crate::db::supabase::SongPoolSource;
use crate::grade::file::{day_file_name, FileSurface};
use crate::grade::line::{
    block_label, insert_fixed_token, merge_day_content, quote_token, sanitize_filename, BlockLine,
};
use crate::library::downloader::DownloadService;
use crate::library::resolver::LibraryAdapter;
use crate::scheduler::carryover::CarryOverQueue;
use crate::scheduler::fixed::{self, fixed_for_block, FixedContentItem};
use crate::scheduler::pool::{
    build_station_pools, RankingSong, StationPools, MAX_OBSERVED_RECORDS,
};
use crate::scheduler::programs::{generate_special_block, special_program_for};
use crate::scheduler::repetition::RepetitionTracker;
use crate::scheduler::selection::{
    pseudo_seed, select_song_for_slot, BlockResult, BuildMode, SelectionContext, SelectionState,
};
use crate::scheduler::sequence::{
    self, active_sequence, ScheduledSequence, SequenceSlot, MIN_SEQUENCE_SLOTS,
    SOURCE_RANDOM_POOL,
};
use crate::scheduler::station::{self, StationConfig};
use crate::state::EngineState;

pub const BLOCK_MINUTES: u32 = 30;
pub const BLOCKS_PER_DAY: u32 = 48;
pub const DEFAULT_PROGRAM_NAME: &str = "Programação Musical";

/// Full-day builds checkpoint the file this often.
const SAVE_EVERY_BLOCKS: usize = 4;
/// Breather between full-day blocks so the runtime stays responsive.
const INTER_BLOCK_PAUSE: Duration = Duration::from_secs(2);
/// Auto-build poll cadence.
const AUTO_TICK: Duration = Duration::from_secs(30);
/// Force a build when nothing built for this long.
const FORCE_BUILD_AFTER_SECS: i64 = 5 * 60;

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub blocks_built: u32,
    pub day_file: String,
}

pub struct Orchestrator {
    state: Arc<EngineState>,
    db: SqlitePool,
    source: Arc<dyn SongPoolSource>,
    library: LibraryAdapter,
    downloader: Option<Arc<dyn DownloadService>>,
    files: Arc<dyn FileSurface>,
}

struct BuildInputs {
    settings: EngineSettings,
    stations: Vec<StationConfig>,
    default_sequence: Vec<SequenceSlot>,
    scheduled: Vec<ScheduledSequence>,
    fixed_items: Vec<FixedContentItem>,
    pools: StationPools,
    ranking: Vec<RankingSong>,
}

/// Releases the build flag even on early error returns.
struct BuildGuard<'a>(&'a EngineState);

impl<'a> BuildGuard<'a> {
    fn try_begin(state: &'a EngineState) -> Option<Self> {
        state
            .building
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(state))
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.building.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(
        state: Arc<EngineState>,
        db: SqlitePool,
        source: Arc<dyn SongPoolSource>,
        library: LibraryAdapter,
        downloader: Option<Arc<dyn DownloadService>>,
        files: Arc<dyn FileSurface>,
    ) -> Self {
        Self {
            state,
            db,
            source,
            library,
            downloader,
            files,
        }
    }

    // ── Input assembly ────────────────────────────────────────────────────────

    /// Every collaborator read degrades to a default instead of failing the
    /// build; an empty pool only means heavier wildcard usage downstream.
    async fn load_build_inputs(&self) -> BuildInputs {
        let settings = match local::load_settings(&self.db).await {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("settings unavailable, using defaults: {e}");
                EngineSettings::default()
            }
        };
        let stations = station::get_stations(&self.db).await.unwrap_or_else(|e| {
            log::warn!("station configs unavailable: {e}");
            Vec::new()
        });
        let default_sequence = sequence::get_default_sequence(&self.db)
            .await
            .unwrap_or_else(|e| {
                log::warn!("default sequence unavailable: {e}");
                Vec::new()
            });
        let scheduled = sequence::get_scheduled_sequences(&self.db)
            .await
            .unwrap_or_else(|e| {
                log::warn!("scheduled sequences unavailable: {e}");
                Vec::new()
            });
        let fixed_items = fixed::get_fixed_content(&self.db).await.unwrap_or_else(|e| {
            log::warn!("fixed content unavailable: {e}");
            Vec::new()
        });

        let records = self
            .source
            .recent_songs(MAX_OBSERVED_RECORDS as u32)
            .await
            .unwrap_or_else(|e| {
                log::warn!("song pool source unavailable: {e}");
                Vec::new()
            });
        let pools = build_station_pools(&records, &stations);
        let ranking = self.source.ranking().await.unwrap_or_else(|e| {
            log::warn!("ranking unavailable: {e}");
            Vec::new()
        });

        BuildInputs {
            settings,
            stations,
            default_sequence,
            scheduled,
            fixed_items,
            pools,
            ranking,
        }
    }

    // ── One block ─────────────────────────────────────────────────────────────

    async fn build_block(
        &self,
        inputs: &BuildInputs,
        minutes: u32,
        weekday_idx: u8,
        day_of_year: u32,
        mode: BuildMode,
        repetition: &mut RepetitionTracker,
        carry_over: &mut CarryOverQueue,
    ) -> BlockResult {
        let hour = minutes / 60;
        let minute = minutes % 60;
        let (sequence, override_name) = active_sequence(
            &inputs.scheduled,
            &inputs.default_sequence,
            hour,
            minute,
            weekday_idx,
        );

        // A block always carries at least MIN_SEQUENCE_SLOTS music slots;
        // short or missing sequences are padded from the general pool.
        let fallback: Vec<SequenceSlot>;
        let slots: &[SequenceSlot] = if sequence.len() < MIN_SEQUENCE_SLOTS {
            fallback = pad_sequence(sequence);
            &fallback
        } else {
            sequence
        };
        let slot_count = slots.len();

        let ctx = SelectionContext {
            pools: &inputs.pools,
            ranking: &inputs.ranking,
            stations: &inputs.stations,
            settings: &inputs.settings,
            mode,
            block_minutes: minutes,
            now_unix: now_ts(),
            library: &self.library,
            downloader: self.downloader.clone(),
            seed: pseudo_seed(),
        };

        if let Some(program) = special_program_for(minutes, weekday_idx) {
            return generate_special_block(
                program,
                &ctx,
                self.files.as_ref(),
                weekday_idx,
                day_of_year,
                slot_count,
                repetition,
            )
            .await;
        }

        let mut state = SelectionState::new();
        let mut tokens = Vec::with_capacity(slot_count);
        for slot in slots {
            let token = select_song_for_slot(slot, &ctx, repetition, carry_over, &mut state).await;
            tokens.push(token);
        }

        for item in fixed_for_block(&inputs.fixed_items, hour, minute, weekday_idx) {
            let token = quote_token(&sanitize_filename(
                &item.file_name,
                &inputs.settings.filter_chars,
            ));
            insert_fixed_token(&mut tokens, token, item.position);
            let mut log_item =
                audit::BlockLogItem::new(minutes, BlockLogKind::Fixed);
            log_item.title = item.name.clone();
            log_item.reason = Some("fixed content".to_string());
            state.logs.push(log_item);
        }

        let line = BlockLine {
            minutes,
            program: override_name.unwrap_or(DEFAULT_PROGRAM_NAME).to_string(),
            tokens,
        };
        BlockResult {
            line: line.render(),
            logs: state.logs,
        }
    }

    // ── Builds ────────────────────────────────────────────────────────────────

    /// Generate all 48 blocks for today, checkpointing every few blocks so a
    /// crash mid-run still leaves a valid partial file.
    pub async fn build_full_day(&self) -> Result<BuildOutcome, String> {
        let Some(_guard) = BuildGuard::try_begin(&self.state) else {
            return Err("a build is already in progress".to_string());
        };

        let now = Local::now();
        self.state.roll_over_if_new_day(now.date_naive()).await;
        let inputs = self.load_build_inputs().await;
        let weekday_idx = now.weekday().num_days_from_monday() as u8;
        let day_of_year = now.ordinal();
        let file_name = day_file_name(weekday_idx);

        let mut repetition = self.state.repetition.lock().await;
        let mut carry_over = self.state.carry_over.lock().await;
        repetition.set_window(inputs.settings.repetition_window_minutes);

        log::info!("full-day build started → {file_name}");
        let mut lines = Vec::with_capacity(BLOCKS_PER_DAY as usize);
        for i in 0..BLOCKS_PER_DAY {
            let minutes = i * BLOCK_MINUTES;
            let result = self
                .build_block(
                    &inputs,
                    minutes,
                    weekday_idx,
                    day_of_year,
                    BuildMode::FullDay,
                    &mut repetition,
                    &mut carry_over,
                )
                .await;
            self.persist_block_artifacts(&result).await;
            lines.push(result.line);
            self.state
                .built_blocks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(block_label(minutes));

            if (i as usize + 1) % SAVE_EVERY_BLOCKS == 0 {
                self.save_lines(&inputs.settings.output_folder, &file_name, &lines)?;
            }
            if i + 1 < BLOCKS_PER_DAY {
                tokio::time::sleep(INTER_BLOCK_PAUSE).await;
            }
        }
        self.save_lines(&inputs.settings.output_folder, &file_name, &lines)?;
        self.state.last_build_unix.store(now_ts(), Ordering::SeqCst);
        log::info!("full-day build finished → {file_name}");

        Ok(BuildOutcome {
            blocks_built: BLOCKS_PER_DAY,
            day_file: file_name,
        })
    }

    /// Rebuild the current and next 30-minute blocks and merge them into the
    /// existing day file without clobbering the other blocks.
    pub async fn build_current_and_next(&self) -> Result<BuildOutcome, String> {
        let Some(_guard) = BuildGuard::try_begin(&self.state) else {
            return Err("a build is already in progress".to_string());
        };

        let now = Local::now();
        self.state.roll_over_if_new_day(now.date_naive()).await;
        let inputs = self.load_build_inputs().await;
        let weekday_idx = now.weekday().num_days_from_monday() as u8;
        let day_of_year = now.ordinal();

        let current = now.hour() * 60 + (now.minute() / BLOCK_MINUTES) * BLOCK_MINUTES;
        let next = (current + BLOCK_MINUTES) % 1440;
        let wrapped = next < current;

        let mut repetition = self.state.repetition.lock().await;
        let mut carry_over = self.state.carry_over.lock().await;
        repetition.set_window(inputs.settings.repetition_window_minutes);

        // (block, weekday) — the post-midnight block belongs to tomorrow's file.
        let targets = [
            (current, weekday_idx),
            (next, if wrapped { (weekday_idx + 1) % 7 } else { weekday_idx }),
        ];

        let mut last_file = String::new();
        for (minutes, block_weekday) in targets {
            let result = self
                .build_block(
                    &inputs,
                    minutes,
                    block_weekday,
                    day_of_year,
                    BuildMode::Incremental,
                    &mut repetition,
                    &mut carry_over,
                )
                .await;
            self.persist_block_artifacts(&result).await;

            let file_name = day_file_name(block_weekday);
            let existing = self
                .files
                .read_text_file(&inputs.settings.output_folder, &file_name)
                .unwrap_or_default();
            let merged = merge_day_content(&existing, std::slice::from_ref(&result.line));
            self.files
                .write_text_file(&inputs.settings.output_folder, &file_name, &merged)
                .map_err(|e| format!("failed to save grade file {file_name}: {e}"))?;

            self.state
                .built_blocks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(block_label(minutes));
            last_file = file_name;
        }

        self.state.last_build_unix.store(now_ts(), Ordering::SeqCst);
        Ok(BuildOutcome {
            blocks_built: 2,
            day_file: last_file,
        })
    }

    // ── Auto-build loop ───────────────────────────────────────────────────────

    /// Every 30 s: build when the next block boundary is inside the lead
    /// window and hasn't been built yet; independently force a build when
    /// nothing has built for five minutes.
    pub async fn run_auto_build(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(AUTO_TICK);
        loop {
            ticker.tick().await;
            let now = Local::now();
            self.state.roll_over_if_new_day(now.date_naive()).await;

            let settings = local::load_settings(&self.db).await.unwrap_or_default();
            let minute_of_day = now.hour() * 60 + now.minute();
            let minutes_until = BLOCK_MINUTES - (minute_of_day % BLOCK_MINUTES);
            let next_boundary = (minute_of_day + minutes_until) % 1440;
            let label = block_label(next_boundary);

            let already_built = self
                .state
                .built_blocks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .contains(&label);
            let boundary_due = minutes_until <= settings.auto_build_lead_minutes && !already_built;

            let since_last = now_ts() - self.state.last_build_unix.load(Ordering::SeqCst);
            let overdue = since_last >= FORCE_BUILD_AFTER_SECS;

            if boundary_due || overdue {
                if boundary_due {
                    log::info!("auto build: {label} due in {minutes_until} min");
                } else {
                    log::info!("auto build: no build for {since_last}s, forcing");
                }
                if let Err(e) = self.build_current_and_next().await {
                    log::warn!("auto build skipped: {e}");
                }
            }
        }
    }

    // ── Persistence helpers ───────────────────────────────────────────────────

    fn save_lines(&self, folder: &str, file_name: &str, lines: &[String]) -> Result<(), String> {
        let mut content = lines.join("\n");
        content.push('\n');
        self.files
            .write_text_file(folder, file_name, &content)
            .map_err(|e| format!("failed to save grade file {file_name}: {e}"))
    }

    async fn persist_block_artifacts(&self, result: &BlockResult) {
        if let Err(e) = audit::insert_block_log(&self.db, &result.logs).await {
            log::warn!("block log not persisted: {e}");
        }
        for item in &result.logs {
            if item.kind == BlockLogKind::Missing {
                if let Err(e) =
                    audit::report_missing_song(&self.db, &item.title, &item.artist, &item.station)
                        .await
                {
                    log::warn!("missing-song report not persisted: {e}");
                }
            }
        }

        if let Some(parsed) = BlockLine::parse(&result.line) {
            let found = parsed.tokens.iter().filter(|t| t.starts_with('"')).count() as u32;
            let total = parsed.tokens.len() as u32;
            let record = BuildHistoryRecord {
                built_at: now_ts(),
                block_label: block_label(parsed.minutes),
                slots_processed: total,
                slots_found: found,
                slots_missing: total - found,
                program_name: parsed.program,
            };
            if let Err(e) = audit::insert_build_history(&self.db, &record).await {
                log::warn!("build history not persisted: {e}");
            }
        }
    }
}

/// Extend a short (or empty) configured sequence with general-pool slots up
/// to the minimum block length.
fn pad_sequence(sequence: &[SequenceSlot]) -> Vec<SequenceSlot> {
    let mut padded = sequence.to_vec();
    for position in (padded.len() as u32 + 1)..=(MIN_SEQUENCE_SLOTS as u32) {
        padded.push(SequenceSlot {
            position,
            radio_source: SOURCE_RANDOM_POOL.to_string(),
            custom_file_name: None,
        });
    }
    padded
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
    use crate::grade::file::LocalFileSurface;
    use crate::library::resolver::{LibraryHit, LibraryResolver};
    use crate::scheduler::pool::ObservedSong;
    use async_trait::async_trait;

    struct StaticSource {
        songs: Vec<ObservedSong>,
        ranking: Vec<RankingSong>,
    }

    #[async_trait]
    impl SongPoolSource for StaticSource {
        async fn recent_songs(&self, _limit: u32) -> Result<Vec<ObservedSong>, String> {
            Ok(self.songs.clone())
        }
        async fn ranking(&self) -> Result<Vec<RankingSong>, String> {
            Ok(self.ranking.clone())
        }
    }

    struct YesOracle;

    #[async_trait]
    impl LibraryResolver for YesOracle {
        async fn check_one(&self, _artist: &str, _title: &str) -> Result<LibraryHit, String> {
            Ok(LibraryHit {
                exists: true,
                filename: None,
            })
        }
    }

    async fn orchestrator(dir: &tempfile::TempDir) -> Orchestrator {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::db::local::run_migrations(&pool).await.unwrap();

        let mut settings = EngineSettings::default();
        settings.output_folder = dir.path().to_string_lossy().to_string();
        local::save_settings(&pool, &settings).await.unwrap();

        sequence::save_default_sequence(
            &pool,
            &[
                SequenceSlot {
                    position: 1,
                    radio_source: "bh".to_string(),
                    custom_file_name: None,
                },
                SequenceSlot {
                    position: 2,
                    radio_source: SOURCE_RANDOM_POOL.to_string(),
                    custom_file_name: None,
                },
            ],
        )
        .await
        .unwrap();

        let songs = (0..20)
            .map(|i| ObservedSong {
                title: format!("Song {i}"),
                artist: format!("Artist {i}"),
                station: "BH FM".to_string(),
                observed_at: 1_700_000_000 + i,
            })
            .collect();
        let ranking = (1..=30)
            .map(|i| RankingSong {
                title: format!("Hit {i}"),
                artist: format!("Star {i}"),
                plays: 100 - i,
                style: "pop".to_string(),
            })
            .collect();

        Orchestrator::new(
            Arc::new(EngineState::new(60)),
            pool,
            Arc::new(StaticSource { songs, ranking }),
            LibraryAdapter::new(Arc::new(YesOracle)),
            None,
            Arc::new(LocalFileSurface),
        )
    }

    #[tokio::test]
    async fn concurrent_builds_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir).await;
        orch.state.building.store(true, Ordering::SeqCst);
        assert!(orch.build_current_and_next().await.is_err());
        orch.state.building.store(false, Ordering::SeqCst);
        assert!(orch.build_current_and_next().await.is_ok());
    }

    #[tokio::test]
    async fn incremental_build_merges_into_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir).await;

        let now = Local::now();
        let weekday_idx = now.weekday().num_days_from_monday() as u8;
        let file_name = day_file_name(weekday_idx);
        let folder = dir.path().to_string_lossy().to_string();

        // Seed the file with a block the incremental build must not clobber.
        LocalFileSurface
            .write_text_file(&folder, &file_name, "13:37 (ID=Seeded) \"KEEP.MP3\"\n")
            .unwrap();

        let outcome = orch.build_current_and_next().await.unwrap();
        assert_eq!(outcome.blocks_built, 2);

        let content = LocalFileSurface.read_text_file(&folder, &file_name).unwrap();
        assert!(content.contains("(ID=Seeded)"));
        // Lines stay sorted by time after the merge.
        let labels: Vec<&str> = content.lines().filter_map(|l| l.get(..5)).collect();
        let mut sorted = labels.clone();
        sorted.sort();
        assert_eq!(labels, sorted);
    }

    #[tokio::test]
    async fn full_day_build_writes_48_sorted_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir).await;

        let outcome = orch.build_full_day().await.unwrap();
        assert_eq!(outcome.blocks_built, 48);

        let folder = dir.path().to_string_lossy().to_string();
        let content = LocalFileSurface
            .read_text_file(&folder, &outcome.day_file)
            .unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 48);
        assert!(lines[0].starts_with("00:00 "));
        assert!(lines[47].starts_with("23:30 "));
        // Every line parses back.
        assert!(lines.iter().all(|l| BlockLine::parse(l).is_some()));
        // Daytime blocks run the normal engine; the 2-slot configured
        // sequence is padded up to the minimum block length.
        let daytime = lines.iter().find(|l| l.starts_with("08:00 ")).unwrap();
        let parsed = BlockLine::parse(daytime).unwrap();
        assert!(parsed.tokens.len() >= MIN_SEQUENCE_SLOTS);
    }

    #[tokio::test]
    async fn build_reports_history_and_missing_songs() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(&dir).await;
        orch.build_current_and_next().await.unwrap();

        let history: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM build_history")
            .fetch_one(&orch.db)
            .await
            .unwrap();
        assert!(history >= 2);
    }
}
