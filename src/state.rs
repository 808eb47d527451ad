use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64};
use std::sync::Mutex;

use chrono::NaiveDate;
use tokio::sync::Mutex as AsyncMutex;

use crate::scheduler::carryover::CarryOverQueue;
use crate::scheduler::repetition::RepetitionTracker;

/// Shared engine state — owned here, passed by reference into the selection
/// functions. The "one build at a time" flag is what makes the trackers safe
/// as single-writer state.
pub struct EngineState {
    pub repetition: AsyncMutex<RepetitionTracker>,
    pub carry_over: AsyncMutex<CarryOverQueue>,
    /// Build mutex — a second trigger while set is ignored, not queued.
    pub building: AtomicBool,
    /// `HH:MM` labels already generated for the current day.
    pub built_blocks: Mutex<HashSet<String>>,
    /// Unix seconds of the last completed build; the auto loop's safety net.
    pub last_build_unix: AtomicI64,
    current_day: Mutex<Option<NaiveDate>>,
}

impl EngineState {
    pub fn new(repetition_window_minutes: u32) -> Self {
        Self {
            repetition: AsyncMutex::new(RepetitionTracker::new(repetition_window_minutes)),
            carry_over: AsyncMutex::new(CarryOverQueue::new()),
            building: AtomicBool::new(false),
            built_blocks: Mutex::new(HashSet::new()),
            last_build_unix: AtomicI64::new(0),
            current_day: Mutex::new(None),
        }
    }

    /// Clear the day-scoped state when the broadcast day changes.
    /// Returns true when a rollover happened.
    pub async fn roll_over_if_new_day(&self, today: NaiveDate) -> bool {
        {
            let mut day = self
                .current_day
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *day == Some(today) {
                return false;
            }
            let first_run = day.is_none();
            *day = Some(today);
            if first_run {
                return false;
            }
        }

        log::info!("day rollover → clearing repetition tracker and carry-over queue");
        self.repetition.lock().await.clear();
        self.carry_over.lock().await.clear();
        self.built_blocks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rollover_clears_day_state_once_per_day() {
        let state = EngineState::new(60);
        let day1 = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 1, 6).unwrap();

        // First sighting of a day is not a rollover.
        assert!(!state.roll_over_if_new_day(day1).await);

        state.repetition.lock().await.mark_used("S", "A", 600);
        state.built_blocks.lock().unwrap().insert("10:00".to_string());

        assert!(!state.roll_over_if_new_day(day1).await);
        assert!(!state.repetition.lock().await.is_empty());

        assert!(state.roll_over_if_new_day(day2).await);
        assert!(state.repetition.lock().await.is_empty());
        assert!(state.built_blocks.lock().unwrap().is_empty());
    }
}
