/// Anti-Repetition Tracker
///
/// Remembers which (title, artist) pairs were placed in recent blocks and
/// answers "was this used within the repetition window". State is owned by
/// the engine and passed into selection; nothing here is global.

/// Window applied during full-day generation, shorter than the configured
/// incremental window so 48 back-to-back blocks still rotate.
pub const FULL_DAY_WINDOW_MINUTES: u32 = 30;

/// The tracker self-trims to this many entries.
pub const MAX_TRACKED: usize = 100;

pub const DEFAULT_WINDOW_MINUTES: u32 = 60;

#[derive(Debug, Clone)]
pub struct UsedSong {
    pub title: String,
    pub artist: String,
    /// Block start, minutes-of-day.
    pub used_at_minutes: u32,
}

#[derive(Debug)]
pub struct RepetitionTracker {
    entries: Vec<UsedSong>,
    window_minutes: u32,
}

impl RepetitionTracker {
    pub fn new(window_minutes: u32) -> Self {
        Self {
            entries: Vec::new(),
            window_minutes: window_minutes.max(1),
        }
    }

    pub fn set_window(&mut self, window_minutes: u32) {
        self.window_minutes = window_minutes.max(1);
    }

    pub fn mark_used(&mut self, title: &str, artist: &str, block_minutes: u32) {
        self.entries.push(UsedSong {
            title: title.trim().to_lowercase(),
            artist: artist.trim().to_lowercase(),
            used_at_minutes: block_minutes % 1440,
        });
        if self.entries.len() > MAX_TRACKED {
            let excess = self.entries.len() - MAX_TRACKED;
            self.entries.drain(..excess);
        }
    }

    /// True if either the title or the artist was marked used within the
    /// window ending at `block_minutes`. Wall-clock minutes-of-day with
    /// midnight wraparound.
    pub fn is_recently_used(
        &self,
        title: &str,
        artist: &str,
        block_minutes: u32,
        full_day_mode: bool,
    ) -> bool {
        let window = if full_day_mode {
            FULL_DAY_WINDOW_MINUTES
        } else {
            self.window_minutes
        };
        let title = title.trim().to_lowercase();
        let artist = artist.trim().to_lowercase();
        let block = (block_minutes % 1440) as i32;

        self.entries.iter().any(|e| {
            if e.title != title && e.artist != artist {
                return false;
            }
            let mut diff = block - e.used_at_minutes as i32;
            if diff < 0 {
                diff += 1440;
            }
            (diff as u32) < window
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_or_artist_inside_window_is_recent() {
        let mut t = RepetitionTracker::new(60);
        t.mark_used("Song A", "Artist X", 10 * 60);

        assert!(t.is_recently_used("Song A", "Someone Else", 10 * 60 + 30, false));
        assert!(t.is_recently_used("Other Song", "Artist X", 10 * 60 + 59, false));
        assert!(!t.is_recently_used("Other Song", "Someone Else", 10 * 60 + 30, false));
    }

    #[test]
    fn outside_window_is_not_recent() {
        let mut t = RepetitionTracker::new(60);
        t.mark_used("Song A", "Artist X", 10 * 60);
        assert!(!t.is_recently_used("Song A", "Artist X", 11 * 60, false));
    }

    #[test]
    fn full_day_mode_shrinks_the_window() {
        let mut t = RepetitionTracker::new(60);
        t.mark_used("Song A", "Artist X", 10 * 60);
        // 40 minutes later: inside the 60-minute incremental window,
        // outside the 30-minute full-day window.
        assert!(t.is_recently_used("Song A", "Artist X", 10 * 60 + 40, false));
        assert!(!t.is_recently_used("Song A", "Artist X", 10 * 60 + 40, true));
    }

    #[test]
    fn midnight_wraparound() {
        let mut t = RepetitionTracker::new(60);
        t.mark_used("Song A", "Artist X", 23 * 60 + 30);
        assert!(t.is_recently_used("Song A", "Artist X", 0, false));
        assert!(!t.is_recently_used("Song A", "Artist X", 2 * 60, false));
    }

    #[test]
    fn matching_is_case_insensitive_and_trimmed() {
        let mut t = RepetitionTracker::new(60);
        t.mark_used("  Song A ", "ARTIST X", 600);
        assert!(t.is_recently_used("song a", " artist x ", 610, false));
    }

    #[test]
    fn trims_to_last_hundred() {
        let mut t = RepetitionTracker::new(60);
        for i in 0..150 {
            t.mark_used(&format!("Song {i}"), &format!("Artist {i}"), 600);
        }
        assert_eq!(t.len(), MAX_TRACKED);
        // Oldest entries were evicted.
        assert!(!t.is_recently_used("Song 0", "Artist 0", 600, false));
        assert!(t.is_recently_used("Song 149", "Artist 149", 600, false));
    }

    #[test]
    fn clear_resets_for_day_rollover() {
        let mut t = RepetitionTracker::new(60);
        t.mark_used("Song A", "Artist X", 600);
        t.clear();
        assert!(t.is_empty());
        assert!(!t.is_recently_used("Song A", "Artist X", 610, false));
    }
}
