/// Carry-Over Queue
///
/// Songs that were missing from the library at selection time but queued for
/// background download. Once an entry is old enough for a download to have
/// plausibly finished it is promoted into the next block for its station —
/// the caller still has to verify the file actually exists.

/// Minimum age before an entry is eligible for promotion. Empirically the
/// time a background fetch needs for a typical track.
pub const MIN_AGE_SECS: i64 = 60;

/// Queue cap; the oldest entry is evicted first.
pub const MAX_QUEUED: usize = 50;

#[derive(Debug, Clone)]
pub struct CarryOverSong {
    pub title: String,
    pub artist: String,
    pub station: String,
    pub style: String,
    /// Unix seconds when the song was queued.
    pub added_at: i64,
    /// Block (minutes-of-day) the entry should be retried against.
    pub target_block: u32,
}

#[derive(Debug, Default)]
pub struct CarryOverQueue {
    entries: Vec<CarryOverSong>,
}

impl CarryOverQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a song. Idempotent by (title, artist); capped, evicting oldest.
    pub fn add(&mut self, song: CarryOverSong) {
        let key = key_of(&song.title, &song.artist);
        if self
            .entries
            .iter()
            .any(|e| key_of(&e.title, &e.artist) == key)
        {
            return;
        }
        self.entries.push(song);
        if self.entries.len() > MAX_QUEUED {
            let excess = self.entries.len() - MAX_QUEUED;
            self.entries.drain(..excess);
        }
    }

    /// Drain entries for `station` whose age has reached the promotion
    /// threshold. Younger entries and other stations' entries stay queued.
    pub fn take_ready_for(&mut self, station: &str, now: i64) -> Vec<CarryOverSong> {
        let mut ready = Vec::new();
        let mut remaining = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            let mature = now - entry.added_at >= MIN_AGE_SECS;
            if mature && entry.station.eq_ignore_ascii_case(station) {
                ready.push(entry);
            } else {
                remaining.push(entry);
            }
        }
        self.entries = remaining;
        ready
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

fn key_of(title: &str, artist: &str) -> String {
    format!("{}|{}", title.trim().to_lowercase(), artist.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(title: &str, station: &str, added_at: i64) -> CarryOverSong {
        CarryOverSong {
            title: title.to_string(),
            artist: "Artist".to_string(),
            station: station.to_string(),
            style: "pop".to_string(),
            added_at,
            target_block: 630,
        }
    }

    #[test]
    fn not_promoted_before_minimum_age() {
        let mut q = CarryOverQueue::new();
        q.add(song("A", "BH FM", 1_000));
        assert!(q.take_ready_for("BH FM", 1_000 + MIN_AGE_SECS - 1).is_empty());
        assert_eq!(q.len(), 1);

        let ready = q.take_ready_for("BH FM", 1_000 + MIN_AGE_SECS);
        assert_eq!(ready.len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn other_station_entries_stay_queued() {
        let mut q = CarryOverQueue::new();
        q.add(song("A", "BH FM", 0));
        q.add(song("B", "98 FM", 0));
        let ready = q.take_ready_for("bh fm", 120);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].title, "A");
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn add_is_idempotent_by_key() {
        let mut q = CarryOverQueue::new();
        q.add(song("A", "BH FM", 0));
        q.add(song("a", "98 FM", 50));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn cap_evicts_oldest() {
        let mut q = CarryOverQueue::new();
        for i in 0..(MAX_QUEUED + 5) {
            q.add(song(&format!("S{i}"), "BH FM", i as i64));
        }
        assert_eq!(q.len(), MAX_QUEUED);
        let ready = q.take_ready_for("BH FM", 10_000);
        assert!(ready.iter().all(|s| s.title != "S0"));
    }
}
