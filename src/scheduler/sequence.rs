/// Sequence configuration and resolution
///
/// A sequence is the ordered list of slot sources that defines a block's
/// composition. Scheduled sequences override the default for their time
/// window; the highest priority wins, with a deterministic tie-break.
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// A block always carries at least this many music slots.
pub const MIN_SEQUENCE_SLOTS: usize = 5;

/// Reserved slot-source tokens.
pub const SOURCE_RANDOM_POOL: &str = "random-pool";
pub const SOURCE_RANKING_BLOCK: &str = "ranking-block";
pub const SOURCE_GENERIC_FIXED: &str = "generic-fixed";

// ── Model ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSlot {
    pub position: u32,
    /// Station identifier, a reserved token, or a fixed-content reference.
    pub radio_source: String,
    #[serde(default)]
    pub custom_file_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSequence {
    pub id: Option<i64>,
    pub name: String,
    pub start_hour: u32,
    pub start_minute: u32,
    /// `end <= start` wraps past midnight.
    pub end_hour: u32,
    pub end_minute: u32,
    /// 0 = Monday .. 6 = Sunday; empty = every day.
    pub week_days: Vec<u8>,
    pub sequence: Vec<SequenceSlot>,
    pub enabled: bool,
    pub priority: i32,
}

// ── DB helpers ────────────────────────────────────────────────────────────────

pub async fn get_default_sequence(pool: &SqlitePool) -> Result<Vec<SequenceSlot>, sqlx::Error> {
    let row: Option<String> =
        sqlx::query_scalar("SELECT sequence_json FROM sequence_config WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    Ok(row
        .and_then(|j| serde_json::from_str(&j).ok())
        .unwrap_or_default())
}

pub async fn save_default_sequence(
    pool: &SqlitePool,
    sequence: &[SequenceSlot],
) -> Result<(), sqlx::Error> {
    let json = serde_json::to_string(sequence).unwrap_or_else(|_| "[]".to_string());
    sqlx::query(
        "INSERT INTO sequence_config (id, sequence_json) VALUES (1, ?) \
         ON CONFLICT(id) DO UPDATE SET sequence_json = excluded.sequence_json",
    )
    .bind(json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_scheduled_sequences(
    pool: &SqlitePool,
) -> Result<Vec<ScheduledSequence>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, name, start_hour, start_minute, end_hour, end_minute, \
         week_days_json, sequence_json, enabled, priority \
         FROM scheduled_sequences ORDER BY priority DESC, id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| ScheduledSequence {
            id: r.get("id"),
            name: r.get("name"),
            start_hour: r.get::<i64, _>("start_hour") as u32,
            start_minute: r.get::<i64, _>("start_minute") as u32,
            end_hour: r.get::<i64, _>("end_hour") as u32,
            end_minute: r.get::<i64, _>("end_minute") as u32,
            week_days: serde_json::from_str(r.get::<&str, _>("week_days_json"))
                .unwrap_or_default(),
            sequence: serde_json::from_str(r.get::<&str, _>("sequence_json")).unwrap_or_default(),
            enabled: r.get::<i64, _>("enabled") != 0,
            priority: r.get("priority"),
        })
        .collect())
}

pub async fn upsert_scheduled_sequence(
    pool: &SqlitePool,
    seq: &ScheduledSequence,
) -> Result<i64, sqlx::Error> {
    let week_days_json = serde_json::to_string(&seq.week_days).unwrap_or_default();
    let sequence_json = serde_json::to_string(&seq.sequence).unwrap_or_default();

    let result = if let Some(id) = seq.id {
        sqlx::query(
            "UPDATE scheduled_sequences SET name=?, start_hour=?, start_minute=?, end_hour=?, \
             end_minute=?, week_days_json=?, sequence_json=?, enabled=?, priority=? WHERE id=?",
        )
        .bind(&seq.name)
        .bind(seq.start_hour as i64)
        .bind(seq.start_minute as i64)
        .bind(seq.end_hour as i64)
        .bind(seq.end_minute as i64)
        .bind(&week_days_json)
        .bind(&sequence_json)
        .bind(seq.enabled as i64)
        .bind(seq.priority)
        .bind(id)
        .execute(pool)
        .await?;
        id
    } else {
        let r = sqlx::query(
            "INSERT INTO scheduled_sequences (name, start_hour, start_minute, end_hour, end_minute, \
             week_days_json, sequence_json, enabled, priority) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&seq.name)
        .bind(seq.start_hour as i64)
        .bind(seq.start_minute as i64)
        .bind(seq.end_hour as i64)
        .bind(seq.end_minute as i64)
        .bind(&week_days_json)
        .bind(&sequence_json)
        .bind(seq.enabled as i64)
        .bind(seq.priority)
        .execute(pool)
        .await?;
        r.last_insert_rowid()
    };
    Ok(result)
}

pub async fn delete_scheduled_sequence(pool: &SqlitePool, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM scheduled_sequences WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

// ── Active sequence resolution ────────────────────────────────────────────────

fn window_contains(start_min: u32, end_min: u32, t: u32) -> bool {
    if end_min <= start_min {
        // Wraps past midnight.
        t >= start_min || t < end_min
    } else {
        t >= start_min && t < end_min
    }
}

fn window_len(start_min: u32, end_min: u32) -> u32 {
    if end_min <= start_min {
        1440 - start_min + end_min
    } else {
        end_min - start_min
    }
}

impl ScheduledSequence {
    pub fn matches(&self, hour: u32, minute: u32, weekday_idx: u8) -> bool {
        if !self.enabled {
            return false;
        }
        if !self.week_days.is_empty() && !self.week_days.contains(&weekday_idx) {
            return false;
        }
        let t = hour * 60 + minute;
        window_contains(
            self.start_hour * 60 + self.start_minute,
            self.end_hour * 60 + self.end_minute,
            t,
        )
    }

    fn span_minutes(&self) -> u32 {
        window_len(
            self.start_hour * 60 + self.start_minute,
            self.end_hour * 60 + self.end_minute,
        )
    }
}

/// The effective sequence for a block, plus the overriding program name when
/// a scheduled sequence is active.
///
/// Highest priority wins. Equal priorities break on the narrower time window
/// first, then on the lower id, so the outcome never depends on row order.
pub fn active_sequence<'a>(
    scheduled: &'a [ScheduledSequence],
    default_sequence: &'a [SequenceSlot],
    hour: u32,
    minute: u32,
    weekday_idx: u8,
) -> (&'a [SequenceSlot], Option<&'a str>) {
    let mut matches: Vec<&ScheduledSequence> = scheduled
        .iter()
        .filter(|s| s.matches(hour, minute, weekday_idx) && !s.sequence.is_empty())
        .collect();

    matches.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.span_minutes().cmp(&b.span_minutes()))
            .then_with(|| a.id.unwrap_or(i64::MAX).cmp(&b.id.unwrap_or(i64::MAX)))
    });

    match matches.first() {
        Some(seq) => (&seq.sequence, Some(seq.name.as_str())),
        None => (default_sequence, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(source: &str) -> SequenceSlot {
        SequenceSlot {
            position: 1,
            radio_source: source.to_string(),
            custom_file_name: None,
        }
    }

    fn scheduled(
        id: i64,
        name: &str,
        start: (u32, u32),
        end: (u32, u32),
        days: Vec<u8>,
        priority: i32,
    ) -> ScheduledSequence {
        ScheduledSequence {
            id: Some(id),
            name: name.to_string(),
            start_hour: start.0,
            start_minute: start.1,
            end_hour: end.0,
            end_minute: end.1,
            week_days: days,
            sequence: vec![slot("bh")],
            enabled: true,
            priority,
        }
    }

    #[test]
    fn scheduled_overrides_default_inside_window() {
        let sched = vec![scheduled(1, "Noite", (18, 0), (22, 0), vec![0, 1, 2, 3, 4], 2)];
        let default = vec![slot("98")];

        // Wednesday 19:30 → override applies.
        let (seq, name) = active_sequence(&sched, &default, 19, 30, 2);
        assert_eq!(name, Some("Noite"));
        assert_eq!(seq[0].radio_source, "bh");

        // Sunday 19:30 → weekday list excludes it.
        let (seq, name) = active_sequence(&sched, &default, 19, 30, 6);
        assert_eq!(name, None);
        assert_eq!(seq[0].radio_source, "98");
    }

    #[test]
    fn end_of_window_is_exclusive() {
        let sched = vec![scheduled(1, "Tarde", (14, 0), (16, 0), vec![], 1)];
        let default = vec![slot("98")];
        assert!(active_sequence(&sched, &default, 15, 59, 0).1.is_some());
        assert!(active_sequence(&sched, &default, 16, 0, 0).1.is_none());
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let sched = vec![scheduled(1, "Madrugada", (22, 0), (4, 0), vec![], 1)];
        let default = vec![slot("98")];
        assert!(active_sequence(&sched, &default, 23, 30, 0).1.is_some());
        assert!(active_sequence(&sched, &default, 1, 0, 0).1.is_some());
        assert!(active_sequence(&sched, &default, 5, 0, 0).1.is_none());
    }

    #[test]
    fn highest_priority_wins() {
        let sched = vec![
            scheduled(1, "Base", (0, 0), (23, 59), vec![], 1),
            scheduled(2, "Especial", (18, 0), (20, 0), vec![], 5),
        ];
        let default = vec![slot("98")];
        assert_eq!(active_sequence(&sched, &default, 19, 0, 0).1, Some("Especial"));
        assert_eq!(active_sequence(&sched, &default, 10, 0, 0).1, Some("Base"));
    }

    #[test]
    fn equal_priority_breaks_on_narrower_window_then_id() {
        let sched = vec![
            scheduled(1, "Larga", (8, 0), (20, 0), vec![], 3),
            scheduled(2, "Estreita", (18, 0), (20, 0), vec![], 3),
        ];
        let default = vec![slot("98")];
        assert_eq!(
            active_sequence(&sched, &default, 19, 0, 0).1,
            Some("Estreita")
        );

        let sched = vec![
            scheduled(7, "Primeira", (18, 0), (20, 0), vec![], 3),
            scheduled(3, "Segunda", (18, 0), (20, 0), vec![], 3),
        ];
        assert_eq!(active_sequence(&sched, &default, 19, 0, 0).1, Some("Segunda"));
    }

    #[test]
    fn disabled_sequences_never_match() {
        let mut s = scheduled(1, "Off", (0, 0), (23, 59), vec![], 9);
        s.enabled = false;
        let default = vec![slot("98")];
        assert_eq!(active_sequence(&[s], &default, 12, 0, 0).1, None);
    }
}
