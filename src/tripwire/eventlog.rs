//! Append-only JSONL synth event log, one file per stack.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const SECS_PER_DAY: u64 = 86_400;

/// Days from 0000-03-01 to 1970-01-01 in the proleptic Gregorian calendar.
const EPOCH_SHIFT: i64 = 719_468;
const DAYS_PER_ERA: i64 = 146_097;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

fn since_epoch() -> std::time::Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Civil date for a day count since 1970-01-01. Eras are 400-year cycles
/// starting in March, so the leap day falls at the end of each year.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + EPOCH_SHIFT;
    let era = z.div_euclid(DAYS_PER_ERA);
    let doe = z - era * DAYS_PER_ERA;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// ISO 8601 UTC rendering of a Unix timestamp.
pub fn format_timestamp(secs: u64) -> String {
    let (year, month, day) = civil_from_days((secs / SECS_PER_DAY) as i64);
    let rem = secs % SECS_PER_DAY;
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        day,
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

pub fn now_iso8601() -> String {
    format_timestamp(since_epoch().as_secs())
}

/// Run ID shared by every event of one synth: `r-` and 12 hex digits.
pub fn generate_run_id() -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&since_epoch().as_nanos().to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&RUN_COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    format!("r-{}", &hasher.finalize().to_hex()[..12])
}

pub fn event_log_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("events.jsonl")
}

/// Append one timestamped event as a single JSON line.
pub fn append_event(state_dir: &Path, stack: &str, event: ProvenanceEvent) -> Result<(), String> {
    let mut line = serde_json::to_string(&TimestampedEvent {
        ts: now_iso8601(),
        event,
    })
    .map_err(|e| format!("event serialize error: {}", e))?;
    line.push('\n');

    let path = event_log_path(state_dir, stack);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("cannot create {}: {}", dir.display(), e))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut log| log.write_all(line.as_bytes()))
        .map_err(|e| format!("cannot append to {}: {}", path.display(), e))
}

/// Read back a stack's event log. A missing log is an empty history; lines
/// that no longer parse are skipped.
pub fn read_events(state_dir: &Path, stack: &str) -> Result<Vec<TimestampedEvent>, String> {
    let path = event_log_path(state_dir, stack);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable event");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp_known_instants() {
        assert_eq!(format_timestamp(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_timestamp(951_782_400), "2000-02-29T00:00:00Z");
        assert_eq!(format_timestamp(1_709_251_199), "2024-02-29T23:59:59Z");
        assert_eq!(format_timestamp(1_709_251_200), "2024-03-01T00:00:00Z");
        assert_eq!(format_timestamp(946_684_799), "1999-12-31T23:59:59Z");
    }

    #[test]
    fn test_now_iso8601_shape() {
        let ts = now_iso8601();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 20);
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_run_ids_are_distinct() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("r-"));
        assert_eq!(a.len(), 14);
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_log_path() {
        let p = event_log_path(Path::new("/state"), "CommonStack");
        assert_eq!(p, PathBuf::from("/state/CommonStack/events.jsonl"));
    }

    #[test]
    fn test_append_event() {
        let dir = tempfile::tempdir().unwrap();
        let event = ProvenanceEvent::SynthStarted {
            stack: "CommonStack".to_string(),
            run_id: "r-abc".to_string(),
            stackforge_version: "0.3.0".to_string(),
        };
        append_event(dir.path(), "CommonStack", event).unwrap();

        let content = std::fs::read_to_string(dir.path().join("CommonStack/events.jsonl")).unwrap();
        assert!(content.contains("synth_started"));
        assert!(content.contains("r-abc"));
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            let event = ProvenanceEvent::StackSynthesized {
                stack: "Dev".to_string(),
                run_id: format!("r-{}", i),
                resources: 40,
                hash: "blake3:xxx".to_string(),
                duration_seconds: 0.01,
            };
            append_event(dir.path(), "Dev", event).unwrap();
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(event_log_path(dir.path(), "Dev"))
            .and_then(|mut f| writeln!(f, "garbage"))
            .unwrap();

        let events = read_events(dir.path(), "Dev").unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[2].event,
            ProvenanceEvent::StackSynthesized { run_id, .. } if run_id == "r-2"
        ));
    }

    #[test]
    fn test_read_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(dir.path(), "ghost").unwrap().is_empty());
    }
}
