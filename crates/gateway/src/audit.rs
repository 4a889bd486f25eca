//! Dual append-only audit logs, written synchronously before the
//! corresponding response is sent so a crash never leaves a delivered
//! message unlogged.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct EnvelopeHistoryRecord<'a> {
    pub event: &'a str,
    pub envelope: EnvelopeSummary<'a>,
    pub participants: &'a [String],
    pub ts: String,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeSummary<'a> {
    pub id: &'a str,
    pub from: &'a str,
    pub to: Option<&'a [String]>,
    pub kind: &'a str,
    pub correlation_id: Option<&'a [String]>,
}

#[derive(Debug, Serialize)]
pub struct CapabilityDecisionRecord<'a> {
    pub envelope_id: &'a str,
    pub participant: &'a str,
    pub result: &'a str,
    pub required_capability: Option<&'a str>,
    pub matched_capability_id: Option<&'a str>,
    pub ts: String,
}

/// One rotation-aware append-only JSONL sink. Rotation is size-triggered:
/// once the current file exceeds `rotate_bytes`, the next append opens a
/// new numbered file.
struct JsonlSink {
    dir: PathBuf,
    stem: &'static str,
    rotate_bytes: u64,
    file: File,
    bytes_written: u64,
    generation: u32,
}

impl JsonlSink {
    fn open(dir: &Path, stem: &'static str, rotate_bytes: u64) -> std::io::Result<JsonlSink> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{stem}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let bytes_written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(JsonlSink {
            dir: dir.to_path_buf(),
            stem,
            rotate_bytes,
            file,
            bytes_written,
            generation: 0,
        })
    }

    fn append(&mut self, line: &str) -> std::io::Result<()> {
        if self.bytes_written > self.rotate_bytes {
            self.rotate()?;
        }
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        self.bytes_written += line.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.generation += 1;
        let path = self
            .dir
            .join(format!("{}.{}.jsonl", self.stem, self.generation));
        self.file = OpenOptions::new().create(true).append(true).open(path)?;
        self.bytes_written = 0;
        Ok(())
    }
}

pub struct AuditLog {
    envelope_history: JsonlSink,
    capability_decisions: JsonlSink,
}

impl AuditLog {
    pub fn open(dir: &Path, rotate_bytes: u64) -> std::io::Result<AuditLog> {
        Ok(AuditLog {
            envelope_history: JsonlSink::open(dir, "envelope-history", rotate_bytes)?,
            capability_decisions: JsonlSink::open(dir, "capability-decisions", rotate_bytes)?,
        })
    }

    pub fn record_envelope(&mut self, record: &EnvelopeHistoryRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = self.envelope_history.append(&line) {
                    warn!("failed to append envelope-history record: {e}");
                }
            }
            Err(e) => warn!("failed to serialize envelope-history record: {e}"),
        }
    }

    pub fn record_decision(&mut self, record: &CapabilityDecisionRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = self.capability_decisions.append(&line) {
                    warn!("failed to append capability-decisions record: {e}");
                }
            }
            Err(e) => warn!("failed to serialize capability-decisions record: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_appended_as_one_line_each() {
        let dir = std::env::temp_dir().join(format!("mew-audit-test-{}", std::process::id()));
        let mut log = AuditLog::open(&dir, 1024 * 1024).unwrap();

        log.record_envelope(&EnvelopeHistoryRecord {
            event: "delivered",
            envelope: EnvelopeSummary {
                id: "e1",
                from: "alice",
                to: None,
                kind: "chat",
                correlation_id: None,
            },
            participants: &["bob".to_string()],
            ts: "2026-07-26T00:00:00Z".to_string(),
        });

        let contents = std::fs::read_to_string(dir.join("envelope-history.jsonl")).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"event\":\"delivered\""));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn envelope_history_record_json_shape_is_stable() {
        let record = EnvelopeHistoryRecord {
            event: "delivered",
            envelope: EnvelopeSummary {
                id: "e1",
                from: "alice",
                to: Some(&["bob".to_string()]),
                kind: "chat",
                correlation_id: None,
            },
            participants: &["bob".to_string()],
            ts: "2026-07-26T00:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&record).unwrap();
        insta::assert_snapshot!(json, @r#"{"event":"delivered","envelope":{"id":"e1","from":"alice","to":["bob"],"kind":"chat","correlation_id":null},"participants":["bob"],"ts":"2026-07-26T00:00:00Z"}"#);
    }

    #[test]
    fn capability_decision_record_json_shape_is_stable() {
        let record = CapabilityDecisionRecord {
            envelope_id: "e1",
            participant: "alice",
            result: "allowed",
            required_capability: None,
            matched_capability_id: Some("G1"),
            ts: "2026-07-26T00:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&record).unwrap();
        insta::assert_snapshot!(json, @r#"{"envelope_id":"e1","participant":"alice","result":"allowed","required_capability":null,"matched_capability_id":"G1","ts":"2026-07-26T00:00:00Z"}"#);
    }

    #[test]
    fn rotates_once_the_size_threshold_is_exceeded() {
        let dir = std::env::temp_dir().join(format!("mew-audit-rotate-test-{}", std::process::id()));
        let mut log = AuditLog::open(&dir, 10).unwrap();

        for i in 0..5 {
            log.record_envelope(&EnvelopeHistoryRecord {
                event: "delivered",
                envelope: EnvelopeSummary {
                    id: "e1",
                    from: "alice",
                    to: None,
                    kind: "chat",
                    correlation_id: None,
                },
                participants: &[],
                ts: format!("ts-{i}"),
            });
        }

        assert!(dir.join("envelope-history.1.jsonl").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
