// Session export - telemetry events as JSON Lines on disk
//
// JSON Lines (JSONL) writes one JSON object per line, making it easy to:
// - Stream process large files
// - Grep/search with standard tools
// - Parse with jq or other JSON tools
//
// Each session gets its own file: rspy-YYYYMMDD-HHMMSS-XXXX.jsonl
// Example: jq 'select(.type == "network")' sessions/rspy-20260806-101500-a7b3.jsonl
//
// Monitors tee events into a bounded channel; this writer drains it in its
// own task. A full channel drops events (export is best-effort and must
// never stall an intercepted call), and a failed write logs and moves on.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;

use crate::events::TelemetryEvent;

/// Generate a unique session id for file naming.
/// Format: YYYYMMDD-HHMMSS-XXXX (timestamp + 4 random hex chars)
pub fn generate_session_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
    // RandomState gives a random value without adding a dependency.
    let random = RandomState::new().build_hasher().finish();
    let short_hash = format!("{:04x}", random & 0xFFFF);

    format!("{}-{}", timestamp, short_hash)
}

/// Writes telemetry events to a session JSONL file.
pub struct SessionWriter {
    dir: PathBuf,
    session_id: String,
    event_rx: mpsc::Receiver<TelemetryEvent>,
}

impl SessionWriter {
    /// Create a writer plus the sender half the monitors tee into.
    pub fn new(
        dir: PathBuf,
        session_id: String,
        buffer: usize,
    ) -> Result<(Self, mpsc::Sender<TelemetryEvent>)> {
        std::fs::create_dir_all(&dir).context("Failed to create session export directory")?;
        let (tx, event_rx) = mpsc::channel(buffer.max(1));
        Ok((
            Self {
                dir,
                session_id,
                event_rx,
            },
            tx,
        ))
    }

    /// Path of this session's file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("rspy-{}.jsonl", self.session_id))
    }

    /// Drain the channel until every sender is gone.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("session export started: {:?}", self.path());

        while let Some(event) = self.event_rx.recv().await {
            if let Err(e) = self.write_event(&event) {
                tracing::error!("Failed to write telemetry event: {:?}", e);
                // Keep draining even if one write fails.
            }
        }

        tracing::info!("session export shutting down");
        Ok(())
    }

    fn write_event(&self, event: &TelemetryEvent) -> Result<()> {
        let path = self.path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open session file")?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        writeln!(file, "{}", json).context("Failed to write to session file")?;

        // Flush immediately so the file is useful even if the host dies.
        file.flush().context("Failed to flush session file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ConsoleEntry, DomChange};
    use crate::host::{ConsoleLevel, MutationKind};

    fn console_event(text: &str) -> TelemetryEvent {
        TelemetryEvent::Console(ConsoleEntry {
            id: crate::events::generate_id(),
            timestamp: Utc::now(),
            level: ConsoleLevel::Log,
            formatted: text.to_string(),
            args: vec![serde_json::json!(text)],
            call_site: None,
        })
    }

    #[tokio::test]
    async fn test_events_written_one_per_line() {
        let dir = std::env::temp_dir().join(format!("rspy-test-{}", generate_session_id()));
        let (writer, tx) = SessionWriter::new(dir.clone(), "unit".into(), 16).unwrap();
        let path = writer.path();

        let handle = tokio::spawn(writer.run());
        tx.send(console_event("first")).await.unwrap();
        tx.send(TelemetryEvent::Dom(DomChange {
            id: crate::events::generate_id(),
            timestamp: Utc::now(),
            kind: MutationKind::ChildList,
            target_path: "#root > ul".into(),
            attribute: None,
            old_value: None,
            new_value: None,
            added: vec!["li".into()],
            removed: vec![],
        }))
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "console");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["type"], "dom");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        // YYYYMMDD-HHMMSS-XXXX
        let parts: Vec<_> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 4);
    }
}
