// log.rs — Append-only JSONL audit log.
//
// One JSON object per line. Each record's `previous_hash` is the SHA-256 of
// the raw preceding line, forming a hash chain: inserting, deleting, or
// editing a line breaks the chain at that point.
//
// Appends take an advisory lock on the log file, so several processes can
// share one log. A writer that finds the file longer than it left it
// re-reads the chain head before linking. A failed write is truncated away,
// and a torn last line left by a crash is dropped on the next open.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::hasher;
use crate::lock::{lock_exclusive, unlock};

/// An append-only audit log backed by a JSONL file.
pub struct AuditLog {
    file: File,
    path: PathBuf,
    /// File length after our last write.
    len: u64,
    /// Hash of the last line written; becomes the next record's `previous_hash`.
    last_hash: Option<String>,
}

impl AuditLog {
    /// Open (or create) an audit log, recovering the chain head from any
    /// existing content so new records link correctly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        lock_exclusive(&file).map_err(|source| AuditError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let recovered = repair_tail(&mut file, &path).and_then(|()| {
            let len = file.metadata()?.len();
            Ok((len, last_line_hash(&path)?))
        });
        release(&file, &path);
        let (len, last_hash) = recovered?;
        tracing::debug!(path = %path.display(), resumed = last_hash.is_some(), "opened audit log");

        Ok(Self {
            file,
            path,
            len,
            last_hash,
        })
    }

    /// Link `event` to the chain and append it. Synced before returning.
    pub fn append(&mut self, event: &mut AuditEvent) -> Result<(), AuditError> {
        lock_exclusive(&self.file)?;
        let result = self.append_locked(event);
        release(&self.file, &self.path);
        result
    }

    fn append_locked(&mut self, event: &mut AuditEvent) -> Result<(), AuditError> {
        let start = self.file.metadata()?.len();
        if start != self.len {
            // Another writer appended since our last record.
            self.last_hash = last_line_hash(&self.path)?;
        }

        event.previous_hash = self.last_hash.clone();
        let json = serde_json::to_string(event)?;
        let line = format!("{}\n", json);
        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            // Never leave a torn line for the next record to follow.
            if let Err(truncate) = self.file.set_len(start) {
                tracing::error!(path = %self.path.display(), error = %truncate, "failed to truncate partial audit record");
            }
            return Err(e.into());
        }

        // Only advance the head once the line is durable.
        self.len = start + line.len() as u64;
        self.last_hash = Some(hasher::hash_str(&json));
        Ok(())
    }

    /// All records, oldest first. Blank lines are skipped.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<AuditEvent>, AuditError> {
        read_lines(path.as_ref())?
            .iter()
            .map(|line| serde_json::from_str(line).map_err(AuditError::from))
            .collect()
    }

    /// The last `n` records, oldest first.
    pub fn tail(path: impl AsRef<Path>, n: usize) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events = Self::read_all(path)?;
        let skip = events.len().saturating_sub(n);
        Ok(events.split_off(skip))
    }

    /// Verify the hash chain. Returns the number of records checked, or an
    /// `IntegrityViolation` naming the first broken line.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        let file = File::open(path.as_ref()).map_err(|source| AuditError::OpenFailed {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        let mut previous_hash: Option<String> = None;
        let mut checked = 0;

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent = serde_json::from_str(&line)?;
            if event.previous_hash != previous_hash {
                tracing::warn!(line = line_num + 1, "audit hash chain broken");
                return Err(AuditError::IntegrityViolation {
                    line: line_num + 1,
                    expected: previous_hash.unwrap_or_else(|| "None".to_string()),
                    actual: event.previous_hash.unwrap_or_else(|| "None".to_string()),
                });
            }
            // Hash the raw line: re-serializing could reorder fields.
            previous_hash = Some(hasher::hash_str(&line));
            checked += 1;
        }
        Ok(checked)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn last_line_hash(path: &Path) -> Result<Option<String>, AuditError> {
    Ok(read_lines(path)?
        .into_iter()
        .last()
        .map(|line| hasher::hash_str(&line)))
}

/// Make the file end on a record boundary. An unterminated last line that
/// parses is completed with a newline; anything else is cut off.
fn repair_tail(file: &mut File, path: &Path) -> Result<(), AuditError> {
    let content = std::fs::read(path).map_err(|source| AuditError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let boundary = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    let tail = &content[boundary..];
    if tail.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    if serde_json::from_slice::<AuditEvent>(tail).is_ok() {
        file.write_all(b"\n")?;
    } else {
        tracing::warn!(path = %path.display(), bytes = tail.len(), "dropping torn audit record");
        file.set_len(boundary as u64)?;
    }
    file.sync_data()?;
    Ok(())
}

fn release(file: &File, path: &Path) {
    if let Err(e) = unlock(file) {
        tracing::warn!(path = %path.display(), error = %e, "failed to unlock audit log");
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, AuditError> {
    let file = File::open(path).map_err(|source| AuditError::OpenFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditKind;
    use tempfile::tempdir;

    fn decision(agent: &str, decision: &str) -> AuditEvent {
        AuditEvent::new(agent, AuditKind::Authorization)
            .with_action("purchase")
            .with_decision(decision, "test")
    }

    #[test]
    fn append_and_read_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(&mut decision("a1", "ALLOWED")).unwrap();
            log.append(&mut AuditEvent::new("a1", AuditKind::ConsentApproved)).unwrap();
        }

        let events = AuditLog::read_all(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].decision.as_deref(), Some("ALLOWED"));
        assert!(events[0].previous_hash.is_none());
        assert_eq!(events[1].kind, AuditKind::ConsentApproved);
        assert!(events[1].previous_hash.is_some());
    }

    #[test]
    fn chain_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        for i in 0..3 {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(&mut decision(&format!("a{}", i), "DENIED")).unwrap();
        }
        assert_eq!(AuditLog::verify_chain(&path).unwrap(), 3);
    }

    #[test]
    fn edited_line_breaks_the_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::open(&path).unwrap();
            for _ in 0..3 {
                log.append(&mut decision("a1", "DENIED")).unwrap();
            }
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("DENIED", "ALLOWED", 1);
        std::fs::write(&path, tampered).unwrap();

        match AuditLog::verify_chain(&path) {
            Err(AuditError::IntegrityViolation { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected IntegrityViolation, got {:?}", other),
        }
    }

    #[test]
    fn deleted_line_breaks_the_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::open(&path).unwrap();
            for _ in 0..3 {
                log.append(&mut decision("a1", "ALLOWED")).unwrap();
            }
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        std::fs::write(&path, kept.join("\n")).unwrap();

        assert!(matches!(
            AuditLog::verify_chain(&path),
            Err(AuditError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn torn_last_line_is_dropped_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(&mut decision("a1", "ALLOWED")).unwrap();
            log.append(&mut decision("a1", "DENIED")).unwrap();
        }
        // A crash mid-write leaves half a record behind.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"event_id":"3f2a","agent_id":"a1","ki"#).unwrap();
        drop(file);

        let mut log = AuditLog::open(&path).unwrap();
        log.append(&mut decision("a2", "ALLOWED")).unwrap();

        assert_eq!(AuditLog::verify_chain(&path).unwrap(), 3);
        let agents: Vec<String> = AuditLog::read_all(&path)
            .unwrap()
            .into_iter()
            .map(|e| e.agent_id)
            .collect();
        assert_eq!(agents, vec!["a1", "a1", "a2"]);
    }

    #[test]
    fn unterminated_complete_line_is_kept() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::open(&path).unwrap();
            log.append(&mut decision("a1", "ALLOWED")).unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.trim_end()).unwrap();

        let mut log = AuditLog::open(&path).unwrap();
        log.append(&mut decision("a2", "DENIED")).unwrap();
        assert_eq!(AuditLog::verify_chain(&path).unwrap(), 2);
    }

    #[test]
    fn two_handles_share_one_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut first = AuditLog::open(&path).unwrap();
        let mut second = AuditLog::open(&path).unwrap();

        first.append(&mut decision("a1", "ALLOWED")).unwrap();
        second.append(&mut decision("a2", "DENIED")).unwrap();
        first.append(&mut decision("a1", "PENDING")).unwrap();

        assert_eq!(AuditLog::verify_chain(&path).unwrap(), 3);
    }

    #[test]
    fn tail_returns_most_recent_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::open(&path).unwrap();
            for i in 0..5 {
                log.append(&mut decision(&format!("a{}", i), "ALLOWED")).unwrap();
            }
        }
        let tail = AuditLog::tail(&path, 2).unwrap();
        let agents: Vec<&str> = tail.iter().map(|e| e.agent_id.as_str()).collect();
        assert_eq!(agents, vec!["a3", "a4"]);
        assert_eq!(AuditLog::tail(&path, 50).unwrap().len(), 5);
    }
}
