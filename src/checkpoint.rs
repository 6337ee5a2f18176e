//! # Checkpoint & Dead-Letter Persistence
//!
//! Resume state is a sorted map `entity -> {lastBatch, dedupedRemapIds[]}`
//! — state kept on disk, rewritten atomically on every checkpoint event.
//! Validation failures divert to an append-only per-entity dead-letter file.
//! Both reuse the same write-temp-then-rename discipline; the checkpoint
//! file additionally carries a SHA-256 envelope and keeps 3 prior
//! generations so a crash mid-write never loses the last good state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Number of backup generations to keep.
const GENERATIONS: usize = 3;

/// Resume state for one entity: the number of batches fully applied so far
/// (also the index of the next batch to process on resume), and the
/// deduped `sourceId -> targetId` pairs written for it so far (threaded into
/// the next run's id-remap table so dependents resolve correctly without
/// re-reading already-imported rows).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityProgress {
    pub last_batch: usize,
    pub remap: Vec<(Uuid, Uuid)>,
    pub completed: bool,
}

/// The full checkpoint: one `EntityProgress` per entity touched so far.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckpointState {
    pub entities: BTreeMap<String, EntityProgress>,
}

impl CheckpointState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_completed(&self, entity: &str) -> bool {
        self.entities.get(entity).map(|p| p.completed).unwrap_or(false)
    }

    pub fn progress_of(&self, entity: &str) -> Option<&EntityProgress> {
        self.entities.get(entity)
    }

    pub fn record_batch(&mut self, entity: &str, batch_index: usize, remap_delta: &[(Uuid, Uuid)]) {
        let entry = self.entities.entry(entity.to_string()).or_default();
        entry.last_batch = batch_index;
        for pair in remap_delta {
            if !entry.remap.contains(pair) {
                entry.remap.push(*pair);
            }
        }
    }

    pub fn mark_completed(&mut self, entity: &str) {
        self.entities.entry(entity.to_string()).or_default().completed = true;
    }
}

/// Wrapper that includes a SHA-256 checksum for integrity verification.
#[derive(Serialize, Deserialize)]
struct CheckpointEnvelope {
    checksum: String,
    data: serde_json::Value,
}

fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Return the path for generation `gen` (0 = current, 1 = .1, 2 = .2, ...).
fn generation_path(base: &Path, gen: usize) -> PathBuf {
    if gen == 0 {
        base.to_path_buf()
    } else {
        let mut p = base.as_os_str().to_os_string();
        p.push(format!(".{}", gen));
        PathBuf::from(p)
    }
}

/// Save the checkpoint with integrity checksum and rotating generations.
/// Rotation: current -> .1 -> .2 (oldest .2 discarded); the new checkpoint
/// is written atomically via a `.tmp` file.
pub fn save(path: &Path, state: &CheckpointState) -> Result<()> {
    for gen in (1..GENERATIONS).rev() {
        let src = generation_path(path, gen - 1);
        let dst = generation_path(path, gen);
        if src.exists() {
            let _ = fs::rename(&src, &dst);
        }
    }

    let data = serde_json::to_value(state)?;
    let data_str = serde_json::to_string_pretty(&data)?;
    let checksum = sha256_hex(&data_str);

    let envelope = CheckpointEnvelope { checksum, data };
    let json = serde_json::to_string_pretty(&envelope)?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)?;

    Ok(())
}

/// Load the newest valid checkpoint, falling back to older generations on
/// corruption. Returns `None` if no generation loads (first run).
pub fn load(path: &Path) -> Option<CheckpointState> {
    for gen in 0..GENERATIONS {
        let p = generation_path(path, gen);
        if let Some(state) = load_single(&p) {
            if gen > 0 {
                tracing::warn!(generation = gen, path = %p.display(), "recovered checkpoint from older generation");
            }
            return Some(state);
        }
    }
    None
}

fn load_single(path: &Path) -> Option<CheckpointState> {
    let raw = fs::read_to_string(path).ok()?;
    let envelope: CheckpointEnvelope = serde_json::from_str(&raw).ok()?;

    let data_str = serde_json::to_string_pretty(&envelope.data).ok()?;
    let expected = sha256_hex(&data_str);
    if expected != envelope.checksum {
        tracing::warn!(path = %path.display(), "checkpoint integrity check failed, skipping generation");
        return None;
    }

    serde_json::from_value(envelope.data).ok()
}

/// Delete all checkpoint generations. Called once every tier succeeds and
/// side effects are re-enabled.
pub fn clear(path: &Path) {
    for gen in 0..GENERATIONS {
        let _ = fs::remove_file(generation_path(path, gen));
    }
    let _ = fs::remove_file(path.with_extension("tmp"));
}

/// One dead-lettered record: the natural unit of the importer's
/// `ValidationFailed` diversion path.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub record_id: String,
    pub error_code: String,
    pub message: String,
    pub attempted_at: DateTime<Utc>,
}

/// Append one record to the entity's dead-letter file (newline-delimited
/// JSON), rewriting the file via a temp copy + rename so a crash mid-append
/// never leaves a half-written line.
pub fn append_dead_letter(path: &Path, record: &DeadLetterRecord) -> Result<()> {
    let mut contents = fs::read_to_string(path).unwrap_or_default();
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&serde_json::to_string(record)?);
    contents.push('\n');

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read every record from a dead-letter file, in append order. Returns an
/// empty vec if the file doesn't exist yet.
pub fn read_dead_letters(path: &Path) -> Result<Vec<DeadLetterRecord>> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return Ok(Vec::new()),
    };
    data.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| Ok(serde_json::from_str(l)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut state = CheckpointState::new();
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        state.record_batch("account", 3, &[(id_a, id_b)]);
        save(&path, &state).unwrap();

        let loaded = load(&path).unwrap();
        let progress = loaded.progress_of("account").unwrap();
        assert_eq!(progress.last_batch, 3);
        assert_eq!(progress.remap, vec![(id_a, id_b)]);
        assert!(!progress.completed);
    }

    #[test]
    fn rotation_keeps_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        for n in 1..=3usize {
            let mut state = CheckpointState::new();
            state.record_batch("account", n, &[]);
            save(&path, &state).unwrap();
        }

        assert!(path.exists());
        assert!(generation_path(&path, 1).exists());
        assert!(generation_path(&path, 2).exists());

        let current = load_single(&path).unwrap();
        assert_eq!(current.progress_of("account").unwrap().last_batch, 3);
        let gen1 = load_single(&generation_path(&path, 1)).unwrap();
        assert_eq!(gen1.progress_of("account").unwrap().last_batch, 2);
    }

    #[test]
    fn fallback_on_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let mut first = CheckpointState::new();
        first.record_batch("account", 1, &[]);
        save(&path, &first).unwrap();
        let mut second = CheckpointState::new();
        second.record_batch("account", 2, &[]);
        save(&path, &second).unwrap();

        fs::write(&path, b"corrupted data!!!").unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.progress_of("account").unwrap().last_batch, 1);
    }

    #[test]
    fn checksum_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");

        let mut state = CheckpointState::new();
        state.record_batch("account", 1, &[]);
        save(&path, &state).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let tampered = raw.replace("\"last_batch\":1", "\"last_batch\":99");
        fs::write(&path, &tampered).unwrap();

        assert!(load_single(&path).is_none());
    }

    #[test]
    fn clear_removes_all_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        for n in 0..4usize {
            let mut state = CheckpointState::new();
            state.record_batch("account", n, &[]);
            save(&path, &state).unwrap();
        }

        clear(&path);
        assert!(!path.exists());
        assert!(!generation_path(&path, 1).exists());
        assert!(!generation_path(&path, 2).exists());
    }

    #[test]
    fn completed_entities_are_skipped_on_resume() {
        let mut state = CheckpointState::new();
        state.record_batch("account", 7, &[]);
        state.mark_completed("account");
        assert!(state.is_completed("account"));
        assert!(!state.is_completed("contact"));
    }

    #[test]
    fn dead_letter_appends_are_order_preserving() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contact.dlq.ndjson");

        let record_a = DeadLetterRecord {
            record_id: Uuid::new_v4().to_string(),
            error_code: "ValidationFailed".into(),
            message: "missing required field".into(),
            attempted_at: Utc::now(),
        };
        let record_b = DeadLetterRecord {
            record_id: Uuid::new_v4().to_string(),
            error_code: "ValidationFailed".into(),
            message: "duplicate natural key".into(),
            attempted_at: Utc::now(),
        };
        append_dead_letter(&path, &record_a).unwrap();
        append_dead_letter(&path, &record_b).unwrap();

        let records = read_dead_letters(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_id, record_a.record_id);
        assert_eq!(records[1].record_id, record_b.record_id);
    }

    #[test]
    fn dead_letter_read_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.ndjson");
        assert!(read_dead_letters(&path).unwrap().is_empty());
    }
}
