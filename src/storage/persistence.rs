//! Write-ahead logging and snapshot persistence for simvault stores

use crate::core::{DbError, Result};
use crate::storage::state::StoreState;
use crate::transaction::Change;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const WAL_FILE: &str = "simvault.wal";
const SNAPSHOT_FILE: &str = "simvault.snapshot";
const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// Write-ahead log entry. Only committed transactions are logged, so replay
/// never has to skip aborted work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    Commit { txn_id: u64, changes: Vec<Change> },
}

impl WalEntry {
    pub fn change_count(&self) -> usize {
        match self {
            WalEntry::Commit { changes, .. } => changes.len(),
        }
    }
}

// ============================================================================
// Database Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSnapshot {
    pub version: u32,
    pub state: StoreState,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub run_count: usize,
    pub table_count: usize,
    pub row_count: usize,
}

impl DatabaseSnapshot {
    pub fn new(state: StoreState) -> Self {
        let run_count = state.runs().count();
        let table_count = state.tables().count();
        let row_count = state.tables().map(|t| t.row_count()).sum();
        Self {
            version: SNAPSHOT_VERSION,
            state,
            metadata: SnapshotMetadata {
                created_at: chrono::Utc::now(),
                run_count,
                table_count,
                row_count,
            },
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every commit
    Sync,
    /// flush to the OS after every commit
    #[default]
    Async,
    /// no files at all
    None,
}

impl std::str::FromStr for DurabilityMode {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(DurabilityMode::Sync),
            "async" => Ok(DurabilityMode::Async),
            "none" | "memory" => Ok(DurabilityMode::None),
            other => Err(DbError::InvalidArgument(format!("Unknown durability mode '{}'", other))),
        }
    }
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DbError::IoError(format!("Failed to create WAL directory: {}", e)))?;
        }

        let wal_file = if durability_mode != DurabilityMode::None {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&wal_path)
                .map_err(|e| DbError::IoError(format!("Failed to open WAL file: {}", e)))?;
            Some(BufWriter::new(file))
        } else {
            None
        };

        Ok(Self {
            wal_path,
            wal_file,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| DbError::ExecutionError("WAL file not initialized".to_string()))?;
        let serialized = rmp_serde::to_vec(entry)
            .map_err(|e| DbError::Serialization(format!("Failed to serialize WAL entry: {}", e)))?;
        let len = serialized.len() as u32;
        file.write_all(&len.to_le_bytes())
            .map_err(|e| DbError::IoError(format!("Failed to write WAL: {}", e)))?;
        file.write_all(&serialized)
            .map_err(|e| DbError::IoError(format!("Failed to write WAL: {}", e)))?;
        file.flush()
            .map_err(|e| DbError::IoError(format!("Failed to flush WAL: {}", e)))?;
        if self.durability_mode == DurabilityMode::Sync {
            file.get_mut()
                .sync_all()
                .map_err(|e| DbError::IoError(format!("Failed to sync WAL: {}", e)))?;
        }
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    /// Read every complete entry. A torn tail left by a crash mid-append is
    /// dropped: the commit it belonged to was never acknowledged.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.wal_path)
            .map_err(|e| DbError::IoError(format!("Failed to open WAL for reading: {}", e)))?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(DbError::IoError(format!("Failed to read WAL entry length: {}", e)));
                }
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::warn!(
                        "WAL {} ends with a torn entry ({} bytes expected), ignoring it",
                        self.wal_path.display(),
                        len
                    );
                    break;
                }
                Err(e) => {
                    return Err(DbError::IoError(format!("Failed to read WAL entry data: {}", e)));
                }
            }
            let entry: WalEntry = rmp_serde::from_slice(&data)
                .map_err(|e| DbError::Serialization(format!("Failed to deserialize WAL entry: {}", e)))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| DbError::IoError(format!("Failed to truncate WAL: {}", e)))?;
        self.wal_file = Some(BufWriter::new(file));
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Write to a temp file in the same directory, then rename over the old
    /// snapshot so readers only ever see a complete file.
    pub fn save(&self, snapshot: &DatabaseSnapshot) -> Result<()> {
        let dir = self
            .snapshot_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir)
            .map_err(|e| DbError::IoError(format!("Failed to create snapshot directory: {}", e)))?;

        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| DbError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;
        let mut temp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| DbError::IoError(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&serialized)
            .map_err(|e| DbError::IoError(format!("Failed to write snapshot: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| DbError::IoError(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| DbError::IoError(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<DatabaseSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| DbError::IoError(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| DbError::IoError(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: DatabaseSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| DbError::Serialization(format!("Failed to deserialize snapshot: {}", e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DbError::Malformed(format!(
                "snapshot version {} is not supported",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(&mut self, state: &StoreState) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.snapshot.save(&DatabaseSnapshot::new(state.clone()))?;
        self.wal.clear()?;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Load the snapshot and replay committed change lists on top of it.
    /// Returns `None` for a brand new data directory.
    pub fn recover(&self) -> Result<Option<StoreState>> {
        let snapshot = self.snapshot.load()?;
        let wal_entries = self.wal.read_all()?;
        if snapshot.is_none() && wal_entries.is_empty() {
            return Ok(None);
        }

        let mut state = snapshot.map(|s| s.state).unwrap_or_default();
        for entry in wal_entries {
            match entry {
                WalEntry::Commit { txn_id, changes } => {
                    // Replay a whole commit or nothing of it.
                    let mut next = state.clone();
                    for change in &changes {
                        change.apply(&mut next).map_err(|e| {
                            DbError::Integrity(format!(
                                "WAL replay of txn_{} failed: {}",
                                txn_id, e
                            ))
                        })?;
                    }
                    state = next;
                }
            }
        }
        Ok(Some(state))
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}
