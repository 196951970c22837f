// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - LEDGER PERSISTENCE
//
// sled-backed store for the latest ledger snapshot plus the undo journal.
//
// Keys:
//   ledger_snapshot        bincode(LedgerState) at the persisted tip
//   undo_<height:020>      bincode(BlockUndo)
//   latest_ledger_height   u64 LE, absent before the first block
//
// Snapshot, undo entry and tip height are written in one batch so a crash
// never leaves the journal and the snapshot out of step.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::LedgerError;
use crate::journal::BlockUndo;
use crate::state::LedgerState;

const SNAPSHOT_KEY: &[u8] = b"ledger_snapshot";
const LATEST_HEIGHT_KEY: &[u8] = b"latest_ledger_height";
const UNDO_PREFIX: &str = "undo_";

fn undo_key(height: u64) -> String {
    format!("{}{:020}", UNDO_PREFIX, height)
}

pub struct LedgerStore {
    db: sled::Db,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub latest_height: Option<u64>,
    pub undo_entries: usize,
    pub size_on_disk: u64,
}

impl LedgerStore {
    /// Open the store, retrying with backoff while another process still
    /// holds the database lock.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let path_ref = path.as_ref();
        let retry_delays_ms: [u64; 3] = [500, 1000, 2000];

        match sled::open(path_ref) {
            Ok(db) => return Ok(Self { db }),
            Err(e) if Self::is_lock_error(&e) => {
                log::warn!(
                    "Ledger DB lock held at {}, retrying ({} attempts remain)",
                    path_ref.display(),
                    retry_delays_ms.len()
                );
            }
            Err(e) => return Err(e.into()),
        }

        for (i, delay_ms) in retry_delays_ms.iter().enumerate() {
            std::thread::sleep(std::time::Duration::from_millis(*delay_ms));
            match sled::open(path_ref) {
                Ok(db) => {
                    log::info!("Ledger DB lock acquired on retry {}", i + 1);
                    return Ok(Self { db });
                }
                Err(e) if Self::is_lock_error(&e) && i + 1 < retry_delays_ms.len() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::Storage(
            "ledger DB lock acquisition timed out".to_string(),
        ))
    }

    fn is_lock_error(e: &sled::Error) -> bool {
        let msg = e.to_string();
        msg.contains("Resource temporarily unavailable")
            || msg.contains("WouldBlock")
            || msg.contains("lock")
            || msg.contains("EAGAIN")
    }

    fn put_snapshot(batch: &mut sled::Batch, state: &LedgerState) -> Result<(), LedgerError> {
        batch.insert(SNAPSHOT_KEY, bincode::serialize(state)?);
        match state.tip_height {
            Some(h) => batch.insert(LATEST_HEIGHT_KEY, &h.to_le_bytes()[..]),
            None => batch.remove(LATEST_HEIGHT_KEY),
        }
        Ok(())
    }

    /// Persist a connected block: new snapshot plus its undo entry.
    pub fn persist_connect(&self, state: &LedgerState, undo: &BlockUndo) -> Result<(), LedgerError> {
        let mut batch = sled::Batch::default();
        Self::put_snapshot(&mut batch, state)?;
        batch.insert(undo_key(undo.height).as_bytes(), bincode::serialize(undo)?);
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Persist a disconnected block: new snapshot, undo entry dropped.
    pub fn persist_disconnect(&self, state: &LedgerState, height: u64) -> Result<(), LedgerError> {
        let mut batch = sled::Batch::default();
        Self::put_snapshot(&mut batch, state)?;
        batch.remove(undo_key(height).as_bytes());
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Persist a whole reorg at once: undo entries of the dropped blocks go,
    /// those of the new branch come in, snapshot at the new tip.
    pub fn persist_reorg(
        &self,
        state: &LedgerState,
        dropped: &[u64],
        added: &[BlockUndo],
    ) -> Result<(), LedgerError> {
        let mut batch = sled::Batch::default();
        Self::put_snapshot(&mut batch, state)?;
        for height in dropped {
            batch.remove(undo_key(*height).as_bytes());
        }
        for undo in added {
            batch.insert(undo_key(undo.height).as_bytes(), bincode::serialize(undo)?);
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Replace everything with `state` and `undo`, used after a rebuild.
    pub fn persist_all(&self, state: &LedgerState, undo: &BTreeMap<u64, BlockUndo>) -> Result<(), LedgerError> {
        let mut batch = sled::Batch::default();
        for item in self.db.scan_prefix(UNDO_PREFIX.as_bytes()) {
            let (key, _) = item?;
            batch.remove(key);
        }
        Self::put_snapshot(&mut batch, state)?;
        for (height, entry) in undo {
            batch.insert(undo_key(*height).as_bytes(), bincode::serialize(entry)?);
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Last persisted state and its undo journal, `None` on a fresh store.
    pub fn load(&self) -> Result<Option<(LedgerState, BTreeMap<u64, BlockUndo>)>, LedgerError> {
        let bytes = match self.db.get(SNAPSHOT_KEY)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let state: LedgerState = bincode::deserialize(&bytes)?;

        let mut undo = BTreeMap::new();
        for item in self.db.scan_prefix(UNDO_PREFIX.as_bytes()) {
            let (_, value) = item?;
            let entry: BlockUndo = bincode::deserialize(&value)?;
            undo.insert(entry.height, entry);
        }
        Ok(Some((state, undo)))
    }

    pub fn latest_height(&self) -> Result<Option<u64>, LedgerError> {
        Ok(self.db.get(LATEST_HEIGHT_KEY)?.map(|bytes| {
            let arr: [u8; 8] = bytes.as_ref().try_into().unwrap_or([0u8; 8]);
            u64::from_le_bytes(arr)
        }))
    }

    /// Drop undo entries below `height`. Blocks under it can no longer be
    /// disconnected from the persisted journal.
    pub fn prune_undo_below(&self, height: u64) -> Result<usize, LedgerError> {
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for item in self.db.range(undo_key(0).as_bytes()..undo_key(height).as_bytes()) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StoreStats, LedgerError> {
        Ok(StoreStats {
            latest_height: self.latest_height()?,
            undo_entries: self.db.scan_prefix(UNDO_PREFIX.as_bytes()).count(),
            size_on_disk: self.db.size_on_disk()?,
        })
    }
}
