// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - TRANSACTION MEMPOOL
//
// Candidate transactions waiting for a block.
// - Fee-rate index for ordinary transactions, ties by admission order
// - Admission-order index, used for fee-exempt (free) transactions
// - Input conflict detection: one pending spend per outpoint
// - Automatic expiration
//
// The mempool does not validate; the node admits entries only after the
// ledger accepted them.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::time::{SystemTime, UNIX_EPOCH};

use skc_core::{Address, Amount, Block, OutPoint, StakingTxKind, Transaction};
use skc_ledger::ValidatedTx;

/// Maximum transactions in mempool
pub const MAX_MEMPOOL_SIZE: usize = 10_000;

/// Transaction expires after 24 hours
const TX_EXPIRATION_SECS: u64 = 86_400;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: String,
    pub vsize: u64,
    pub weight: u64,
    pub fee: Amount,
    /// Admitted through the free-transaction quota
    pub fee_exempt: bool,
    pub sender: Option<Address>,
    pub kind: StakingTxKind,
    /// Monotonic admission sequence number
    pub admitted_seq: u64,
    pub received_at: u64,
    pub fee_rate_millis: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: HashMap<String, MempoolEntry>,

    /// (fee rate descending, admission order) -> txid
    by_fee_rate: BTreeMap<(Reverse<u64>, u64), String>,

    /// admission seq -> txid
    by_admission: BTreeMap<u64, String>,

    by_sender: HashMap<Address, Vec<String>>,

    /// outpoint -> txid spending it
    spends: HashMap<OutPoint, String>,

    next_seq: u64,

    pub total_received: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_expired: u64,
    pub total_evicted: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ledger-validated transaction.
    /// Returns the entries evicted to make room.
    pub fn add_transaction(
        &mut self,
        tx: Transaction,
        vtx: &ValidatedTx,
        fee_exempt: bool,
    ) -> Result<Vec<MempoolEntry>, String> {
        self.total_received += 1;

        if self.entries.contains_key(&vtx.txid) {
            self.total_rejected += 1;
            return Err("txn-already-in-mempool".to_string());
        }
        if let Some(other) = self.conflicting_txid(&tx) {
            self.total_rejected += 1;
            return Err(format!("txn-mempool-conflict with {}", other));
        }

        let fee_rate_millis = vtx.fee_rate_millis();
        let mut evicted = Vec::new();
        if self.entries.len() >= MAX_MEMPOOL_SIZE {
            match self.lowest_fee_rate() {
                Some((rate, txid)) if rate < fee_rate_millis => {
                    if let Some(entry) = self.remove_transaction(&txid) {
                        self.total_evicted += 1;
                        evicted.push(entry);
                    }
                }
                _ => {
                    self.total_rejected += 1;
                    return Err("mempool full and fee rate too low".to_string());
                }
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = MempoolEntry {
            txid: vtx.txid.clone(),
            vsize: vtx.vsize,
            weight: tx.weight(),
            fee: vtx.fee,
            fee_exempt,
            sender: vtx.sender.clone(),
            kind: vtx.kind.clone(),
            admitted_seq: seq,
            received_at: now_secs(),
            fee_rate_millis,
            tx,
        };

        for input in &entry.tx.inputs {
            self.spends.insert(input.prevout.clone(), entry.txid.clone());
        }
        self.by_fee_rate
            .insert((Reverse(fee_rate_millis), seq), entry.txid.clone());
        self.by_admission.insert(seq, entry.txid.clone());
        if let Some(sender) = &entry.sender {
            self.by_sender
                .entry(sender.clone())
                .or_default()
                .push(entry.txid.clone());
        }
        self.entries.insert(entry.txid.clone(), entry);

        self.total_accepted += 1;
        Ok(evicted)
    }

    /// Txid of a pending transaction spending any input of `tx`
    pub fn conflicting_txid(&self, tx: &Transaction) -> Option<String> {
        tx.inputs
            .iter()
            .find_map(|input| self.spends.get(&input.prevout).cloned())
    }

    fn lowest_fee_rate(&self) -> Option<(u64, String)> {
        self.by_fee_rate
            .iter()
            .next_back()
            .map(|((Reverse(rate), _), txid)| (*rate, txid.clone()))
    }

    pub fn get_transaction(&self, txid: &str) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn remove_transaction(&mut self, txid: &str) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        self.by_fee_rate
            .remove(&(Reverse(entry.fee_rate_millis), entry.admitted_seq));
        self.by_admission.remove(&entry.admitted_seq);
        for input in &entry.tx.inputs {
            if self.spends.get(&input.prevout).map(String::as_str) == Some(txid) {
                self.spends.remove(&input.prevout);
            }
        }
        if let Some(sender) = &entry.sender {
            if let Some(txids) = self.by_sender.get_mut(sender) {
                txids.retain(|t| t != txid);
                if txids.is_empty() {
                    self.by_sender.remove(sender);
                }
            }
        }
        Some(entry)
    }

    /// Drop everything `block` confirmed or made unspendable.
    /// Returns the removed entries.
    pub fn remove_for_block(&mut self, block: &Block) -> Vec<MempoolEntry> {
        let mut removed = Vec::new();
        for tx in &block.transactions {
            if let Some(entry) = self.remove_transaction(&tx.txid()) {
                removed.push(entry);
            }
            if tx.is_coinbase() {
                continue;
            }
            for input in &tx.inputs {
                if let Some(other) = self.spends.get(&input.prevout).cloned() {
                    if let Some(entry) = self.remove_transaction(&other) {
                        removed.push(entry);
                    }
                }
            }
        }
        removed
    }

    /// Ordinary candidates, best fee rate first
    pub fn iter_by_fee_rate(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_fee_rate
            .values()
            .filter_map(|txid| self.entries.get(txid))
    }

    /// All entries in admission order
    pub fn iter_by_admission(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.by_admission
            .values()
            .filter_map(|txid| self.entries.get(txid))
    }

    pub fn get_transactions_by_sender(&self, address: &str) -> Vec<String> {
        self.by_sender.get(address).cloned().unwrap_or_default()
    }

    /// Remove entries older than 24 hours as of `now`
    pub fn remove_expired(&mut self, now: u64) -> Vec<MempoolEntry> {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| now.saturating_sub(e.received_at) > TX_EXPIRATION_SECS)
            .map(|e| e.txid.clone())
            .collect();

        let removed: Vec<MempoolEntry> = expired
            .iter()
            .filter_map(|txid| self.remove_transaction(txid))
            .collect();
        self.total_expired += removed.len() as u64;
        removed
    }

    pub fn stats(&self) -> MempoolStats {
        let free: Vec<&MempoolEntry> = self.entries.values().filter(|e| e.fee_exempt).collect();
        MempoolStats {
            size: self.entries.len(),
            free_txs: free.len(),
            free_bytes: free.iter().map(|e| e.vsize).sum(),
            total_received: self.total_received,
            total_accepted: self.total_accepted,
            total_rejected: self.total_rejected,
            total_expired: self.total_expired,
            total_evicted: self.total_evicted,
            unique_senders: self.by_sender.len(),
        }
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, returned in admission order
    pub fn drain(&mut self) -> Vec<MempoolEntry> {
        let order: Vec<String> = self.by_admission.values().cloned().collect();
        order
            .iter()
            .filter_map(|txid| self.remove_transaction(txid))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MempoolStats {
    pub size: usize,
    pub free_txs: usize,
    pub free_bytes: u64,
    pub total_received: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_expired: u64,
    pub total_evicted: u64,
    pub unique_senders: usize,
}
