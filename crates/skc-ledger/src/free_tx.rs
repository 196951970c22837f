// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - FREE TRANSACTION QUOTA TRACKER
//
// Addresses with an active stake may submit fee-exempt transactions up to a
// byte quota derived from the staked amount.
//
// - Mempool usage: sizes of admitted, unconfirmed free txs
// - Blockchain usage: sizes confirmed inside the current day window
// - Window: opened by the first confirmation while no window is open,
//   closed once the tip passes its end height
//
// Nothing here is stored independently: both usages are recomputed from
// the confirmed history on the best chain and the mempool entries.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use skc_core::params::FreeTxRules;
use skc_core::Address;

use crate::error::{FreeTxStage, RejectReason};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FreeTxEntry {
    pub txid: String,
    pub size: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MempoolFreeTx {
    pub address: Address,
    pub size: u64,
}

/// Usage window as seen at a given height
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaWindow {
    /// Last height (inclusive) of the open window; 0 when none is open
    pub end_height: u64,
    pub used: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FreeTxInfo {
    pub limit: u64,
    pub used_mempool_limit: u64,
    pub used_blockchain_limit: u64,
    pub day_window_end_height: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeTxQuotaTracker {
    /// address -> confirm height -> confirmed free txs
    confirmed: BTreeMap<Address, BTreeMap<u64, Vec<FreeTxEntry>>>,
    /// txid -> admitted free tx
    mempool: BTreeMap<String, MempoolFreeTx>,
}

impl FreeTxQuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Window state at `height`, derived from confirmations at or below it
    pub fn window_at(&self, address: &str, height: u64, rules: &FreeTxRules) -> QuotaWindow {
        let history = match self.confirmed.get(address) {
            Some(h) => h,
            None => return QuotaWindow::default(),
        };

        let mut window = QuotaWindow::default();
        for (confirm_height, entries) in history.range(..=height) {
            if window.end_height == 0 || *confirm_height > window.end_height {
                window.end_height = rules.window_end(*confirm_height);
                window.used = 0;
            }
            window.used = entries
                .iter()
                .fold(window.used, |acc, e| acc.saturating_add(e.size));
        }

        if window.end_height == 0 || height > window.end_height {
            QuotaWindow::default()
        } else {
            window
        }
    }

    pub fn mempool_used(&self, address: &str) -> u64 {
        self.mempool
            .values()
            .filter(|m| m.address == address)
            .fold(0u64, |acc, m| acc.saturating_add(m.size))
    }

    pub fn info(&self, address: &str, height: u64, limit: u64, rules: &FreeTxRules) -> FreeTxInfo {
        let window = self.window_at(address, height, rules);
        FreeTxInfo {
            limit,
            used_mempool_limit: self.mempool_used(address),
            used_blockchain_limit: window.used,
            day_window_end_height: window.end_height,
        }
    }

    /// Admission check. `height` is the current tip; the tx is charged to
    /// the mempool side on success.
    pub fn admit(
        &mut self,
        address: &str,
        txid: &str,
        size: u64,
        height: u64,
        limit: u64,
        rules: &FreeTxRules,
    ) -> Result<(), RejectReason> {
        let stage = FreeTxStage::Mempool;
        if self.mempool.contains_key(txid) {
            return Err(RejectReason::FreeTxDuplicate { stage });
        }
        if limit == 0 {
            return Err(RejectReason::FreeTxNoStake {
                stage,
                address: address.to_string(),
            });
        }
        let used = self
            .mempool_used(address)
            .saturating_add(self.window_at(address, height, rules).used);
        if used.saturating_add(size) > limit {
            return Err(RejectReason::FreeTxOverQuota {
                stage,
                address: address.to_string(),
                used,
                size,
                limit,
            });
        }
        self.mempool.insert(
            txid.to_string(),
            MempoolFreeTx {
                address: address.to_string(),
                size,
            },
        );
        Ok(())
    }

    /// Block-side check against the confirmed window only
    pub fn check_block_quota(
        &self,
        address: &str,
        size: u64,
        height: u64,
        limit: u64,
        rules: &FreeTxRules,
    ) -> Result<(), RejectReason> {
        let stage = FreeTxStage::Block;
        if limit == 0 {
            return Err(RejectReason::FreeTxNoStake {
                stage,
                address: address.to_string(),
            });
        }
        let used = self.window_at(address, height, rules).used;
        if used.saturating_add(size) > limit {
            return Err(RejectReason::FreeTxOverQuota {
                stage,
                address: address.to_string(),
                used,
                size,
                limit,
            });
        }
        Ok(())
    }

    /// Record a confirmation. The mempool charge, if any, is released.
    pub fn confirm(&mut self, address: &str, txid: &str, size: u64, height: u64) {
        self.mempool.remove(txid);
        self.confirmed
            .entry(address.to_string())
            .or_default()
            .entry(height)
            .or_default()
            .push(FreeTxEntry {
                txid: txid.to_string(),
                size,
            });
    }

    /// Undo of `confirm`
    pub fn unconfirm(&mut self, address: &str, txid: &str, height: u64) {
        let mut drop_address = false;
        if let Some(history) = self.confirmed.get_mut(address) {
            if let Some(entries) = history.get_mut(&height) {
                entries.retain(|e| e.txid != txid);
                if entries.is_empty() {
                    history.remove(&height);
                }
            }
            drop_address = history.is_empty();
        }
        if drop_address {
            self.confirmed.remove(address);
        }
    }

    pub fn release(&mut self, txid: &str) -> Option<MempoolFreeTx> {
        self.mempool.remove(txid)
    }

    pub fn clear_mempool(&mut self) {
        self.mempool.clear();
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.len()
    }

    pub fn mempool_bytes(&self) -> u64 {
        self.mempool
            .values()
            .fold(0u64, |acc, m| acc.saturating_add(m.size))
    }

    /// Confirmed history only; mempool charges are node-local
    pub fn confirmed_history(&self) -> &BTreeMap<Address, BTreeMap<u64, Vec<FreeTxEntry>>> {
        &self.confirmed
    }
}
