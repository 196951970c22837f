// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - BLOCK ASSEMBLY POLICY
//
// Chooses which mempool entries go into a block template.
// 1. Free transactions, in admission order, up to a reserved share of the
//    weight budget (or a fixed cap when configured)
// 2. Everything else by fee rate until the budget is used up
//
// Free transactions that do not fit stay in the mempool for a later block.
// This is local policy, not consensus.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};

use skc_core::config::BlockAssemblyConfig;
use skc_core::{Amount, BPS_DENOMINATOR};

use crate::mempool::{Mempool, MempoolEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAssemblyPolicy {
    pub block_max_weight: u64,
    pub free_tx_share_bps: u64,
    pub free_tx_weight_cap: Option<u64>,
}

impl Default for BlockAssemblyPolicy {
    fn default() -> Self {
        Self::from_config(&BlockAssemblyConfig::default())
    }
}

/// Entries picked for one block, in block order
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub entries: Vec<MempoolEntry>,
    pub weight: u64,
    pub fees: Amount,
    pub free_weight: u64,
    pub free_count: usize,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl BlockAssemblyPolicy {
    pub fn from_config(config: &BlockAssemblyConfig) -> Self {
        Self {
            block_max_weight: config.block_max_weight,
            free_tx_share_bps: config.free_tx_share_bps,
            free_tx_weight_cap: config.free_tx_weight_cap,
        }
    }

    /// Weight reserved for free transactions out of `weight_budget`
    pub fn free_weight_budget(&self, weight_budget: u64) -> u64 {
        let reserved = match self.free_tx_weight_cap {
            Some(cap) => cap,
            None => {
                (weight_budget as u128 * self.free_tx_share_bps as u128 / BPS_DENOMINATOR as u128)
                    as u64
            }
        };
        reserved.min(weight_budget)
    }

    /// Pick entries for a block with `weight_budget` left for transactions.
    ///
    /// `accept` sees every candidate that fits and may veto it (for example
    /// when it would break a block-level rule at the template height).
    /// Vetoed entries stay in the mempool.
    pub fn select_transactions<F>(&self, mempool: &Mempool, weight_budget: u64, mut accept: F) -> Selection
    where
        F: FnMut(&MempoolEntry) -> bool,
    {
        let mut selection = Selection::default();
        let free_budget = self.free_weight_budget(weight_budget);

        // Phase 1: free transactions, earliest admission first
        for entry in mempool.iter_by_admission().filter(|e| e.fee_exempt) {
            let next = selection.free_weight.saturating_add(entry.weight);
            if next > free_budget {
                continue;
            }
            if !accept(entry) {
                continue;
            }
            selection.free_weight = next;
            selection.free_count += 1;
            selection.weight = selection.weight.saturating_add(entry.weight);
            selection.entries.push(entry.clone());
        }

        // Phase 2: fee-paying transactions fill the rest
        for entry in mempool.iter_by_fee_rate().filter(|e| !e.fee_exempt) {
            let next = selection.weight.saturating_add(entry.weight);
            if next > weight_budget {
                continue;
            }
            if !accept(entry) {
                continue;
            }
            selection.weight = next;
            selection.fees = selection.fees.saturating_add(entry.fee);
            selection.entries.push(entry.clone());
        }

        log::debug!(
            "Selected {} transactions ({} free, weight {}/{}, free weight {}/{}, fees {})",
            selection.len(),
            selection.free_count,
            selection.weight,
            weight_budget,
            selection.free_weight,
            free_budget,
            selection.fees
        );
        selection
    }
}
