// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - LEDGER STATE
//
// Consensus state as of one best-chain tip: stakes, pool and free-tx
// history. Readers get it behind an `Arc` and never observe a block
// half-applied.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeSet;

use skc_core::params::{RewardCoefficient, StakingParams};
use skc_core::{Address, Amount, OutPoint};

use crate::error::LedgerError;
use crate::free_tx::{FreeTxInfo, FreeTxQuotaTracker};
use crate::stake_ledger::{Stake, StakeLedger, StakeState};
use crate::staking_pool::{PoolDelta, PoolSummary, StakingPool};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    /// `None` before the first block
    pub tip_height: Option<u64>,
    pub tip_hash: String,
    pub stakes: StakeLedger,
    pub pool: StakingPool,
    pub free_tx: FreeTxQuotaTracker,
}

/// `getstakinginfo` style view of a single stake
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StakeInfo {
    pub deposit_height: u64,
    pub staking_period: u64,
    pub staking_amount: Amount,
    pub accumulated_reward: Amount,
    pub fulfilled: bool,
    pub paid_out: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StakingSummary {
    /// Active stakes only
    pub num_stakes: usize,
    pub total_staked: Amount,
    pub fulfilled: usize,
    pub withdrawn_early: usize,
    pub withdrawn_normal: usize,
    pub staking_pool: Amount,
    pub tip_height: Option<u64>,
}

/// JSON export of the full ledger
#[derive(Serialize, Debug)]
struct LedgerReport<'a> {
    tip_height: Option<u64>,
    tip_hash: &'a str,
    summary: StakingSummary,
    pool: PoolSummary,
    stakes: Vec<&'a Stake>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Height the next connected block must have
    pub fn next_height(&self) -> u64 {
        self.tip_height.map_or(0, |h| h + 1)
    }

    /// Coefficient block `height` accrues at, from the pool balance before
    /// the block's subsidy lands.
    pub fn reward_coefficient(&self, height: u64, params: &StakingParams) -> RewardCoefficient {
        let weight = self.stakes.accruing_weight(height, &params.stake);
        params
            .stake
            .reward_coefficient(self.pool.balance(), params.subsidy.pool_subsidy(height), weight)
    }

    /// Block-start step of connecting (or assembling) block `height`:
    /// accrue stakes at the block's coefficient, then credit the subsidy.
    pub fn begin_block(
        &mut self,
        height: u64,
        params: &StakingParams,
        delta: &mut PoolDelta,
    ) -> (RewardCoefficient, Vec<(OutPoint, Amount)>) {
        let coefficient = self.reward_coefficient(height, params);
        let accrued = self.stakes.accrue_block(height, coefficient, &params.stake);
        self.pool
            .credit_subsidy(params.subsidy.pool_subsidy(height), delta);
        (coefficient, accrued)
    }

    pub fn free_tx_limit(&self, address: &str, params: &StakingParams) -> u64 {
        params.free_tx.limit_for(self.stakes.active_amount(address))
    }

    /// Digest of the consensus part of the state. Mempool charges are
    /// node-local and excluded.
    pub fn fingerprint(&self) -> String {
        let consensus = (
            self.tip_height,
            &self.tip_hash,
            &self.stakes,
            &self.pool,
            self.free_tx.confirmed_history(),
        );
        let bytes = bincode::serialize(&consensus).unwrap_or_default();
        hex::encode(Sha3_256::digest(bytes))
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    pub fn stake(&self, id: &OutPoint) -> Result<Stake, LedgerError> {
        self.stakes.get(id).cloned().ok_or(LedgerError::StakeNotFound)
    }

    pub fn stake_info(&self, id: &OutPoint) -> Result<StakeInfo, LedgerError> {
        let stake = self.stakes.get(id).ok_or(LedgerError::StakeNotFound)?;
        Ok(StakeInfo {
            deposit_height: stake.deposit_height,
            staking_period: stake.period_blocks,
            staking_amount: stake.amount,
            accumulated_reward: stake.accumulated_reward,
            fulfilled: stake.is_fulfilled(),
            paid_out: stake.is_paid_out(),
        })
    }

    pub fn stakes_for_address(&self, address: &str) -> Vec<Stake> {
        self.stakes
            .active_for_address(address)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Quota usage at the tip. Only addresses that ever staked have one.
    pub fn free_tx_info(&self, address: &str, params: &StakingParams) -> Result<FreeTxInfo, LedgerError> {
        let height = self.tip_height.ok_or(LedgerError::NoFreeTxInfo)?;
        if !self.stakes.has_address(address) {
            return Err(LedgerError::NoFreeTxInfo);
        }
        let limit = self.free_tx_limit(address, params);
        Ok(self.free_tx.info(address, height, limit, &params.free_tx))
    }

    /// Governance power of `address` at the tip; zero for unknown addresses
    pub fn gov_power(&self, address: &str, params: &StakingParams) -> Amount {
        match self.tip_height {
            Some(height) => self.stakes.gov_power(address, height, &params.stake),
            None => 0,
        }
    }

    pub fn staking_summary(&self) -> StakingSummary {
        StakingSummary {
            num_stakes: self.stakes.count_by_state(StakeState::Active),
            total_staked: self.stakes.total_active_amount(),
            fulfilled: self.stakes.count_by_state(StakeState::Fulfilled),
            withdrawn_early: self.stakes.count_by_state(StakeState::WithdrawnEarly),
            withdrawn_normal: self.stakes.count_by_state(StakeState::WithdrawnNormal),
            staking_pool: self.pool.balance(),
            tip_height: self.tip_height,
        }
    }

    pub fn pool_balance(&self) -> Amount {
        self.pool.balance()
    }

    /// Addresses that currently hold at least one active stake
    pub fn staking_addresses(&self) -> Vec<Address> {
        self.stakes
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.address.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        let report = LedgerReport {
            tip_height: self.tip_height,
            tip_hash: &self.tip_hash,
            summary: self.staking_summary(),
            pool: self.pool.summary(),
            stakes: self.stakes.iter().collect(),
        };
        serde_json::to_string_pretty(&report)
    }
}
