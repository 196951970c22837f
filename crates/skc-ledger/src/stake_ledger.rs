// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - STAKE LEDGER
//
// One record per deposit output. Lifecycle:
//
//   Pending ──confirm──▶ Active ──height ≥ D + period──▶ Fulfilled
//                          │                                │
//                    early spend                       normal spend
//                          ▼                                ▼
//                   WithdrawnEarly                   WithdrawnNormal
//
// Every connected block adds one block's reward to each accruing stake,
// scaled by that block's global reward coefficient. The increments go into
// the block's undo record so a disconnect takes back exactly what was
// added. Withdrawn records are kept for historical queries and for
// governance power.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use skc_core::params::{RewardCoefficient, StakeRules};
use skc_core::{Address, Amount, DepositPayload, OutPoint};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeState {
    /// Deposit seen in the mempool, not yet confirmed
    Pending,
    Active,
    Fulfilled,
    WithdrawnEarly,
    WithdrawnNormal,
}

impl StakeState {
    pub fn is_withdrawn(self) -> bool {
        matches!(self, StakeState::WithdrawnEarly | StakeState::WithdrawnNormal)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Stake {
    /// Deposit output (txid, vout)
    pub id: OutPoint,
    pub address: Address,
    pub amount: Amount,
    pub deposit_height: u64,
    pub period_index: u8,
    pub period_blocks: u64,
    pub accumulated_reward: Amount,
    pub state: StakeState,
    #[serde(default)]
    pub withdrawn_height: Option<u64>,
    /// Value released by the withdrawal (principal ± reward/penalty)
    #[serde(default)]
    pub payout: Option<Amount>,
}

impl Stake {
    pub fn from_deposit(id: OutPoint, deposit: &DepositPayload, height: u64) -> Self {
        Self {
            id,
            address: deposit.address.clone(),
            amount: deposit.amount,
            deposit_height: height,
            period_index: deposit.period_index,
            period_blocks: deposit.period_blocks,
            accumulated_reward: 0,
            state: StakeState::Active,
            withdrawn_height: None,
            payout: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == StakeState::Active
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(
            self.state,
            StakeState::Fulfilled | StakeState::WithdrawnNormal
        )
    }

    pub fn is_paid_out(&self) -> bool {
        self.state.is_withdrawn()
    }

    pub fn maturity_height(&self) -> u64 {
        self.deposit_height.saturating_add(self.period_blocks)
    }
}

/// Effect of spending one stake output at a given height
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StakeSpend {
    pub id: OutPoint,
    pub matured: bool,
    pub amount: Amount,
    /// What the input is worth to the spending transaction
    pub effective_value: Amount,
    /// Credited to the pool (early spend)
    pub penalty: Amount,
    /// Debited from the pool (matured spend)
    pub reward: Amount,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StakeLedger {
    stakes: BTreeMap<OutPoint, Stake>,
    /// Every stake id ever created per address (withdrawn included)
    by_address: BTreeMap<Address, BTreeSet<OutPoint>>,
    /// Ids not yet withdrawn; the only records touched by accrual
    live: BTreeSet<OutPoint>,
}

impl StakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &OutPoint) -> Option<&Stake> {
        self.stakes.get(id)
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stake> {
        self.stakes.values()
    }

    /// Spendable (not withdrawn) stake at `id`
    pub fn live_stake(&self, id: &OutPoint) -> Option<&Stake> {
        if self.live.contains(id) {
            self.stakes.get(id)
        } else {
            None
        }
    }

    /// Record a confirmed deposit. The deposit block itself accrues at the
    /// block's `coefficient`.
    pub fn insert_deposit(
        &mut self,
        id: OutPoint,
        deposit: &DepositPayload,
        height: u64,
        coefficient: RewardCoefficient,
        rules: &StakeRules,
    ) -> &Stake {
        let mut stake = Stake::from_deposit(id.clone(), deposit, height);
        stake.accumulated_reward =
            rules.scaled_reward_per_block(stake.amount, stake.period_index, coefficient);
        self.by_address
            .entry(stake.address.clone())
            .or_default()
            .insert(id.clone());
        self.live.insert(id.clone());
        self.stakes.entry(id).or_insert(stake)
    }

    /// Undo of `insert_deposit`
    pub fn remove(&mut self, id: &OutPoint) -> Option<Stake> {
        let stake = self.stakes.remove(id)?;
        self.live.remove(id);
        if let Some(ids) = self.by_address.get_mut(&stake.address) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_address.remove(&stake.address);
            }
        }
        Some(stake)
    }

    /// Put back a record exactly as it was before a withdrawal
    pub fn restore(&mut self, stake: Stake) {
        if !stake.state.is_withdrawn() {
            self.live.insert(stake.id.clone());
        }
        self.by_address
            .entry(stake.address.clone())
            .or_default()
            .insert(stake.id.clone());
        self.stakes.insert(stake.id.clone(), stake);
    }

    /// What spending `id` at `height` is worth. Does not mutate.
    ///
    /// A stake matured at `height` stopped accruing at `height - 1`, so its
    /// record already holds the whole reward.
    pub fn spend_outcome(&self, id: &OutPoint, height: u64, rules: &StakeRules) -> Option<StakeSpend> {
        let stake = self.live_stake(id)?;
        let matured = rules.is_matured(stake.period_index, stake.deposit_height, height);
        if matured {
            let reward = stake.accumulated_reward;
            Some(StakeSpend {
                id: id.clone(),
                matured,
                amount: stake.amount,
                effective_value: stake.amount.saturating_add(reward),
                penalty: 0,
                reward,
            })
        } else {
            let penalty = rules.early_withdrawal_penalty(stake.amount);
            Some(StakeSpend {
                id: id.clone(),
                matured,
                amount: stake.amount,
                effective_value: stake.amount - penalty,
                penalty,
                reward: 0,
            })
        }
    }

    /// Apply a validated spend. Returns the record as it was before.
    pub fn withdraw(&mut self, spend: &StakeSpend, height: u64) -> Option<Stake> {
        if !self.live.remove(&spend.id) {
            return None;
        }
        let stake = self.stakes.get_mut(&spend.id)?;
        let prior = stake.clone();
        if spend.matured {
            stake.state = StakeState::WithdrawnNormal;
            stake.accumulated_reward = spend.reward;
        } else {
            stake.state = StakeState::WithdrawnEarly;
        }
        stake.withdrawn_height = Some(height);
        stake.payout = Some(spend.effective_value);
        Some(prior)
    }

    /// Summed `reward_weight` of the stakes that accrue in block `height`
    pub fn accruing_weight(&self, height: u64, rules: &StakeRules) -> u128 {
        self.live
            .iter()
            .filter_map(|id| self.stakes.get(id))
            .filter(|s| {
                s.deposit_height < height && !rules.is_matured(s.period_index, s.deposit_height, height)
            })
            .fold(0u128, |acc, s| {
                acc.saturating_add(rules.reward_weight(s.amount, s.period_index))
            })
    }

    /// Accrue block `height` for every live stake deposited below it and
    /// move matured ones to Fulfilled. Returns the increments.
    pub fn accrue_block(
        &mut self,
        height: u64,
        coefficient: RewardCoefficient,
        rules: &StakeRules,
    ) -> Vec<(OutPoint, Amount)> {
        let mut accrued = Vec::new();
        for id in &self.live {
            let stake = match self.stakes.get_mut(id) {
                Some(s) if s.deposit_height < height => s,
                _ => continue,
            };
            if rules.is_matured(stake.period_index, stake.deposit_height, height) {
                stake.state = StakeState::Fulfilled;
                continue;
            }
            let reward = rules.scaled_reward_per_block(stake.amount, stake.period_index, coefficient);
            if reward > 0 {
                stake.accumulated_reward = stake.accumulated_reward.saturating_add(reward);
                accrued.push((id.clone(), reward));
            }
        }
        accrued
    }

    /// Undo of `accrue_block`: take the increments back and re-derive the
    /// state of every live stake at `tip`.
    pub fn unaccrue_block(&mut self, accrued: &[(OutPoint, Amount)], tip: u64, rules: &StakeRules) {
        for (id, reward) in accrued.iter().rev() {
            if let Some(stake) = self.stakes.get_mut(id) {
                stake.accumulated_reward = stake.accumulated_reward.saturating_sub(*reward);
            }
        }
        for id in &self.live {
            if let Some(stake) = self.stakes.get_mut(id) {
                stake.state = if rules.is_matured(stake.period_index, stake.deposit_height, tip) {
                    StakeState::Fulfilled
                } else {
                    StakeState::Active
                };
            }
        }
    }

    /// Governance power of `address` at `height`: every block a stake spent
    /// locked and accruing counts, withdrawn stakes included. Blocks after
    /// maturity or from the withdrawal on do not count.
    pub fn gov_power(&self, address: &str, height: u64, rules: &StakeRules) -> Amount {
        let ids = match self.by_address.get(address) {
            Some(ids) => ids,
            None => return 0,
        };
        ids.iter()
            .filter_map(|id| self.stakes.get(id))
            .filter(|s| s.deposit_height <= height)
            .fold(0u64, |acc, s| {
                let mut end = height.min(s.maturity_height().saturating_sub(1));
                if let Some(w) = s.withdrawn_height {
                    end = end.min(w.saturating_sub(1));
                }
                let blocks = if end >= s.deposit_height {
                    end - s.deposit_height + 1
                } else {
                    0
                };
                acc.saturating_add(rules.gov_power(s.amount, blocks))
            })
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.by_address.contains_key(address)
    }

    /// Active (not fulfilled, not withdrawn) stakes of an address
    pub fn active_for_address(&self, address: &str) -> Vec<&Stake> {
        self.by_address
            .get(address)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.stakes.get(id))
                    .filter(|s| s.is_active())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn active_amount(&self, address: &str) -> Amount {
        self.active_for_address(address)
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.amount))
    }

    pub fn count_by_state(&self, state: StakeState) -> usize {
        self.stakes.values().filter(|s| s.state == state).count()
    }

    pub fn total_active_amount(&self) -> Amount {
        self.stakes
            .values()
            .filter(|s| s.is_active())
            .fold(0u64, |acc, s| acc.saturating_add(s.amount))
    }
}
