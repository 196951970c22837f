// ─────────────────────────────────────────────────────────────────
// Staking Pool Account - consensus-wide reserve
// ─────────────────────────────────────────────────────────────────
// Credits:  pool share of the block subsidy, declared burns,
//           early-withdrawal penalties
// Debits:   rewards paid to matured stakes when their spend confirms
//
// balance(h) = balance(h-1) + subsidy(h) + burns(h) + penalties(h)
//              - rewards_paid(h)
//
// The balance is rebuilt purely from connected blocks and never goes
// negative: a debit the pool cannot cover is rejected.
// ─────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

use skc_core::Amount;

/// Per-block movement of the pool
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolDelta {
    pub subsidy: Amount,
    pub burns: Amount,
    pub penalties: Amount,
    pub rewards_paid: Amount,
}

impl PoolDelta {
    pub fn credits(&self) -> Amount {
        self.subsidy
            .saturating_add(self.burns)
            .saturating_add(self.penalties)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StakingPool {
    balance: Amount,
    /// Lifetime totals on the current best chain
    pub total_subsidy: Amount,
    pub total_burned: Amount,
    pub total_penalties: Amount,
    pub total_rewards_paid: Amount,
}

impl StakingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn credit_subsidy(&mut self, amount: Amount, delta: &mut PoolDelta) {
        self.balance = self.balance.saturating_add(amount);
        self.total_subsidy = self.total_subsidy.saturating_add(amount);
        delta.subsidy = delta.subsidy.saturating_add(amount);
    }

    pub fn credit_burn(&mut self, amount: Amount, delta: &mut PoolDelta) {
        self.balance = self.balance.saturating_add(amount);
        self.total_burned = self.total_burned.saturating_add(amount);
        delta.burns = delta.burns.saturating_add(amount);
    }

    pub fn credit_penalty(&mut self, amount: Amount, delta: &mut PoolDelta) {
        self.balance = self.balance.saturating_add(amount);
        self.total_penalties = self.total_penalties.saturating_add(amount);
        delta.penalties = delta.penalties.saturating_add(amount);
    }

    /// Pay a matured reward. Returns `Err(balance)` if the pool cannot cover it.
    pub fn debit_reward(&mut self, amount: Amount, delta: &mut PoolDelta) -> Result<(), Amount> {
        let remaining = self.balance.checked_sub(amount).ok_or(self.balance)?;
        self.balance = remaining;
        self.total_rewards_paid = self.total_rewards_paid.saturating_add(amount);
        delta.rewards_paid = delta.rewards_paid.saturating_add(amount);
        Ok(())
    }

    /// Exact inverse of a block's movements
    pub fn revert(&mut self, delta: &PoolDelta) {
        self.balance = self
            .balance
            .saturating_add(delta.rewards_paid)
            .saturating_sub(delta.credits());
        self.total_subsidy = self.total_subsidy.saturating_sub(delta.subsidy);
        self.total_burned = self.total_burned.saturating_sub(delta.burns);
        self.total_penalties = self.total_penalties.saturating_sub(delta.penalties);
        self.total_rewards_paid = self.total_rewards_paid.saturating_sub(delta.rewards_paid);
    }

    /// Lifetime credits minus debits must equal the balance
    pub fn is_consistent(&self) -> bool {
        let credits = self.total_subsidy as u128 + self.total_burned as u128 + self.total_penalties as u128;
        credits >= self.total_rewards_paid as u128
            && credits - self.total_rewards_paid as u128 == self.balance as u128
    }

    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            balance: self.balance,
            total_subsidy: self.total_subsidy,
            total_burned: self.total_burned,
            total_penalties: self.total_penalties,
            total_rewards_paid: self.total_rewards_paid,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PoolSummary {
    pub balance: Amount,
    pub total_subsidy: Amount,
    pub total_burned: Amount,
    pub total_penalties: Amount,
    pub total_rewards_paid: Amount,
}
