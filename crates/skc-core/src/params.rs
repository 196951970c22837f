// ─────────────────────────────────────────────────────────────────
// Staking Schedule Tables
// ─────────────────────────────────────────────────────────────────
// Periods:   4320 / 12960 / 25920 / 51840 blocks (30 / 90 / 180 / 360 days)
// Yield:     5% / 6% / 7.25% / 10% per 360-day year, accrued per block
// Penalty:   3% of principal on early withdrawal, paid into the pool
// Subsidy:   10% of the block reward is credited to the staking pool
// Scaling:   per-block rewards shrink by a global coefficient when the
//            pool cannot fund every active stake at the full rate
//
// Every formula that depends on these constants reads them from here.
// All math is integer-only (u128 intermediates, floor division).
// ─────────────────────────────────────────────────────────────────

use serde::{Deserialize, Serialize};

use crate::{Amount, BLOCKS_PER_DAY, BPS_DENOMINATOR, COIN, DAYS_PER_YEAR};

/// Lock periods in blocks, indexed by the deposit's period byte
pub const STAKING_PERIODS: [u64; 4] = [4_320, 12_960, 25_920, 51_840];

/// Annual reward rate per period, in basis points
pub const STAKING_REWARD_RATES_BPS: [u64; 4] = [500, 600, 725, 1_000];

/// Early withdrawal penalty: 3%
pub const EARLY_WITHDRAWAL_PENALTY_BPS: u64 = 300;

/// Smallest deposit recognized as a stake: 5 coins
pub const MIN_STAKING_AMOUNT: Amount = 5 * COIN;

/// Blocks before the first reward reduction
pub const BOOTSTRAP_PERIOD: u64 = 4_200;

/// Blocks between subsequent reward reductions
pub const REWARD_REDUCTION_PERIOD: u64 = 52_500;

/// Share of the block reward credited to the staking pool: 10%
pub const POOL_SHARE_BPS: u64 = 1_000;

/// Full block reward per era (39 eras, zero afterwards)
pub const REWARD_AMOUNTS: [Amount; 39] = [
    50_000_000_000,
    7_500_000_000,
    7_000_000_000,
    6_500_000_000,
    5_500_000_000,
    4_000_000_000,
    2_500_000_000,
    1_500_000_000,
    750_000_000,
    375_000_000,
    187_500_000,
    93_750_000,
    46_875_000,
    23_437_500,
    11_718_750,
    5_859_375,
    2_929_688,
    1_464_844,
    732_422,
    366_210,
    183_104,
    91_552,
    45_776,
    22_888,
    11_444,
    5_722,
    2_861,
    1_430,
    715,
    358,
    179,
    90,
    45,
    23,
    12,
    6,
    3,
    2,
    1,
];

/// The pool is expected to fund payouts for this many blocks (one year)
pub const STAKING_POOL_EXPIRY_BLOCKS: u64 = DAYS_PER_YEAR * BLOCKS_PER_DAY;

/// Staking one coin for this many blocks earns one coin of governance power
pub const GOV_POWER_UNIT_BLOCKS: u64 = 21_600;

/// Free-tx quota granted per whole coin of active stake, in bytes
pub const FREE_TX_BYTES_PER_COIN: u64 = 60;

/// Length of the confirmed free-tx usage window (one day)
pub const FREE_TX_WINDOW_BLOCKS: u64 = BLOCKS_PER_DAY;

/// Stake lock periods, yields and penalty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRules {
    pub periods: Vec<u64>,
    pub reward_rates_bps: Vec<u64>,
    pub early_withdrawal_penalty_bps: u64,
    pub min_stake_amount: Amount,
    pub blocks_per_day: u64,
    pub days_per_year: u64,
    #[serde(default = "default_pool_expiry_blocks")]
    pub pool_expiry_blocks: u64,
    #[serde(default = "default_gov_power_unit_blocks")]
    pub gov_power_unit_blocks: u64,
}

fn default_pool_expiry_blocks() -> u64 {
    STAKING_POOL_EXPIRY_BLOCKS
}

fn default_gov_power_unit_blocks() -> u64 {
    GOV_POWER_UNIT_BLOCKS
}

/// Fraction `num / den` (at most one) applied to every per-block reward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCoefficient {
    pub num: u128,
    pub den: u128,
}

impl RewardCoefficient {
    pub const FULL: RewardCoefficient = RewardCoefficient { num: 1, den: 1 };

    /// `min(1, possible / potential)`; nothing to pay means full rate
    pub fn new(possible: u128, potential: u128) -> Self {
        if potential == 0 || possible >= potential {
            Self::FULL
        } else {
            Self {
                num: possible,
                den: potential,
            }
        }
    }

    pub fn is_full(&self) -> bool {
        self.num >= self.den
    }

    /// Coefficient in parts per million, for reporting
    pub fn ppm(&self) -> u64 {
        if self.den == 0 {
            return 1_000_000;
        }
        (self.num.saturating_mul(1_000_000) / self.den).min(1_000_000) as u64
    }
}

impl Default for RewardCoefficient {
    fn default() -> Self {
        Self::FULL
    }
}

impl Default for StakeRules {
    fn default() -> Self {
        Self {
            periods: STAKING_PERIODS.to_vec(),
            reward_rates_bps: STAKING_REWARD_RATES_BPS.to_vec(),
            early_withdrawal_penalty_bps: EARLY_WITHDRAWAL_PENALTY_BPS,
            min_stake_amount: MIN_STAKING_AMOUNT,
            blocks_per_day: BLOCKS_PER_DAY,
            days_per_year: DAYS_PER_YEAR,
            pool_expiry_blocks: STAKING_POOL_EXPIRY_BLOCKS,
            gov_power_unit_blocks: GOV_POWER_UNIT_BLOCKS,
        }
    }
}

impl StakeRules {
    /// Lock length for a period index, `None` if the index is unknown
    pub fn period_blocks(&self, period_index: u8) -> Option<u64> {
        self.periods.get(period_index as usize).copied()
    }

    pub fn rate_bps(&self, period_index: u8) -> Option<u64> {
        self.reward_rates_bps.get(period_index as usize).copied()
    }

    fn blocks_per_year(&self) -> u128 {
        self.days_per_year as u128 * self.blocks_per_day as u128
    }

    /// `floor(amount * rate / 10000 / days_per_year / blocks_per_day)`.
    /// A single floor over the combined denominator gives the same result
    /// as the nested floors.
    pub fn reward_per_block(&self, amount: Amount, period_index: u8) -> Amount {
        self.scaled_reward_per_block(amount, period_index, RewardCoefficient::FULL)
    }

    /// Per-block reward after applying the global coefficient:
    /// `floor(floor(c * amount * rate / 10000) / blocks_per_year)`
    pub fn scaled_reward_per_block(
        &self,
        amount: Amount,
        period_index: u8,
        coefficient: RewardCoefficient,
    ) -> Amount {
        let rate = match self.rate_bps(period_index) {
            Some(r) => r,
            None => return 0,
        };
        let blocks_per_year = self.blocks_per_year();
        if blocks_per_year == 0 || coefficient.den == 0 {
            return 0;
        }
        let weighted = amount as u128 * rate as u128;
        let yearly = if coefficient.is_full() {
            weighted / BPS_DENOMINATOR as u128
        } else {
            weighted.saturating_mul(coefficient.num) / (BPS_DENOMINATOR as u128 * coefficient.den)
        };
        (yearly / blocks_per_year).min(Amount::MAX as u128) as Amount
    }

    /// `amount * rate` in basis points, the unit the coefficient's
    /// potential payout is summed in
    pub fn reward_weight(&self, amount: Amount, period_index: u8) -> u128 {
        amount as u128 * self.rate_bps(period_index).unwrap_or(0) as u128
    }

    /// Global reward coefficient for a block.
    ///
    /// `possible = floor(pool_balance / pool_expiry_blocks + pool_subsidy)`
    /// is what the pool can afford per block; `potential` is what the
    /// accruing stakes (summed `reward_weight`) would earn per block at the
    /// full rate.
    pub fn reward_coefficient(
        &self,
        pool_balance: Amount,
        pool_subsidy: Amount,
        total_weight: u128,
    ) -> RewardCoefficient {
        let expiry = self.pool_expiry_blocks.max(1) as u128;
        let possible = pool_balance as u128 / expiry + pool_subsidy as u128;
        let denom = BPS_DENOMINATOR as u128 * self.blocks_per_year();
        if denom == 0 {
            return RewardCoefficient::FULL;
        }
        RewardCoefficient::new(possible, total_weight / denom)
    }

    /// Governance power earned by staking `amount` for `blocks` blocks
    pub fn gov_power(&self, amount: Amount, blocks: u64) -> Amount {
        let unit = self.gov_power_unit_blocks.max(1) as u128;
        let power = amount as u128 * blocks as u128 / unit;
        power.min(Amount::MAX as u128) as Amount
    }

    /// Total reward owed when the stake runs its full period
    pub fn reward_for_full_period(&self, amount: Amount, period_index: u8) -> Amount {
        let period = self.period_blocks(period_index).unwrap_or(0);
        self.reward_per_block(amount, period_index)
            .saturating_mul(period)
    }

    /// Reward accrued at `height` for a stake confirmed at `deposit_height`
    /// when every block ran at the full rate. The deposit block itself
    /// already accrues one block's worth.
    pub fn reward_at(
        &self,
        amount: Amount,
        period_index: u8,
        deposit_height: u64,
        height: u64,
    ) -> Amount {
        if height < deposit_height {
            return 0;
        }
        let period = self.period_blocks(period_index).unwrap_or(0);
        let blocks = (height - deposit_height + 1).min(period);
        self.reward_per_block(amount, period_index)
            .saturating_mul(blocks)
    }

    /// `floor(amount * penalty_bps / 10000)`
    pub fn early_withdrawal_penalty(&self, amount: Amount) -> Amount {
        let penalty =
            (amount as u128 * self.early_withdrawal_penalty_bps as u128) / BPS_DENOMINATOR as u128;
        penalty.min(amount as u128) as Amount
    }

    /// Matured once `height - deposit_height >= period`
    pub fn is_matured(&self, period_index: u8, deposit_height: u64, height: u64) -> bool {
        match self.period_blocks(period_index) {
            Some(period) => height >= deposit_height && height - deposit_height >= period,
            None => false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.periods.is_empty() {
            return Err("staking.periods cannot be empty".to_string());
        }
        if self.periods.len() != self.reward_rates_bps.len() {
            return Err(format!(
                "staking.periods has {} entries but staking.reward_rates_bps has {}",
                self.periods.len(),
                self.reward_rates_bps.len()
            ));
        }
        if self.periods.len() > u8::MAX as usize {
            return Err("staking.periods must be addressable by a single byte".to_string());
        }
        if self.periods.iter().any(|p| *p == 0) {
            return Err("staking.periods entries must be positive".to_string());
        }
        if self.early_withdrawal_penalty_bps > BPS_DENOMINATOR {
            return Err("staking.early_withdrawal_penalty_bps cannot exceed 10000".to_string());
        }
        if self.min_stake_amount == 0 {
            return Err("staking.min_stake_amount must be positive".to_string());
        }
        if self.blocks_per_day == 0 || self.days_per_year == 0 {
            return Err("staking.blocks_per_day and staking.days_per_year must be positive".to_string());
        }
        if self.pool_expiry_blocks == 0 || self.gov_power_unit_blocks == 0 {
            return Err(
                "staking.pool_expiry_blocks and staking.gov_power_unit_blocks must be positive".to_string(),
            );
        }
        Ok(())
    }
}

/// Declarative block reward schedule: height → reward, with the pool share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsidySchedule {
    pub bootstrap_period: u64,
    pub reduction_period: u64,
    pub rewards: Vec<Amount>,
    pub pool_share_bps: u64,
}

impl Default for SubsidySchedule {
    fn default() -> Self {
        Self {
            bootstrap_period: BOOTSTRAP_PERIOD,
            reduction_period: REWARD_REDUCTION_PERIOD,
            rewards: REWARD_AMOUNTS.to_vec(),
            pool_share_bps: POOL_SHARE_BPS,
        }
    }
}

impl SubsidySchedule {
    /// Era `i` covers heights below `bootstrap + i * reduction`
    pub fn block_reward(&self, height: u64) -> Amount {
        for (i, reward) in self.rewards.iter().enumerate() {
            let boundary = self
                .reduction_period
                .saturating_mul(i as u64)
                .saturating_add(self.bootstrap_period);
            if height < boundary {
                return *reward;
            }
        }
        0
    }

    /// Portion credited to the staking pool at `height`
    pub fn pool_subsidy(&self, height: u64) -> Amount {
        let reward = self.block_reward(height) as u128;
        (reward * self.pool_share_bps as u128 / BPS_DENOMINATOR as u128) as Amount
    }

    /// Portion the coinbase may claim at `height`
    pub fn miner_subsidy(&self, height: u64) -> Amount {
        self.block_reward(height)
            .saturating_sub(self.pool_subsidy(height))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.rewards.is_empty() {
            return Err("subsidy.rewards cannot be empty".to_string());
        }
        if self.pool_share_bps > BPS_DENOMINATOR {
            return Err("subsidy.pool_share_bps cannot exceed 10000".to_string());
        }
        if self.rewards.len() > 1 && self.reduction_period == 0 {
            return Err("subsidy.reduction_period must be positive".to_string());
        }
        Ok(())
    }
}

/// Free-transaction quota scaling and window length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTxRules {
    pub bytes_per_coin: u64,
    pub window_blocks: u64,
}

impl Default for FreeTxRules {
    fn default() -> Self {
        Self {
            bytes_per_coin: FREE_TX_BYTES_PER_COIN,
            window_blocks: FREE_TX_WINDOW_BLOCKS,
        }
    }
}

impl FreeTxRules {
    /// Quota in bytes for a given active stake amount
    pub fn limit_for(&self, active_amount: Amount) -> u64 {
        let limit = active_amount as u128 * self.bytes_per_coin as u128 / COIN as u128;
        limit.min(u64::MAX as u128) as u64
    }

    /// Last height (inclusive) of a window opened at `open_height`
    pub fn window_end(&self, open_height: u64) -> u64 {
        open_height.saturating_add(self.window_blocks.saturating_sub(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window_blocks == 0 {
            return Err("free_tx.window_blocks must be positive".to_string());
        }
        Ok(())
    }
}

/// Everything consensus needs, consulted at a single point by the ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingParams {
    pub stake: StakeRules,
    pub subsidy: SubsidySchedule,
    pub free_tx: FreeTxRules,
}

impl StakingParams {
    pub fn validate(&self) -> Result<(), String> {
        self.stake.validate()?;
        self.subsidy.validate()?;
        self.free_tx.validate()
    }
}
