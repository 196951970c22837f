use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::params::{FreeTxRules, StakeRules, StakingParams, SubsidySchedule};
use crate::{BPS_DENOMINATOR, DEFAULT_BLOCK_MAX_WEIGHT};

/// Default free-tx share of the block weight budget (26%)
pub const DEFAULT_FREE_TX_SHARE_BPS: u64 = 2_600;

/// Node configuration for the staking ledger and block assembly.
/// Consensus tables (`staking`, `subsidy`, `free_tx`) must match across the
/// network; `block_assembly` is local policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingConfig {
    #[serde(default)]
    pub staking: StakeRules,
    #[serde(default)]
    pub subsidy: SubsidySchedule,
    #[serde(default)]
    pub free_tx: FreeTxRules,
    #[serde(default)]
    pub block_assembly: BlockAssemblyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAssemblyConfig {
    pub block_max_weight: u64,
    /// Share of the weight budget reserved for free transactions
    pub free_tx_share_bps: u64,
    /// Fixed weight cap; overrides the share when set
    #[serde(default)]
    pub free_tx_weight_cap: Option<u64>,
}

impl Default for BlockAssemblyConfig {
    fn default() -> Self {
        Self {
            block_max_weight: DEFAULT_BLOCK_MAX_WEIGHT,
            free_tx_share_bps: DEFAULT_FREE_TX_SHARE_BPS,
            free_tx_weight_cap: None,
        }
    }
}

impl StakingConfig {
    /// Load config from TOML file. Missing sections fall back to defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: StakingConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Defaults overridden by `SKC_*` environment variables.
    /// Useful for containerized deployments and regtest setups.
    pub fn load_from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("SKC_MIN_STAKE_AMOUNT") {
            config.staking.min_stake_amount = v.parse()?;
        }
        if let Ok(v) = std::env::var("SKC_EARLY_WITHDRAWAL_PENALTY_BPS") {
            config.staking.early_withdrawal_penalty_bps = v.parse()?;
        }
        if let Ok(v) = std::env::var("SKC_FREE_TX_BYTES_PER_COIN") {
            config.free_tx.bytes_per_coin = v.parse()?;
        }
        if let Ok(v) = std::env::var("SKC_FREE_TX_WINDOW_BLOCKS") {
            config.free_tx.window_blocks = v.parse()?;
        }
        if let Ok(v) = std::env::var("SKC_BLOCK_MAX_WEIGHT") {
            config.block_assembly.block_max_weight = v.parse()?;
        }
        if let Ok(v) = std::env::var("SKC_FREE_TX_SHARE_BPS") {
            config.block_assembly.free_tx_share_bps = v.parse()?;
        }
        if let Ok(v) = std::env::var("SKC_FREE_TX_WEIGHT_CAP") {
            config.block_assembly.free_tx_weight_cap = Some(v.parse()?);
        }

        Ok(config)
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Consensus tables handed to the ledger
    pub fn params(&self) -> StakingParams {
        StakingParams {
            stake: self.staking.clone(),
            subsidy: self.subsidy.clone(),
            free_tx: self.free_tx.clone(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.params().validate()?;

        if self.block_assembly.block_max_weight == 0 {
            return Err("block_assembly.block_max_weight must be positive".to_string());
        }

        if self.block_assembly.free_tx_share_bps > BPS_DENOMINATOR {
            return Err("block_assembly.free_tx_share_bps cannot exceed 10000".to_string());
        }

        if let Some(cap) = self.block_assembly.free_tx_weight_cap {
            if cap > self.block_assembly.block_max_weight {
                return Err(format!(
                    "block_assembly.free_tx_weight_cap {} exceeds block_max_weight {}",
                    cap, self.block_assembly.block_max_weight
                ));
            }
        }

        Ok(())
    }
}
