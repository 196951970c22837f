// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - CORE MODULE
//
// Chain primitives shared by the ledger and the node: transactions, blocks,
// the staking wire encoding, the schedule tables and node configuration.
// All amounts are u64 minor units (1 coin = 10^8 units, no floating-point).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod config;
pub mod params;
pub mod primitives;
pub mod staking_tx;
pub mod utxo;

pub use params::{FreeTxRules, RewardCoefficient, StakeRules, StakingParams, SubsidySchedule};
pub use primitives::{Block, BlockHeader, OutPoint, Script, Transaction, TxIn, TxOut};
pub use staking_tx::{classify, DepositPayload, StakingTxKind};
pub use utxo::{BlockOverlay, BlockUtxoUndo, Coin, MemoryUtxoView, UtxoSet, UtxoView};

/// Integer amount in minor units
pub type Amount = u64;

/// Hex-encoded pubkey-hash address, prefixed with `SKC`
pub type Address = String;

/// 1 coin = 100,000,000 minor units
pub const COIN: Amount = 100_000_000;

/// Hard cap on any single amount (21M coins)
pub const MAX_MONEY: Amount = 21_000_000 * COIN;

/// Target block spacing: 144 blocks per day
pub const BLOCKS_PER_DAY: u64 = 144;

/// Reward year used for staking yield (360 days)
pub const DAYS_PER_YEAR: u64 = 360;

/// Basis-point denominator (10,000 bps = 100%)
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Weight multiplier per serialized byte (no witness data)
pub const WITNESS_SCALE_FACTOR: u64 = 4;

/// Default block weight budget
pub const DEFAULT_BLOCK_MAX_WEIGHT: u64 = 4_000_000;

/// Address prefix for pay-to-pubkey-hash outputs
pub const ADDRESS_PREFIX: &str = "SKC";

/// Returns true if `amount` is within the money range
pub const fn money_range(amount: Amount) -> bool {
    amount <= MAX_MONEY
}

/// Derive an address from arbitrary key material.
/// SHA3-256, truncated to 20 bytes, hex-encoded behind the `SKC` prefix.
pub fn derive_address(key_material: &[u8]) -> Address {
    use sha3::{Digest, Sha3_256};
    let digest = Sha3_256::digest(key_material);
    format!("{}{}", ADDRESS_PREFIX, hex::encode(&digest[..20]))
}

/// Parse an address back into its 20-byte pubkey hash
pub fn address_hash(address: &str) -> Option<[u8; 20]> {
    let body = address.strip_prefix(ADDRESS_PREFIX)?;
    let bytes = hex::decode(body).ok()?;
    bytes.try_into().ok()
}
