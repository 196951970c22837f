// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - STAKE-LINKED CONSENSUS LEDGER
//
// Stake records, the staking pool account and free-transaction quotas,
// advanced and rewound block by block in lockstep with the best chain.
// Everything here is a pure function of the connected blocks: two nodes
// on the same best chain hold identical ledgers.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod coordinator;
pub mod error;
pub mod free_tx;
pub mod journal;
pub mod stake_ledger;
pub mod staking_pool;
pub mod state;
pub mod store;
pub mod validation;

pub use coordinator::{ReorgCoordinator, ReorgSummary};
pub use error::{FreeTxStage, LedgerError, RejectReason};
pub use free_tx::{FreeTxInfo, FreeTxQuotaTracker, QuotaWindow};
pub use journal::{apply_block, rebuild_from, replay, revert_block, BlockUndo, ConnectSummary};
pub use stake_ledger::{Stake, StakeLedger, StakeSpend, StakeState};
pub use staking_pool::{PoolDelta, PoolSummary, StakingPool};
pub use state::{LedgerState, StakeInfo, StakingSummary};
pub use store::{LedgerStore, StoreStats};
pub use validation::{validate_transaction, ValidatedTx};
