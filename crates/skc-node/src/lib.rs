// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - NODE
//
// Mempool, block assembly and the chain glue that keeps the coin set, the
// staking ledger and the mempool in step across connects and reorgs.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod block_assembler;
pub mod chain;
pub mod mempool;
pub mod metrics;

pub use block_assembler::{BlockAssemblyPolicy, Selection};
pub use chain::{BlockTemplate, ChainNode, NodeError, NodeStatus};
pub use mempool::{Mempool, MempoolEntry, MempoolStats, MAX_MEMPOOL_SIZE};
pub use metrics::StakingMetrics;
