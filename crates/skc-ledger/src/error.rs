//! Ledger error taxonomy.
//!
//! `RejectReason` covers policy violations: the transaction (or block) is
//! refused with a stable reason code, the submitter can fix and resubmit,
//! and no peer is penalized for it. `LedgerError` adds the structural
//! failures, of which `ConsistencyFault` is fatal and halts the ledger.

use skc_core::{Address, Amount, OutPoint};
use std::fmt;
use thiserror::Error;

/// Where a free-transaction check ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeTxStage {
    Mempool,
    Block,
}

impl FreeTxStage {
    pub fn code(self) -> &'static str {
        match self {
            FreeTxStage::Mempool => "invalid-free-tx-mempool-validation",
            FreeTxStage::Block => "invalid-free-tx-block-validation",
        }
    }
}

impl fmt::Display for FreeTxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("bad-txns-inputs-missingorspent, {outpoint}")]
    MissingInput { outpoint: OutPoint },

    #[error("bad-txns-in-belowout, value in ({value_in}) < value out ({value_out})")]
    InputsBelowOutputs { value_in: Amount, value_out: Amount },

    #[error("bad-txns-burn-amount-mismatch, declared {declared} but only {available} available")]
    BurnAmountMismatch { declared: Amount, available: Amount },

    #[error("bad-txns-staking-pool-exhausted, reward {reward} exceeds pool balance {balance}")]
    StakingPoolExhausted { reward: Amount, balance: Amount },

    #[error("bad-txns-txouttotal-toolarge")]
    ValueOverflow,

    #[error("{stage}, no active stake for {address}")]
    FreeTxNoStake { stage: FreeTxStage, address: Address },

    #[error("{stage}, used {used} + size {size} exceeds limit {limit} for {address}")]
    FreeTxOverQuota {
        stage: FreeTxStage,
        address: Address,
        used: u64,
        size: u64,
        limit: u64,
    },

    #[error("{stage}, inputs spend coins of more than one address")]
    FreeTxMixedSenders { stage: FreeTxStage },

    #[error("{stage}, transaction pays a fee of {fee}")]
    FreeTxPaysFee { stage: FreeTxStage, fee: Amount },

    #[error("{stage}, transaction already admitted")]
    FreeTxDuplicate { stage: FreeTxStage },

    #[error("{stage}, staking transactions cannot be fee-exempt")]
    FreeTxStakingTx { stage: FreeTxStage },
}

impl RejectReason {
    /// Stable machine-checkable reason code
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MissingInput { .. } => "bad-txns-inputs-missingorspent",
            RejectReason::InputsBelowOutputs { .. } => "bad-txns-in-belowout",
            RejectReason::BurnAmountMismatch { .. } => "bad-txns-burn-amount-mismatch",
            RejectReason::StakingPoolExhausted { .. } => "bad-txns-staking-pool-exhausted",
            RejectReason::ValueOverflow => "bad-txns-txouttotal-toolarge",
            RejectReason::FreeTxNoStake { stage, .. }
            | RejectReason::FreeTxOverQuota { stage, .. }
            | RejectReason::FreeTxMixedSenders { stage }
            | RejectReason::FreeTxPaysFee { stage, .. }
            | RejectReason::FreeTxDuplicate { stage }
            | RejectReason::FreeTxStakingTx { stage } => stage.code(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(transparent)]
    Rejected(#[from] RejectReason),

    #[error("block at height {got} does not extend the tip (expected height {expected})")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("block at height {height} builds on {got}, tip is {expected}")]
    DoesNotExtendTip {
        height: u64,
        expected: String,
        got: String,
    },

    #[error("block {hash} at height {height} is not the current tip")]
    NotTip { height: u64, hash: String },

    #[error("missing undo data for height {0}")]
    MissingUndo(u64),

    #[error("consistency fault at height {height}: {detail}")]
    ConsistencyFault { height: u64, detail: String },

    #[error("ledger halted: {0}")]
    Halted(String),

    #[error("Stake not found")]
    StakeNotFound,

    #[error("No free TX info for this address")]
    NoFreeTxInfo,

    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Policy rejections can be fixed and resubmitted; nothing else can
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LedgerError::Rejected(_))
    }

    pub fn reject_code(&self) -> Option<&'static str> {
        match self {
            LedgerError::Rejected(reason) => Some(reason.code()),
            _ => None,
        }
    }
}

impl From<sled::Error> for LedgerError {
    fn from(e: sled::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for LedgerError {
    fn from(e: bincode::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}
