// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - BLOCK CONNECT / DISCONNECT JOURNAL
//
// `apply_block` advances a `LedgerState` by one block and records a
// `BlockUndo`; `revert_block` consumes it. Applying then reverting the same
// block restores the state exactly, which is what keeps reorgs convergent.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use skc_core::params::{RewardCoefficient, StakingParams};
use skc_core::{Address, Amount, Block, BlockOverlay, MemoryUtxoView, OutPoint, StakingTxKind, UtxoView};

use crate::error::{LedgerError, RejectReason};
use crate::stake_ledger::Stake;
use crate::staking_pool::PoolDelta;
use crate::state::LedgerState;
use crate::validation::validate_transaction;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FreeTxConfirmation {
    pub address: Address,
    pub txid: String,
    pub size: u64,
}

/// Everything needed to disconnect one block
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockUndo {
    pub height: u64,
    pub block_hash: String,
    pub prev_hash: String,
    pub prev_tip: Option<u64>,
    /// Stakes created by deposits in this block, in creation order
    pub created: Vec<OutPoint>,
    /// Records of stakes withdrawn in this block, as they were before
    pub withdrawn: Vec<Stake>,
    pub pool_delta: PoolDelta,
    pub free_tx_confirmations: Vec<FreeTxConfirmation>,
    /// Reward each pre-existing stake accrued in this block
    #[serde(default)]
    pub accrued: Vec<(OutPoint, Amount)>,
}

/// What a connected block did, for logging and metrics
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectSummary {
    pub height: u64,
    pub deposits: usize,
    pub withdrawals: usize,
    pub burns: usize,
    pub free_txs: usize,
    pub pool_delta: PoolDelta,
    pub pool_balance: u64,
    pub reward_coefficient: RewardCoefficient,
}

/// Connect `block` at `height` on top of `state`.
///
/// `view` must reflect the coin set before the block. On error `state` may
/// be partially modified; callers work on a copy.
pub fn apply_block(
    state: &mut LedgerState,
    params: &StakingParams,
    block: &Block,
    height: u64,
    view: &dyn UtxoView,
) -> Result<(BlockUndo, ConnectSummary), LedgerError> {
    let expected = state.next_height();
    if height != expected {
        return Err(LedgerError::OutOfOrder {
            expected,
            got: height,
        });
    }
    if state.tip_height.is_some() && block.header.prev_hash != state.tip_hash {
        return Err(LedgerError::DoesNotExtendTip {
            height,
            expected: state.tip_hash.clone(),
            got: block.header.prev_hash.clone(),
        });
    }

    let mut undo = BlockUndo {
        height,
        block_hash: block.hash(),
        prev_hash: block.header.prev_hash.clone(),
        prev_tip: state.tip_height,
        created: Vec::new(),
        withdrawn: Vec::new(),
        pool_delta: PoolDelta::default(),
        free_tx_confirmations: Vec::new(),
        accrued: Vec::new(),
    };
    let mut summary = ConnectSummary {
        height,
        ..ConnectSummary::default()
    };

    let (coefficient, accrued) = state.begin_block(height, params, &mut undo.pool_delta);
    undo.accrued = accrued;
    summary.reward_coefficient = coefficient;

    let mut overlay = BlockOverlay::new(view);
    for tx in &block.transactions {
        if tx.is_coinbase() {
            overlay.add_outputs(tx, height);
            continue;
        }

        let vtx = validate_transaction(
            &state.stakes,
            state.pool.balance(),
            params,
            tx,
            &overlay,
            height,
        )?;

        for spend in &vtx.stake_spends {
            if let Some(prior) = state.stakes.withdraw(spend, height) {
                undo.withdrawn.push(prior);
                summary.withdrawals += 1;
            }
            if spend.matured {
                state
                    .pool
                    .debit_reward(spend.reward, &mut undo.pool_delta)
                    .map_err(|balance| RejectReason::StakingPoolExhausted {
                        reward: spend.reward,
                        balance,
                    })?;
            } else {
                state.pool.credit_penalty(spend.penalty, &mut undo.pool_delta);
            }
        }

        match &vtx.kind {
            StakingTxKind::Deposit(deposit) => {
                let id = OutPoint::new(vtx.txid.clone(), deposit.output_index);
                state
                    .stakes
                    .insert_deposit(id.clone(), deposit, height, coefficient, &params.stake);
                undo.created.push(id);
                summary.deposits += 1;
            }
            StakingTxKind::Burn { declared } => {
                state.pool.credit_burn(*declared, &mut undo.pool_delta);
                summary.burns += 1;
            }
            StakingTxKind::Ordinary => {}
        }

        if vtx.is_free() {
            if let Some(sender) = vtx.sender.as_deref() {
                // zero quota (e.g. every stake matured) is not charged
                let limit = state.free_tx_limit(sender, params);
                if limit > 0 {
                    state
                        .free_tx
                        .check_block_quota(sender, vtx.vsize, height, limit, &params.free_tx)?;
                    state.free_tx.confirm(sender, &vtx.txid, vtx.vsize, height);
                    undo.free_tx_confirmations.push(FreeTxConfirmation {
                        address: sender.to_string(),
                        txid: vtx.txid.clone(),
                        size: vtx.vsize,
                    });
                    summary.free_txs += 1;
                }
            }
        }
        state.free_tx.release(&vtx.txid);

        for input in &tx.inputs {
            overlay.spend(&input.prevout);
        }
        overlay.add_outputs(tx, height);
    }

    state.tip_height = Some(height);
    state.tip_hash = undo.block_hash.clone();
    summary.pool_delta = undo.pool_delta;
    summary.pool_balance = state.pool.balance();
    Ok((undo, summary))
}

/// Disconnect the tip block described by `undo`.
pub fn revert_block(state: &mut LedgerState, params: &StakingParams, undo: &BlockUndo) -> Result<(), LedgerError> {
    if state.tip_height != Some(undo.height) || state.tip_hash != undo.block_hash {
        return Err(LedgerError::NotTip {
            height: undo.height,
            hash: undo.block_hash.clone(),
        });
    }

    for c in undo.free_tx_confirmations.iter().rev() {
        state.free_tx.unconfirm(&c.address, &c.txid, undo.height);
    }
    state.pool.revert(&undo.pool_delta);
    for prior in undo.withdrawn.iter().rev() {
        state.stakes.restore(prior.clone());
    }
    for id in undo.created.iter().rev() {
        state.stakes.remove(id);
    }

    state.tip_height = undo.prev_tip;
    state.tip_hash = if undo.prev_tip.is_some() {
        undo.prev_hash.clone()
    } else {
        String::new()
    };
    state
        .stakes
        .unaccrue_block(&undo.accrued, undo.prev_tip.unwrap_or(0), &params.stake);
    Ok(())
}

/// Recompute state and undo journal of `chain` from genesis with a private
/// coin set.
pub fn rebuild_from(
    params: &StakingParams,
    chain: &[Block],
) -> Result<(LedgerState, BTreeMap<u64, BlockUndo>), LedgerError> {
    let mut state = LedgerState::new();
    let mut journal = BTreeMap::new();
    let mut view = MemoryUtxoView::new();
    for (height, block) in chain.iter().enumerate() {
        let height = height as u64;
        let (undo, _) = apply_block(&mut state, params, block, height, &view)?;
        view.apply_block(block, height)
            .map_err(|detail| LedgerError::ConsistencyFault { height, detail })?;
        journal.insert(height, undo);
    }
    Ok((state, journal))
}

pub fn replay(params: &StakingParams, chain: &[Block]) -> Result<LedgerState, LedgerError> {
    rebuild_from(params, chain).map(|(state, _)| state)
}
