// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - REORG COORDINATOR
//
// Single writer for the ledger. Every connect and disconnect runs under the
// exclusive lock against a working copy; the copy replaces the published
// snapshot only once the whole block succeeded. Readers clone the `Arc` and
// see either the state before or after a block, never in between. A reorg
// is one such step: the whole branch switch is published at once.
//
// A consistency fault (pool accounting broken, audit mismatch, missing
// undo data) halts the coordinator: connects and disconnects are refused
// until `rebuild` recomputes the state from the best chain.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use skc_core::params::StakingParams;
use skc_core::{Amount, Block, OutPoint, Transaction, UtxoSet, UtxoView};

use crate::error::{FreeTxStage, LedgerError, RejectReason};
use crate::free_tx::FreeTxInfo;
use crate::journal::{apply_block, rebuild_from, revert_block, BlockUndo, ConnectSummary};
use crate::stake_ledger::Stake;
use crate::state::{LedgerState, StakeInfo, StakingSummary};
use crate::store::LedgerStore;
use crate::validation::{validate_transaction, ValidatedTx};

fn safe_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Ledger lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn safe_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Ledger lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn short(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}

struct Inner {
    state: Arc<LedgerState>,
    undo: BTreeMap<u64, BlockUndo>,
    halted: Option<String>,
}

impl Inner {
    fn ensure_running(&self) -> Result<(), LedgerError> {
        match &self.halted {
            Some(reason) => Err(LedgerError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    fn fault(&mut self, height: u64, detail: String) -> LedgerError {
        log::error!("Consistency fault at height {}: {}", height, detail);
        self.halted = Some(detail.clone());
        LedgerError::ConsistencyFault { height, detail }
    }
}

/// Outcome of `reorganize`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorgSummary {
    pub fork_height: Option<u64>,
    pub disconnected: usize,
    pub connected: Vec<ConnectSummary>,
}

pub struct ReorgCoordinator {
    params: StakingParams,
    inner: RwLock<Inner>,
    store: Option<LedgerStore>,
}

impl ReorgCoordinator {
    /// In-memory coordinator starting before genesis
    pub fn new(params: StakingParams) -> Self {
        Self {
            params,
            inner: RwLock::new(Inner {
                state: Arc::new(LedgerState::new()),
                undo: BTreeMap::new(),
                halted: None,
            }),
            store: None,
        }
    }

    /// Coordinator backed by `store`, resumed from its last snapshot.
    /// Mempool charges do not survive a restart.
    pub fn open(params: StakingParams, store: LedgerStore) -> Result<Self, LedgerError> {
        let (mut state, undo) = store.load()?.unwrap_or_default();
        state.free_tx.clear_mempool();
        if let Some(h) = state.tip_height {
            log::info!(
                "Ledger resumed at height {} (pool {}, {} undo entries)",
                h,
                state.pool_balance(),
                undo.len()
            );
        }
        Ok(Self {
            params,
            inner: RwLock::new(Inner {
                state: Arc::new(state),
                undo,
                halted: None,
            }),
            store: Some(store),
        })
    }

    pub fn params(&self) -> &StakingParams {
        &self.params
    }

    /// Immutable view of the ledger at the current tip
    pub fn snapshot(&self) -> Arc<LedgerState> {
        Arc::clone(&safe_read(&self.inner).state)
    }

    pub fn tip(&self) -> Option<(u64, String)> {
        let snap = self.snapshot();
        snap.tip_height.map(|h| (h, snap.tip_hash.clone()))
    }

    pub fn is_halted(&self) -> bool {
        safe_read(&self.inner).halted.is_some()
    }

    pub fn halt_reason(&self) -> Option<String> {
        safe_read(&self.inner).halted.clone()
    }

    pub fn halt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("Ledger halted: {}", reason);
        safe_write(&self.inner).halted = Some(reason);
    }

    // ─────────────────────────────────────────────────────────────
    // Chain events
    // ─────────────────────────────────────────────────────────────

    /// Connect `block` at `height`. `view` is the coin set before the block.
    pub fn on_block_connected(
        &self,
        block: &Block,
        height: u64,
        view: &dyn UtxoView,
    ) -> Result<ConnectSummary, LedgerError> {
        let mut inner = safe_write(&self.inner);
        inner.ensure_running()?;

        let mut working = LedgerState::clone(&inner.state);
        let (undo, summary) = match apply_block(&mut working, &self.params, block, height, view) {
            Ok(done) => done,
            Err(e) => {
                if let Some(code) = e.reject_code() {
                    log::debug!("Block at height {} rejected: {}", height, code);
                }
                return Err(e);
            }
        };

        if !working.pool.is_consistent() {
            return Err(inner.fault(height, "staking pool totals do not match balance".to_string()));
        }
        if let Some(store) = &self.store {
            store.persist_connect(&working, &undo)?;
        }

        log::info!(
            "Connected block {} at height {} (pool {}, deposits {}, withdrawals {}, free txs {})",
            short(&undo.block_hash),
            height,
            summary.pool_balance,
            summary.deposits,
            summary.withdrawals,
            summary.free_txs
        );
        inner.undo.insert(height, undo);
        inner.state = Arc::new(working);
        Ok(summary)
    }

    /// Disconnect the tip `block` at `height`.
    pub fn on_block_disconnected(&self, block: &Block, height: u64) -> Result<(), LedgerError> {
        let mut inner = safe_write(&self.inner);
        inner.ensure_running()?;

        let hash = block.hash();
        if inner.state.tip_height != Some(height) || inner.state.tip_hash != hash {
            return Err(LedgerError::NotTip { height, hash });
        }
        let found = inner
            .undo
            .get(&height)
            .filter(|u| u.block_hash == hash)
            .cloned();
        let undo = match found {
            Some(u) => u,
            None => {
                inner.fault(height, format!("missing undo data for block {}", short(&hash)));
                return Err(LedgerError::MissingUndo(height));
            }
        };

        let mut working = LedgerState::clone(&inner.state);
        revert_block(&mut working, &self.params, &undo)?;
        if !working.pool.is_consistent() {
            return Err(inner.fault(height, "staking pool totals do not match balance".to_string()));
        }
        if let Some(store) = &self.store {
            store.persist_disconnect(&working, height)?;
        }

        log::info!(
            "Disconnected block {} at height {} (pool {})",
            short(&hash),
            height,
            working.pool_balance()
        );
        inner.undo.remove(&height);
        inner.state = Arc::new(working);
        Ok(())
    }

    /// Switch the best chain: disconnect `disconnect` (tip first), then
    /// connect `connect` in order, keeping `coins` in step with the ledger.
    ///
    /// Runs on working copies of the ledger and of `coins` under one write
    /// lock. On success both are replaced together; on failure neither
    /// changes and the old branch stays current.
    pub fn reorganize(
        &self,
        disconnect: &[Block],
        connect: &[Block],
        coins: &mut UtxoSet,
    ) -> Result<ReorgSummary, LedgerError> {
        let mut inner = safe_write(&self.inner);
        inner.ensure_running()?;
        if !disconnect.is_empty() {
            log::warn!(
                "Reorganizing: {} blocks off, {} blocks on",
                disconnect.len(),
                connect.len()
            );
        }

        let mut working = LedgerState::clone(&inner.state);
        let mut work_coins = coins.clone();
        let mut summary = ReorgSummary::default();
        let mut dropped = Vec::with_capacity(disconnect.len());
        let mut added: Vec<BlockUndo> = Vec::with_capacity(connect.len());

        for block in disconnect {
            let hash = block.hash();
            let height = match working.tip_height {
                Some(h) if working.tip_hash == hash => h,
                tip => {
                    return Err(LedgerError::NotTip {
                        height: tip.unwrap_or(0),
                        hash,
                    })
                }
            };
            let found = inner
                .undo
                .get(&height)
                .filter(|u| u.block_hash == hash)
                .cloned();
            let undo = match found {
                Some(u) => u,
                None => {
                    inner.fault(height, format!("missing undo data for block {}", short(&hash)));
                    return Err(LedgerError::MissingUndo(height));
                }
            };
            revert_block(&mut working, &self.params, &undo)?;
            work_coins
                .disconnect_block(block, height)
                .map_err(|detail| inner.fault(height, detail))?;
            dropped.push(height);
            summary.disconnected += 1;
        }
        summary.fork_height = working.tip_height;

        for block in connect {
            let height = working.next_height();
            let (undo, connected) = match apply_block(&mut working, &self.params, block, height, &work_coins) {
                Ok(done) => done,
                Err(e) => {
                    if let Some(code) = e.reject_code() {
                        log::debug!("Reorg block at height {} rejected: {}", height, code);
                    }
                    return Err(e);
                }
            };
            work_coins
                .connect_block(block, height)
                .map_err(|detail| inner.fault(height, detail))?;
            added.push(undo);
            summary.connected.push(connected);
        }

        if !working.pool.is_consistent() {
            let height = working.tip_height.unwrap_or(0);
            return Err(inner.fault(height, "staking pool totals do not match balance".to_string()));
        }
        if let Some(store) = &self.store {
            store.persist_reorg(&working, &dropped, &added)?;
        }

        log::info!(
            "Reorganized to {} at height {:?} (fork {:?}, pool {})",
            short(&working.tip_hash),
            working.tip_height,
            summary.fork_height,
            working.pool_balance()
        );
        for height in &dropped {
            inner.undo.remove(height);
        }
        for undo in added {
            inner.undo.insert(undo.height, undo);
        }
        inner.state = Arc::new(working);
        *coins = work_coins;
        Ok(summary)
    }

    // ─────────────────────────────────────────────────────────────
    // Transaction admission
    // ─────────────────────────────────────────────────────────────

    /// Validate `tx` for inclusion in the next block.
    pub fn validate_transaction(&self, tx: &Transaction, view: &dyn UtxoView) -> Result<ValidatedTx, LedgerError> {
        let snap = self.snapshot();
        let vtx = validate_transaction(
            &snap.stakes,
            snap.pool_balance(),
            &self.params,
            tx,
            view,
            snap.next_height(),
        )?;
        Ok(vtx)
    }

    /// Admission check for a zero-fee transaction. On success its size is
    /// charged to the sender's mempool usage until released or confirmed.
    pub fn validate_free_tx(&self, vtx: &ValidatedTx) -> Result<(), RejectReason> {
        let stage = FreeTxStage::Mempool;
        if vtx.fee > 0 {
            return Err(RejectReason::FreeTxPaysFee { stage, fee: vtx.fee });
        }
        if !vtx.kind.is_ordinary() || !vtx.stake_spends.is_empty() || vtx.coinbase {
            return Err(RejectReason::FreeTxStakingTx { stage });
        }
        let sender = vtx
            .sender
            .as_deref()
            .ok_or(RejectReason::FreeTxMixedSenders { stage })?;

        let mut inner = safe_write(&self.inner);
        if !inner.state.stakes.has_address(sender) {
            return Err(RejectReason::FreeTxNoStake {
                stage,
                address: sender.to_string(),
            });
        }
        let limit = inner.state.free_tx_limit(sender, &self.params);
        let height = inner.state.tip_height.unwrap_or(0);
        let state = Arc::make_mut(&mut inner.state);
        state
            .free_tx
            .admit(sender, &vtx.txid, vtx.vsize, height, limit, &self.params.free_tx)
    }

    /// Release the mempool charge of an evicted or replaced free tx
    pub fn release_free_tx(&self, txid: &str) -> bool {
        let mut inner = safe_write(&self.inner);
        Arc::make_mut(&mut inner.state).free_tx.release(txid).is_some()
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    pub fn stake(&self, id: &OutPoint) -> Result<Stake, LedgerError> {
        self.snapshot().stake(id)
    }

    pub fn stake_info(&self, id: &OutPoint) -> Result<StakeInfo, LedgerError> {
        self.snapshot().stake_info(id)
    }

    pub fn stakes_for_address(&self, address: &str) -> Vec<Stake> {
        self.snapshot().stakes_for_address(address)
    }

    pub fn free_tx_info(&self, address: &str) -> Result<FreeTxInfo, LedgerError> {
        self.snapshot().free_tx_info(address, &self.params)
    }

    pub fn staking_summary(&self) -> StakingSummary {
        self.snapshot().staking_summary()
    }

    pub fn pool_balance(&self) -> u64 {
        self.snapshot().pool_balance()
    }

    pub fn gov_power(&self, address: &str) -> Amount {
        self.snapshot().gov_power(address, &self.params)
    }

    // ─────────────────────────────────────────────────────────────
    // Audit and recovery
    // ─────────────────────────────────────────────────────────────

    /// Recompute the ledger from `chain` (genesis first) and compare with
    /// the live state. Any divergence halts the coordinator.
    pub fn audit(&self, chain: &[Block]) -> Result<(), LedgerError> {
        let expected = rebuild_from(&self.params, chain);
        let mut inner = safe_write(&self.inner);
        let height = inner.state.tip_height.unwrap_or(0);
        let live = inner.state.fingerprint();
        let detail = match expected {
            Ok((state, _)) => {
                let replayed = state.fingerprint();
                if replayed == live {
                    log::debug!("Ledger audit passed at height {}", height);
                    return Ok(());
                }
                format!(
                    "audit mismatch: live {} replayed {}",
                    short(&live),
                    short(&replayed)
                )
            }
            Err(e) => format!("audit replay failed: {}", e),
        };
        Err(inner.fault(height, detail))
    }

    /// Replace the ledger with one recomputed from `chain` and clear the
    /// halt. Mempool charges are dropped; callers re-admit free txs.
    pub fn rebuild(&self, chain: &[Block]) -> Result<(), LedgerError> {
        let (state, undo) = rebuild_from(&self.params, chain)?;
        if let Some(store) = &self.store {
            store.persist_all(&state, &undo)?;
        }
        let mut inner = safe_write(&self.inner);
        log::warn!(
            "Ledger rebuilt to height {:?} (pool {})",
            state.tip_height,
            state.pool_balance()
        );
        inner.state = Arc::new(state);
        inner.undo = undo;
        inner.halted = None;
        Ok(())
    }

    /// Forget undo data below `height`, in memory and on disk
    pub fn prune_undo_below(&self, height: u64) -> Result<usize, LedgerError> {
        let mut inner = safe_write(&self.inner);
        let keep = inner.undo.split_off(&height);
        let removed = inner.undo.len();
        inner.undo = keep;
        if let Some(store) = &self.store {
            store.prune_undo_below(height)?;
        }
        Ok(removed)
    }

    pub fn undo_depth(&self) -> usize {
        safe_read(&self.inner).undo.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skc_core::staking_tx::deposit_outputs;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use skc_core::{derive_address, Script, TxIn, TxOut, COIN};
    use tempfile::TempDir;

    fn pay(label: &[u8], value: u64) -> TxOut {
        TxOut::new(value, Script::pay_to_address(&derive_address(label)).unwrap())
    }

    fn next_block(prev: &str, height: u64, mut txs: Vec<Transaction>) -> Block {
        let mut all = vec![Transaction::coinbase(height, vec![pay(b"miner", COIN)])];
        all.append(&mut txs);
        Block::new(prev, height, all)
    }

    fn connect(coord: &ReorgCoordinator, coins: &mut UtxoSet, block: &Block) -> ConnectSummary {
        let height = coord.snapshot().next_height();
        let summary = coord.on_block_connected(block, height, &*coins).unwrap();
        coins.connect_block(block, height).unwrap();
        summary
    }

    /// Genesis funds alice, block 1 deposits 400 coins for her.
    fn staked_chain(coord: &ReorgCoordinator, coins: &mut UtxoSet) -> (Vec<Block>, OutPoint) {
        let funding = Transaction::coinbase(0, vec![pay(b"alice", 1_000 * COIN)]);
        let b0 = Block::new("", 0, vec![funding.clone()]);
        connect(coord, coins, &b0);

        let mut outputs = deposit_outputs(&derive_address(b"alice"), 400 * COIN, 0).unwrap();
        outputs.push(pay(b"alice", 599 * COIN));
        let deposit = Transaction::new(vec![TxIn::spending(OutPoint::new(funding.txid(), 0))], outputs);
        let b1 = next_block(&b0.hash(), 1, vec![deposit.clone()]);
        connect(coord, coins, &b1);
        (vec![b0, b1], OutPoint::new(deposit.txid(), 1))
    }

    #[test]
    fn test_connect_publishes_snapshot() {
        let coord = ReorgCoordinator::new(StakingParams::default());
        let mut coins = UtxoSet::new();
        let before = coord.snapshot();
        let (_, stake_id) = staked_chain(&coord, &mut coins);

        assert_eq!(before.tip_height, None);
        assert_eq!(coord.tip().map(|(h, _)| h), Some(1));
        assert_eq!(coord.stake_info(&stake_id).unwrap().staking_amount, 400 * COIN);
        assert_eq!(coord.staking_summary().num_stakes, 1);
        assert_eq!(coord.pool_balance(), 100 * COIN);
    }

    #[test]
    fn test_rejected_block_leaves_state_untouched() {
        let coord = ReorgCoordinator::new(StakingParams::default());
        let mut coins = UtxoSet::new();
        let (chain, _) = staked_chain(&coord, &mut coins);
        let before = coord.snapshot();

        let bogus = Transaction::new(
            vec![TxIn::spending(OutPoint::new("ee".repeat(32), 0))],
            vec![pay(b"bob", COIN)],
        );
        let b2 = next_block(&chain[1].hash(), 2, vec![bogus]);
        let err = coord.on_block_connected(&b2, 2, &coins).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(*coord.snapshot(), *before);
        assert!(!coord.is_halted());
    }

    #[test]
    fn test_disconnect_requires_tip_and_undo() {
        let coord = ReorgCoordinator::new(StakingParams::default());
        let mut coins = UtxoSet::new();
        let (chain, stake_id) = staked_chain(&coord, &mut coins);

        assert!(matches!(
            coord.on_block_disconnected(&chain[0], 0),
            Err(LedgerError::NotTip { .. })
        ));

        coord.on_block_disconnected(&chain[1], 1).unwrap();
        assert_eq!(coord.stake(&stake_id), Err(LedgerError::StakeNotFound));
        assert_eq!(coord.pool_balance(), 50 * COIN);

        coord.prune_undo_below(1).unwrap();
        assert!(matches!(
            coord.on_block_disconnected(&chain[0], 0),
            Err(LedgerError::MissingUndo(0))
        ));
        assert!(coord.is_halted());
        assert!(matches!(
            coord.on_block_connected(&chain[1], 1, &coins),
            Err(LedgerError::Halted(_))
        ));
    }

    #[test]
    fn test_free_tx_admission_path() {
        let coord = ReorgCoordinator::new(StakingParams::default());
        let mut coins = UtxoSet::new();
        let (chain, _) = staked_chain(&coord, &mut coins);
        let change = OutPoint::new(chain[1].transactions[1].txid(), 2);

        let free = Transaction::new(vec![TxIn::spending(change)], vec![pay(b"bob", 599 * COIN)]);
        let vtx = coord.validate_transaction(&free, &coins).unwrap();
        assert!(vtx.is_free());
        coord.validate_free_tx(&vtx).unwrap();
        assert_eq!(
            coord.free_tx_info(&derive_address(b"alice")).unwrap().used_mempool_limit,
            vtx.vsize
        );
        assert!(matches!(
            coord.validate_free_tx(&vtx),
            Err(RejectReason::FreeTxDuplicate { .. })
        ));
        assert!(coord.release_free_tx(&vtx.txid));
        assert_eq!(
            coord.free_tx_info(&derive_address(b"alice")).unwrap().used_mempool_limit,
            0
        );

        // miner never staked
        let miner_coin = OutPoint::new(chain[1].transactions[0].txid(), 0);
        let unstaked = Transaction::new(vec![TxIn::spending(miner_coin)], vec![pay(b"bob", COIN)]);
        let vtx = coord.validate_transaction(&unstaked, &coins).unwrap();
        assert_eq!(
            coord.validate_free_tx(&vtx).unwrap_err().code(),
            "invalid-free-tx-mempool-validation"
        );
    }

    #[test]
    fn test_audit_and_rebuild() {
        let coord = ReorgCoordinator::new(StakingParams::default());
        let mut coins = UtxoSet::new();
        let (chain, _) = staked_chain(&coord, &mut coins);

        coord.audit(&chain).unwrap();
        let err = coord.audit(&chain[..1]).unwrap_err();
        assert!(matches!(err, LedgerError::ConsistencyFault { .. }));
        assert!(coord.is_halted());

        coord.rebuild(&chain).unwrap();
        assert!(!coord.is_halted());
        assert_eq!(coord.undo_depth(), 2);
        coord.audit(&chain).unwrap();
    }

    #[test]
    fn test_reorganize_switches_branch() {
        let coord = ReorgCoordinator::new(StakingParams::default());
        let mut coins = UtxoSet::new();
        let (chain, stake_id) = staked_chain(&coord, &mut coins);

        let alt = next_block(&chain[0].hash(), 1, vec![]);
        let alt2 = next_block(&alt.hash(), 2, vec![]);
        let summary = coord
            .reorganize(&[chain[1].clone()], &[alt.clone(), alt2.clone()], &mut coins)
            .unwrap();
        assert_eq!(summary.fork_height, Some(0));
        assert_eq!(summary.disconnected, 1);
        assert_eq!(summary.connected.len(), 2);
        assert_eq!(coord.tip(), Some((2, alt2.hash())));
        assert!(coord.stake(&stake_id).is_err());
        assert_eq!(coord.pool_balance(), 150 * COIN);

        coord.audit(&[chain[0].clone(), alt, alt2]).unwrap();
    }

    #[test]
    fn test_failed_reorganize_publishes_nothing() {
        let coord = ReorgCoordinator::new(StakingParams::default());
        let mut coins = UtxoSet::new();
        let (chain, stake_id) = staked_chain(&coord, &mut coins);
        let before = coord.snapshot();

        let alt = next_block(&chain[0].hash(), 1, vec![]);
        let bogus = Transaction::new(
            vec![TxIn::spending(OutPoint::new("ee".repeat(32), 0))],
            vec![pay(b"bob", COIN)],
        );
        let alt2 = next_block(&alt.hash(), 2, vec![bogus]);
        let err = coord
            .reorganize(&[chain[1].clone()], &[alt, alt2], &mut coins)
            .unwrap_err();
        assert_eq!(err.reject_code(), Some("bad-txns-inputs-missingorspent"));

        assert_eq!(*coord.snapshot(), *before);
        assert!(!coord.is_halted());
        assert_eq!(coord.undo_depth(), 2);
        assert!(coins.coin(&stake_id).is_some());
        coord.audit(&chain).unwrap();
    }

    #[test]
    fn test_readers_see_old_or_new_branch_only() {
        let coord = ReorgCoordinator::new(StakingParams::default());
        let mut coins = UtxoSet::new();
        let (mut old, _) = staked_chain(&coord, &mut coins);
        for h in 2..6 {
            let b = next_block(&old[old.len() - 1].hash(), h, vec![]);
            connect(&coord, &mut coins, &b);
            old.push(b);
        }
        let old_view = (coord.snapshot().tip_height, coord.pool_balance());

        let mut alt = Vec::new();
        let mut prev = old[0].hash();
        for h in 1..9 {
            let b = next_block(&prev, h, vec![]);
            prev = b.hash();
            alt.push(b);
        }
        let disconnect: Vec<Block> = old[1..].iter().rev().cloned().collect();

        let done = AtomicBool::new(false);
        let seen = std::thread::scope(|s| {
            let reader = s.spawn(|| {
                let mut seen = BTreeSet::new();
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let snap = coord.snapshot();
                    seen.insert((snap.tip_height, snap.pool_balance()));
                    if finished {
                        return seen;
                    }
                }
            });
            coord.reorganize(&disconnect, &alt, &mut coins).unwrap();
            done.store(true, Ordering::Release);
            reader.join().unwrap()
        });

        let new_view = (Some(8), coord.pool_balance());
        assert!(seen.contains(&new_view));
        for view in &seen {
            assert!(*view == old_view || *view == new_view, "intermediate state {:?}", view);
        }
    }

    #[test]
    fn test_open_resumes_from_store() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");
        let mut coins = UtxoSet::new();
        let fingerprint = {
            let store = LedgerStore::open(&path).unwrap();
            let coord = ReorgCoordinator::open(StakingParams::default(), store).unwrap();
            staked_chain(&coord, &mut coins);
            coord.snapshot().fingerprint()
        };

        let store = LedgerStore::open(&path).unwrap();
        let coord = ReorgCoordinator::open(StakingParams::default(), store).unwrap();
        assert_eq!(coord.snapshot().fingerprint(), fingerprint);
        assert_eq!(coord.undo_depth(), 2);
    }
}
