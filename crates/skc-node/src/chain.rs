// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - CHAIN NODE
//
// Wires the best chain, its coin set, the staking ledger and the mempool
// together. Lock order is always chain -> mempool -> ledger, so admission
// and block assembly never interleave on the free-tx quota.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use thiserror::Error;

use skc_core::config::StakingConfig;
use skc_core::primitives::BLOCK_HEADER_SIZE;
use skc_core::{
    Address, Amount, Block, OutPoint, Script, StakingTxKind, Transaction, TxOut, UtxoSet,
    WITNESS_SCALE_FACTOR,
};
use skc_ledger::{
    apply_block, validate_transaction, ConnectSummary, FreeTxInfo, LedgerError, LedgerState, LedgerStore,
    PoolDelta, ReorgCoordinator, ReorgSummary, Stake, StakeInfo, StakeState, StakingSummary,
};

use crate::block_assembler::BlockAssemblyPolicy;
use crate::mempool::{Mempool, MempoolStats};
use crate::metrics::StakingMetrics;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    Mempool(String),

    #[error("coinbase transactions cannot be submitted")]
    Coinbase,

    #[error("invalid payout address: {0}")]
    InvalidAddress(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("fork height {fork} is not on the best chain (tip {tip:?})")]
    UnknownFork { fork: u64, tip: Option<u64> },

    #[error("chain is empty")]
    EmptyChain,
}

impl NodeError {
    /// Reason code of a rejected transaction or block, if that is what this is
    pub fn reject_code(&self) -> Option<&'static str> {
        match self {
            NodeError::Ledger(e) => e.reject_code(),
            _ => None,
        }
    }

    pub fn is_free_tx_rejection(&self) -> bool {
        matches!(self.reject_code(), Some(code) if code.starts_with("invalid-free-tx"))
    }
}

/// Block template ready to be mined
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub height: u64,
    pub block: Block,
    pub fees: Amount,
    pub weight: u64,
    pub free_tx_count: usize,
    pub free_weight: u64,
}

/// Node status as served to operators
#[derive(Serialize, Debug, Clone)]
pub struct NodeStatus {
    pub tip_height: Option<u64>,
    pub tip_hash: String,
    pub halted: Option<String>,
    pub staking: StakingSummary,
    pub mempool: MempoolStats,
    pub undo_depth: usize,
}

struct ChainState {
    blocks: Vec<Block>,
    coins: UtxoSet,
}

pub struct ChainNode {
    ledger: ReorgCoordinator,
    chain: RwLock<ChainState>,
    mempool: Mutex<Mempool>,
    policy: BlockAssemblyPolicy,
    metrics: Option<Arc<StakingMetrics>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| {
        log::warn!("Chain lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| {
        log::warn!("Chain lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        log::warn!("Mempool mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl ChainNode {
    pub fn new(config: &StakingConfig) -> Result<Self, NodeError> {
        config.validate().map_err(NodeError::Config)?;
        Ok(Self::assemble(
            config,
            ReorgCoordinator::new(config.params()),
            ChainState {
                blocks: Vec::new(),
                coins: UtxoSet::new(),
            },
        ))
    }

    /// Resume from `store` on top of `blocks` (genesis first). When the
    /// stored ledger does not end at the last block it is rebuilt from
    /// `blocks` and written back.
    pub fn open(config: &StakingConfig, store: LedgerStore, blocks: Vec<Block>) -> Result<Self, NodeError> {
        config.validate().map_err(NodeError::Config)?;
        let ledger = ReorgCoordinator::open(config.params(), store)?;

        let mut coins = UtxoSet::new();
        for (height, block) in blocks.iter().enumerate() {
            let height = height as u64;
            coins
                .connect_block(block, height)
                .map_err(|detail| LedgerError::ConsistencyFault { height, detail })?;
        }

        let in_step = match (ledger.tip(), blocks.last()) {
            (None, None) => true,
            (Some((height, hash)), Some(last)) => height + 1 == blocks.len() as u64 && hash == last.hash(),
            _ => false,
        };
        if !in_step {
            log::warn!(
                "Stored ledger tip {:?} does not match chain of {} blocks, rebuilding",
                ledger.tip().map(|(h, _)| h),
                blocks.len()
            );
            ledger.rebuild(&blocks)?;
        }

        Ok(Self::assemble(config, ledger, ChainState { blocks, coins }))
    }

    fn assemble(config: &StakingConfig, ledger: ReorgCoordinator, chain: ChainState) -> Self {
        Self {
            ledger,
            chain: RwLock::new(chain),
            mempool: Mutex::new(Mempool::new()),
            policy: BlockAssemblyPolicy::from_config(&config.block_assembly),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<StakingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ledger(&self) -> &ReorgCoordinator {
        &self.ledger
    }

    pub fn policy(&self) -> &BlockAssemblyPolicy {
        &self.policy
    }

    pub fn tip_height(&self) -> Option<u64> {
        self.ledger.tip().map(|(h, _)| h)
    }

    pub fn best_chain(&self) -> Vec<Block> {
        read(&self.chain).blocks.clone()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        read(&self.chain).blocks.get(height as usize).cloned()
    }

    // ─────────────────────────────────────────────────────────────
    // Transaction admission
    // ─────────────────────────────────────────────────────────────

    /// Validate `tx` against the tip and add it to the mempool.
    /// Zero-fee ordinary transfers go through the free-tx quota.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<String, NodeError> {
        let chain = read(&self.chain);
        let mut mempool = safe_lock(&self.mempool);
        let result = self.admit(&chain.coins, &mut mempool, tx);
        if let Err(e) = &result {
            log::debug!("Transaction rejected: {}", e);
            if let Some(m) = &self.metrics {
                m.tx_rejections_total.inc();
                if e.is_free_tx_rejection() {
                    m.free_tx_rejections_total.inc();
                }
            }
        }
        self.observe_mempool(&mempool);
        result
    }

    fn admit(&self, coins: &UtxoSet, mempool: &mut Mempool, tx: Transaction) -> Result<String, NodeError> {
        if tx.is_coinbase() {
            return Err(NodeError::Coinbase);
        }
        let txid = tx.txid();
        if mempool.contains(&txid) {
            return Err(NodeError::Mempool("txn-already-in-mempool".to_string()));
        }
        if let Some(other) = mempool.conflicting_txid(&tx) {
            return Err(NodeError::Mempool(format!("txn-mempool-conflict with {}", other)));
        }

        let vtx = self.ledger.validate_transaction(&tx, coins)?;
        // zero-fee staking operations are not charged to a quota; they
        // simply rank last by fee rate
        let fee_exempt = vtx.is_free();
        if fee_exempt {
            self.ledger
                .validate_free_tx(&vtx)
                .map_err(LedgerError::from)?;
        }

        match mempool.add_transaction(tx, &vtx, fee_exempt) {
            Ok(evicted) => {
                for entry in evicted.iter().filter(|e| e.fee_exempt) {
                    self.ledger.release_free_tx(&entry.txid);
                }
                Ok(txid)
            }
            Err(msg) => {
                if fee_exempt {
                    self.ledger.release_free_tx(&txid);
                }
                Err(NodeError::Mempool(msg))
            }
        }
    }

    /// Drop everything older than the mempool expiry as of `now`
    pub fn expire_mempool(&self, now: u64) -> usize {
        let mut mempool = safe_lock(&self.mempool);
        let removed = mempool.remove_expired(now);
        for entry in removed.iter().filter(|e| e.fee_exempt) {
            self.ledger.release_free_tx(&entry.txid);
        }
        self.observe_mempool(&mempool);
        removed.len()
    }

    /// Re-admit every mempool entry against the current tip, `first` ahead
    /// of the existing entries. Entries that no longer validate are dropped.
    fn revalidate_mempool(&self, coins: &UtxoSet, mempool: &mut Mempool, first: Vec<Transaction>) {
        let entries = mempool.drain();
        for entry in entries.iter().filter(|e| e.fee_exempt) {
            self.ledger.release_free_tx(&entry.txid);
        }

        let mut dropped = 0usize;
        for tx in first.into_iter().chain(entries.into_iter().map(|e| e.tx)) {
            if let Err(e) = self.admit(coins, mempool, tx) {
                dropped += 1;
                log::debug!("Dropped from mempool after chain update: {}", e);
            }
        }
        if dropped > 0 {
            log::info!("{} mempool transactions invalidated by chain update", dropped);
        }
        self.observe_mempool(mempool);
    }

    // ─────────────────────────────────────────────────────────────
    // Block assembly
    // ─────────────────────────────────────────────────────────────

    /// Build a template on top of the tip paying subsidy and fees to
    /// `payout_address`. The template is checked against a copy of the
    /// ledger before it is returned.
    pub fn build_block_template(&self, payout_address: &str, timestamp: u64) -> Result<BlockTemplate, NodeError> {
        let payout = Script::pay_to_address(payout_address)
            .ok_or_else(|| NodeError::InvalidAddress(payout_address.to_string()))?;
        if let Some(reason) = self.ledger.halt_reason() {
            return Err(LedgerError::Halted(reason).into());
        }

        let chain = read(&self.chain);
        let mempool = safe_lock(&self.mempool);
        let params = self.ledger.params();
        let snap = self.ledger.snapshot();
        let height = snap.next_height();

        // ledger as the first transaction of the new block will see it
        let mut probe = LedgerState::clone(&snap);
        probe.begin_block(height, params, &mut PoolDelta::default());

        let placeholder = Transaction::coinbase(height, vec![TxOut::new(0, payout.clone())]);
        let reserved = BLOCK_HEADER_SIZE * WITNESS_SCALE_FACTOR + placeholder.weight();
        let budget = self.policy.block_max_weight.saturating_sub(reserved);

        let mut pool_balance = probe.pool_balance();
        let mut free_used: BTreeMap<Address, u64> = BTreeMap::new();
        let mut fees: Amount = 0;
        let selection = self.policy.select_transactions(&mempool, budget, |entry| {
            let vtx = match validate_transaction(
                &probe.stakes,
                pool_balance,
                params,
                &entry.tx,
                &chain.coins,
                height,
            ) {
                Ok(vtx) => vtx,
                Err(reason) => {
                    log::debug!("Skipping {} for template: {}", entry.txid, reason);
                    return false;
                }
            };

            if vtx.is_free() {
                if let Some(sender) = vtx.sender.as_deref() {
                    let limit = probe.free_tx_limit(sender, params);
                    if limit > 0 {
                        let used = probe
                            .free_tx
                            .window_at(sender, height, &params.free_tx)
                            .used
                            .saturating_add(free_used.get(sender).copied().unwrap_or(0));
                        if used.saturating_add(vtx.vsize) > limit {
                            return false;
                        }
                        *free_used.entry(sender.to_string()).or_default() += vtx.vsize;
                    }
                }
            }

            pool_balance = pool_balance
                .saturating_sub(vtx.pool_debit())
                .saturating_add(vtx.pool_credit());
            fees = fees.saturating_add(vtx.fee);
            true
        });

        let coinbase = Transaction::coinbase(
            height,
            vec![TxOut::new(
                params.subsidy.miner_subsidy(height).saturating_add(fees),
                payout,
            )],
        );
        let mut transactions = Vec::with_capacity(selection.len() + 1);
        transactions.push(coinbase);
        transactions.extend(selection.entries.iter().map(|e| e.tx.clone()));
        let block = Block::new(snap.tip_hash.clone(), timestamp, transactions);

        let mut trial = LedgerState::clone(&snap);
        apply_block(&mut trial, params, &block, height, &chain.coins)?;

        Ok(BlockTemplate {
            height,
            weight: block.weight(),
            block,
            fees,
            free_tx_count: selection.free_count,
            free_weight: selection.free_weight,
        })
    }

    // ─────────────────────────────────────────────────────────────
    // Chain events
    // ─────────────────────────────────────────────────────────────

    /// Connect `block` on top of the tip
    pub fn connect_block(&self, block: Block) -> Result<ConnectSummary, NodeError> {
        let mut chain = write(&self.chain);
        let height = chain.blocks.len() as u64;

        let timer = self
            .metrics
            .as_ref()
            .map(|m| m.block_connect_duration_seconds.start_timer());
        let summary = self
            .ledger
            .on_block_connected(&block, height, &chain.coins)
            .map_err(|e| self.record(e))?;
        if let Err(detail) = chain.coins.connect_block(&block, height) {
            self.ledger.halt(detail.clone());
            return Err(self.record(LedgerError::ConsistencyFault { height, detail }).into());
        }
        drop(timer);

        let mut mempool = safe_lock(&self.mempool);
        for entry in mempool.remove_for_block(&block) {
            if entry.fee_exempt {
                self.ledger.release_free_tx(&entry.txid);
            }
        }
        chain.blocks.push(block);

        if let Some(m) = &self.metrics {
            m.blocks_connected_total.inc();
            m.update_ledger_metrics(&self.ledger.snapshot());
        }
        self.observe_mempool(&mempool);
        Ok(summary)
    }

    /// Disconnect the tip and return its transactions to the mempool
    pub fn disconnect_tip(&self) -> Result<Block, NodeError> {
        let mut chain = write(&self.chain);
        let block = chain.blocks.last().cloned().ok_or(NodeError::EmptyChain)?;
        let height = chain.blocks.len() as u64 - 1;

        self.ledger
            .on_block_disconnected(&block, height)
            .map_err(|e| self.record(e))?;
        if let Err(detail) = chain.coins.disconnect_block(&block, height) {
            self.ledger.halt(detail.clone());
            return Err(self.record(LedgerError::ConsistencyFault { height, detail }).into());
        }
        chain.blocks.pop();

        let returned: Vec<Transaction> = block
            .transactions
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .cloned()
            .collect();
        let mut mempool = safe_lock(&self.mempool);
        self.revalidate_mempool(&chain.coins, &mut mempool, returned);

        if let Some(m) = &self.metrics {
            m.blocks_disconnected_total.inc();
            m.update_ledger_metrics(&self.ledger.snapshot());
        }
        Ok(block)
    }

    /// Replace everything above `fork_height` with `branch`.
    ///
    /// All or nothing: if any block of `branch` fails the old branch stays
    /// the best chain and the error is returned.
    pub fn reorganize(&self, fork_height: u64, branch: Vec<Block>) -> Result<ReorgSummary, NodeError> {
        let mut guard = write(&self.chain);
        let chain = &mut *guard;
        let len = chain.blocks.len() as u64;
        if fork_height >= len {
            return Err(NodeError::UnknownFork {
                fork: fork_height,
                tip: len.checked_sub(1),
            });
        }

        let old: Vec<Block> = chain.blocks[(fork_height as usize + 1)..].to_vec();
        let off: Vec<Block> = old.iter().rev().cloned().collect();

        match self.ledger.reorganize(&off, &branch, &mut chain.coins) {
            Ok(summary) => {
                chain.blocks.truncate(fork_height as usize + 1);
                chain.blocks.extend(branch);

                let returned: Vec<Transaction> = old
                    .iter()
                    .flat_map(|b| b.transactions.iter())
                    .filter(|tx| !tx.is_coinbase())
                    .cloned()
                    .collect();
                let mut mempool = safe_lock(&self.mempool);
                self.revalidate_mempool(&chain.coins, &mut mempool, returned);

                if let Some(m) = &self.metrics {
                    m.reorgs_total.inc();
                    m.blocks_disconnected_total.inc_by(summary.disconnected as u64);
                    m.blocks_connected_total.inc_by(summary.connected.len() as u64);
                    m.update_ledger_metrics(&self.ledger.snapshot());
                }
                Ok(summary)
            }
            Err(e) => {
                log::warn!("Reorg to fork height {} failed: {}", fork_height, e);
                Err(self.record(e).into())
            }
        }
    }

    fn record(&self, e: LedgerError) -> LedgerError {
        if let Some(m) = &self.metrics {
            if matches!(e, LedgerError::ConsistencyFault { .. }) {
                m.consistency_faults_total.inc();
            }
        }
        e
    }

    fn observe_mempool(&self, mempool: &Mempool) {
        if let Some(m) = &self.metrics {
            m.update_mempool_metrics(&mempool.stats());
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Audit
    // ─────────────────────────────────────────────────────────────

    /// Replay the best chain and compare with the live ledger
    pub fn audit(&self) -> Result<(), NodeError> {
        let chain = read(&self.chain);
        self.ledger
            .audit(&chain.blocks)
            .map_err(|e| self.record(e).into())
    }

    /// Recompute the ledger from the best chain and re-admit the mempool
    pub fn rebuild(&self) -> Result<(), NodeError> {
        let chain = read(&self.chain);
        self.ledger.rebuild(&chain.blocks)?;
        let mut mempool = safe_lock(&self.mempool);
        self.revalidate_mempool(&chain.coins, &mut mempool, Vec::new());
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────

    pub fn stake(&self, id: &OutPoint) -> Result<Stake, NodeError> {
        Ok(self.ledger.stake(id)?)
    }

    pub fn stake_info(&self, id: &OutPoint) -> Result<StakeInfo, NodeError> {
        Ok(self.ledger.stake_info(id)?)
    }

    /// Confirmed stakes of `address` followed by deposits still waiting in
    /// the mempool (state `Pending`)
    pub fn stakes_for_address(&self, address: &str) -> Vec<Stake> {
        let mut stakes = self.ledger.stakes_for_address(address);
        stakes.extend(self.pending_stakes(address));
        stakes
    }

    pub fn pending_stakes(&self, address: &str) -> Vec<Stake> {
        let next_height = self.ledger.snapshot().next_height();
        let mempool = safe_lock(&self.mempool);
        mempool
            .iter_by_admission()
            .filter_map(|entry| match &entry.kind {
                StakingTxKind::Deposit(deposit) if deposit.address == address => {
                    let id = OutPoint::new(entry.txid.clone(), deposit.output_index);
                    let mut stake = Stake::from_deposit(id, deposit, next_height);
                    stake.state = StakeState::Pending;
                    Some(stake)
                }
                _ => None,
            })
            .collect()
    }

    pub fn free_tx_info(&self, address: &str) -> Result<FreeTxInfo, NodeError> {
        Ok(self.ledger.free_tx_info(address)?)
    }

    pub fn staking_summary(&self) -> StakingSummary {
        self.ledger.staking_summary()
    }

    pub fn pool_balance(&self) -> Amount {
        self.ledger.pool_balance()
    }

    /// `getgovpower`
    pub fn gov_power(&self, address: &str) -> Amount {
        self.ledger.gov_power(address)
    }

    pub fn status(&self) -> NodeStatus {
        let snap = self.ledger.snapshot();
        NodeStatus {
            tip_height: snap.tip_height,
            tip_hash: snap.tip_hash.clone(),
            halted: self.ledger.halt_reason(),
            staking: snap.staking_summary(),
            mempool: self.mempool_stats(),
            undo_depth: self.ledger.undo_depth(),
        }
    }

    pub fn status_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.status())
    }

    pub fn mempool_stats(&self) -> MempoolStats {
        safe_lock(&self.mempool).stats()
    }

    pub fn mempool_contains(&self, txid: &str) -> bool {
        safe_lock(&self.mempool).contains(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skc_core::staking_tx::deposit_outputs;
    use skc_core::{derive_address, TxIn, COIN};
    use skc_ledger::RejectReason;
    use tempfile::TempDir;

    fn pay(label: &[u8], value: Amount) -> TxOut {
        TxOut::new(value, Script::pay_to_address(&derive_address(label)).unwrap())
    }

    fn miner() -> Address {
        derive_address(b"miner")
    }

    /// Genesis pays alice `n` coins of 100 each
    fn funded_node(n: usize) -> (ChainNode, Vec<OutPoint>) {
        let node = ChainNode::new(&StakingConfig::default()).unwrap();
        let funding = Transaction::coinbase(0, (0..n).map(|_| pay(b"alice", 100 * COIN)).collect());
        let coins = (0..n as u32)
            .map(|i| OutPoint::new(funding.txid(), i))
            .collect();
        node.connect_block(Block::new("", 0, vec![funding])).unwrap();
        (node, coins)
    }

    fn mine(node: &ChainNode) -> BlockTemplate {
        let height = node.ledger().snapshot().next_height();
        let template = node.build_block_template(&miner(), height).unwrap();
        node.connect_block(template.block.clone()).unwrap();
        template
    }

    /// alice stakes `amount` out of `coin`, change back to her, 1000 units fee
    fn deposit_tx(coin: &OutPoint, amount: Amount) -> Transaction {
        let mut outputs = deposit_outputs(&derive_address(b"alice"), amount, 0).unwrap();
        outputs.push(pay(b"alice", 100 * COIN - amount - 1_000));
        Transaction::new(vec![TxIn::spending(coin.clone())], outputs)
    }

    fn free_tx(coin: &OutPoint) -> Transaction {
        Transaction::new(vec![TxIn::spending(coin.clone())], vec![pay(b"alice", 100 * COIN)])
    }

    #[test]
    fn test_free_tx_needs_stake() {
        let (node, coins) = funded_node(1);
        let err = node.submit_transaction(free_tx(&coins[0])).unwrap_err();
        assert!(err.is_free_tx_rejection());
        assert!(node.mempool_stats().size == 0);
    }

    #[test]
    fn test_deposit_pending_then_active() {
        let (node, coins) = funded_node(1);
        let alice = derive_address(b"alice");
        node.submit_transaction(deposit_tx(&coins[0], 10 * COIN)).unwrap();

        let stakes = node.stakes_for_address(&alice);
        assert_eq!(stakes.len(), 1);
        assert_eq!(stakes[0].state, StakeState::Pending);

        let template = mine(&node);
        assert_eq!(template.fees, 1_000);
        let stakes = node.stakes_for_address(&alice);
        assert_eq!(stakes.len(), 1);
        assert_eq!(stakes[0].state, StakeState::Active);
        assert_eq!(stakes[0].deposit_height, 1);
        assert!(node.mempool_stats().size == 0);
    }

    #[test]
    fn test_free_tx_flows_into_block() {
        let (node, coins) = funded_node(2);
        let alice = derive_address(b"alice");
        node.submit_transaction(deposit_tx(&coins[0], 10 * COIN)).unwrap();
        mine(&node);

        let tx = free_tx(&coins[1]);
        let size = tx.vsize();
        let txid = node.submit_transaction(tx).unwrap();
        let info = node.free_tx_info(&alice).unwrap();
        assert_eq!(info.limit, 600);
        assert_eq!(info.used_mempool_limit, size);

        let template = mine(&node);
        assert_eq!(template.free_tx_count, 1);
        assert_eq!(template.block.transactions[1].txid(), txid);

        let info = node.free_tx_info(&alice).unwrap();
        assert_eq!(info.used_mempool_limit, 0);
        assert_eq!(info.used_blockchain_limit, size);
        assert_eq!(info.day_window_end_height, 2 + 143);
    }

    #[test]
    fn test_free_tx_quota_enforced_at_admission() {
        let (node, coins) = funded_node(8);
        node.submit_transaction(deposit_tx(&coins[0], 5 * COIN)).unwrap();
        mine(&node);

        // limit 300 bytes, all free txs have the same size
        let size = free_tx(&coins[1]).vsize();
        let mut admitted = 0u64;
        let mut last_err = None;
        for coin in &coins[1..] {
            match node.submit_transaction(free_tx(coin)) {
                Ok(_) => admitted += 1,
                Err(e) => last_err = Some(e),
            }
        }
        assert_eq!(admitted, 300 / size);
        let err = last_err.unwrap();
        assert_eq!(err.reject_code(), Some("invalid-free-tx-mempool-validation"));
        assert!(matches!(
            err,
            NodeError::Ledger(LedgerError::Rejected(RejectReason::FreeTxOverQuota { limit: 300, .. }))
        ));
    }

    #[test]
    fn test_disconnect_returns_txs_to_mempool() {
        let (node, coins) = funded_node(2);
        let alice = derive_address(b"alice");
        node.submit_transaction(deposit_tx(&coins[0], 10 * COIN)).unwrap();
        mine(&node);
        let txid = node.submit_transaction(free_tx(&coins[1])).unwrap();
        mine(&node);
        assert!(!node.mempool_contains(&txid));

        let block = node.disconnect_tip().unwrap();
        assert_eq!(block.transactions[1].txid(), txid);
        assert!(node.mempool_contains(&txid));
        assert_eq!(node.tip_height(), Some(1));

        let info = node.free_tx_info(&alice).unwrap();
        assert_eq!(info.used_blockchain_limit, 0);
        assert!(info.used_mempool_limit > 0);
        node.audit().unwrap();
    }

    #[test]
    fn test_reorganize_is_all_or_nothing() {
        let (node, coins) = funded_node(2);
        node.submit_transaction(deposit_tx(&coins[0], 10 * COIN)).unwrap();
        mine(&node);
        let txid = node.submit_transaction(free_tx(&coins[1])).unwrap();
        mine(&node);
        let main_tip = node.ledger().snapshot().tip_hash.clone();
        let before = node.ledger().snapshot().fingerprint();

        // side branch forks after the deposit and carries two empty blocks
        let fork = node.block_at(1).unwrap();
        let s2 = Block::new(fork.hash(), 1_002, vec![Transaction::coinbase(2, vec![pay(b"other", COIN)])]);
        let s3 = Block::new(s2.hash(), 1_003, vec![Transaction::coinbase(3, vec![pay(b"other", COIN)])]);

        // a bad branch: spends a coin that does not exist
        let bad_spend = free_tx(&OutPoint::new("ff".repeat(32), 0));
        let b2 = Block::new(
            fork.hash(),
            2_002,
            vec![Transaction::coinbase(2, vec![pay(b"other", COIN)]), bad_spend],
        );
        let err = node.reorganize(1, vec![b2]).unwrap_err();
        assert_eq!(err.reject_code(), Some("bad-txns-inputs-missingorspent"));
        assert_eq!(node.ledger().snapshot().tip_hash, main_tip);
        assert_eq!(node.ledger().snapshot().fingerprint(), before);
        assert_eq!(node.tip_height(), Some(2));
        assert!(!node.ledger().is_halted());
        node.audit().unwrap();

        let summary = node.reorganize(1, vec![s2, s3.clone()]).unwrap();
        assert_eq!(summary.disconnected, 1);
        assert_eq!(summary.connected.len(), 2);
        assert_eq!(node.tip_height(), Some(3));
        assert_eq!(node.ledger().snapshot().tip_hash, s3.hash());
        assert!(node.mempool_contains(&txid));
        node.audit().unwrap();

        assert!(matches!(
            node.reorganize(9, Vec::new()),
            Err(NodeError::UnknownFork { fork: 9, .. })
        ));
    }

    #[test]
    fn test_open_resumes_or_rebuilds() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ledger");
        let config = StakingConfig::default();

        let (blocks, pool) = {
            let store = LedgerStore::open(&path).unwrap();
            let node = ChainNode::open(&config, store, Vec::new()).unwrap();
            let funding = Transaction::coinbase(0, vec![pay(b"alice", 100 * COIN)]);
            let coin = OutPoint::new(funding.txid(), 0);
            node.connect_block(Block::new("", 0, vec![funding])).unwrap();
            node.submit_transaction(deposit_tx(&coin, 10 * COIN)).unwrap();
            mine(&node);
            (node.best_chain(), node.pool_balance())
        };

        // same chain: resumes as stored
        {
            let store = LedgerStore::open(&path).unwrap();
            let node = ChainNode::open(&config, store, blocks.clone()).unwrap();
            assert_eq!(node.tip_height(), Some(1));
            assert_eq!(node.pool_balance(), pool);
            assert_eq!(node.stakes_for_address(&derive_address(b"alice")).len(), 1);
            node.audit().unwrap();
        }

        // the store is behind the block list: rebuilt from blocks
        let extra = Block::new(
            blocks[1].hash(),
            9,
            vec![Transaction::coinbase(2, vec![pay(b"miner", COIN)])],
        );
        let mut longer = blocks;
        longer.push(extra);
        let store = LedgerStore::open(&path).unwrap();
        let node = ChainNode::open(&config, store, longer).unwrap();
        assert_eq!(node.tip_height(), Some(2));
        assert_eq!(node.pool_balance(), pool + 50 * COIN);
        node.audit().unwrap();

        let status: serde_json::Value = serde_json::from_str(&node.status_json().unwrap()).unwrap();
        assert_eq!(status["tip_height"], 2);
        assert_eq!(status["staking"]["num_stakes"], 1);
    }

    #[test]
    fn test_template_rejects_bad_payout_and_tracks_metrics() {
        let metrics = StakingMetrics::new().unwrap();
        let node = ChainNode::new(&StakingConfig::default())
            .unwrap()
            .with_metrics(metrics.clone());
        assert!(matches!(
            node.build_block_template("not-an-address", 0),
            Err(NodeError::InvalidAddress(_))
        ));

        let genesis = node.build_block_template(&miner(), 0).unwrap();
        assert_eq!(genesis.height, 0);
        node.connect_block(genesis.block).unwrap();
        assert_eq!(metrics.blocks_connected_total.get(), 1);
        assert_eq!(metrics.tip_height.get(), 0);
        assert_eq!(
            metrics.staking_pool_balance.get() as u64,
            node.pool_balance()
        );
    }
}
