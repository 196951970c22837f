// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - UTXO VIEW
//
// The ledger never owns the coin set. It reads spent coins through the
// `UtxoView` trait; `MemoryUtxoView` is the reference implementation used
// by the node and by tests.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::primitives::{Block, OutPoint, Transaction, TxOut};

/// An unspent output together with its confirmation height
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub output: TxOut,
    pub height: u64,
    pub is_coinbase: bool,
}

pub trait UtxoView {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin>;
}

/// Coins spent by one block, in spend order, for disconnect
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockUtxoUndo {
    pub spent: Vec<(OutPoint, Coin)>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MemoryUtxoView {
    coins: BTreeMap<OutPoint, Coin>,
}

impl UtxoView for MemoryUtxoView {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.get(outpoint).cloned()
    }
}

impl MemoryUtxoView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn insert(&mut self, outpoint: OutPoint, coin: Coin) {
        self.coins.insert(outpoint, coin);
    }

    pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.remove(outpoint)
    }

    /// Add every spendable output of `tx`. Data carriers are never added.
    pub fn add_outputs(&mut self, tx: &Transaction, height: u64) {
        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();
        for (vout, out) in tx.outputs.iter().enumerate() {
            if out.script_pubkey.is_data_carrier() {
                continue;
            }
            self.coins.insert(
                OutPoint::new(txid.clone(), vout as u32),
                Coin {
                    output: out.clone(),
                    height,
                    is_coinbase,
                },
            );
        }
    }

    /// Spend inputs and add outputs for every transaction of `block`.
    /// Nothing is modified if an input is missing.
    pub fn apply_block(&mut self, block: &Block, height: u64) -> Result<BlockUtxoUndo, String> {
        let mut scratch = self.clone();
        let mut undo = BlockUtxoUndo::default();
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    let coin = scratch.coins.remove(&input.prevout).ok_or_else(|| {
                        format!("missing input {} in block at height {}", input.prevout, height)
                    })?;
                    undo.spent.push((input.prevout.clone(), coin));
                }
            }
            scratch.add_outputs(tx, height);
        }
        *self = scratch;
        Ok(undo)
    }

    /// Exact inverse of `apply_block`
    pub fn undo_block(&mut self, block: &Block, undo: &BlockUtxoUndo) {
        for tx in block.transactions.iter().rev() {
            let txid = tx.txid();
            for vout in 0..tx.outputs.len() {
                self.coins.remove(&OutPoint::new(txid.clone(), vout as u32));
            }
        }
        for (outpoint, coin) in undo.spent.iter().rev() {
            self.coins.insert(outpoint.clone(), coin.clone());
        }
    }

    /// Coins paying `address`, in outpoint order
    pub fn coins_for_address(&self, address: &str) -> Vec<(OutPoint, Coin)> {
        self.coins
            .iter()
            .filter(|(_, c)| c.output.script_pubkey.address().as_deref() == Some(address))
            .map(|(op, c)| (op.clone(), c.clone()))
            .collect()
    }
}

/// Best-chain coin set with one undo entry per connected height
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct UtxoSet {
    coins: MemoryUtxoView,
    undo: BTreeMap<u64, BlockUtxoUndo>,
}

impl UtxoView for UtxoSet {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        self.coins.coin(outpoint)
    }
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coins(&self) -> &MemoryUtxoView {
        &self.coins
    }

    pub fn connect_block(&mut self, block: &Block, height: u64) -> Result<(), String> {
        if self.undo.contains_key(&height) {
            return Err(format!("height {} already connected", height));
        }
        let undo = self.coins.apply_block(block, height)?;
        self.undo.insert(height, undo);
        Ok(())
    }

    pub fn disconnect_block(&mut self, block: &Block, height: u64) -> Result<(), String> {
        let undo = self
            .undo
            .remove(&height)
            .ok_or_else(|| format!("no coin undo for height {}", height))?;
        self.coins.undo_block(block, &undo);
        Ok(())
    }
}

/// Overlay used while walking a block: outputs created earlier in the same
/// block are visible, coins spent earlier in the same block are hidden.
pub struct BlockOverlay<'a> {
    base: &'a dyn UtxoView,
    added: BTreeMap<OutPoint, Coin>,
    spent: BTreeSet<OutPoint>,
}

impl<'a> BlockOverlay<'a> {
    pub fn new(base: &'a dyn UtxoView) -> Self {
        Self {
            base,
            added: BTreeMap::new(),
            spent: BTreeSet::new(),
        }
    }

    pub fn spend(&mut self, outpoint: &OutPoint) {
        if self.added.remove(outpoint).is_none() {
            self.spent.insert(outpoint.clone());
        }
    }

    pub fn add_outputs(&mut self, tx: &Transaction, height: u64) {
        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();
        for (vout, out) in tx.outputs.iter().enumerate() {
            if out.script_pubkey.is_data_carrier() {
                continue;
            }
            self.added.insert(
                OutPoint::new(txid.clone(), vout as u32),
                Coin {
                    output: out.clone(),
                    height,
                    is_coinbase,
                },
            );
        }
    }
}

impl UtxoView for BlockOverlay<'_> {
    fn coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        if let Some(coin) = self.added.get(outpoint) {
            return Some(coin.clone());
        }
        if self.spent.contains(outpoint) {
            return None;
        }
        self.base.coin(outpoint)
    }
}
