// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - SCENARIO HARNESS
//
// Small helpers shared by the end-to-end tests: funded wallets, deposit and
// spend builders, and a miner that turns templates into connected blocks.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use skc_core::config::StakingConfig;
use skc_core::staking_tx::deposit_outputs;
use skc_core::{derive_address, Address, Amount, Block, OutPoint, Script, Transaction, TxIn, TxOut};
use skc_node::{BlockTemplate, ChainNode, NodeError};

pub fn address(label: &str) -> Address {
    derive_address(label.as_bytes())
}

/// Output paying `value` to the wallet named `label`
pub fn pay(label: &str, value: Amount) -> TxOut {
    let script = Script::pay_to_address(&address(label)).unwrap_or_default();
    TxOut::new(value, script)
}

/// A node whose genesis block pays `label` one output of `value` per entry
/// in `0..outputs`. Returns the node and the funded outpoints.
pub fn funded_node(
    config: &StakingConfig,
    label: &str,
    outputs: usize,
    value: Amount,
) -> Result<(ChainNode, Vec<OutPoint>), NodeError> {
    let node = ChainNode::new(config)?;
    let funding = Transaction::coinbase(0, (0..outputs).map(|_| pay(label, value)).collect());
    let txid = funding.txid();
    node.connect_block(Block::new("", 0, vec![funding]))?;
    let coins = (0..outputs as u32).map(|i| OutPoint::new(txid.clone(), i)).collect();
    Ok((node, coins))
}

/// Build a template for the next height, stamp it with `salt + height` and
/// connect it
pub fn mine(node: &ChainNode, salt: u64) -> Result<BlockTemplate, NodeError> {
    let height = node.ledger().snapshot().next_height();
    let template = node.build_block_template(&address("miner"), salt + height)?;
    node.connect_block(template.block.clone())?;
    Ok(template)
}

pub fn mine_many(node: &ChainNode, count: u64, salt: u64) -> Result<(), NodeError> {
    for _ in 0..count {
        mine(node, salt)?;
    }
    Ok(())
}

/// `label` stakes `amount` for `period_index` out of `coin` worth `value`,
/// change back to `label` less `fee`
pub fn deposit_tx(
    label: &str,
    coin: &OutPoint,
    value: Amount,
    amount: Amount,
    period_index: u8,
    fee: Amount,
) -> Transaction {
    let mut outputs = deposit_outputs(&address(label), amount, period_index).unwrap_or_default();
    outputs.push(pay(label, value.saturating_sub(amount).saturating_sub(fee)));
    Transaction::new(vec![TxIn::spending(coin.clone())], outputs)
}

/// Spend `coin` back to `label` as a single output of `value`
pub fn spend_to_self(label: &str, coin: &OutPoint, value: Amount) -> Transaction {
    Transaction::new(vec![TxIn::spending(coin.clone())], vec![pay(label, value)])
}
