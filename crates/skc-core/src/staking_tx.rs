// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - STAKING TRANSACTION ENCODING
//
// The first output of a staking transaction is a zero-value data carrier:
//
//   deposit: 6a 53 44 <stake output index> <period index>
//   burn:    6a 53 42 <amount, u64 little-endian>
//
// Anything that does not match exactly is ordinary data and is ignored.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};

use crate::params::StakeRules;
use crate::primitives::{Script, Transaction, TxOut, OP_RETURN};
use crate::{money_range, Address, Amount};

/// Fixed two-byte tag opening every staking payload
pub const STAKING_TX_HEADER: [u8; 2] = [OP_RETURN, 0x53];

pub const DEPOSIT_SUBHEADER: u8 = 0x44;
pub const BURN_SUBHEADER: u8 = 0x42;

const DEPOSIT_SCRIPT_LEN: usize = 5;
const BURN_SCRIPT_LEN: usize = 11;

/// A recognized stake deposit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositPayload {
    /// Index of the output holding the staked coins
    pub output_index: u32,
    pub period_index: u8,
    pub period_blocks: u64,
    pub address: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakingTxKind {
    Ordinary,
    Deposit(DepositPayload),
    /// Declared amount. The coins themselves are the input/output shortfall.
    Burn { declared: Amount },
}

impl StakingTxKind {
    pub fn is_ordinary(&self) -> bool {
        matches!(self, StakingTxKind::Ordinary)
    }

    pub fn declared_burn(&self) -> Amount {
        match self {
            StakingTxKind::Burn { declared } => *declared,
            _ => 0,
        }
    }
}

/// Data-carrier script for a deposit whose stake sits at `output_index`
pub fn deposit_script(output_index: u8, period_index: u8) -> Script {
    Script::new(vec![
        STAKING_TX_HEADER[0],
        STAKING_TX_HEADER[1],
        DEPOSIT_SUBHEADER,
        output_index,
        period_index,
    ])
}

pub fn burn_script(amount: Amount) -> Script {
    let mut bytes = Vec::with_capacity(BURN_SCRIPT_LEN);
    bytes.extend_from_slice(&STAKING_TX_HEADER);
    bytes.push(BURN_SUBHEADER);
    bytes.extend_from_slice(&amount.to_le_bytes());
    Script::new(bytes)
}

/// Outputs for a deposit: tag at index 0, stake at index 1
pub fn deposit_outputs(address: &str, amount: Amount, period_index: u8) -> Option<Vec<TxOut>> {
    Some(vec![
        TxOut::new(0, deposit_script(1, period_index)),
        TxOut::new(amount, Script::pay_to_address(address)?),
    ])
}

/// Classify a transaction. Never fails: malformed payloads are `Ordinary`.
pub fn classify(tx: &Transaction, rules: &StakeRules) -> StakingTxKind {
    let tag = match tx.outputs.first() {
        Some(out) if out.value == 0 => out.script_pubkey.as_bytes(),
        _ => return StakingTxKind::Ordinary,
    };
    if tag.len() < 3 || tag[..2] != STAKING_TX_HEADER {
        return StakingTxKind::Ordinary;
    }
    match tag[2] {
        DEPOSIT_SUBHEADER => parse_deposit(tx, tag, rules)
            .map(StakingTxKind::Deposit)
            .unwrap_or(StakingTxKind::Ordinary),
        BURN_SUBHEADER => parse_burn(tag)
            .map(|declared| StakingTxKind::Burn { declared })
            .unwrap_or(StakingTxKind::Ordinary),
        _ => StakingTxKind::Ordinary,
    }
}

fn parse_deposit(tx: &Transaction, tag: &[u8], rules: &StakeRules) -> Option<DepositPayload> {
    if tag.len() != DEPOSIT_SCRIPT_LEN {
        return None;
    }
    let output_index = tag[3] as usize;
    let period_index = tag[4];
    if output_index == 0 || output_index >= tx.outputs.len() {
        return None;
    }
    let period_blocks = rules.period_blocks(period_index)?;
    let stake_out = &tx.outputs[output_index];
    if stake_out.value < rules.min_stake_amount || !money_range(stake_out.value) {
        return None;
    }
    let address = stake_out.script_pubkey.address()?;
    Some(DepositPayload {
        output_index: output_index as u32,
        period_index,
        period_blocks,
        address,
        amount: stake_out.value,
    })
}

fn parse_burn(tag: &[u8]) -> Option<Amount> {
    if tag.len() != BURN_SCRIPT_LEN {
        return None;
    }
    let bytes: [u8; 8] = tag[3..11].try_into().ok()?;
    let declared = u64::from_le_bytes(bytes);
    if declared == 0 || !money_range(declared) {
        return None;
    }
    Some(declared)
}
