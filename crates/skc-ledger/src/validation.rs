// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - STAKE-AWARE TRANSACTION VALIDATION
//
// Values every input at its effective worth (stake outputs carry a penalty
// before maturity and a reward after it), checks the burn declaration and
// derives the fee. Matured rewards are capped at what the pool still holds,
// so a stake's principal can always be withdrawn. The result is computed once and carried explicitly; no
// other code path recomputes burned amounts or fees.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use skc_core::params::StakingParams;
use skc_core::{classify, money_range, Address, Amount, StakingTxKind, Transaction, UtxoView};

use crate::error::RejectReason;
use crate::stake_ledger::{StakeLedger, StakeSpend};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTx {
    pub txid: String,
    pub vsize: u64,
    pub coinbase: bool,
    pub kind: StakingTxKind,
    /// Sum of effective input values
    pub value_in: Amount,
    pub value_out: Amount,
    pub burned: Amount,
    pub fee: Amount,
    pub stake_spends: Vec<StakeSpend>,
    /// Single address owning every spent coin, if there is one
    pub sender: Option<Address>,
}

impl ValidatedTx {
    /// Zero-fee ordinary transaction: the only shape charged to a quota
    pub fn is_free(&self) -> bool {
        !self.coinbase && self.fee == 0 && self.stake_spends.is_empty() && self.kind.is_ordinary()
    }

    pub fn pool_credit(&self) -> Amount {
        self.stake_spends
            .iter()
            .fold(self.burned, |acc, s| acc.saturating_add(s.penalty))
    }

    pub fn pool_debit(&self) -> Amount {
        self.stake_spends
            .iter()
            .fold(0u64, |acc, s| acc.saturating_add(s.reward))
    }

    /// Fee per byte, scaled by 1000 to keep integer ordering precise
    pub fn fee_rate_millis(&self) -> u64 {
        if self.vsize == 0 {
            return 0;
        }
        ((self.fee as u128 * 1_000) / self.vsize as u128).min(u64::MAX as u128) as u64
    }
}

/// Validate `tx` as if it confirmed at `height`.
///
/// `pool_balance` bounds the rewards the transaction may claim; once it is
/// used up later matured inputs are worth their principal only.
pub fn validate_transaction(
    stakes: &StakeLedger,
    pool_balance: Amount,
    params: &StakingParams,
    tx: &Transaction,
    view: &dyn UtxoView,
    height: u64,
) -> Result<ValidatedTx, RejectReason> {
    let txid = tx.txid();
    let value_out = tx.value_out().ok_or(RejectReason::ValueOverflow)?;
    if !money_range(value_out) {
        return Err(RejectReason::ValueOverflow);
    }
    let kind = classify(tx, &params.stake);

    if tx.is_coinbase() {
        return Ok(ValidatedTx {
            txid,
            vsize: tx.vsize(),
            coinbase: true,
            kind,
            value_in: 0,
            value_out,
            burned: 0,
            fee: 0,
            stake_spends: Vec::new(),
            sender: None,
        });
    }

    let mut seen = BTreeSet::new();
    let mut value_in: Amount = 0;
    let mut stake_spends = Vec::new();
    let mut senders: BTreeSet<Address> = BTreeSet::new();
    let mut unowned_input = false;
    let mut pool_available = pool_balance;

    for input in &tx.inputs {
        if !seen.insert(&input.prevout) {
            return Err(RejectReason::MissingInput {
                outpoint: input.prevout.clone(),
            });
        }
        let coin = view
            .coin(&input.prevout)
            .ok_or_else(|| RejectReason::MissingInput {
                outpoint: input.prevout.clone(),
            })?;

        match coin.output.script_pubkey.address() {
            Some(addr) => {
                senders.insert(addr);
            }
            None => unowned_input = true,
        }

        let worth = match stakes.spend_outcome(&input.prevout, height, &params.stake) {
            Some(mut spend) => {
                if spend.matured && spend.reward > pool_available {
                    spend.reward = pool_available;
                    spend.effective_value = spend.amount.saturating_add(spend.reward);
                }
                pool_available -= spend.reward;
                let v = spend.effective_value;
                stake_spends.push(spend);
                v
            }
            None => coin.output.value,
        };
        value_in = value_in
            .checked_add(worth)
            .filter(|v| money_range(*v))
            .ok_or(RejectReason::ValueOverflow)?;
    }

    if value_in < value_out {
        return Err(RejectReason::InputsBelowOutputs {
            value_in,
            value_out,
        });
    }

    let declared = kind.declared_burn();
    let available = value_in - value_out;
    if available < declared {
        return Err(RejectReason::BurnAmountMismatch {
            declared,
            available,
        });
    }

    let sender = if senders.len() == 1 && !unowned_input {
        senders.into_iter().next()
    } else {
        None
    };

    Ok(ValidatedTx {
        txid,
        vsize: tx.vsize(),
        coinbase: false,
        kind,
        value_in,
        value_out,
        burned: declared,
        fee: available - declared,
        stake_spends,
        sender,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skc_core::params::RewardCoefficient;
    use skc_core::staking_tx::{burn_script, deposit_outputs};
    use skc_core::{
        derive_address, Coin, DepositPayload, MemoryUtxoView, OutPoint, Script, TxIn, TxOut, COIN,
    };

    fn fund(view: &mut MemoryUtxoView, label: &[u8], value: Amount, n: u32) -> OutPoint {
        let op = OutPoint::new(format!("{:064x}", n), 0);
        view.insert(
            op.clone(),
            Coin {
                output: TxOut::new(value, Script::pay_to_address(&derive_address(label)).unwrap()),
                height: 1,
                is_coinbase: false,
            },
        );
        op
    }

    fn pay(label: &[u8], value: Amount) -> TxOut {
        TxOut::new(value, Script::pay_to_address(&derive_address(label)).unwrap())
    }

    #[test]
    fn test_fee_and_sender() {
        let params = StakingParams::default();
        let mut view = MemoryUtxoView::new();
        let a = fund(&mut view, b"alice", 10 * COIN, 1);
        let b = fund(&mut view, b"alice", 5 * COIN, 2);
        let tx = Transaction::new(
            vec![TxIn::spending(a), TxIn::spending(b)],
            vec![pay(b"bob", 14 * COIN)],
        );
        let vtx = validate_transaction(&StakeLedger::new(), 0, &params, &tx, &view, 10).unwrap();
        assert_eq!(vtx.value_in, 15 * COIN);
        assert_eq!(vtx.fee, COIN);
        assert_eq!(vtx.sender, Some(derive_address(b"alice")));
        assert!(!vtx.is_free());
        assert!(vtx.fee_rate_millis() > 0);
    }

    #[test]
    fn test_mixed_senders_have_no_sender() {
        let params = StakingParams::default();
        let mut view = MemoryUtxoView::new();
        let a = fund(&mut view, b"alice", COIN, 1);
        let b = fund(&mut view, b"bob", COIN, 2);
        let tx = Transaction::new(
            vec![TxIn::spending(a), TxIn::spending(b)],
            vec![pay(b"carol", 2 * COIN)],
        );
        let vtx = validate_transaction(&StakeLedger::new(), 0, &params, &tx, &view, 10).unwrap();
        assert_eq!(vtx.sender, None);
        assert!(vtx.is_free());
    }

    #[test]
    fn test_missing_and_duplicate_inputs() {
        let params = StakingParams::default();
        let mut view = MemoryUtxoView::new();
        let a = fund(&mut view, b"alice", COIN, 1);
        let dup = Transaction::new(
            vec![TxIn::spending(a.clone()), TxIn::spending(a)],
            vec![pay(b"bob", COIN)],
        );
        let err = validate_transaction(&StakeLedger::new(), 0, &params, &dup, &view, 10).unwrap_err();
        assert_eq!(err.code(), "bad-txns-inputs-missingorspent");

        let missing = Transaction::new(
            vec![TxIn::spending(OutPoint::new("ee".repeat(32), 3))],
            vec![pay(b"bob", COIN)],
        );
        assert!(validate_transaction(&StakeLedger::new(), 0, &params, &missing, &view, 10).is_err());
    }

    #[test]
    fn test_burn_shortfall_must_cover_declaration() {
        let params = StakingParams::default();
        let mut view = MemoryUtxoView::new();
        let a = fund(&mut view, b"alice", 10 * COIN, 1);

        let ok = Transaction::new(
            vec![TxIn::spending(a.clone())],
            vec![TxOut::new(0, burn_script(3 * COIN)), pay(b"alice", 6 * COIN)],
        );
        let vtx = validate_transaction(&StakeLedger::new(), 0, &params, &ok, &view, 10).unwrap();
        assert_eq!(vtx.burned, 3 * COIN);
        assert_eq!(vtx.fee, COIN);
        assert_eq!(vtx.pool_credit(), 3 * COIN);

        let short = Transaction::new(
            vec![TxIn::spending(a)],
            vec![TxOut::new(0, burn_script(3 * COIN)), pay(b"alice", 8 * COIN)],
        );
        let err = validate_transaction(&StakeLedger::new(), 0, &params, &short, &view, 10).unwrap_err();
        assert_eq!(
            err,
            RejectReason::BurnAmountMismatch {
                declared: 3 * COIN,
                available: 2 * COIN
            }
        );
    }

    #[test]
    fn test_stake_input_valued_with_penalty_before_maturity() {
        let params = StakingParams::default();
        let mut view = MemoryUtxoView::new();
        let addr = derive_address(b"staker");
        let deposit_tx = Transaction::new(
            vec![TxIn::spending(fund(&mut view, b"staker", 401 * COIN, 1))],
            deposit_outputs(&addr, 400 * COIN, 0).unwrap(),
        );
        view.add_outputs(&deposit_tx, 100);
        let stake_id = OutPoint::new(deposit_tx.txid(), 1);

        let mut stakes = StakeLedger::new();
        let payload = DepositPayload {
            output_index: 1,
            period_index: 0,
            period_blocks: 4_320,
            address: addr,
            amount: 400 * COIN,
        };
        stakes.insert_deposit(stake_id.clone(), &payload, 100, RewardCoefficient::FULL, &params.stake);

        let full = Transaction::new(
            vec![TxIn::spending(stake_id.clone())],
            vec![pay(b"staker", 400 * COIN)],
        );
        let err = validate_transaction(&stakes, 0, &params, &full, &view, 104).unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad-txns-in-belowout, value in (38800000000) < value out (40000000000)"
        );

        let penalized = Transaction::new(
            vec![TxIn::spending(stake_id)],
            vec![pay(b"staker", 388 * COIN)],
        );
        let vtx = validate_transaction(&stakes, 0, &params, &penalized, &view, 104).unwrap();
        assert_eq!(vtx.stake_spends.len(), 1);
        assert_eq!(vtx.pool_credit(), 12 * COIN);
        assert_eq!(vtx.fee, 0);
        assert!(!vtx.is_free());
    }

    fn matured_stake(view: &mut MemoryUtxoView, params: &StakingParams) -> (StakeLedger, OutPoint) {
        let addr = derive_address(b"staker");
        let stake_id = fund(view, b"staker", 100 * COIN, 9);
        let mut stakes = StakeLedger::new();
        let payload = DepositPayload {
            output_index: 0,
            period_index: 0,
            period_blocks: 4_320,
            address: addr,
            amount: 100 * COIN,
        };
        stakes.insert_deposit(stake_id.clone(), &payload, 0, RewardCoefficient::FULL, &params.stake);
        for h in 1..4_320 {
            stakes.accrue_block(h, RewardCoefficient::FULL, &params.stake);
        }
        (stakes, stake_id)
    }

    #[test]
    fn test_matured_reward_capped_by_pool() {
        let params = StakingParams::default();
        let mut view = MemoryUtxoView::new();
        let (stakes, stake_id) = matured_stake(&mut view, &params);
        let reward = params.stake.reward_for_full_period(100 * COIN, 0);

        let claim = Transaction::new(
            vec![TxIn::spending(stake_id.clone())],
            vec![pay(b"staker", 100 * COIN + reward)],
        );
        let vtx = validate_transaction(&stakes, reward, &params, &claim, &view, 4_320).unwrap();
        assert_eq!(vtx.pool_debit(), reward);
        assert_eq!(vtx.value_in, 100 * COIN + reward);

        // one unit short: the input is only worth what the pool can pay
        let err = validate_transaction(&stakes, reward - 1, &params, &claim, &view, 4_320).unwrap_err();
        assert_eq!(err.code(), "bad-txns-in-belowout");

        let partial = Transaction::new(
            vec![TxIn::spending(stake_id)],
            vec![pay(b"staker", 100 * COIN + reward - 1)],
        );
        let vtx = validate_transaction(&stakes, reward - 1, &params, &partial, &view, 4_320).unwrap();
        assert_eq!(vtx.stake_spends[0].reward, reward - 1);
        assert_eq!(vtx.pool_debit(), reward - 1);
    }

    #[test]
    fn test_principal_withdrawable_from_empty_pool() {
        let params = StakingParams::default();
        let mut view = MemoryUtxoView::new();
        let (stakes, stake_id) = matured_stake(&mut view, &params);

        let principal = Transaction::new(
            vec![TxIn::spending(stake_id)],
            vec![pay(b"staker", 100 * COIN)],
        );
        let vtx = validate_transaction(&stakes, 0, &params, &principal, &view, 4_320).unwrap();
        assert!(vtx.stake_spends[0].matured);
        assert_eq!(vtx.stake_spends[0].reward, 0);
        assert_eq!(vtx.stake_spends[0].effective_value, 100 * COIN);
        assert_eq!(vtx.pool_debit(), 0);
        assert_eq!(vtx.fee, 0);
    }
}
