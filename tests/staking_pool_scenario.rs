// ========================================
// STAKING POOL SCENARIOS
// ========================================
//
// Test Scenarios:
// 1. Early withdrawal pays the 3% penalty into the pool
// 2. Matured withdrawal draws the reward from the pool
// 3. Burns credit the pool, mismatched burns are rejected
// 4. Disconnect/reconnect leaves pool and stakes bit-identical
// 5. Governance power converges when a node switches branches
// 6. An empty pool still lets a matured stake withdraw its principal
//
// Usage:
//   cargo test --test staking_pool_scenario -- --nocapture
//
// ========================================

use skc_core::config::StakingConfig;
use skc_core::staking_tx::burn_script;
use skc_core::{OutPoint, Transaction, TxIn, TxOut, COIN};
use skc_ledger::StakeState;
use stakechain_integration_tests::{address, deposit_tx, funded_node, mine, mine_many, pay, spend_to_self};

// ========================================
// TEST 1: EARLY WITHDRAWAL PENALTY
// ========================================
#[test]
fn test_early_withdrawal_pays_penalty_into_pool() {
    println!("\n🧪 TEST 1: Early withdrawal penalty");

    let config = StakingConfig::default();
    let (node, coins) = funded_node(&config, "alice", 1, 1_000 * COIN).unwrap();
    mine(&node, 0).unwrap();
    let prior = node.pool_balance();

    // deposit 400 coins at height H
    let deposit = deposit_tx("alice", &coins[0], 1_000 * COIN, 400 * COIN, 0, 1_000);
    let stake_id = OutPoint::new(deposit.txid(), 1);
    node.submit_transaction(deposit).unwrap();
    let h = mine(&node, 0).unwrap().height;
    assert_eq!(node.pool_balance(), prior + 50 * COIN, "deposit itself leaves the pool alone");
    assert_eq!(node.stake(&stake_id).unwrap().state, StakeState::Active);
    println!("✅ Stake of 400 coins confirmed at height {}", h);

    mine_many(&node, 2, 0).unwrap();

    // spending the full amount ignores the penalty
    let err = node
        .submit_transaction(spend_to_self("alice", &stake_id, 400 * COIN))
        .unwrap_err();
    assert_eq!(err.reject_code(), Some("bad-txns-in-belowout"));
    assert_eq!(
        err.to_string(),
        "bad-txns-in-belowout, value in (38800000000) < value out (40000000000)"
    );
    println!("✅ Spend without penalty rejected: {}", err);

    // 3% of 400 = 12 coins left behind
    let early = spend_to_self("alice", &stake_id, 388 * COIN);
    let early_txid = node.submit_transaction(early).unwrap();
    let template = mine(&node, 0).unwrap();
    assert_eq!(template.height, h + 3);
    assert!(template.block.transactions.iter().any(|tx| tx.txid() == early_txid));

    assert_eq!(node.pool_balance(), prior + 4 * 50 * COIN + 12 * COIN);
    let stake = node.stake(&stake_id).unwrap();
    assert_eq!(stake.state, StakeState::WithdrawnEarly);
    assert_eq!(stake.payout, Some(388 * COIN));
    assert_eq!(stake.withdrawn_height, Some(h + 3));

    let summary = node.staking_summary();
    assert_eq!(summary.withdrawn_early, 1);
    assert_eq!(summary.num_stakes, 0);
    assert!(node.stakes_for_address(&address("alice")).is_empty());
    node.audit().unwrap();
    println!("✅ Pool = prior + 4×50 + 12 = {}", node.pool_balance());
}

// ========================================
// TEST 2: MATURED WITHDRAWAL
// ========================================
#[test]
fn test_matured_withdrawal_pays_reward_from_pool() {
    println!("\n🧪 TEST 2: Matured withdrawal");

    let mut config = StakingConfig::default();
    config.staking.periods = vec![10, 20, 30, 40];
    let (node, coins) = funded_node(&config, "alice", 1, 1_000 * COIN).unwrap();

    let deposit = deposit_tx("alice", &coins[0], 1_000 * COIN, 400 * COIN, 0, 1_000);
    let stake_id = OutPoint::new(deposit.txid(), 1);
    node.submit_transaction(deposit).unwrap();
    let h = mine(&node, 0).unwrap().height;

    let reward = config.staking.reward_for_full_period(400 * COIN, 0);
    assert!(reward > 0);

    // accrual is monotone until maturity
    let mut last = 0;
    for _ in 0..9 {
        mine(&node, 0).unwrap();
        let info = node.stake_info(&stake_id).unwrap();
        assert!(info.accumulated_reward >= last);
        last = info.accumulated_reward;
    }
    assert_eq!(node.tip_height(), Some(h + 9));
    assert_eq!(last, reward);

    // one unit more than amount + reward is too much
    let greedy = spend_to_self("alice", &stake_id, 400 * COIN + reward + 1);
    assert_eq!(
        node.submit_transaction(greedy).unwrap_err().reject_code(),
        Some("bad-txns-in-belowout")
    );

    let before = node.pool_balance();
    node.submit_transaction(spend_to_self("alice", &stake_id, 400 * COIN + reward))
        .unwrap();
    mine(&node, 0).unwrap();

    assert_eq!(node.pool_balance(), before + 50 * COIN - reward);
    let stake = node.stake(&stake_id).unwrap();
    assert_eq!(stake.state, StakeState::WithdrawnNormal);
    assert_eq!(stake.accumulated_reward, reward);
    assert_eq!(stake.payout, Some(400 * COIN + reward));

    let info = node.stake_info(&stake_id).unwrap();
    assert!(info.fulfilled);
    assert!(info.paid_out);
    println!("✅ Reward of {} paid from the pool", reward);
}

// ========================================
// TEST 3: BURNS
// ========================================
#[test]
fn test_burn_credits_pool() {
    println!("\n🧪 TEST 3: Burns");

    let config = StakingConfig::default();
    let (node, coins) = funded_node(&config, "alice", 2, 100 * COIN).unwrap();
    let prior = node.pool_balance();

    // declares 5 coins but only 1 coin goes missing
    let short = Transaction::new(
        vec![TxIn::spending(coins[0].clone())],
        vec![TxOut::new(0, burn_script(5 * COIN)), pay("alice", 99 * COIN)],
    );
    let err = node.submit_transaction(short).unwrap_err();
    assert_eq!(err.reject_code(), Some("bad-txns-burn-amount-mismatch"));

    let burn = Transaction::new(
        vec![TxIn::spending(coins[1].clone())],
        vec![TxOut::new(0, burn_script(5 * COIN)), pay("alice", 95 * COIN - 1_000)],
    );
    node.submit_transaction(burn).unwrap();
    let template = mine(&node, 0).unwrap();
    assert_eq!(template.fees, 1_000);

    assert_eq!(node.pool_balance(), prior + 50 * COIN + 5 * COIN);
    let status: serde_json::Value = serde_json::from_str(&node.status_json().unwrap()).unwrap();
    assert_eq!(status["staking"]["staking_pool"], node.pool_balance());
    println!("✅ Burn of 5 coins credited");
}

// ========================================
// TEST 4: REORG IDEMPOTENCE
// ========================================
#[test]
fn test_disconnect_reconnect_restores_ledger() {
    println!("\n🧪 TEST 4: Disconnect / reconnect");

    let config = StakingConfig::default();
    let (node, coins) = funded_node(&config, "alice", 2, 500 * COIN).unwrap();

    let deposit = deposit_tx("alice", &coins[0], 500 * COIN, 400 * COIN, 1, 1_000);
    let stake_id = OutPoint::new(deposit.txid(), 1);
    node.submit_transaction(deposit).unwrap();
    mine_many(&node, 3, 0).unwrap();
    node.submit_transaction(spend_to_self("alice", &stake_id, 388 * COIN))
        .unwrap();
    mine(&node, 0).unwrap();

    let pool = node.pool_balance();
    let fingerprint = node.ledger().snapshot().fingerprint();

    let mut off = Vec::new();
    for _ in 0..3 {
        off.push(node.disconnect_tip().unwrap());
    }
    assert_ne!(node.pool_balance(), pool);
    assert_eq!(node.stake(&stake_id).unwrap().state, StakeState::Active);

    for block in off.into_iter().rev() {
        node.connect_block(block).unwrap();
    }
    assert_eq!(node.pool_balance(), pool);
    assert_eq!(node.ledger().snapshot().fingerprint(), fingerprint);
    assert_eq!(node.stake(&stake_id).unwrap().state, StakeState::WithdrawnEarly);
    assert_eq!(node.mempool_stats().size, 0);
    println!("✅ Ledger identical after excursion");
}

// ========================================
// TEST 5: GOVERNANCE POWER ACROSS REORGS
// ========================================
#[test]
fn test_gov_power_converges_across_reorg() {
    println!("\n🧪 TEST 5: Governance power across branches");

    let config = StakingConfig::default();
    let alice = address("alice");
    let (node_a, coins) = funded_node(&config, "alice", 1, 1_000 * COIN).unwrap();
    let (node_b, _) = funded_node(&config, "alice", 1, 1_000 * COIN).unwrap();

    let deposit = deposit_tx("alice", &coins[0], 1_000 * COIN, 300 * COIN, 0, 1_000);
    let stake_id = OutPoint::new(deposit.txid(), 1);
    node_a.submit_transaction(deposit.clone()).unwrap();
    node_b.submit_transaction(deposit).unwrap();
    assert_eq!(node_a.gov_power(&alice), 0, "pending deposits carry no power");
    mine(&node_a, 0).unwrap();
    mine(&node_b, 0).unwrap();
    assert_eq!(node_a.best_chain(), node_b.best_chain());

    // A extends to 9, B to 14 on a different branch
    mine_many(&node_a, 8, 0).unwrap();
    mine_many(&node_b, 13, 1_000).unwrap();
    let gp_a = node_a.gov_power(&alice);
    let gp_b = node_b.gov_power(&alice);
    assert_eq!(gp_a, 300 * COIN * 9 / 21_600);
    assert_eq!(gp_b, 300 * COIN * 14 / 21_600);
    assert!(gp_a < gp_b);
    println!("✅ Before reorg: A {} < B {}", gp_a, gp_b);

    let b_branch: Vec<_> = node_b.best_chain()[2..].to_vec();
    let summary = node_a.reorganize(1, b_branch).unwrap();
    assert_eq!(summary.disconnected, 8);
    assert_eq!(summary.connected.len(), 13);
    assert_eq!(node_a.gov_power(&alice), gp_b);
    assert_eq!(node_a.ledger().snapshot().fingerprint(), node_b.ledger().snapshot().fingerprint());
    println!("✅ After reorg: A matches B at {}", node_a.gov_power(&alice));

    // an early withdrawal keeps the power earned so far, and it stops growing
    node_a
        .submit_transaction(spend_to_self("alice", &stake_id, 291 * COIN))
        .unwrap();
    mine(&node_a, 0).unwrap();
    assert_eq!(
        node_a.stake(&stake_id).unwrap().state,
        StakeState::WithdrawnEarly
    );
    assert_eq!(node_a.gov_power(&alice), gp_b);
    mine_many(&node_a, 3, 0).unwrap();
    assert_eq!(node_a.gov_power(&alice), gp_b);
    node_a.audit().unwrap();
    println!("✅ Power kept after withdrawal");
}

// ========================================
// TEST 6: EMPTY POOL
// ========================================
#[test]
fn test_empty_pool_still_returns_principal() {
    println!("\n🧪 TEST 6: Matured withdrawal against an empty pool");

    let mut config = StakingConfig::default();
    config.staking.periods = vec![10, 20, 30, 40];
    config.subsidy.pool_share_bps = 0;
    let (node, coins) = funded_node(&config, "alice", 1, 1_000 * COIN).unwrap();

    let deposit = deposit_tx("alice", &coins[0], 1_000 * COIN, 400 * COIN, 0, 1_000);
    let stake_id = OutPoint::new(deposit.txid(), 1);
    node.submit_transaction(deposit).unwrap();
    mine_many(&node, 11, 0).unwrap();
    assert_eq!(node.pool_balance(), 0);
    assert!(node.stake_info(&stake_id).unwrap().fulfilled);

    // the pool cannot pay anything on top of the principal
    let greedy = spend_to_self("alice", &stake_id, 400 * COIN + 1);
    assert_eq!(
        node.submit_transaction(greedy).unwrap_err().reject_code(),
        Some("bad-txns-in-belowout")
    );

    node.submit_transaction(spend_to_self("alice", &stake_id, 400 * COIN))
        .unwrap();
    mine(&node, 0).unwrap();
    let stake = node.stake(&stake_id).unwrap();
    assert_eq!(stake.state, StakeState::WithdrawnNormal);
    assert_eq!(stake.payout, Some(400 * COIN));
    assert_eq!(stake.accumulated_reward, 0);
    assert_eq!(node.pool_balance(), 0);
    node.audit().unwrap();
    println!("✅ Principal of 400 coins withdrawn, pool untouched");
}
