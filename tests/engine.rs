//! Claim engine tests: settlement arithmetic, per-controller pooling,
//! operator approvals, and conservation. Links the library without the
//! test feature, so the production table sizes are exercised.

use bytemuck::Zeroable;
use carafe_prog::engine::{settle, ClaimEngine, EngineError, MAX_CONTROLLERS, MAX_OPERATORS};

fn key(n: u8) -> [u8; 32] {
    [n; 32]
}

fn key2(hi: u8, lo: u8) -> [u8; 32] {
    let mut k = [0u8; 32];
    k[0] = hi;
    k[1] = lo;
    k
}

#[test]
fn settle_is_proportional() {
    // 100 assets standing for 90 shares, claimed in two steps.
    assert_eq!(settle(40, 100, 90), Ok((36, 60, 54)));
    assert_eq!(settle(60, 60, 54), Ok((54, 0, 0)));

    // Rounding always favors custody: release floors, debit ceils.
    assert_eq!(settle(30, 90, 100), Ok((33, 60, 66)));
}

#[test]
fn settle_full_claim_is_exact() {
    assert_eq!(settle(100, 100, 90), Ok((90, 0, 0)));
    assert_eq!(settle(90, 90, 100), Ok((100, 0, 0)));
    assert_eq!(settle(1, 1, u64::MAX), Ok((u64::MAX, 0, 0)));
    assert_eq!(settle(u64::MAX, u64::MAX, 1), Ok((1, 0, 0)));
}

#[test]
fn settle_collapses_dust_residuals() {
    // A residual pair with either side at zero is cleared entirely.
    assert_eq!(settle(2, 3, 1), Ok((0, 0, 0)));
    assert_eq!(settle(1, 3, 1), Ok((0, 0, 0)));
    assert_eq!(settle(1, u64::MAX, 1), Ok((0, 0, 0)));
}

#[test]
fn settle_error_precedence() {
    assert_eq!(settle(0, 100, 90), Err(EngineError::ZeroAmount));
    assert_eq!(settle(101, 100, 90), Err(EngineError::InsufficientBalance));
    // Balance is checked before the zero-amount guard.
    assert_eq!(settle(1, 0, 0), Err(EngineError::InsufficientBalance));
    assert_eq!(settle(0, 0, 0), Err(EngineError::ZeroAmount));
}

#[test]
fn deposit_lifecycle() {
    let mut engine = ClaimEngine::zeroed();
    let k = key(1);

    engine.credit_deposit(&k, 100, 90).unwrap();
    assert_eq!(engine.claimable_deposit_request(&k), (100, 90));
    assert_eq!(engine.pending_deposit_request(&k), 0);
    assert_eq!(engine.controller_count(), 1);

    assert_eq!(engine.claim_deposit(&k, 40), Ok(36));
    assert_eq!(engine.claimable_deposit_request(&k), (60, 54));

    assert_eq!(engine.claim_deposit(&k, 60), Ok(54));
    assert_eq!(engine.claimable_deposit_request(&k), (0, 0));
    assert_eq!(engine.controller_count(), 0);
    assert!(engine.check_conservation());
}

#[test]
fn mint_lifecycle() {
    let mut engine = ClaimEngine::zeroed();
    let k = key(2);

    engine.credit_deposit(&k, 100, 90).unwrap();
    assert_eq!(engine.claim_mint(&k, 36), Ok(40));
    assert_eq!(engine.claimable_deposit_request(&k), (60, 54));
    assert_eq!(engine.claim_mint(&k, 54), Ok(60));
    assert_eq!(engine.claimable_deposit_request(&k), (0, 0));
    assert!(engine.check_conservation());
}

#[test]
fn redeem_lifecycle() {
    let mut engine = ClaimEngine::zeroed();
    let k = key(3);

    engine.credit_redeem(&k, 90, 100).unwrap();
    assert_eq!(engine.claimable_redeem_request(&k), (90, 100));
    assert_eq!(engine.pending_redeem_request(&k), 0);

    assert_eq!(engine.claim_redeem(&k, 30), Ok(33));
    assert_eq!(engine.claimable_redeem_request(&k), (60, 66));

    assert_eq!(engine.claim_withdraw(&k, 66), Ok(60));
    assert_eq!(engine.claimable_redeem_request(&k), (0, 0));
    assert_eq!(engine.controller_count(), 0);
    assert!(engine.check_conservation());
}

#[test]
fn deposit_and_redeem_sides_are_independent() {
    let mut engine = ClaimEngine::zeroed();
    let k = key(4);

    engine.credit_deposit(&k, 100, 90).unwrap();
    engine.credit_redeem(&k, 50, 55).unwrap();
    assert_eq!(engine.controller_count(), 1);

    assert_eq!(engine.claim_deposit(&k, 100), Ok(90));
    assert_eq!(engine.claimable_deposit_request(&k), (0, 0));
    // The redeem side keeps the slot alive.
    assert_eq!(engine.claimable_redeem_request(&k), (50, 55));
    assert_eq!(engine.controller_count(), 1);

    assert_eq!(engine.claim_redeem(&k, 50), Ok(55));
    assert_eq!(engine.controller_count(), 0);
    assert!(engine.check_conservation());
}

#[test]
fn requests_pool_per_controller() {
    let mut engine = ClaimEngine::zeroed();
    let k = key(5);

    engine.credit_deposit(&k, 100, 90).unwrap();
    engine.credit_deposit(&k, 50, 40).unwrap();
    assert_eq!(engine.claimable_deposit_request(&k), (150, 130));
    assert_eq!(engine.controller_count(), 1);

    let other = key(6);
    engine.credit_deposit(&other, 10, 9).unwrap();
    assert_eq!(engine.claimable_deposit_request(&other), (10, 9));
    assert_eq!(engine.controller_count(), 2);
    assert!(engine.check_conservation());
}

#[test]
fn released_slots_are_reused() {
    let mut engine = ClaimEngine::zeroed();

    engine.credit_deposit(&key(7), 10, 10).unwrap();
    assert_eq!(engine.claim_deposit(&key(7), 10), Ok(10));
    assert_eq!(engine.controller_count(), 0);

    engine.credit_deposit(&key(8), 20, 20).unwrap();
    assert_eq!(engine.controller_count(), 1);
    assert_eq!(engine.claimable_deposit_request(&key(7)), (0, 0));
    assert_eq!(engine.claimable_deposit_request(&key(8)), (20, 20));
}

#[test]
fn claims_on_unknown_controllers() {
    let mut engine = ClaimEngine::zeroed();
    let k = key(9);

    assert_eq!(engine.claim_deposit(&k, 5), Err(EngineError::InsufficientBalance));
    assert_eq!(engine.claim_deposit(&k, 0), Err(EngineError::ZeroAmount));
    assert_eq!(engine.claim_redeem(&k, 5), Err(EngineError::InsufficientBalance));
    assert_eq!(engine.claim_withdraw(&k, 0), Err(EngineError::ZeroAmount));
    assert_eq!(engine.claimable_deposit_request(&k), (0, 0));
    assert_eq!(engine.claimable_redeem_request(&k), (0, 0));
}

#[test]
fn credits_reject_zero_amounts() {
    let mut engine = ClaimEngine::zeroed();
    let k = key(10);

    assert_eq!(engine.credit_deposit(&k, 0, 5), Err(EngineError::ZeroAmount));
    assert_eq!(engine.credit_deposit(&k, 5, 0), Err(EngineError::ZeroAmount));
    assert_eq!(engine.credit_redeem(&k, 0, 0), Err(EngineError::ZeroAmount));
    assert_eq!(engine.controller_count(), 0);
}

#[test]
fn credit_overflow_leaves_state_untouched() {
    let mut engine = ClaimEngine::zeroed();
    let k = key(11);

    engine.credit_deposit(&k, u64::MAX - 1, 10).unwrap();
    assert_eq!(engine.credit_deposit(&k, 2, 1), Err(EngineError::Overflow));
    assert_eq!(engine.claimable_deposit_request(&k), (u64::MAX - 1, 10));
    assert!(engine.check_conservation());
}

#[test]
fn credit_overflow_does_not_allocate_a_slot() {
    let mut engine = ClaimEngine::zeroed();
    let held = key(12);
    let newcomer = key(13);

    engine.credit_deposit(&held, u64::MAX, 1).unwrap();
    assert_eq!(
        engine.credit_deposit(&newcomer, 1, 1),
        Err(EngineError::Overflow)
    );
    // The rejected controller must not be left occupying a slot.
    assert_eq!(engine.controller_count(), 1);
    assert_eq!(engine.claimable_deposit_request(&newcomer), (0, 0));

    engine.credit_redeem(&held, u64::MAX, 1).unwrap();
    assert_eq!(
        engine.credit_redeem(&newcomer, 1, 1),
        Err(EngineError::Overflow)
    );
    assert_eq!(engine.controller_count(), 1);
    assert!(engine.check_conservation());
}

#[test]
fn controller_table_fills_up() {
    let mut engine = ClaimEngine::zeroed();
    for i in 0..MAX_CONTROLLERS {
        let k = key2((i >> 8) as u8, (i & 0xff) as u8);
        engine.credit_deposit(&k, 1, 1).unwrap();
    }
    assert_eq!(engine.controller_count(), MAX_CONTROLLERS);

    let overflow = key2(0xff, 0xfe);
    assert_eq!(
        engine.credit_deposit(&overflow, 1, 1),
        Err(EngineError::TableFull)
    );

    // Draining one entry frees its slot for the newcomer.
    let first = key2(0, 0);
    assert_eq!(engine.claim_deposit(&first, 1), Ok(1));
    engine.credit_deposit(&overflow, 1, 1).unwrap();
    assert!(engine.check_conservation());
}

#[test]
fn operator_approval_and_revocation() {
    let mut engine = ClaimEngine::zeroed();
    let owner = key(20);
    let operator = key(21);

    assert!(!engine.is_operator(&owner, &operator));
    engine.set_operator(&owner, &operator, true).unwrap();
    assert!(engine.is_operator(&owner, &operator));
    // Approval is directional.
    assert!(!engine.is_operator(&operator, &owner));

    // Idempotent in both directions.
    engine.set_operator(&owner, &operator, true).unwrap();
    assert_eq!(engine.operator_count(), 1);
    engine.set_operator(&owner, &operator, false).unwrap();
    assert!(!engine.is_operator(&owner, &operator));
    engine.set_operator(&owner, &operator, false).unwrap();
    assert_eq!(engine.operator_count(), 0);
}

#[test]
fn self_operator_is_rejected() {
    let mut engine = ClaimEngine::zeroed();
    let owner = key(22);

    assert_eq!(
        engine.set_operator(&owner, &owner, true),
        Err(EngineError::SelfOperator)
    );
    assert_eq!(
        engine.set_operator(&owner, &owner, false),
        Err(EngineError::SelfOperator)
    );
    assert_eq!(engine.operator_count(), 0);
}

#[test]
fn operator_table_fills_up() {
    let mut engine = ClaimEngine::zeroed();
    let owner = key(23);
    for i in 0..MAX_OPERATORS {
        let op = key2(1 + (i >> 8) as u8, (i & 0xff) as u8);
        engine.set_operator(&owner, &op, true).unwrap();
    }
    assert_eq!(engine.operator_count(), MAX_OPERATORS);

    let overflow = key2(0xfe, 0xff);
    assert_eq!(
        engine.set_operator(&owner, &overflow, true),
        Err(EngineError::TableFull)
    );

    let first = key2(1, 0);
    engine.set_operator(&owner, &first, false).unwrap();
    engine.set_operator(&owner, &overflow, true).unwrap();
    assert!(engine.is_operator(&owner, &overflow));
}

#[test]
fn conservation_detects_corruption() {
    let mut engine = ClaimEngine::zeroed();
    engine.credit_deposit(&key(30), 100, 90).unwrap();
    assert!(engine.check_conservation());

    engine.total_deposit_assets += 1;
    assert!(!engine.check_conservation());
}

#[test]
fn solvency_tracks_custody() {
    let mut engine = ClaimEngine::zeroed();
    engine.credit_deposit(&key(31), 100, 90).unwrap();
    engine.credit_redeem(&key(31), 40, 44).unwrap();

    assert!(engine.solvent(90, 44));
    assert!(engine.solvent(95, 50));
    assert!(!engine.solvent(89, 44));
    assert!(!engine.solvent(90, 43));
}
