use bytemuck::Zeroable;
use carafe_prog::engine::ClaimEngine;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

#[test]
fn deterministic_fuzz_simulation() {
    let seed = [0xabu8; 16];
    let mut rng = XorShiftRng::from_seed(seed);
    let mut engine = ClaimEngine::zeroed();

    // Custody model: shares in custody back the deposit side, assets back
    // the redeem side. Dust from collapsed residuals stays in custody, so
    // only what a claim actually releases is subtracted.
    let mut share_custody: u64 = 0;
    let mut asset_custody: u64 = 0;

    let controllers: Vec<[u8; 32]> = (1..=8u8).map(|i| [i; 32]).collect();

    for i in 0..2000 {
        let op: u8 = rng.gen_range(0..8);
        let k = controllers[rng.gen_range(0..controllers.len())];

        match op {
            0 => { // Credit deposit
                let assets = rng.gen_range(0..500u64);
                let shares = rng.gen_range(0..500u64);
                if engine.credit_deposit(&k, assets, shares).is_ok() {
                    share_custody += shares;
                }
            },
            1 => { // Claim deposit by assets
                let (bal, _) = engine.claimable_deposit_request(&k);
                let claim = rng.gen_range(0..=bal.saturating_add(2));
                if let Ok(released) = engine.claim_deposit(&k, claim) {
                    share_custody -= released;
                }
            },
            2 => { // Claim deposit by shares
                let (_, bal) = engine.claimable_deposit_request(&k);
                let claim = rng.gen_range(0..=bal.saturating_add(2));
                if engine.claim_mint(&k, claim).is_ok() {
                    share_custody -= claim;
                }
            },
            3 => { // Credit redeem
                let shares = rng.gen_range(0..500u64);
                let assets = rng.gen_range(0..500u64);
                if engine.credit_redeem(&k, shares, assets).is_ok() {
                    asset_custody += assets;
                }
            },
            4 => { // Claim redeem by shares
                let (bal, _) = engine.claimable_redeem_request(&k);
                let claim = rng.gen_range(0..=bal.saturating_add(2));
                if let Ok(released) = engine.claim_redeem(&k, claim) {
                    asset_custody -= released;
                }
            },
            5 => { // Claim redeem by assets
                let (_, bal) = engine.claimable_redeem_request(&k);
                let claim = rng.gen_range(0..=bal.saturating_add(2));
                if engine.claim_withdraw(&k, claim).is_ok() {
                    asset_custody -= claim;
                }
            },
            6 => { // Approve operator
                let op_key = controllers[rng.gen_range(0..controllers.len())];
                let _ = engine.set_operator(&k, &op_key, true);
            },
            7 => { // Revoke operator
                let op_key = controllers[rng.gen_range(0..controllers.len())];
                let _ = engine.set_operator(&k, &op_key, false);
            },
            _ => {}
        }

        assert!(engine.check_conservation(), "Conservation violated at step {}", i);
        assert!(
            engine.solvent(share_custody, asset_custody),
            "Custody shortfall at step {}",
            i
        );
    }
}

#[test]
fn fuzz_claim_sequences_never_overdraw() {
    let seed = [0x17u8; 16];
    let mut rng = XorShiftRng::from_seed(seed);

    // Arbitrary claim sequences against one balance must never hand out
    // more than was credited, regardless of rounding.
    for _ in 0..200 {
        let mut engine = ClaimEngine::zeroed();
        let k = [9u8; 32];
        let assets = rng.gen_range(1..10_000u64);
        let shares = rng.gen_range(1..10_000u64);
        engine.credit_deposit(&k, assets, shares).unwrap();

        let mut released_total: u64 = 0;
        loop {
            let (bal, _) = engine.claimable_deposit_request(&k);
            if bal == 0 {
                break;
            }
            let claim = rng.gen_range(1..=bal);
            released_total += engine.claim_deposit(&k, claim).unwrap();
        }
        assert!(released_total <= shares);
        assert_eq!(engine.controller_count(), 0);
    }
}
