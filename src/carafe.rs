//! Carafe: Single-file Solana program that fronts a synchronous pooled fund
//! with an asynchronous request/claim interface and embedded claim accounting.

#![deny(unsafe_code)]

// 1. mod constants
pub mod constants {
    use core::mem::{align_of, size_of};
    use crate::engine::ClaimEngine;
    use crate::state::WrapperConfig;

    pub const MAGIC: u64 = 0x4341524146453030; // "CARAFE00"
    pub const VERSION: u32 = 1;

    /// All requests of a controller are fungible and pool under this id.
    pub const REQUEST_ID: u64 = 0;

    pub const WRAPPER_SEED: &[u8] = b"carafe";
    pub const VAULT_AUTHORITY_SEED: &[u8] = b"vault";

    pub const HEADER_LEN: usize = 64;
    pub const CONFIG_LEN: usize = size_of::<WrapperConfig>();
    pub const ENGINE_ALIGN: usize = align_of::<ClaimEngine>();

    pub const fn align_up(x: usize, a: usize) -> usize {
        (x + (a - 1)) & !(a - 1)
    }

    pub const ENGINE_OFF: usize = align_up(HEADER_LEN + CONFIG_LEN, ENGINE_ALIGN);
    pub const ENGINE_LEN: usize = size_of::<ClaimEngine>();
    pub const SLAB_LEN: usize = ENGINE_OFF + ENGINE_LEN;
}

// 2. mod engine
pub mod engine {
    //! Claim accounting core: per-controller claimable balances, operator
    //! approvals, and proportional settlement of partial claims.
    //!
    //! Fixed-size, `Pod`, no heap, no Solana types. Lives embedded in the
    //! wrapper slab and is mutated in place through `zc`.

    use bytemuck::{Pod, Zeroable};

    /// Capacity of the controller table.
    #[cfg(kani)]
    pub const MAX_CONTROLLERS: usize = 4; // Small for verification tractability
    #[cfg(all(any(test, feature = "test"), not(kani)))]
    pub const MAX_CONTROLLERS: usize = 64;
    #[cfg(all(not(test), not(feature = "test"), not(kani)))]
    pub const MAX_CONTROLLERS: usize = 1024;

    /// Capacity of the operator approval table.
    #[cfg(kani)]
    pub const MAX_OPERATORS: usize = 2;
    #[cfg(all(any(test, feature = "test"), not(kani)))]
    pub const MAX_OPERATORS: usize = 16;
    #[cfg(all(not(test), not(feature = "test"), not(kani)))]
    pub const MAX_OPERATORS: usize = 256;

    pub const CONTROLLER_WORDS: usize = (MAX_CONTROLLERS + 63) / 64;
    pub const OPERATOR_WORDS: usize = (MAX_OPERATORS + 63) / 64;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum EngineError {
        InsufficientBalance,
        ZeroAmount,
        SelfOperator,
        TableFull,
        Overflow,
    }

    /// Outstanding claimable balances of one controller.
    ///
    /// Each pair is either both zero or both positive: a deposit request
    /// credits both deposit fields together, a redeem request credits both
    /// redeem fields together, and settlement never leaves a one-sided
    /// residual. The slot is released once all four fields are zero.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct ControllerEntry {
        pub controller: [u8; 32],
        pub deposit_assets: u64,
        pub deposit_shares: u64,
        pub redeem_shares: u64,
        pub redeem_assets: u64,
    }

    /// One approved (owner, operator) pair. Presence in the table means
    /// approved; revocation clears the slot.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct OperatorEntry {
        pub owner: [u8; 32],
        pub operator: [u8; 32],
    }

    /// The zeroed state is the valid empty engine.
    ///
    /// No u128 fields: BPF aligns u128 to 8 which host targets do not, so
    /// wide math stays transient inside `settle`.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct ClaimEngine {
        pub controller_used: [u64; CONTROLLER_WORDS],
        pub controllers: [ControllerEntry; MAX_CONTROLLERS],
        pub operator_used: [u64; OPERATOR_WORDS],
        pub operators: [OperatorEntry; MAX_OPERATORS],
        pub total_deposit_assets: u64,
        pub total_deposit_shares: u64,
        pub total_redeem_shares: u64,
        pub total_redeem_assets: u64,
    }

    /// Settle a claim of `claim` units against the pair `(this, other)`.
    ///
    /// Returns `(released, this_after, other_after)` where `released` is the
    /// proportional counterpart amount rounded down and the counterpart
    /// balance is decremented by the same quantity rounded up, so repeated
    /// partial claims can never release more than was credited. A residual
    /// with either side at zero is collapsed to `(0, 0)`; the dust stays in
    /// custody. Claiming the full `this` releases exactly `other` and zeroes
    /// the pair.
    pub fn settle(claim: u64, this: u64, other: u64) -> Result<(u64, u64, u64), EngineError> {
        if claim > this {
            return Err(EngineError::InsufficientBalance);
        }
        if claim == 0 {
            return Err(EngineError::ZeroAmount);
        }
        let released = mul_div_floor(claim, other, this)?;
        let debit = mul_div_ceil(claim, other, this)?;
        let mut this_after = this - claim;
        let mut other_after = other.saturating_sub(debit);
        if this_after == 0 || other_after == 0 {
            this_after = 0;
            other_after = 0;
        }
        Ok((released, this_after, other_after))
    }

    fn mul_div_floor(a: u64, b: u64, d: u64) -> Result<u64, EngineError> {
        if d == 0 {
            return Err(EngineError::Overflow);
        }
        let q = (a as u128) * (b as u128) / (d as u128);
        u64::try_from(q).map_err(|_| EngineError::Overflow)
    }

    fn mul_div_ceil(a: u64, b: u64, d: u64) -> Result<u64, EngineError> {
        if d == 0 {
            return Err(EngineError::Overflow);
        }
        let n = (a as u128) * (b as u128);
        let q = (n + (d as u128 - 1)) / (d as u128);
        u64::try_from(q).map_err(|_| EngineError::Overflow)
    }

    impl ClaimEngine {
        pub fn is_controller_used(&self, idx: usize) -> bool {
            self.controller_used[idx / 64] & (1u64 << (idx % 64)) != 0
        }

        fn set_controller_used(&mut self, idx: usize) {
            self.controller_used[idx / 64] |= 1u64 << (idx % 64);
        }

        fn clear_controller_used(&mut self, idx: usize) {
            self.controller_used[idx / 64] &= !(1u64 << (idx % 64));
        }

        pub fn is_operator_used(&self, idx: usize) -> bool {
            self.operator_used[idx / 64] & (1u64 << (idx % 64)) != 0
        }

        fn set_operator_used(&mut self, idx: usize) {
            self.operator_used[idx / 64] |= 1u64 << (idx % 64);
        }

        fn clear_operator_used(&mut self, idx: usize) {
            self.operator_used[idx / 64] &= !(1u64 << (idx % 64));
        }

        pub fn controller_count(&self) -> usize {
            self.controller_used.iter().map(|w| w.count_ones() as usize).sum()
        }

        pub fn operator_count(&self) -> usize {
            self.operator_used.iter().map(|w| w.count_ones() as usize).sum()
        }

        fn find_controller(&self, controller: &[u8; 32]) -> Option<usize> {
            for i in 0..MAX_CONTROLLERS {
                if self.is_controller_used(i) && self.controllers[i].controller == *controller {
                    return Some(i);
                }
            }
            None
        }

        fn alloc_controller(&mut self, controller: &[u8; 32]) -> Result<usize, EngineError> {
            if let Some(idx) = self.find_controller(controller) {
                return Ok(idx);
            }
            for i in 0..MAX_CONTROLLERS {
                if !self.is_controller_used(i) {
                    self.controllers[i] = ControllerEntry::zeroed();
                    self.controllers[i].controller = *controller;
                    self.set_controller_used(i);
                    return Ok(i);
                }
            }
            Err(EngineError::TableFull)
        }

        fn release_if_empty(&mut self, idx: usize) {
            let e = &self.controllers[idx];
            if e.deposit_assets == 0
                && e.deposit_shares == 0
                && e.redeem_shares == 0
                && e.redeem_assets == 0
            {
                self.controllers[idx] = ControllerEntry::zeroed();
                self.clear_controller_used(idx);
            }
        }

        /// Credit a settled deposit request: `assets` were pulled from the
        /// owner and converted into `shares` now held in custody.
        pub fn credit_deposit(
            &mut self,
            controller: &[u8; 32],
            assets: u64,
            shares: u64,
        ) -> Result<(), EngineError> {
            if assets == 0 || shares == 0 {
                return Err(EngineError::ZeroAmount);
            }
            let ta = self
                .total_deposit_assets
                .checked_add(assets)
                .ok_or(EngineError::Overflow)?;
            let ts = self
                .total_deposit_shares
                .checked_add(shares)
                .ok_or(EngineError::Overflow)?;
            let idx = self.alloc_controller(controller)?;
            let e = self.controllers[idx];
            let da = e.deposit_assets.checked_add(assets).ok_or(EngineError::Overflow)?;
            let ds = e.deposit_shares.checked_add(shares).ok_or(EngineError::Overflow)?;
            self.controllers[idx].deposit_assets = da;
            self.controllers[idx].deposit_shares = ds;
            self.total_deposit_assets = ta;
            self.total_deposit_shares = ts;
            Ok(())
        }

        /// Claim `assets` of the controller's deposit balance. Returns the
        /// shares to release from custody.
        pub fn claim_deposit(
            &mut self,
            controller: &[u8; 32],
            assets: u64,
        ) -> Result<u64, EngineError> {
            let idx = match self.find_controller(controller) {
                Some(idx) => idx,
                None if assets == 0 => return Err(EngineError::ZeroAmount),
                None => return Err(EngineError::InsufficientBalance),
            };
            let e = self.controllers[idx];
            let (shares_out, assets_left, shares_left) =
                settle(assets, e.deposit_assets, e.deposit_shares)?;
            let assets_spent = e.deposit_assets - assets_left;
            let shares_spent = e.deposit_shares - shares_left;
            let ta = self
                .total_deposit_assets
                .checked_sub(assets_spent)
                .ok_or(EngineError::Overflow)?;
            let ts = self
                .total_deposit_shares
                .checked_sub(shares_spent)
                .ok_or(EngineError::Overflow)?;
            self.controllers[idx].deposit_assets = assets_left;
            self.controllers[idx].deposit_shares = shares_left;
            self.total_deposit_assets = ta;
            self.total_deposit_shares = ts;
            self.release_if_empty(idx);
            Ok(shares_out)
        }

        /// Claim exactly `shares` of the controller's deposit balance.
        /// Returns the asset quantity those shares account for.
        pub fn claim_mint(
            &mut self,
            controller: &[u8; 32],
            shares: u64,
        ) -> Result<u64, EngineError> {
            let idx = match self.find_controller(controller) {
                Some(idx) => idx,
                None if shares == 0 => return Err(EngineError::ZeroAmount),
                None => return Err(EngineError::InsufficientBalance),
            };
            let e = self.controllers[idx];
            let (assets_out, shares_left, assets_left) =
                settle(shares, e.deposit_shares, e.deposit_assets)?;
            let assets_spent = e.deposit_assets - assets_left;
            let shares_spent = e.deposit_shares - shares_left;
            let ta = self
                .total_deposit_assets
                .checked_sub(assets_spent)
                .ok_or(EngineError::Overflow)?;
            let ts = self
                .total_deposit_shares
                .checked_sub(shares_spent)
                .ok_or(EngineError::Overflow)?;
            self.controllers[idx].deposit_assets = assets_left;
            self.controllers[idx].deposit_shares = shares_left;
            self.total_deposit_assets = ta;
            self.total_deposit_shares = ts;
            self.release_if_empty(idx);
            Ok(assets_out)
        }

        /// Credit a settled redeem request: `shares` were pulled from the
        /// owner and redeemed for `assets` now held in custody.
        pub fn credit_redeem(
            &mut self,
            controller: &[u8; 32],
            shares: u64,
            assets: u64,
        ) -> Result<(), EngineError> {
            if shares == 0 || assets == 0 {
                return Err(EngineError::ZeroAmount);
            }
            let ts = self
                .total_redeem_shares
                .checked_add(shares)
                .ok_or(EngineError::Overflow)?;
            let ta = self
                .total_redeem_assets
                .checked_add(assets)
                .ok_or(EngineError::Overflow)?;
            let idx = self.alloc_controller(controller)?;
            let e = self.controllers[idx];
            let rs = e.redeem_shares.checked_add(shares).ok_or(EngineError::Overflow)?;
            let ra = e.redeem_assets.checked_add(assets).ok_or(EngineError::Overflow)?;
            self.controllers[idx].redeem_shares = rs;
            self.controllers[idx].redeem_assets = ra;
            self.total_redeem_shares = ts;
            self.total_redeem_assets = ta;
            Ok(())
        }

        /// Claim `shares` of the controller's redeem balance. Returns the
        /// assets to release from custody.
        pub fn claim_redeem(
            &mut self,
            controller: &[u8; 32],
            shares: u64,
        ) -> Result<u64, EngineError> {
            let idx = match self.find_controller(controller) {
                Some(idx) => idx,
                None if shares == 0 => return Err(EngineError::ZeroAmount),
                None => return Err(EngineError::InsufficientBalance),
            };
            let e = self.controllers[idx];
            let (assets_out, shares_left, assets_left) =
                settle(shares, e.redeem_shares, e.redeem_assets)?;
            let shares_spent = e.redeem_shares - shares_left;
            let assets_spent = e.redeem_assets - assets_left;
            let ts = self
                .total_redeem_shares
                .checked_sub(shares_spent)
                .ok_or(EngineError::Overflow)?;
            let ta = self
                .total_redeem_assets
                .checked_sub(assets_spent)
                .ok_or(EngineError::Overflow)?;
            self.controllers[idx].redeem_shares = shares_left;
            self.controllers[idx].redeem_assets = assets_left;
            self.total_redeem_shares = ts;
            self.total_redeem_assets = ta;
            self.release_if_empty(idx);
            Ok(assets_out)
        }

        /// Claim exactly `assets` of the controller's redeem balance.
        /// Returns the share quantity those assets account for.
        pub fn claim_withdraw(
            &mut self,
            controller: &[u8; 32],
            assets: u64,
        ) -> Result<u64, EngineError> {
            let idx = match self.find_controller(controller) {
                Some(idx) => idx,
                None if assets == 0 => return Err(EngineError::ZeroAmount),
                None => return Err(EngineError::InsufficientBalance),
            };
            let e = self.controllers[idx];
            let (shares_out, assets_left, shares_left) =
                settle(assets, e.redeem_assets, e.redeem_shares)?;
            let assets_spent = e.redeem_assets - assets_left;
            let shares_spent = e.redeem_shares - shares_left;
            let ta = self
                .total_redeem_assets
                .checked_sub(assets_spent)
                .ok_or(EngineError::Overflow)?;
            let ts = self
                .total_redeem_shares
                .checked_sub(shares_spent)
                .ok_or(EngineError::Overflow)?;
            self.controllers[idx].redeem_assets = assets_left;
            self.controllers[idx].redeem_shares = shares_left;
            self.total_redeem_assets = ta;
            self.total_redeem_shares = ts;
            self.release_if_empty(idx);
            Ok(shares_out)
        }

        fn find_operator(&self, owner: &[u8; 32], operator: &[u8; 32]) -> Option<usize> {
            for i in 0..MAX_OPERATORS {
                if self.is_operator_used(i)
                    && self.operators[i].owner == *owner
                    && self.operators[i].operator == *operator
                {
                    return Some(i);
                }
            }
            None
        }

        /// Approve or revoke `operator` for `owner`. Idempotent in both
        /// directions; an address can never be its own operator.
        pub fn set_operator(
            &mut self,
            owner: &[u8; 32],
            operator: &[u8; 32],
            approved: bool,
        ) -> Result<(), EngineError> {
            if owner == operator {
                return Err(EngineError::SelfOperator);
            }
            match self.find_operator(owner, operator) {
                Some(idx) => {
                    if !approved {
                        self.operators[idx] = OperatorEntry::zeroed();
                        self.clear_operator_used(idx);
                    }
                    Ok(())
                }
                None => {
                    if !approved {
                        return Ok(());
                    }
                    for i in 0..MAX_OPERATORS {
                        if !self.is_operator_used(i) {
                            self.operators[i] = OperatorEntry {
                                owner: *owner,
                                operator: *operator,
                            };
                            self.set_operator_used(i);
                            return Ok(());
                        }
                    }
                    Err(EngineError::TableFull)
                }
            }
        }

        pub fn is_operator(&self, owner: &[u8; 32], operator: &[u8; 32]) -> bool {
            self.find_operator(owner, operator).is_some()
        }

        /// Conversion is eager, so nothing is ever pending.
        pub fn pending_deposit_request(&self, _controller: &[u8; 32]) -> u64 {
            0
        }

        pub fn pending_redeem_request(&self, _controller: &[u8; 32]) -> u64 {
            0
        }

        /// Outstanding `(assets, shares)` claimable by `controller` on the
        /// deposit side.
        pub fn claimable_deposit_request(&self, controller: &[u8; 32]) -> (u64, u64) {
            match self.find_controller(controller) {
                Some(idx) => {
                    let e = &self.controllers[idx];
                    (e.deposit_assets, e.deposit_shares)
                }
                None => (0, 0),
            }
        }

        /// Outstanding `(shares, assets)` claimable by `controller` on the
        /// redeem side.
        pub fn claimable_redeem_request(&self, controller: &[u8; 32]) -> (u64, u64) {
            match self.find_controller(controller) {
                Some(idx) => {
                    let e = &self.controllers[idx];
                    (e.redeem_shares, e.redeem_assets)
                }
                None => (0, 0),
            }
        }

        /// Aggregate totals must equal the per-entry sums at all times.
        pub fn check_conservation(&self) -> bool {
            let mut da: u128 = 0;
            let mut ds: u128 = 0;
            let mut rs: u128 = 0;
            let mut ra: u128 = 0;
            for i in 0..MAX_CONTROLLERS {
                if self.is_controller_used(i) {
                    let e = &self.controllers[i];
                    da += e.deposit_assets as u128;
                    ds += e.deposit_shares as u128;
                    rs += e.redeem_shares as u128;
                    ra += e.redeem_assets as u128;
                } else {
                    let e = &self.controllers[i];
                    if e.deposit_assets != 0
                        || e.deposit_shares != 0
                        || e.redeem_shares != 0
                        || e.redeem_assets != 0
                    {
                        return false;
                    }
                }
            }
            da == self.total_deposit_assets as u128
                && ds == self.total_deposit_shares as u128
                && rs == self.total_redeem_shares as u128
                && ra == self.total_redeem_assets as u128
        }

        /// Custody can always cover what is owed: shares back the deposit
        /// side, assets back the redeem side. Rounding dust accrues to
        /// custody, never against it.
        pub fn solvent(&self, share_custody: u64, asset_custody: u64) -> bool {
            self.total_deposit_shares <= share_custody && self.total_redeem_assets <= asset_custody
        }
    }
}

// 3. mod zc
pub mod zc {
    use solana_program::program_error::ProgramError;
    use crate::constants::{ENGINE_LEN, ENGINE_OFF};
    use crate::engine::ClaimEngine;

    #[inline]
    pub fn engine_ref<'a>(data: &'a [u8]) -> Result<&'a ClaimEngine, ProgramError> {
        if data.len() < ENGINE_OFF + ENGINE_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        bytemuck::try_from_bytes(&data[ENGINE_OFF..ENGINE_OFF + ENGINE_LEN])
            .map_err(|_| ProgramError::InvalidAccountData)
    }

    #[inline]
    pub fn engine_mut<'a>(data: &'a mut [u8]) -> Result<&'a mut ClaimEngine, ProgramError> {
        if data.len() < ENGINE_OFF + ENGINE_LEN {
            return Err(ProgramError::InvalidAccountData);
        }
        bytemuck::try_from_bytes_mut(&mut data[ENGINE_OFF..ENGINE_OFF + ENGINE_LEN])
            .map_err(|_| ProgramError::InvalidAccountData)
    }
}

// 4. mod error
pub mod error {
    use num_derive::FromPrimitive;
    use solana_program::{
        decode_error::DecodeError,
        msg,
        program_error::{PrintProgramError, ProgramError},
    };
    use thiserror::Error;
    use crate::engine::EngineError;

    #[derive(Clone, Copy, Debug, Eq, Error, FromPrimitive, PartialEq)]
    pub enum CarafeError {
        #[error("wrapper slab is not initialized")]
        NotInitialized,
        #[error("wrapper slab version mismatch")]
        InvalidVersion,
        #[error("wrapper slab has wrong length")]
        InvalidSlabLen,
        #[error("slab key does not match the derived wrapper address")]
        WrapperAddressMismatch,
        #[error("a wrapper for this fund already exists at the derived address")]
        AddressCollision,
        #[error("custody vault account mismatch")]
        InvalidVaultAccount,
        #[error("token mint mismatch")]
        InvalidMint,
        #[error("fund state account is malformed")]
        InvalidFundAccount,
        #[error("expected account to be a signer")]
        ExpectedSigner,
        #[error("expected account to be writable")]
        ExpectedWritable,
        #[error("caller is not the owner, the controller, or an approved operator")]
        Unauthorized,
        #[error("amount exceeds the available balance")]
        InsufficientBalance,
        #[error("amount must be greater than zero")]
        ZeroAmount,
        #[error("fund conversion returned zero output")]
        ZeroConversion,
        #[error("accounting table is full")]
        TableFull,
        #[error("arithmetic overflow")]
        Overflow,
    }

    impl From<CarafeError> for ProgramError {
        fn from(e: CarafeError) -> Self {
            ProgramError::Custom(e as u32)
        }
    }

    impl<T> DecodeError<T> for CarafeError {
        fn type_of() -> &'static str {
            "CarafeError"
        }
    }

    impl PrintProgramError for CarafeError {
        fn print<E>(&self)
        where
            E: 'static
                + std::error::Error
                + DecodeError<E>
                + PrintProgramError
                + num_traits::FromPrimitive,
        {
            msg!(&self.to_string());
        }
    }

    pub fn map_engine_error(e: EngineError) -> ProgramError {
        let err = match e {
            EngineError::InsufficientBalance => CarafeError::InsufficientBalance,
            EngineError::ZeroAmount => CarafeError::ZeroAmount,
            EngineError::SelfOperator => CarafeError::Unauthorized,
            EngineError::TableFull => CarafeError::TableFull,
            EngineError::Overflow => CarafeError::Overflow,
        };
        ProgramError::Custom(err as u32)
    }
}

// 5. mod ix
pub mod ix {
    use solana_program::{program_error::ProgramError, pubkey::Pubkey};

    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum Instruction {
        /// Deploy the wrapper for a fund at its derived address.
        ///
        /// Accounts: payer (signer, writable), wrapper slab (writable),
        /// fund program, fund state, asset mint, share mint, asset vault,
        /// share vault, system program.
        NewWrapper,
        /// Approve or revoke an operator for the signing owner.
        ///
        /// Accounts: owner (signer), wrapper slab (writable).
        SetOperator { operator: Pubkey, approved: bool },
        /// Pull `assets` from the owner, convert eagerly through the fund,
        /// and credit the resulting claim to `controller`.
        ///
        /// Accounts: initiator (signer), owner, wrapper slab (writable),
        /// owner asset account (writable), asset vault (writable), share
        /// vault (writable), fund program, fund state (writable), fund asset
        /// vault (writable), share mint (writable), vault authority, token
        /// program.
        RequestDeposit { assets: u64, controller: Pubkey },
        /// Claim `assets` of the controller's deposit balance; the
        /// proportional shares leave custody to the receiver.
        ///
        /// Accounts: caller (signer), wrapper slab (writable), share vault
        /// (writable), receiver share account (writable), vault authority,
        /// token program.
        ClaimDeposit { assets: u64, controller: Pubkey },
        /// Claim exactly `shares` of the controller's deposit balance.
        ///
        /// Accounts: as for ClaimDeposit.
        ClaimMint { shares: u64, controller: Pubkey },
        /// Pull `shares` from the owner, redeem eagerly through the fund,
        /// and credit the resulting claim to `controller`.
        ///
        /// Accounts: initiator (signer), owner, wrapper slab (writable),
        /// owner share account (writable), share vault (writable), asset
        /// vault (writable), fund program, fund state (writable), fund asset
        /// vault (writable), share mint (writable), vault authority, token
        /// program.
        RequestRedeem { shares: u64, controller: Pubkey },
        /// Claim `shares` of the controller's redeem balance; the
        /// proportional assets leave custody to the receiver.
        ///
        /// Accounts: caller (signer), wrapper slab (writable), asset vault
        /// (writable), receiver asset account (writable), vault authority,
        /// token program.
        ClaimRedeem { shares: u64, controller: Pubkey },
        /// Claim exactly `assets` of the controller's redeem balance.
        ///
        /// Accounts: as for ClaimRedeem.
        ClaimWithdraw { assets: u64, controller: Pubkey },
    }

    impl Instruction {
        pub fn decode(input: &[u8]) -> Result<Self, ProgramError> {
            let (&tag, mut rest) = input
                .split_first()
                .ok_or(ProgramError::InvalidInstructionData)?;

            match tag {
                0 => Ok(Instruction::NewWrapper),
                1 => {
                    let operator = read_pubkey(&mut rest)?;
                    let approved = read_u8(&mut rest)? != 0;
                    Ok(Instruction::SetOperator { operator, approved })
                }
                2 => {
                    let assets = read_u64(&mut rest)?;
                    let controller = read_pubkey(&mut rest)?;
                    Ok(Instruction::RequestDeposit { assets, controller })
                }
                3 => {
                    let assets = read_u64(&mut rest)?;
                    let controller = read_pubkey(&mut rest)?;
                    Ok(Instruction::ClaimDeposit { assets, controller })
                }
                4 => {
                    let shares = read_u64(&mut rest)?;
                    let controller = read_pubkey(&mut rest)?;
                    Ok(Instruction::ClaimMint { shares, controller })
                }
                5 => {
                    let shares = read_u64(&mut rest)?;
                    let controller = read_pubkey(&mut rest)?;
                    Ok(Instruction::RequestRedeem { shares, controller })
                }
                6 => {
                    let shares = read_u64(&mut rest)?;
                    let controller = read_pubkey(&mut rest)?;
                    Ok(Instruction::ClaimRedeem { shares, controller })
                }
                7 => {
                    let assets = read_u64(&mut rest)?;
                    let controller = read_pubkey(&mut rest)?;
                    Ok(Instruction::ClaimWithdraw { assets, controller })
                }
                _ => Err(ProgramError::InvalidInstructionData),
            }
        }

        pub fn encode(&self) -> Vec<u8> {
            let mut out = Vec::with_capacity(41);
            match self {
                Instruction::NewWrapper => out.push(0),
                Instruction::SetOperator { operator, approved } => {
                    out.push(1);
                    out.extend_from_slice(operator.as_ref());
                    out.push(*approved as u8);
                }
                Instruction::RequestDeposit { assets, controller } => {
                    out.push(2);
                    out.extend_from_slice(&assets.to_le_bytes());
                    out.extend_from_slice(controller.as_ref());
                }
                Instruction::ClaimDeposit { assets, controller } => {
                    out.push(3);
                    out.extend_from_slice(&assets.to_le_bytes());
                    out.extend_from_slice(controller.as_ref());
                }
                Instruction::ClaimMint { shares, controller } => {
                    out.push(4);
                    out.extend_from_slice(&shares.to_le_bytes());
                    out.extend_from_slice(controller.as_ref());
                }
                Instruction::RequestRedeem { shares, controller } => {
                    out.push(5);
                    out.extend_from_slice(&shares.to_le_bytes());
                    out.extend_from_slice(controller.as_ref());
                }
                Instruction::ClaimRedeem { shares, controller } => {
                    out.push(6);
                    out.extend_from_slice(&shares.to_le_bytes());
                    out.extend_from_slice(controller.as_ref());
                }
                Instruction::ClaimWithdraw { assets, controller } => {
                    out.push(7);
                    out.extend_from_slice(&assets.to_le_bytes());
                    out.extend_from_slice(controller.as_ref());
                }
            }
            out
        }
    }

    fn read_u8(input: &mut &[u8]) -> Result<u8, ProgramError> {
        let (&val, rest) = input
            .split_first()
            .ok_or(ProgramError::InvalidInstructionData)?;
        *input = rest;
        Ok(val)
    }

    fn read_u64(input: &mut &[u8]) -> Result<u64, ProgramError> {
        if input.len() < 8 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(8);
        *input = rest;
        Ok(u64::from_le_bytes(*arrayref::array_ref![bytes, 0, 8]))
    }

    fn read_pubkey(input: &mut &[u8]) -> Result<Pubkey, ProgramError> {
        if input.len() < 32 {
            return Err(ProgramError::InvalidInstructionData);
        }
        let (bytes, rest) = input.split_at(32);
        *input = rest;
        Ok(Pubkey::new_from_array(*arrayref::array_ref![bytes, 0, 32]))
    }
}

// 6. mod accounts
pub mod accounts {
    use solana_program::{account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey};
    use crate::constants::{VAULT_AUTHORITY_SEED, WRAPPER_SEED};
    use crate::error::CarafeError;

    pub fn expect_len(accounts: &[AccountInfo], n: usize) -> Result<(), ProgramError> {
        if accounts.len() < n {
            return Err(ProgramError::NotEnoughAccountKeys);
        }
        Ok(())
    }

    pub fn expect_signer(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_signer {
            return Err(CarafeError::ExpectedSigner.into());
        }
        Ok(())
    }

    pub fn expect_writable(ai: &AccountInfo) -> Result<(), ProgramError> {
        if !ai.is_writable {
            return Err(CarafeError::ExpectedWritable.into());
        }
        Ok(())
    }

    pub fn expect_owner(ai: &AccountInfo, owner: &Pubkey) -> Result<(), ProgramError> {
        if ai.owner != owner {
            return Err(ProgramError::IllegalOwner);
        }
        Ok(())
    }

    pub fn expect_key(ai: &AccountInfo, expected: &Pubkey) -> Result<(), ProgramError> {
        if ai.key != expected {
            return Err(ProgramError::InvalidArgument);
        }
        Ok(())
    }

    /// Derived wrapper address for a fund. Identical before and after
    /// deployment; a second deployment for the same fund lands on the same
    /// slab and fails.
    pub fn find_wrapper_address(program_id: &Pubkey, fund_state: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[WRAPPER_SEED, fund_state.as_ref()], program_id)
    }

    /// Custody authority for a wrapper's token vaults.
    pub fn find_vault_authority(program_id: &Pubkey, wrapper: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[VAULT_AUTHORITY_SEED, wrapper.as_ref()], program_id)
    }
}

// 7. mod state
pub mod state {
    use bytemuck::{Pod, Zeroable};
    use core::cell::RefMut;
    use solana_program::account_info::AccountInfo;
    use solana_program::program_error::ProgramError;
    use crate::constants::{CONFIG_LEN, HEADER_LEN};

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct SlabHeader {
        pub magic: u64,
        pub version: u32,
        pub bump: u8,
        pub _padding: [u8; 3],
        pub _reserved: [u8; 48],
    }

    /// Immutable binding of the wrapper to its fund, written once at
    /// deployment.
    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    pub struct WrapperConfig {
        pub fund_program: [u8; 32],
        pub fund_state: [u8; 32],
        pub asset_mint: [u8; 32],
        pub share_mint: [u8; 32],
        pub asset_vault: [u8; 32],
        pub share_vault: [u8; 32],
        pub fund_asset_vault: [u8; 32],
        pub vault_authority_bump: u8,
        pub _padding: [u8; 7],
    }

    pub fn slab_data_mut<'a, 'b>(
        ai: &'b AccountInfo<'a>,
    ) -> Result<RefMut<'b, &'a mut [u8]>, ProgramError> {
        Ok(ai.try_borrow_mut_data()?)
    }

    pub fn read_header(data: &[u8]) -> SlabHeader {
        let mut h = SlabHeader::zeroed();
        let src = &data[..HEADER_LEN];
        let dst = bytemuck::bytes_of_mut(&mut h);
        dst.copy_from_slice(src);
        h
    }

    pub fn write_header(data: &mut [u8], h: &SlabHeader) {
        let src = bytemuck::bytes_of(h);
        let dst = &mut data[..HEADER_LEN];
        dst.copy_from_slice(src);
    }

    pub fn read_config(data: &[u8]) -> WrapperConfig {
        let mut c = WrapperConfig::zeroed();
        let src = &data[HEADER_LEN..HEADER_LEN + CONFIG_LEN];
        let dst = bytemuck::bytes_of_mut(&mut c);
        dst.copy_from_slice(src);
        c
    }

    pub fn write_config(data: &mut [u8], c: &WrapperConfig) {
        let src = bytemuck::bytes_of(c);
        let dst = &mut data[HEADER_LEN..HEADER_LEN + CONFIG_LEN];
        dst.copy_from_slice(src);
    }
}

// 8. mod caps
pub mod caps {
    //! Capability discovery. Tags are four-character codes; `supports`
    //! answers for the fixed set this program implements.

    pub const CAP_FUND_INTERFACE: u32 = u32::from_be_bytes(*b"fund");
    pub const CAP_DEPOSIT_REQUEST: u32 = u32::from_be_bytes(*b"dreq");
    pub const CAP_REDEEM_REQUEST: u32 = u32::from_be_bytes(*b"rreq");
    pub const CAP_OPERATOR: u32 = u32::from_be_bytes(*b"oper");
    pub const CAP_DISCOVERY: u32 = u32::from_be_bytes(*b"caps");

    pub const SUPPORTED: [u32; 5] = [
        CAP_FUND_INTERFACE,
        CAP_DEPOSIT_REQUEST,
        CAP_REDEEM_REQUEST,
        CAP_OPERATOR,
        CAP_DISCOVERY,
    ];

    pub fn supports(tag: u32) -> bool {
        SUPPORTED.contains(&tag)
    }
}

// 9. mod fund
pub mod fund {
    //! Consumed interface of the synchronous pooled fund: a fixed state
    //! prefix the wrapper reads, and two instruction entry points it
    //! invokes. The fund is trusted; only shape and identity are checked.

    use arrayref::array_ref;
    use solana_program::{
        account_info::AccountInfo, program_error::ProgramError, pubkey::Pubkey,
    };
    use crate::error::CarafeError;
    use crate::state::WrapperConfig;

    #[cfg(not(test))]
    use solana_program::{
        instruction::{AccountMeta, Instruction as SolInstruction},
        program::invoke_signed,
    };

    #[cfg(test)]
    use solana_program::program_pack::Pack;
    #[cfg(test)]
    use spl_token::state::Account as TokenAccount;

    pub const FUND_MAGIC: u64 = 0x53594e4346554e44; // "SYNCFUND"
    pub const MIN_LEN: usize = 120;

    const ASSET_MINT_OFF: usize = 8;
    const SHARE_MINT_OFF: usize = 40;
    const ASSET_VAULT_OFF: usize = 72;
    const TOTAL_ASSETS_OFF: usize = 104;
    const TOTAL_SHARES_OFF: usize = 112;

    pub const DEPOSIT_TAG: u8 = 0;
    pub const REDEEM_TAG: u8 = 1;

    fn checked(data: &[u8]) -> Result<(), ProgramError> {
        if data.len() < MIN_LEN {
            return Err(CarafeError::InvalidFundAccount.into());
        }
        let magic = u64::from_le_bytes(*array_ref![data, 0, 8]);
        if magic != FUND_MAGIC {
            return Err(CarafeError::InvalidFundAccount.into());
        }
        Ok(())
    }

    pub fn read_asset_mint(ai: &AccountInfo) -> Result<Pubkey, ProgramError> {
        let data = ai.try_borrow_data()?;
        checked(&data)?;
        Ok(Pubkey::new_from_array(*array_ref![data, ASSET_MINT_OFF, 32]))
    }

    pub fn read_share_mint(ai: &AccountInfo) -> Result<Pubkey, ProgramError> {
        let data = ai.try_borrow_data()?;
        checked(&data)?;
        Ok(Pubkey::new_from_array(*array_ref![data, SHARE_MINT_OFF, 32]))
    }

    pub fn read_fund_asset_vault(ai: &AccountInfo) -> Result<Pubkey, ProgramError> {
        let data = ai.try_borrow_data()?;
        checked(&data)?;
        Ok(Pubkey::new_from_array(*array_ref![data, ASSET_VAULT_OFF, 32]))
    }

    pub fn read_totals(ai: &AccountInfo) -> Result<(u64, u64), ProgramError> {
        let data = ai.try_borrow_data()?;
        checked(&data)?;
        let assets = u64::from_le_bytes(*array_ref![data, TOTAL_ASSETS_OFF, 8]);
        let shares = u64::from_le_bytes(*array_ref![data, TOTAL_SHARES_OFF, 8]);
        Ok((assets, shares))
    }

    pub fn read_total_assets(ai: &AccountInfo) -> Result<u64, ProgramError> {
        Ok(read_totals(ai)?.0)
    }

    /// Wrapper-level totalAssets: a pass-through of the fund's figure for
    /// the fund this wrapper is bound to. The wrapper holds no valuation
    /// model of its own.
    pub fn wrapper_total_assets(
        config: &WrapperConfig,
        fund_state: &AccountInfo,
    ) -> Result<u64, ProgramError> {
        if *fund_state.key != Pubkey::new_from_array(config.fund_state) {
            return Err(ProgramError::InvalidArgument);
        }
        read_total_assets(fund_state)
    }

    /// Shares the fund reports for a deposit of `assets` at the given
    /// totals. Mirrors the fund's own floor conversion; first deposit into
    /// an empty fund is 1:1.
    pub fn preview_deposit(assets: u64, total_assets: u64, total_shares: u64) -> u64 {
        if total_assets == 0 || total_shares == 0 {
            return assets;
        }
        let q = (assets as u128) * (total_shares as u128) / (total_assets as u128);
        u64::try_from(q).unwrap_or(u64::MAX)
    }

    /// Assets the fund reports for redeeming `shares` at the given totals.
    pub fn preview_redeem(shares: u64, total_assets: u64, total_shares: u64) -> u64 {
        if total_shares == 0 {
            return 0;
        }
        let q = (shares as u128) * (total_assets as u128) / (total_shares as u128);
        u64::try_from(q).unwrap_or(u64::MAX)
    }

    #[cfg(test)]
    fn write_totals(ai: &AccountInfo, assets: u64, shares: u64) -> Result<(), ProgramError> {
        let mut data = ai.try_borrow_mut_data()?;
        checked(&data)?;
        data[TOTAL_ASSETS_OFF..TOTAL_ASSETS_OFF + 8].copy_from_slice(&assets.to_le_bytes());
        data[TOTAL_SHARES_OFF..TOTAL_SHARES_OFF + 8].copy_from_slice(&shares.to_le_bytes());
        Ok(())
    }

    /// Deposit `assets` from the wrapper's asset vault into the fund; the
    /// fund mints shares to the wrapper's share vault. The caller measures
    /// the minted amount as the share vault balance delta.
    pub fn deposit<'a>(
        _fund_program: &AccountInfo<'a>,
        fund_state: &AccountInfo<'a>,
        asset_vault: &AccountInfo<'a>,
        fund_asset_vault: &AccountInfo<'a>,
        _share_mint: &AccountInfo<'a>,
        share_vault: &AccountInfo<'a>,
        _vault_authority: &AccountInfo<'a>,
        _token_program: &AccountInfo<'a>,
        assets: u64,
        _signer_seeds: &[&[&[u8]]],
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let mut data = Vec::with_capacity(9);
            data.push(DEPOSIT_TAG);
            data.extend_from_slice(&assets.to_le_bytes());
            let ix = SolInstruction {
                program_id: *_fund_program.key,
                accounts: vec![
                    AccountMeta::new(*fund_state.key, false),
                    AccountMeta::new(*asset_vault.key, false),
                    AccountMeta::new(*fund_asset_vault.key, false),
                    AccountMeta::new(*_share_mint.key, false),
                    AccountMeta::new(*share_vault.key, false),
                    AccountMeta::new_readonly(*_vault_authority.key, true),
                    AccountMeta::new_readonly(*_token_program.key, false),
                ],
                data,
            };
            invoke_signed(
                &ix,
                &[
                    fund_state.clone(),
                    asset_vault.clone(),
                    fund_asset_vault.clone(),
                    _share_mint.clone(),
                    share_vault.clone(),
                    _vault_authority.clone(),
                    _token_program.clone(),
                ],
                _signer_seeds,
            )
        }
        #[cfg(test)]
        {
            let (total_assets, total_shares) = read_totals(fund_state)?;
            let shares = preview_deposit(assets, total_assets, total_shares);

            let mut src_data = asset_vault.try_borrow_mut_data()?;
            let mut src_state = TokenAccount::unpack(&src_data)?;
            src_state.amount = src_state
                .amount
                .checked_sub(assets)
                .ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(src_state, &mut src_data)?;
            drop(src_data);

            let mut dst_data = fund_asset_vault.try_borrow_mut_data()?;
            let mut dst_state = TokenAccount::unpack(&dst_data)?;
            dst_state.amount = dst_state
                .amount
                .checked_add(assets)
                .ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(dst_state, &mut dst_data)?;
            drop(dst_data);

            let mut out_data = share_vault.try_borrow_mut_data()?;
            let mut out_state = TokenAccount::unpack(&out_data)?;
            out_state.amount = out_state
                .amount
                .checked_add(shares)
                .ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(out_state, &mut out_data)?;
            drop(out_data);

            let ta = total_assets
                .checked_add(assets)
                .ok_or(ProgramError::InvalidAccountData)?;
            let ts = total_shares
                .checked_add(shares)
                .ok_or(ProgramError::InvalidAccountData)?;
            write_totals(fund_state, ta, ts)
        }
    }

    /// Redeem `shares` from the wrapper's share vault through the fund; the
    /// fund pays assets into the wrapper's asset vault. The caller measures
    /// the paid amount as the asset vault balance delta.
    pub fn redeem<'a>(
        _fund_program: &AccountInfo<'a>,
        fund_state: &AccountInfo<'a>,
        share_vault: &AccountInfo<'a>,
        _share_mint: &AccountInfo<'a>,
        fund_asset_vault: &AccountInfo<'a>,
        asset_vault: &AccountInfo<'a>,
        _vault_authority: &AccountInfo<'a>,
        _token_program: &AccountInfo<'a>,
        shares: u64,
        _signer_seeds: &[&[&[u8]]],
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let mut data = Vec::with_capacity(9);
            data.push(REDEEM_TAG);
            data.extend_from_slice(&shares.to_le_bytes());
            let ix = SolInstruction {
                program_id: *_fund_program.key,
                accounts: vec![
                    AccountMeta::new(*fund_state.key, false),
                    AccountMeta::new(*share_vault.key, false),
                    AccountMeta::new(*_share_mint.key, false),
                    AccountMeta::new(*fund_asset_vault.key, false),
                    AccountMeta::new(*asset_vault.key, false),
                    AccountMeta::new_readonly(*_vault_authority.key, true),
                    AccountMeta::new_readonly(*_token_program.key, false),
                ],
                data,
            };
            invoke_signed(
                &ix,
                &[
                    fund_state.clone(),
                    share_vault.clone(),
                    _share_mint.clone(),
                    fund_asset_vault.clone(),
                    asset_vault.clone(),
                    _vault_authority.clone(),
                    _token_program.clone(),
                ],
                _signer_seeds,
            )
        }
        #[cfg(test)]
        {
            let (total_assets, total_shares) = read_totals(fund_state)?;
            let assets = preview_redeem(shares, total_assets, total_shares);

            let mut src_data = share_vault.try_borrow_mut_data()?;
            let mut src_state = TokenAccount::unpack(&src_data)?;
            src_state.amount = src_state
                .amount
                .checked_sub(shares)
                .ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(src_state, &mut src_data)?;
            drop(src_data);

            let mut pool_data = fund_asset_vault.try_borrow_mut_data()?;
            let mut pool_state = TokenAccount::unpack(&pool_data)?;
            pool_state.amount = pool_state
                .amount
                .checked_sub(assets)
                .ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(pool_state, &mut pool_data)?;
            drop(pool_data);

            let mut out_data = asset_vault.try_borrow_mut_data()?;
            let mut out_state = TokenAccount::unpack(&out_data)?;
            out_state.amount = out_state
                .amount
                .checked_add(assets)
                .ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(out_state, &mut out_data)?;
            drop(out_data);

            let ta = total_assets
                .checked_sub(assets)
                .ok_or(ProgramError::InvalidAccountData)?;
            let ts = total_shares
                .checked_sub(shares)
                .ok_or(ProgramError::InvalidAccountData)?;
            write_totals(fund_state, ta, ts)
        }
    }
}

// 10. mod ledger
pub mod ledger {
    use solana_program::{
        account_info::AccountInfo, program_error::ProgramError, program_pack::Pack,
    };

    #[cfg(not(test))]
    use solana_program::program::{invoke, invoke_signed};

    #[cfg(test)]
    use spl_token::state::Account as TokenAccount;

    pub fn balance_of(ai: &AccountInfo) -> Result<u64, ProgramError> {
        let data = ai.try_borrow_data()?;
        let state = spl_token::state::Account::unpack(&data)?;
        Ok(state.amount)
    }

    /// Move tokens into custody with the owner's own signature.
    pub fn pull<'a>(
        _token_program: &AccountInfo<'a>,
        source: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        _authority: &AccountInfo<'a>,
        amount: u64,
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let ix = spl_token::instruction::transfer(
                _token_program.key,
                source.key,
                dest.key,
                _authority.key,
                &[],
                amount,
            )?;
            invoke(
                &ix,
                &[
                    source.clone(),
                    dest.clone(),
                    _authority.clone(),
                    _token_program.clone(),
                ],
            )
        }
        #[cfg(test)]
        {
            let mut src_data = source.try_borrow_mut_data()?;
            let mut src_state = TokenAccount::unpack(&src_data)?;
            src_state.amount = src_state
                .amount
                .checked_sub(amount)
                .ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(src_state, &mut src_data)?;

            let mut dst_data = dest.try_borrow_mut_data()?;
            let mut dst_state = TokenAccount::unpack(&dst_data)?;
            dst_state.amount = dst_state
                .amount
                .checked_add(amount)
                .ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(dst_state, &mut dst_data)?;
            Ok(())
        }
    }

    /// Move tokens into custody on behalf of an owner who has delegated to
    /// the vault authority. Requires the owner's prior token-level approval
    /// of the vault authority.
    pub fn pull_delegated<'a>(
        _token_program: &AccountInfo<'a>,
        source: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        _delegate: &AccountInfo<'a>,
        amount: u64,
        _signer_seeds: &[&[&[u8]]],
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let ix = spl_token::instruction::transfer(
                _token_program.key,
                source.key,
                dest.key,
                _delegate.key,
                &[],
                amount,
            )?;
            invoke_signed(
                &ix,
                &[
                    source.clone(),
                    dest.clone(),
                    _delegate.clone(),
                    _token_program.clone(),
                ],
                _signer_seeds,
            )
        }
        #[cfg(test)]
        {
            let mut src_data = source.try_borrow_mut_data()?;
            let mut src_state = TokenAccount::unpack(&src_data)?;
            src_state.amount = src_state
                .amount
                .checked_sub(amount)
                .ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(src_state, &mut src_data)?;

            let mut dst_data = dest.try_borrow_mut_data()?;
            let mut dst_state = TokenAccount::unpack(&dst_data)?;
            dst_state.amount = dst_state
                .amount
                .checked_add(amount)
                .ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(dst_state, &mut dst_data)?;
            Ok(())
        }
    }

    /// Release custodied tokens under the vault authority's signature.
    pub fn release<'a>(
        _token_program: &AccountInfo<'a>,
        source: &AccountInfo<'a>,
        dest: &AccountInfo<'a>,
        _authority: &AccountInfo<'a>,
        amount: u64,
        _signer_seeds: &[&[&[u8]]],
    ) -> Result<(), ProgramError> {
        #[cfg(not(test))]
        {
            let ix = spl_token::instruction::transfer(
                _token_program.key,
                source.key,
                dest.key,
                _authority.key,
                &[],
                amount,
            )?;
            invoke_signed(
                &ix,
                &[
                    source.clone(),
                    dest.clone(),
                    _authority.clone(),
                    _token_program.clone(),
                ],
                _signer_seeds,
            )
        }
        #[cfg(test)]
        {
            let mut src_data = source.try_borrow_mut_data()?;
            let mut src_state = TokenAccount::unpack(&src_data)?;
            src_state.amount = src_state
                .amount
                .checked_sub(amount)
                .ok_or(ProgramError::InsufficientFunds)?;
            TokenAccount::pack(src_state, &mut src_data)?;

            let mut dst_data = dest.try_borrow_mut_data()?;
            let mut dst_state = TokenAccount::unpack(&dst_data)?;
            dst_state.amount = dst_state
                .amount
                .checked_add(amount)
                .ok_or(ProgramError::InvalidAccountData)?;
            TokenAccount::pack(dst_state, &mut dst_data)?;
            Ok(())
        }
    }
}

// 11. mod logs
pub mod logs {
    //! Structured event lines with a stable `carafe:` prefix, one per state
    //! transition. Field order is part of the format.

    use solana_program::{msg, pubkey::Pubkey};
    use crate::constants::REQUEST_ID;

    pub fn deposit_request(controller: &Pubkey, owner: &Pubkey, initiator: &Pubkey, assets: u64) {
        msg!(
            "carafe: deposit_request controller={} owner={} request_id={} initiator={} assets={}",
            controller,
            owner,
            REQUEST_ID,
            initiator,
            assets
        );
    }

    pub fn deposit_claim(receiver: &Pubkey, controller: &Pubkey, assets: u64, shares: u64) {
        msg!(
            "carafe: deposit_claim receiver={} controller={} assets={} shares={}",
            receiver,
            controller,
            assets,
            shares
        );
    }

    pub fn redeem_request(controller: &Pubkey, owner: &Pubkey, initiator: &Pubkey, shares: u64) {
        msg!(
            "carafe: redeem_request controller={} owner={} request_id={} initiator={} shares={}",
            controller,
            owner,
            REQUEST_ID,
            initiator,
            shares
        );
    }

    pub fn redeem_claim(receiver: &Pubkey, controller: &Pubkey, shares: u64, assets: u64) {
        msg!(
            "carafe: redeem_claim receiver={} controller={} shares={} assets={}",
            receiver,
            controller,
            shares,
            assets
        );
    }

    pub fn operator_set(owner: &Pubkey, operator: &Pubkey, approved: bool) {
        msg!(
            "carafe: operator_set owner={} operator={} approved={}",
            owner,
            operator,
            approved
        );
    }

    pub fn wrapper_deployed(wrapper: &Pubkey, fund_state: &Pubkey) {
        msg!(
            "carafe: wrapper_deployed wrapper={} fund={}",
            wrapper,
            fund_state
        );
    }
}

// 12. mod processor
pub mod processor {
    use solana_program::{
        account_info::AccountInfo,
        entrypoint::ProgramResult,
        program_error::ProgramError,
        program_pack::Pack,
        pubkey::Pubkey,
    };
    use crate::{
        accounts,
        constants::{MAGIC, SLAB_LEN, VAULT_AUTHORITY_SEED, VERSION},
        error::{map_engine_error, CarafeError},
        fund,
        ix::Instruction,
        ledger, logs,
        state::{self, SlabHeader, WrapperConfig},
        zc,
    };
    use crate::engine::ClaimEngine;

    #[cfg(not(test))]
    use crate::constants::WRAPPER_SEED;
    #[cfg(not(test))]
    use solana_program::{
        program::invoke_signed, rent::Rent, system_instruction, sysvar::Sysvar,
    };

    fn slab_guard(program_id: &Pubkey, slab: &AccountInfo, data: &[u8]) -> Result<(), ProgramError> {
        accounts::expect_owner(slab, program_id)?;
        if data.len() != SLAB_LEN {
            return Err(CarafeError::InvalidSlabLen.into());
        }
        Ok(())
    }

    fn require_initialized(data: &[u8]) -> Result<(), ProgramError> {
        let h = state::read_header(data);
        if h.magic != MAGIC {
            return Err(CarafeError::NotInitialized.into());
        }
        if h.version != VERSION {
            return Err(CarafeError::InvalidVersion.into());
        }
        Ok(())
    }

    fn verify_token_vault(
        a_vault: &AccountInfo,
        expected_owner: &Pubkey,
        expected_mint: &Pubkey,
        expected_pubkey: &Pubkey,
    ) -> Result<(), ProgramError> {
        if a_vault.key != expected_pubkey {
            return Err(CarafeError::InvalidVaultAccount.into());
        }
        if a_vault.owner != &spl_token::ID {
            return Err(CarafeError::InvalidVaultAccount.into());
        }
        if a_vault.data_len() != spl_token::state::Account::LEN {
            return Err(CarafeError::InvalidVaultAccount.into());
        }

        let data = a_vault.try_borrow_data()?;
        let tok = spl_token::state::Account::unpack(&data)?;
        if tok.mint != *expected_mint {
            return Err(CarafeError::InvalidMint.into());
        }
        if tok.owner != *expected_owner {
            return Err(CarafeError::InvalidVaultAccount.into());
        }
        Ok(())
    }

    /// Principal is the owner on requests and the controller on claims; the
    /// actor must be the principal itself or one of its approved operators.
    fn authorize(
        engine: &ClaimEngine,
        principal: &Pubkey,
        actor: &Pubkey,
    ) -> Result<(), ProgramError> {
        if principal == actor {
            return Ok(());
        }
        if engine.is_operator(&principal.to_bytes(), &actor.to_bytes()) {
            return Ok(());
        }
        Err(CarafeError::Unauthorized.into())
    }

    /// Owner's funding account on requests: must be a token account of the
    /// expected mint held by the request's owner. Returns its balance.
    fn verify_owner_account(
        a_owner_account: &AccountInfo,
        owner: &Pubkey,
        expected_mint: &Pubkey,
    ) -> Result<u64, ProgramError> {
        let data = a_owner_account.try_borrow_data()?;
        let tok = spl_token::state::Account::unpack(&data)?;
        if tok.mint != *expected_mint {
            return Err(CarafeError::InvalidMint.into());
        }
        if tok.owner != *owner {
            return Err(ProgramError::InvalidArgument);
        }
        Ok(tok.amount)
    }

    /// Create the wrapper slab at its derived address. Outside tests the
    /// program funds and allocates it through the system program; tests
    /// pre-allocate the slab and only fall through to the length guard.
    fn create_slab<'a>(
        _program_id: &Pubkey,
        _payer: &AccountInfo<'a>,
        slab: &AccountInfo<'a>,
        _system: &AccountInfo<'a>,
        _fund_state_key: &Pubkey,
        _bump: u8,
    ) -> Result<(), ProgramError> {
        if slab.data_len() != 0 {
            return Ok(());
        }
        #[cfg(not(test))]
        {
            let rent = Rent::get()?;
            let lamports = rent.minimum_balance(SLAB_LEN);
            let bump_arr: [u8; 1] = [_bump];
            let seeds: &[&[u8]] = &[WRAPPER_SEED, _fund_state_key.as_ref(), &bump_arr];
            let ix = system_instruction::create_account(
                _payer.key,
                slab.key,
                lamports,
                SLAB_LEN as u64,
                _program_id,
            );
            invoke_signed(&ix, &[_payer.clone(), slab.clone(), _system.clone()], &[seeds])
        }
        #[cfg(test)]
        {
            Err(CarafeError::InvalidSlabLen.into())
        }
    }

    pub fn process_instruction<'a, 'b>(
        program_id: &Pubkey,
        accounts: &'b [AccountInfo<'a>],
        instruction_data: &[u8],
    ) -> ProgramResult {
        let instruction = Instruction::decode(instruction_data)?;

        match instruction {
            Instruction::NewWrapper => {
                accounts::expect_len(accounts, 9)?;
                let a_payer = &accounts[0];
                let a_slab = &accounts[1];
                let a_fund_program = &accounts[2];
                let a_fund_state = &accounts[3];
                let a_asset_mint = &accounts[4];
                let a_share_mint = &accounts[5];
                let a_asset_vault = &accounts[6];
                let a_share_vault = &accounts[7];
                let a_system = &accounts[8];

                accounts::expect_signer(a_payer)?;
                accounts::expect_writable(a_slab)?;

                let (wrapper, wrapper_bump) =
                    accounts::find_wrapper_address(program_id, a_fund_state.key);
                if *a_slab.key != wrapper {
                    return Err(CarafeError::WrapperAddressMismatch.into());
                }

                accounts::expect_owner(a_fund_state, a_fund_program.key)?;
                let fund_asset_mint = fund::read_asset_mint(a_fund_state)?;
                let fund_share_mint = fund::read_share_mint(a_fund_state)?;
                let fund_asset_vault = fund::read_fund_asset_vault(a_fund_state)?;
                if *a_asset_mint.key != fund_asset_mint {
                    return Err(CarafeError::InvalidMint.into());
                }
                if *a_share_mint.key != fund_share_mint {
                    return Err(CarafeError::InvalidMint.into());
                }

                let (vault_auth, vault_auth_bump) =
                    accounts::find_vault_authority(program_id, a_slab.key);
                verify_token_vault(a_asset_vault, &vault_auth, a_asset_mint.key, a_asset_vault.key)?;
                verify_token_vault(a_share_vault, &vault_auth, a_share_mint.key, a_share_vault.key)?;

                create_slab(
                    program_id,
                    a_payer,
                    a_slab,
                    a_system,
                    a_fund_state.key,
                    wrapper_bump,
                )?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;

                let header = state::read_header(&data);
                if header.magic == MAGIC {
                    return Err(CarafeError::AddressCollision.into());
                }

                // A zeroed engine region is the valid empty engine.
                for b in data.iter_mut() {
                    *b = 0;
                }

                let config = WrapperConfig {
                    fund_program: a_fund_program.key.to_bytes(),
                    fund_state: a_fund_state.key.to_bytes(),
                    asset_mint: a_asset_mint.key.to_bytes(),
                    share_mint: a_share_mint.key.to_bytes(),
                    asset_vault: a_asset_vault.key.to_bytes(),
                    share_vault: a_share_vault.key.to_bytes(),
                    fund_asset_vault: fund_asset_vault.to_bytes(),
                    vault_authority_bump: vault_auth_bump,
                    _padding: [0; 7],
                };
                state::write_config(&mut data, &config);

                let new_header = SlabHeader {
                    magic: MAGIC,
                    version: VERSION,
                    bump: wrapper_bump,
                    _padding: [0; 3],
                    _reserved: [0; 48],
                };
                state::write_header(&mut data, &new_header);

                logs::wrapper_deployed(a_slab.key, a_fund_state.key);
            }
            Instruction::SetOperator { operator, approved } => {
                accounts::expect_len(accounts, 2)?;
                let a_owner = &accounts[0];
                let a_slab = &accounts[1];

                accounts::expect_signer(a_owner)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;

                let engine = zc::engine_mut(&mut data)?;
                engine
                    .set_operator(&a_owner.key.to_bytes(), &operator.to_bytes(), approved)
                    .map_err(map_engine_error)?;

                logs::operator_set(a_owner.key, &operator, approved);
            }
            Instruction::RequestDeposit { assets, controller } => {
                accounts::expect_len(accounts, 12)?;
                let a_initiator = &accounts[0];
                let a_owner = &accounts[1];
                let a_slab = &accounts[2];
                let a_owner_asset = &accounts[3];
                let a_asset_vault = &accounts[4];
                let a_share_vault = &accounts[5];
                let a_fund_program = &accounts[6];
                let a_fund_state = &accounts[7];
                let a_fund_asset_vault = &accounts[8];
                let a_share_mint = &accounts[9];
                let a_vault_authority = &accounts[10];
                let a_token = &accounts[11];

                accounts::expect_signer(a_initiator)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);

                accounts::expect_key(a_fund_program, &Pubkey::new_from_array(config.fund_program))?;
                accounts::expect_key(a_fund_state, &Pubkey::new_from_array(config.fund_state))?;
                accounts::expect_key(
                    a_fund_asset_vault,
                    &Pubkey::new_from_array(config.fund_asset_vault),
                )?;
                accounts::expect_key(a_share_mint, &Pubkey::new_from_array(config.share_mint))?;

                let (vault_auth, _) = accounts::find_vault_authority(program_id, a_slab.key);
                accounts::expect_key(a_vault_authority, &vault_auth)?;
                verify_token_vault(
                    a_asset_vault,
                    &vault_auth,
                    &Pubkey::new_from_array(config.asset_mint),
                    &Pubkey::new_from_array(config.asset_vault),
                )?;
                verify_token_vault(
                    a_share_vault,
                    &vault_auth,
                    &Pubkey::new_from_array(config.share_mint),
                    &Pubkey::new_from_array(config.share_vault),
                )?;

                let owner_balance = verify_owner_account(
                    a_owner_asset,
                    a_owner.key,
                    &Pubkey::new_from_array(config.asset_mint),
                )?;

                let engine = zc::engine_mut(&mut data)?;
                authorize(engine, a_owner.key, a_initiator.key)?;

                if owner_balance < assets {
                    return Err(CarafeError::InsufficientBalance.into());
                }
                if assets == 0 {
                    return Err(CarafeError::ZeroAmount.into());
                }

                let seed1: &[u8] = VAULT_AUTHORITY_SEED;
                let seed2: &[u8] = a_slab.key.as_ref();
                let bump_arr: [u8; 1] = [config.vault_authority_bump];
                let seed3: &[u8] = &bump_arr;
                let seeds: [&[u8]; 3] = [seed1, seed2, seed3];
                let signer_seeds: [&[&[u8]]; 1] = [&seeds];

                if a_initiator.key == a_owner.key {
                    ledger::pull(a_token, a_owner_asset, a_asset_vault, a_initiator, assets)?;
                } else {
                    ledger::pull_delegated(
                        a_token,
                        a_owner_asset,
                        a_asset_vault,
                        a_vault_authority,
                        assets,
                        &signer_seeds,
                    )?;
                }

                let shares_before = ledger::balance_of(a_share_vault)?;
                fund::deposit(
                    a_fund_program,
                    a_fund_state,
                    a_asset_vault,
                    a_fund_asset_vault,
                    a_share_mint,
                    a_share_vault,
                    a_vault_authority,
                    a_token,
                    assets,
                    &signer_seeds,
                )?;
                let shares_after = ledger::balance_of(a_share_vault)?;
                let shares = shares_after
                    .checked_sub(shares_before)
                    .ok_or(CarafeError::Overflow)?;
                if shares == 0 {
                    return Err(CarafeError::ZeroConversion.into());
                }

                engine
                    .credit_deposit(&controller.to_bytes(), assets, shares)
                    .map_err(map_engine_error)?;

                logs::deposit_request(&controller, a_owner.key, a_initiator.key, assets);
            }
            Instruction::ClaimDeposit { assets, controller } => {
                accounts::expect_len(accounts, 6)?;
                let a_caller = &accounts[0];
                let a_slab = &accounts[1];
                let a_share_vault = &accounts[2];
                let a_receiver = &accounts[3];
                let a_vault_authority = &accounts[4];
                let a_token = &accounts[5];

                accounts::expect_signer(a_caller)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);

                let (vault_auth, _) = accounts::find_vault_authority(program_id, a_slab.key);
                accounts::expect_key(a_vault_authority, &vault_auth)?;
                verify_token_vault(
                    a_share_vault,
                    &vault_auth,
                    &Pubkey::new_from_array(config.share_mint),
                    &Pubkey::new_from_array(config.share_vault),
                )?;

                let engine = zc::engine_mut(&mut data)?;
                authorize(engine, &controller, a_caller.key)?;

                let shares = engine
                    .claim_deposit(&controller.to_bytes(), assets)
                    .map_err(map_engine_error)?;

                if shares > 0 {
                    let seed1: &[u8] = VAULT_AUTHORITY_SEED;
                    let seed2: &[u8] = a_slab.key.as_ref();
                    let bump_arr: [u8; 1] = [config.vault_authority_bump];
                    let seed3: &[u8] = &bump_arr;
                    let seeds: [&[u8]; 3] = [seed1, seed2, seed3];
                    let signer_seeds: [&[&[u8]]; 1] = [&seeds];

                    ledger::release(
                        a_token,
                        a_share_vault,
                        a_receiver,
                        a_vault_authority,
                        shares,
                        &signer_seeds,
                    )?;
                }

                logs::deposit_claim(a_receiver.key, &controller, assets, shares);
            }
            Instruction::ClaimMint { shares, controller } => {
                accounts::expect_len(accounts, 6)?;
                let a_caller = &accounts[0];
                let a_slab = &accounts[1];
                let a_share_vault = &accounts[2];
                let a_receiver = &accounts[3];
                let a_vault_authority = &accounts[4];
                let a_token = &accounts[5];

                accounts::expect_signer(a_caller)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);

                let (vault_auth, _) = accounts::find_vault_authority(program_id, a_slab.key);
                accounts::expect_key(a_vault_authority, &vault_auth)?;
                verify_token_vault(
                    a_share_vault,
                    &vault_auth,
                    &Pubkey::new_from_array(config.share_mint),
                    &Pubkey::new_from_array(config.share_vault),
                )?;

                let engine = zc::engine_mut(&mut data)?;
                authorize(engine, &controller, a_caller.key)?;

                let assets = engine
                    .claim_mint(&controller.to_bytes(), shares)
                    .map_err(map_engine_error)?;

                let seed1: &[u8] = VAULT_AUTHORITY_SEED;
                let seed2: &[u8] = a_slab.key.as_ref();
                let bump_arr: [u8; 1] = [config.vault_authority_bump];
                let seed3: &[u8] = &bump_arr;
                let seeds: [&[u8]; 3] = [seed1, seed2, seed3];
                let signer_seeds: [&[&[u8]]; 1] = [&seeds];

                ledger::release(
                    a_token,
                    a_share_vault,
                    a_receiver,
                    a_vault_authority,
                    shares,
                    &signer_seeds,
                )?;

                logs::deposit_claim(a_receiver.key, &controller, assets, shares);
            }
            Instruction::RequestRedeem { shares, controller } => {
                accounts::expect_len(accounts, 12)?;
                let a_initiator = &accounts[0];
                let a_owner = &accounts[1];
                let a_slab = &accounts[2];
                let a_owner_share = &accounts[3];
                let a_share_vault = &accounts[4];
                let a_asset_vault = &accounts[5];
                let a_fund_program = &accounts[6];
                let a_fund_state = &accounts[7];
                let a_fund_asset_vault = &accounts[8];
                let a_share_mint = &accounts[9];
                let a_vault_authority = &accounts[10];
                let a_token = &accounts[11];

                accounts::expect_signer(a_initiator)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);

                accounts::expect_key(a_fund_program, &Pubkey::new_from_array(config.fund_program))?;
                accounts::expect_key(a_fund_state, &Pubkey::new_from_array(config.fund_state))?;
                accounts::expect_key(
                    a_fund_asset_vault,
                    &Pubkey::new_from_array(config.fund_asset_vault),
                )?;
                accounts::expect_key(a_share_mint, &Pubkey::new_from_array(config.share_mint))?;

                let (vault_auth, _) = accounts::find_vault_authority(program_id, a_slab.key);
                accounts::expect_key(a_vault_authority, &vault_auth)?;
                verify_token_vault(
                    a_share_vault,
                    &vault_auth,
                    &Pubkey::new_from_array(config.share_mint),
                    &Pubkey::new_from_array(config.share_vault),
                )?;
                verify_token_vault(
                    a_asset_vault,
                    &vault_auth,
                    &Pubkey::new_from_array(config.asset_mint),
                    &Pubkey::new_from_array(config.asset_vault),
                )?;

                let owner_balance = verify_owner_account(
                    a_owner_share,
                    a_owner.key,
                    &Pubkey::new_from_array(config.share_mint),
                )?;

                let engine = zc::engine_mut(&mut data)?;
                authorize(engine, a_owner.key, a_initiator.key)?;

                if owner_balance < shares {
                    return Err(CarafeError::InsufficientBalance.into());
                }
                if shares == 0 {
                    return Err(CarafeError::ZeroAmount.into());
                }

                let seed1: &[u8] = VAULT_AUTHORITY_SEED;
                let seed2: &[u8] = a_slab.key.as_ref();
                let bump_arr: [u8; 1] = [config.vault_authority_bump];
                let seed3: &[u8] = &bump_arr;
                let seeds: [&[u8]; 3] = [seed1, seed2, seed3];
                let signer_seeds: [&[&[u8]]; 1] = [&seeds];

                if a_initiator.key == a_owner.key {
                    ledger::pull(a_token, a_owner_share, a_share_vault, a_initiator, shares)?;
                } else {
                    ledger::pull_delegated(
                        a_token,
                        a_owner_share,
                        a_share_vault,
                        a_vault_authority,
                        shares,
                        &signer_seeds,
                    )?;
                }

                let assets_before = ledger::balance_of(a_asset_vault)?;
                fund::redeem(
                    a_fund_program,
                    a_fund_state,
                    a_share_vault,
                    a_share_mint,
                    a_fund_asset_vault,
                    a_asset_vault,
                    a_vault_authority,
                    a_token,
                    shares,
                    &signer_seeds,
                )?;
                let assets_after = ledger::balance_of(a_asset_vault)?;
                let assets = assets_after
                    .checked_sub(assets_before)
                    .ok_or(CarafeError::Overflow)?;
                if assets == 0 {
                    return Err(CarafeError::ZeroConversion.into());
                }

                engine
                    .credit_redeem(&controller.to_bytes(), shares, assets)
                    .map_err(map_engine_error)?;

                logs::redeem_request(&controller, a_owner.key, a_initiator.key, shares);
            }
            Instruction::ClaimRedeem { shares, controller } => {
                accounts::expect_len(accounts, 6)?;
                let a_caller = &accounts[0];
                let a_slab = &accounts[1];
                let a_asset_vault = &accounts[2];
                let a_receiver = &accounts[3];
                let a_vault_authority = &accounts[4];
                let a_token = &accounts[5];

                accounts::expect_signer(a_caller)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);

                let (vault_auth, _) = accounts::find_vault_authority(program_id, a_slab.key);
                accounts::expect_key(a_vault_authority, &vault_auth)?;
                verify_token_vault(
                    a_asset_vault,
                    &vault_auth,
                    &Pubkey::new_from_array(config.asset_mint),
                    &Pubkey::new_from_array(config.asset_vault),
                )?;

                let engine = zc::engine_mut(&mut data)?;
                authorize(engine, &controller, a_caller.key)?;

                let assets = engine
                    .claim_redeem(&controller.to_bytes(), shares)
                    .map_err(map_engine_error)?;

                if assets > 0 {
                    let seed1: &[u8] = VAULT_AUTHORITY_SEED;
                    let seed2: &[u8] = a_slab.key.as_ref();
                    let bump_arr: [u8; 1] = [config.vault_authority_bump];
                    let seed3: &[u8] = &bump_arr;
                    let seeds: [&[u8]; 3] = [seed1, seed2, seed3];
                    let signer_seeds: [&[&[u8]]; 1] = [&seeds];

                    ledger::release(
                        a_token,
                        a_asset_vault,
                        a_receiver,
                        a_vault_authority,
                        assets,
                        &signer_seeds,
                    )?;
                }

                logs::redeem_claim(a_receiver.key, &controller, shares, assets);
            }
            Instruction::ClaimWithdraw { assets, controller } => {
                accounts::expect_len(accounts, 6)?;
                let a_caller = &accounts[0];
                let a_slab = &accounts[1];
                let a_asset_vault = &accounts[2];
                let a_receiver = &accounts[3];
                let a_vault_authority = &accounts[4];
                let a_token = &accounts[5];

                accounts::expect_signer(a_caller)?;
                accounts::expect_writable(a_slab)?;

                let mut data = state::slab_data_mut(a_slab)?;
                slab_guard(program_id, a_slab, &data)?;
                require_initialized(&data)?;
                let config = state::read_config(&data);

                let (vault_auth, _) = accounts::find_vault_authority(program_id, a_slab.key);
                accounts::expect_key(a_vault_authority, &vault_auth)?;
                verify_token_vault(
                    a_asset_vault,
                    &vault_auth,
                    &Pubkey::new_from_array(config.asset_mint),
                    &Pubkey::new_from_array(config.asset_vault),
                )?;

                let engine = zc::engine_mut(&mut data)?;
                authorize(engine, &controller, a_caller.key)?;

                let shares = engine
                    .claim_withdraw(&controller.to_bytes(), assets)
                    .map_err(map_engine_error)?;

                let seed1: &[u8] = VAULT_AUTHORITY_SEED;
                let seed2: &[u8] = a_slab.key.as_ref();
                let bump_arr: [u8; 1] = [config.vault_authority_bump];
                let seed3: &[u8] = &bump_arr;
                let seeds: [&[u8]; 3] = [seed1, seed2, seed3];
                let signer_seeds: [&[&[u8]]; 1] = [&seeds];

                ledger::release(
                    a_token,
                    a_asset_vault,
                    a_receiver,
                    a_vault_authority,
                    assets,
                    &signer_seeds,
                )?;

                logs::redeem_claim(a_receiver.key, &controller, shares, assets);
            }
        }
        Ok(())
    }
}

// 13. mod entrypoint
#[cfg(not(feature = "no-entrypoint"))]
pub mod entrypoint {
    use solana_program::{
        account_info::AccountInfo, entrypoint, entrypoint::ProgramResult,
        program_error::PrintProgramError, pubkey::Pubkey,
    };
    use crate::{error::CarafeError, processor};

    entrypoint!(process_instruction);

    fn process_instruction(
        program_id: &Pubkey,
        accounts: &[AccountInfo],
        instruction_data: &[u8],
    ) -> ProgramResult {
        if let Err(error) = processor::process_instruction(program_id, accounts, instruction_data)
        {
            error.print::<CarafeError>();
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(not(feature = "no-entrypoint"))]
solana_security_txt::security_txt! {
    name: "Carafe",
    project_url: "https://github.com/carafe-labs/carafe",
    contacts: "email:security@carafe.dev",
    policy: "https://github.com/carafe-labs/carafe/blob/master/SECURITY.md",
    preferred_languages: "en",
    source_code: "https://github.com/carafe-labs/carafe"
}

solana_program::declare_id!("CarafeWrap111111111111111111111111111111111");

pub use accounts::{find_vault_authority, find_wrapper_address};
