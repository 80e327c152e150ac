//! Pool Account Decoder
//!
//! Reads the fixed on-chain layout of a constant-product pool account:
//!
//! ```text
//! [0..8)     discriminator (skipped)
//! pool_bump  u8
//! index      u16 (LE)
//! creator, base_mint, quote_mint, lp_mint,
//! pool_base_token_account, pool_quote_token_account   6 x [u8; 32]
//! lp_supply  u64 (LE)
//! coin_creator                                         [u8; 32]
//! ```
//!
//! Accounts owned by the pool program can carry other layouts, and garbage
//! shows up during reorgs, so every failure path returns `None`.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::address::{Address, WRAPPED_SOL_MINT};

pub const DISCRIMINATOR_LEN: usize = 8;

/// Anchor discriminator of the pool account type.
pub const POOL_ACCOUNT_DISCRIMINATOR: [u8; 8] = [241, 154, 109, 4, 17, 177, 109, 188];

/// Minimum payload length (discriminator included). Trailing padding is ignored.
pub const POOL_ACCOUNT_MIN_LEN: usize = DISCRIMINATOR_LEN + std::mem::size_of::<PoolLayout>();

/// Byte-exact mirror of the on-chain struct. Integers are kept as byte
/// arrays so decoding is little-endian regardless of host.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PoolLayout {
    pool_bump: u8,
    index: [u8; 2],
    creator: Address,
    base_mint: Address,
    quote_mint: Address,
    lp_mint: Address,
    pool_base_token_account: Address,
    pool_quote_token_account: Address,
    lp_supply: [u8; 8],
    coin_creator: Address,
}

/// Decoded pool account, tagged with the address it was read from and the
/// slot at which it was observed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAccount {
    pub pool_address: Address,
    pub pool_bump: u8,
    pub index: u16,
    pub creator: Address,
    pub base_mint: Address,
    pub quote_mint: Address,
    pub lp_mint: Address,
    pub pool_base_token_account: Address,
    pub pool_quote_token_account: Address,
    pub lp_supply: u64,
    pub coin_creator: Address,
    pub slot: u64,
}

impl PoolAccount {
    /// True for pools that list wrapped SOL as the base side.
    pub fn sol_is_base(&self) -> bool {
        self.base_mint == WRAPPED_SOL_MINT
    }

    /// The tradable token of the pool: whichever side is not wrapped SOL.
    pub fn token_mint(&self) -> Address {
        if self.sol_is_base() {
            self.quote_mint
        } else {
            self.base_mint
        }
    }

    /// Serializes back into the on-chain layout, discriminator included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let layout = PoolLayout {
            pool_bump: self.pool_bump,
            index: self.index.to_le_bytes(),
            creator: self.creator,
            base_mint: self.base_mint,
            quote_mint: self.quote_mint,
            lp_mint: self.lp_mint,
            pool_base_token_account: self.pool_base_token_account,
            pool_quote_token_account: self.pool_quote_token_account,
            lp_supply: self.lp_supply.to_le_bytes(),
            coin_creator: self.coin_creator,
        };

        let mut out = Vec::with_capacity(POOL_ACCOUNT_MIN_LEN);
        out.extend_from_slice(&POOL_ACCOUNT_DISCRIMINATOR);
        out.extend_from_slice(bytemuck::bytes_of(&layout));
        out
    }
}

/// True when the payload starts with the pool-account discriminator.
pub fn has_pool_discriminator(data: &[u8]) -> bool {
    data.get(..DISCRIMINATOR_LEN) == Some(&POOL_ACCOUNT_DISCRIMINATOR[..])
}

/// Decodes a raw pool account payload. The discriminator is skipped, not
/// checked; gate on [`has_pool_discriminator`] where that matters.
pub fn decode(pool_address: Address, data: &[u8], slot: u64) -> Option<PoolAccount> {
    let body = data.get(DISCRIMINATOR_LEN..POOL_ACCOUNT_MIN_LEN)?;
    let layout: &PoolLayout = bytemuck::try_from_bytes(body).ok()?;

    Some(PoolAccount {
        pool_address,
        pool_bump: layout.pool_bump,
        index: u16::from_le_bytes(layout.index),
        creator: layout.creator,
        base_mint: layout.base_mint,
        quote_mint: layout.quote_mint,
        lp_mint: layout.lp_mint,
        pool_base_token_account: layout.pool_base_token_account,
        pool_quote_token_account: layout.pool_quote_token_account,
        lp_supply: u64::from_le_bytes(layout.lp_supply),
        coin_creator: layout.coin_creator,
        slot,
    })
}
