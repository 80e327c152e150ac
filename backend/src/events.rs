//! Inbound events, as produced by the upstream feed.
//!
//! On the wire (stdin for the binary) each event is one JSON object tagged by
//! `type`:
//!
//! ```json
//! {"type":"account","pubkey":"...","owner":"...","raw_data":"<base64>","slot":1}
//! {"type":"reserves","mint_address":"...","pool_address":"...","sol_reserves":1,"token_reserves":1,"slot":1}
//! {"type":"reserves","mint_address":"...","pool_address":"...","base_reserves":1,"quote_reserves":1,"slot":1}
//! {"type":"sol_price","price_usd":150.0}
//! ```

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::EngineError;

/// Raw account snapshot; only pool-program accounts get decoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub pubkey: Address,
    pub owner: Address,
    #[serde(with = "base64_bytes", alias = "data")]
    pub raw_data: Vec<u8>,
    pub slot: u64,
}

/// Reserve amounts as reported upstream, smallest units.
///
/// Feeds either name the sides by asset (SOL / token) or by pool side
/// (base / quote). Which pool side holds SOL depends on the pool, so
/// base/quote amounts are resolved against the decoded account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReserveAmounts {
    SolToken { sol: u64, token: u64 },
    BaseQuote { base: u64, quote: u64 },
}

impl ReserveAmounts {
    /// `(sol, token)` for a pool whose base side is wrapped SOL when
    /// `sol_is_base`.
    pub fn sol_and_token(&self, sol_is_base: bool) -> (u64, u64) {
        match *self {
            ReserveAmounts::SolToken { sol, token } => (sol, token),
            ReserveAmounts::BaseQuote { base, quote } if sol_is_base => (base, quote),
            ReserveAmounts::BaseQuote { base, quote } => (quote, base),
        }
    }
}

/// Trade-derived reserves for one pool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ReservesWire", into = "ReservesWire")]
pub struct ReservesUpdate {
    pub mint_address: Address,
    pub pool_address: Address,
    pub reserves: ReserveAmounts,
    pub slot: u64,
    pub real_sol_reserves: Option<u64>,
    pub real_token_reserves: Option<u64>,
}

/// Flat JSON shape of [`ReservesUpdate`].
#[derive(Clone, Debug, Serialize, Deserialize)]
struct ReservesWire {
    mint_address: Address,
    pool_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sol_reserves: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_reserves: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_reserves: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quote_reserves: Option<u64>,
    slot: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    real_sol_reserves: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    real_token_reserves: Option<u64>,
}

impl TryFrom<ReservesWire> for ReservesUpdate {
    type Error = String;

    fn try_from(w: ReservesWire) -> Result<Self, Self::Error> {
        let reserves = match (w.sol_reserves, w.token_reserves, w.base_reserves, w.quote_reserves) {
            (Some(sol), Some(token), None, None) => ReserveAmounts::SolToken { sol, token },
            (None, None, Some(base), Some(quote)) => ReserveAmounts::BaseQuote { base, quote },
            _ => {
                return Err(
                    "expected either sol_reserves + token_reserves or base_reserves + quote_reserves"
                        .to_string(),
                );
            }
        };

        Ok(Self {
            mint_address: w.mint_address,
            pool_address: w.pool_address,
            reserves,
            slot: w.slot,
            real_sol_reserves: w.real_sol_reserves,
            real_token_reserves: w.real_token_reserves,
        })
    }
}

impl From<ReservesUpdate> for ReservesWire {
    fn from(u: ReservesUpdate) -> Self {
        let (sol_reserves, token_reserves, base_reserves, quote_reserves) = match u.reserves {
            ReserveAmounts::SolToken { sol, token } => (Some(sol), Some(token), None, None),
            ReserveAmounts::BaseQuote { base, quote } => (None, None, Some(base), Some(quote)),
        };
        Self {
            mint_address: u.mint_address,
            pool_address: u.pool_address,
            sol_reserves,
            token_reserves,
            base_reserves,
            quote_reserves,
            slot: u.slot,
            real_sol_reserves: u.real_sol_reserves,
            real_token_reserves: u.real_token_reserves,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Account(AccountUpdate),
    Reserves(ReservesUpdate),
    SolPrice { price_usd: f64 },
}

impl InboundEvent {
    /// Parses one line of newline-delimited JSON.
    pub fn from_json_line(line: &str) -> Result<Self, EngineError> {
        serde_json::from_str(line.trim()).map_err(|e| EngineError::MalformedEvent(e.to_string()))
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}
