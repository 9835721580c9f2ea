//! Core types for the Polymarket trading bot

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trading side of an outcome token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// An open position as reported by the data API and cached by the
/// position tracker. Read-only for strategies during a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub market_id: String,
    pub condition_id: String,
    pub token_id: String,
    pub question: String,
    pub side: Side,
    /// Number of outcome shares held
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    /// Market has resolved and the position can be redeemed on-chain
    pub redeemable: bool,
    /// Position lives under the NegRisk adapter rather than the CTF directly
    pub neg_risk: bool,
    /// Token id of the other outcome in the same market, when the data
    /// API reports it. Needed to hedge by buying the opposite side.
    pub opposite_token_id: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Position {
    /// Signed PnL fraction relative to entry (0.10 = +10%)
    pub fn pnl_pct(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (self.current_price - self.entry_price) / self.entry_price
    }

    pub fn key(&self) -> PositionKey {
        PositionKey {
            market_id: self.market_id.clone(),
            token_id: self.token_id.clone(),
        }
    }
}

/// Composite key for strategy tracking maps. Replaces ad-hoc
/// `"{market}-{token}"` string keys so pruning can compare against the
/// snapshot without re-parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub market_id: String,
    pub token_id: String,
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Token ids are long; the short form is enough for logs. Truncate
        // on a char boundary, the id is server-supplied.
        match self.token_id.char_indices().nth(10) {
            Some((cut, _)) => write!(f, "{}/{}…", self.market_id, &self.token_id[..cut]),
            None => write!(f, "{}/{}", self.market_id, self.token_id),
        }
    }
}

/// Order intent emitted by strategies toward the order gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(entry: Decimal, current: Decimal) -> Position {
        Position {
            market_id: "mkt1".to_string(),
            condition_id: "0xcond".to_string(),
            token_id: "123456789012345".to_string(),
            question: "Will it happen?".to_string(),
            side: Side::Yes,
            size: dec!(100),
            entry_price: entry,
            current_price: current,
            redeemable: false,
            neg_risk: false,
            opposite_token_id: None,
            opened_at: None,
        }
    }

    #[test]
    fn pnl_pct_is_signed_fraction() {
        assert_eq!(position(dec!(0.50), dec!(0.55)).pnl_pct(), dec!(0.1));
        assert_eq!(position(dec!(0.50), dec!(0.40)).pnl_pct(), dec!(-0.2));
    }

    #[test]
    fn pnl_pct_zero_entry_is_zero() {
        assert_eq!(position(dec!(0), dec!(0.40)).pnl_pct(), Decimal::ZERO);
    }

    #[test]
    fn position_key_display_truncates_on_char_boundary() {
        let key = PositionKey {
            market_id: "mkt1".to_string(),
            token_id: "€€€€€€€€€€€€".to_string(),
        };
        assert_eq!(key.to_string(), "mkt1/€€€€€€€€€€…");

        let short = PositionKey {
            market_id: "mkt1".to_string(),
            token_id: "abc".to_string(),
        };
        assert_eq!(short.to_string(), "mkt1/abc");
    }

    #[test]
    fn position_key_equality_and_hash() {
        use std::collections::HashMap;
        let p = position(dec!(0.5), dec!(0.5));
        let mut map: HashMap<PositionKey, u32> = HashMap::new();
        map.insert(p.key(), 1);
        assert_eq!(map.get(&p.key()), Some(&1));
    }
}
