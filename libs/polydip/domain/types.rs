//! Core order, market, and trade vocabulary.

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Side of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        Self::from_str(s).unwrap_or(Side::Buy)
    }

    /// Returns the opposite side (Buy <-> Sell)
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order time-in-force kind
///
/// GTC/GTD are limit kinds sized in shares; FOK/FAK are market kinds whose
/// `original_size` is a quote-currency amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderKind {
    #[default]
    GTC, // Good Till Cancelled
    GTD, // Good Till Date
    FOK, // Fill Or Kill
    FAK, // Fill And Kill
}

impl OrderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "GTC" => Some(OrderKind::GTC),
            "GTD" => Some(OrderKind::GTD),
            "FOK" => Some(OrderKind::FOK),
            "FAK" => Some(OrderKind::FAK),
            _ => None,
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        Self::from_str(s).unwrap_or_default()
    }

    /// Market kinds carry a quote-currency amount instead of a share size
    pub fn is_market(&self) -> bool {
        matches!(self, OrderKind::FOK | OrderKind::FAK)
    }
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::GTC => write!(f, "GTC"),
            OrderKind::GTD => write!(f, "GTD"),
            OrderKind::FOK => write!(f, "FOK"),
            OrderKind::FAK => write!(f, "FAK"),
        }
    }
}

/// Order status
///
/// Terminal states are `Filled`, `Cancelled`, `Expired`, `Rejected`; no
/// status-change events are emitted after a terminal state is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Submitted, not yet acknowledged by the book
    Pending,
    /// Resting on the book
    Open,
    /// Partially matched, remainder still live
    PartiallyFilled,
    /// Fully matched
    Filled,
    /// Cancelled by the user or the venue
    Cancelled,
    /// GTD expiration reached
    Expired,
    /// Refused by validation or the venue
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PENDING" => Some(OrderStatus::Pending),
            "LIVE" | "OPEN" => Some(OrderStatus::Open),
            "PARTIALLY_FILLED" | "PARTIAL" => Some(OrderStatus::PartiallyFilled),
            "MATCHED" | "FILLED" => Some(OrderStatus::Filled),
            "CANCELLED" | "CANCELED" => Some(OrderStatus::Cancelled),
            "EXPIRED" => Some(OrderStatus::Expired),
            "REJECTED" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Open => write!(f, "OPEN"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Expired => write!(f, "EXPIRED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Trade/Fill status as reported by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Matched,
    Mined,
    Confirmed,
    Retrying,
    Failed,
}

impl TradeStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "MATCHED" => Some(TradeStatus::Matched),
            "MINED" => Some(TradeStatus::Mined),
            "CONFIRMED" => Some(TradeStatus::Confirmed),
            "RETRYING" => Some(TradeStatus::Retrying),
            "FAILED" => Some(TradeStatus::Failed),
            _ => None,
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        Self::from_str(s).unwrap_or(TradeStatus::Matched)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Matched => write!(f, "MATCHED"),
            TradeStatus::Mined => write!(f, "MINED"),
            TradeStatus::Confirmed => write!(f, "CONFIRMED"),
            TradeStatus::Retrying => write!(f, "RETRYING"),
            TradeStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// UP or DOWN outcome of a binary price market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeSide {
    Up,
    Down,
}

impl OutcomeSide {
    pub fn opposite(&self) -> Self {
        match self {
            OutcomeSide::Up => OutcomeSide::Down,
            OutcomeSide::Down => OutcomeSide::Up,
        }
    }
}

impl std::fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeSide::Up => write!(f, "UP"),
            OutcomeSide::Down => write!(f, "DOWN"),
        }
    }
}

/// Underlying crypto asset of a short-duration price market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Underlying {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl Underlying {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BTC" => Some(Underlying::Btc),
            "ETH" => Some(Underlying::Eth),
            "SOL" => Some(Underlying::Sol),
            "XRP" => Some(Underlying::Xrp),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Underlying::Btc => "BTC",
            Underlying::Eth => "ETH",
            Underlying::Sol => "SOL",
            Underlying::Xrp => "XRP",
        }
    }
}

impl std::fmt::Display for Underlying {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Duration class of a short-duration market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketDuration {
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
}

impl MarketDuration {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "5m" => Some(MarketDuration::FiveMinutes),
            "15m" => Some(MarketDuration::FifteenMinutes),
            _ => None,
        }
    }

    pub fn minutes(&self) -> u32 {
        match self {
            MarketDuration::FiveMinutes => 5,
            MarketDuration::FifteenMinutes => 15,
        }
    }
}

impl std::fmt::Display for MarketDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketDuration::FiveMinutes => write!(f, "5m"),
            MarketDuration::FifteenMinutes => write!(f, "15m"),
        }
    }
}

// =============================================================================
// Market Descriptor
// =============================================================================

/// A short-duration binary market the engine can trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDescriptor {
    /// On-chain condition identifier
    pub condition_id: String,
    /// Venue slug, used together with the round start time as a round id
    pub slug: String,
    /// Token id of the UP outcome
    pub up_token_id: String,
    /// Token id of the DOWN outcome
    pub down_token_id: String,
    /// Underlying crypto asset
    pub underlying: Underlying,
    /// Market duration in minutes
    pub duration_minutes: u32,
    /// Market end time, epoch ms
    pub end_time_ms: i64,
}

impl MarketDescriptor {
    /// Token id for the given outcome side
    pub fn token_id(&self, side: OutcomeSide) -> &str {
        match side {
            OutcomeSide::Up => &self.up_token_id,
            OutcomeSide::Down => &self.down_token_id,
        }
    }

    /// Which outcome a token id belongs to, if any
    pub fn outcome_of(&self, token_id: &str) -> Option<OutcomeSide> {
        if token_id == self.up_token_id {
            Some(OutcomeSide::Up)
        } else if token_id == self.down_token_id {
            Some(OutcomeSide::Down)
        } else {
            None
        }
    }

    /// Milliseconds until market end (negative when already ended)
    pub fn time_until_end_ms(&self, now_ms: i64) -> i64 {
        self.end_time_ms - now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parsing_and_opposite() {
        assert_eq!(Side::from_str("buy"), Some(Side::Buy));
        assert_eq!(Side::from_str("SELL"), Some(Side::Sell));
        assert_eq!(Side::from_str("hold"), None);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn test_order_kind_market_classification() {
        assert!(OrderKind::FOK.is_market());
        assert!(OrderKind::FAK.is_market());
        assert!(!OrderKind::GTC.is_market());
        assert!(!OrderKind::GTD.is_market());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_status_aliases() {
        assert_eq!(OrderStatus::from_str("LIVE"), Some(OrderStatus::Open));
        assert_eq!(OrderStatus::from_str("MATCHED"), Some(OrderStatus::Filled));
        assert_eq!(
            OrderStatus::from_str("CANCELED"),
            Some(OrderStatus::Cancelled)
        );
    }

    #[test]
    fn test_market_descriptor_lookup() {
        let market = MarketDescriptor {
            condition_id: "0xc0ffee".to_string(),
            slug: "btc-up-or-down-5m".to_string(),
            up_token_id: "111".to_string(),
            down_token_id: "222".to_string(),
            underlying: Underlying::Btc,
            duration_minutes: 5,
            end_time_ms: 1_700_000_300_000,
        };

        assert_eq!(market.token_id(OutcomeSide::Up), "111");
        assert_eq!(market.outcome_of("222"), Some(OutcomeSide::Down));
        assert_eq!(market.outcome_of("333"), None);
        assert_eq!(market.time_until_end_ms(1_700_000_000_000), 300_000);
    }
}
