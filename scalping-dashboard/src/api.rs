//! Response shapes of the web server's read-only JSON endpoints.

use serde::Deserialize;
use std::collections::BTreeMap;

pub const PORTFOLIO_SUMMARY: &str = "/api/portfolio_summary";
pub const OPEN_POSITIONS: &str = "/api/open_positions";
pub const TRADE_LOG: &str = "/api/trade_log";
pub const PORTFOLIO_HISTORY: &str = "/api/portfolio_history";

/// The server answers `{}` before the worker has written any state, so every
/// field falls back to zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PortfolioSummary {
    pub available_balance_usd: f64,
    pub total_equity_usd: f64,
    pub unrealized_pnl_usd: f64,
    pub open_positions_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Position {
    pub side: Side,
    pub leverage: f64,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub margin: f64,
    pub unrealized_pnl: f64,
}

impl Position {
    /// Unrealized PnL as a percentage of margin.
    pub fn pnl_pct(&self) -> f64 {
        if self.margin == 0.0 {
            0.0
        } else {
            self.unrealized_pnl / self.margin * 100.0
        }
    }
}

/// Symbol → position, sorted by symbol for stable rendering.
pub type OpenPositions = BTreeMap<String, Position>;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TradeLog {
    pub log_content: String,
}

impl TradeLog {
    /// The last `n` lines of the log.
    pub fn tail(&self, n: usize) -> Vec<&str> {
        let lines: Vec<&str> = self.log_content.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EquityPoint {
    /// ISO-8601, kept verbatim (the server may omit the UTC offset).
    pub timestamp: String,
    pub equity: f64,
}

pub type PortfolioHistory = Vec<EquityPoint>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_tolerates_empty_object() {
        let summary: PortfolioSummary = serde_json::from_str("{}").unwrap();
        assert_eq!(summary, PortfolioSummary::default());
    }

    #[test]
    fn test_positions_parse() {
        let json = r#"{
            "BTC/USDT": {"side": "long", "leverage": 10, "quantity": 0.01,
                         "entry_price": 60000.0, "current_price": 61000.0,
                         "margin": 60.0, "unrealized_pnl": 10.0},
            "ETH/USDT": {"side": "short", "leverage": 5, "quantity": 0.5,
                         "entry_price": 3000.0, "current_price": 3100.0,
                         "margin": 300.0, "unrealized_pnl": -50.0}
        }"#;
        let positions: OpenPositions = serde_json::from_str(json).unwrap();
        assert_eq!(positions.len(), 2);
        let btc = &positions["BTC/USDT"];
        assert_eq!(btc.side, Side::Long);
        assert!((btc.pnl_pct() - 16.666).abs() < 0.01);
        assert_eq!(positions["ETH/USDT"].side, Side::Short);
    }

    #[test]
    fn test_unknown_side_is_rejected() {
        let json = r#"{"side": "flat", "leverage": 1, "quantity": 1, "entry_price": 1,
                       "current_price": 1, "margin": 1, "unrealized_pnl": 0}"#;
        assert!(serde_json::from_str::<Position>(json).is_err());
    }

    #[test]
    fn test_zero_margin_pnl_pct() {
        let p = Position {
            side: Side::Long,
            leverage: 1.0,
            quantity: 1.0,
            entry_price: 1.0,
            current_price: 1.0,
            margin: 0.0,
            unrealized_pnl: 5.0,
        };
        assert_eq!(p.pnl_pct(), 0.0);
    }

    #[test]
    fn test_trade_log_tail() {
        let log = TradeLog {
            log_content: "a\nb\nc\nd\n".to_string(),
        };
        assert_eq!(log.tail(2), vec!["c", "d"]);
        assert_eq!(log.tail(10), vec!["a", "b", "c", "d"]);
        assert!(TradeLog::default().tail(3).is_empty());
    }

    #[test]
    fn test_history_keeps_timestamps_verbatim() {
        let json = r#"[{"timestamp": "2026-10-17T09:30:00.123456", "equity": 1000.5},
                       {"timestamp": "2026-10-17T09:35:00+00:00", "equity": 1001.0}]"#;
        let history: PortfolioHistory = serde_json::from_str(json).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, "2026-10-17T09:30:00.123456");
        assert_eq!(history[1].equity, 1001.0);
    }
}
