use crate::api::{OpenPositions, PortfolioHistory, PortfolioSummary, TradeLog};
use crate::poller::{FetchError, PollStatus, Snapshot};
use std::fmt::Write;

/// Plain-text view of one snapshot. Failed sections say so and keep going.
pub fn render(snapshot: &Snapshot, tail_lines: usize) -> String {
    let mut out = String::new();

    match snapshot.status() {
        PollStatus::Ok => out.push_str("Status: OK\n"),
        PollStatus::Error => {
            out.push_str("Status: Error\n");
            for (endpoint, e) in snapshot.errors() {
                let _ = writeln!(out, "  {endpoint}: {e}");
            }
        }
    }
    out.push('\n');

    section(&mut out, "Portfolio", &snapshot.summary, summary);
    section(&mut out, "Open positions", &snapshot.positions, positions);
    section(&mut out, "Equity history", &snapshot.history, history);
    section(&mut out, "Trade log", &snapshot.trade_log, |out, log| {
        trade_log(out, log, tail_lines)
    });
    out
}

fn section<T>(
    out: &mut String,
    title: &str,
    result: &Result<T, FetchError>,
    body: impl FnOnce(&mut String, &T),
) {
    let _ = writeln!(out, "== {title} ==");
    match result {
        Ok(value) => body(out, value),
        Err(_) => out.push_str("(unavailable)\n"),
    }
    out.push('\n');
}

fn summary(out: &mut String, s: &PortfolioSummary) {
    let _ = writeln!(out, "Total equity:      {:>12.2} USD", s.total_equity_usd);
    let _ = writeln!(out, "Available balance: {:>12.2} USD", s.available_balance_usd);
    let _ = writeln!(out, "Unrealized PnL:    {:>+12.2} USD", s.unrealized_pnl_usd);
    let _ = writeln!(out, "Open positions:    {:>12}", s.open_positions_count);
}

fn positions(out: &mut String, positions: &OpenPositions) {
    if positions.is_empty() {
        out.push_str("No open positions.\n");
        return;
    }
    let _ = writeln!(
        out,
        "{:<12} {:<5} {:>5} {:>12} {:>12} {:>12} {:>10} {:>8}",
        "Symbol", "Side", "Lev", "Qty", "Entry", "Mark", "PnL", "PnL %"
    );
    for (symbol, p) in positions {
        let _ = writeln!(
            out,
            "{:<12} {:<5} {:>4}x {:>12.4} {:>12.4} {:>12.4} {:>+10.2} {:>+7.2}%",
            symbol,
            p.side.to_string(),
            p.leverage,
            p.quantity,
            p.entry_price,
            p.current_price,
            p.unrealized_pnl,
            p.pnl_pct()
        );
    }
}

fn history(out: &mut String, history: &PortfolioHistory) {
    match (history.first(), history.last()) {
        (Some(first), Some(last)) => {
            let _ = writeln!(
                out,
                "{} points, {} .. {}",
                history.len(),
                first.timestamp,
                last.timestamp
            );
            let _ = writeln!(
                out,
                "Equity {:.2} -> {:.2} ({:+.2})",
                first.equity,
                last.equity,
                last.equity - first.equity
            );
        }
        _ => out.push_str("No history yet.\n"),
    }
}

fn trade_log(out: &mut String, log: &TradeLog, tail_lines: usize) {
    let lines = log.tail(tail_lines);
    if lines.is_empty() {
        out.push_str("(empty)\n");
    }
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
}
