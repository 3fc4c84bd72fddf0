//! Artifact export: trades, equity curve, and the full results bundle.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tradesim_core::domain::CompletedTrade;
use tradesim_core::engine::BacktestResult;

pub fn write_trades_csv(path: &Path, trades: &[CompletedTrade]) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("failed to create trades CSV {}", path.display()))?;

    writeln!(
        file,
        "symbol,entry_time,exit_time,entry_price,exit_price,quantity,realized_pnl,return_pct,holding_days"
    )?;

    for trade in trades {
        writeln!(
            file,
            "{},{},{},{:.4},{:.4},{},{:.4},{:.6},{:.4}",
            trade.symbol,
            trade.entry_time,
            trade.exit_time,
            trade.entry_price,
            trade.exit_price,
            trade.quantity,
            trade.realized_pnl,
            trade.return_pct,
            trade.holding_days,
        )?;
    }

    Ok(())
}

pub fn write_trades_json(path: &Path, trades: &[CompletedTrade]) -> Result<()> {
    let json = serde_json::to_string_pretty(trades).context("failed to serialize trades")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write trades JSON {}", path.display()))?;
    Ok(())
}

pub fn write_equity_csv(path: &Path, curve: &[(NaiveDateTime, f64)]) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("failed to create equity CSV {}", path.display()))?;

    writeln!(file, "timestamp,value")?;
    for (timestamp, value) in curve {
        writeln!(file, "{timestamp},{value:.4}")?;
    }

    Ok(())
}

pub fn write_result_json(path: &Path, result: &BacktestResult) -> Result<()> {
    let json =
        serde_json::to_string_pretty(result).context("failed to serialize backtest result")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write result JSON {}", path.display()))?;
    Ok(())
}
