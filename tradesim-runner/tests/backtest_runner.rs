//! End-to-end: TOML config -> bar source -> backtest -> exported artifacts.

use chrono::{NaiveDate, NaiveDateTime};
use tradesim_core::data::MemoryBarSource;
use tradesim_core::domain::{Bar, Signal, Timeframe};
use tradesim_core::sizers::PercentSizer;
use tradesim_core::strategy::ScriptedStrategy;
use tradesim_runner::config::RunConfig;
use tradesim_runner::export::{write_equity_csv, write_result_json, write_trades_csv};
use tradesim_runner::runner::run_backtest;

fn day(n: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, n).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn bar(n: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar::new("X", day(n), Timeframe::Day1, open, high, low, close, 10_000)
}

const CONFIG_TOML: &str = r#"
[run]
symbols = ["X"]
start_date = "2024-01-01"
end_date = "2024-01-31"
initial_capital = 10000.0

[matching]
fill_at = "close"
slippage_bps = 0.0
max_volume_pct = 0.1

[risk]
min_cash_buffer = 0.0
max_position_size = 10000
max_position_value = 1000000.0
max_total_exposure = 5000000.0

[stops]
position_stop_pct = 0.0
use_trailing_stops = false
enable_circuit_breaker = false
"#;

fn source() -> MemoryBarSource {
    let mut source = MemoryBarSource::new();
    source
        .insert_series(vec![
            bar(1, 100.0, 101.0, 99.0, 100.0),
            bar(2, 100.0, 110.0, 100.0, 110.0),
            bar(3, 110.0, 112.0, 108.0, 108.0),
        ])
        .unwrap();
    source
}

#[test]
fn configured_round_trip_matches_expected_numbers() {
    let config = RunConfig::from_toml(CONFIG_TOML).unwrap();
    let mut strategy = ScriptedStrategy::new()
        .at(day(1), Signal::buy("X", 100.0, day(1)))
        .at(day(3), Signal::sell("X", 108.0, day(3)));

    let result = run_backtest(
        &config,
        &source(),
        &mut strategy,
        Box::new(PercentSizer::new(1.0)),
    )
    .unwrap();

    assert_eq!(result.bar_count, 3);
    assert_eq!(result.trades.len(), 1);
    assert!((result.trades[0].realized_pnl - 800.0).abs() < 1e-10);
    assert!((result.final_value - 10_800.0).abs() < 1e-10);
    assert!((result.total_return_pct - 8.0).abs() < 1e-10);
}

#[test]
fn artifacts_export_from_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = RunConfig::from_toml(CONFIG_TOML).unwrap();
    let mut strategy = ScriptedStrategy::new()
        .at(day(1), Signal::buy("X", 100.0, day(1)))
        .at(day(3), Signal::sell("X", 108.0, day(3)));

    let result = run_backtest(
        &config,
        &source(),
        &mut strategy,
        Box::new(PercentSizer::new(1.0)),
    )
    .unwrap();

    let trades_path = dir.path().join("trades.csv");
    let equity_path = dir.path().join("equity.csv");
    let result_path = dir.path().join("result.json");
    write_trades_csv(&trades_path, &result.trades).unwrap();
    write_equity_csv(&equity_path, &result.equity_curve).unwrap();
    write_result_json(&result_path, &result).unwrap();

    let trades = std::fs::read_to_string(&trades_path).unwrap();
    assert!(trades.contains("X,"));
    assert!(trades.contains("800.0000"));

    let equity = std::fs::read_to_string(&equity_path).unwrap();
    assert!(equity.lines().count() > 2);

    let bundle: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&result_path).unwrap()).unwrap();
    assert_eq!(bundle["final_value"].as_f64().unwrap(), 10_800.0);
    assert_eq!(bundle["trades"].as_array().unwrap().len(), 1);
}

#[test]
fn slippage_configured_through_toml() {
    let toml = CONFIG_TOML.replace("slippage_bps = 0.0", "slippage_bps = 50.0");
    let config = RunConfig::from_toml(&toml).unwrap();
    let mut strategy = ScriptedStrategy::new()
        .at(day(1), Signal::buy("X", 100.0, day(1)))
        .at(day(3), Signal::sell("X", 108.0, day(3)));

    let result = run_backtest(
        &config,
        &source(),
        &mut strategy,
        Box::new(PercentSizer::new(1.0)),
    )
    .unwrap();

    // Buy at 100 * 1.005, sell at 108 * 0.995: pnl = 100 * 6.96.
    assert!((result.trades[0].realized_pnl - 696.0).abs() < 1e-9);
}

#[test]
fn order_audit_log_written_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("orders.csv");
    let toml = format!(
        "{}\n",
        CONFIG_TOML.replace(
            "initial_capital = 10000.0",
            &format!(
                "initial_capital = 10000.0\nlog_orders = true\norder_log_path = \"{}\"",
                log_path.display()
            )
        )
    );
    let config = RunConfig::from_toml(&toml).unwrap();
    let mut strategy = ScriptedStrategy::new()
        .at(day(1), Signal::buy("X", 100.0, day(1)))
        .at(day(3), Signal::sell("X", 108.0, day(3)));

    let _ = run_backtest(
        &config,
        &source(),
        &mut strategy,
        Box::new(PercentSizer::new(1.0)),
    )
    .unwrap();

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.starts_with("ts,event,client_id"));
    assert!(log.contains(",sent,"));
    assert!(log.contains(",acked,"));
    assert!(log.contains(",filled,"));
}
