//! Stop-loss and circuit-breaker behavior through the backtest engine.

use chrono::{NaiveDate, NaiveDateTime};
use tradesim_core::config::{EngineConfig, RiskConfig, StopConfig};
use tradesim_core::domain::{Bar, Signal, TimeInForce, Timeframe};
use tradesim_core::engine::BacktestEngine;
use tradesim_core::execution::matching::{FillAt, MatchConfig};
use tradesim_core::risk::ExitReason;
use tradesim_core::sizers::PercentSizer;
use tradesim_core::strategy::ScriptedStrategy;

fn day(n: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, n).unwrap().and_hms_opt(0, 0, 0).unwrap()
}

fn flat_bar(symbol: &str, n: u32, close: f64) -> Bar {
    Bar::new(symbol, day(n), Timeframe::Day1, close, close, close, close, 100_000)
}

fn config(capital: f64, stops: StopConfig) -> EngineConfig {
    EngineConfig {
        initial_capital: capital,
        matching: MatchConfig {
            fill_at: FillAt::Close,
            max_volume_pct: 0.1,
            slippage_bps: 0.0,
            default_tif: TimeInForce::Ioc,
        },
        risk: RiskConfig {
            min_cash_buffer: 0.0,
            max_position_size: 100_000,
            max_position_value: 10_000_000.0,
            max_total_exposure: 50_000_000.0,
            ..RiskConfig::default()
        },
        stops,
        ..EngineConfig::default()
    }
}

#[test]
fn s4_trailing_stop_fires_after_peak() {
    let stops = StopConfig {
        position_stop_pct: 0.02,
        trailing_stop_pct: 0.05,
        use_trailing_stops: true,
        enable_circuit_breaker: false,
        ..StopConfig::default()
    };
    let mut engine =
        BacktestEngine::new(config(10_000.0, stops), Box::new(PercentSizer::new(1.0))).unwrap();
    let mut strategy = ScriptedStrategy::new().at(day(1), Signal::buy("AAPL", 100.0, day(1)));

    let bars = vec![
        flat_bar("AAPL", 1, 100.0),
        flat_bar("AAPL", 2, 105.0),
        flat_bar("AAPL", 3, 110.0),
        flat_bar("AAPL", 4, 104.0),
    ];
    let result = engine.run(&mut strategy, bars).unwrap();

    // Trigger after the 110 peak is 104.50; 104 fires the trailing stop
    // and exits the full position at the current reference.
    assert_eq!(result.metrics.stops_triggered, 1);
    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.quantity, 100);
    assert_eq!(trade.exit_price, 104.0);
    assert!((trade.realized_pnl - 400.0).abs() < 1e-10);
    assert!(engine.portfolio().positions.is_empty());
    // Exit happened on day 4, not via the end-of-stream close.
    assert_eq!(trade.exit_time, day(4));
}

#[test]
fn fixed_stop_fires_at_threshold() {
    let stops = StopConfig {
        position_stop_pct: 0.02,
        use_trailing_stops: false,
        enable_circuit_breaker: false,
        ..StopConfig::default()
    };
    let mut engine =
        BacktestEngine::new(config(10_000.0, stops), Box::new(PercentSizer::new(1.0))).unwrap();
    let mut strategy = ScriptedStrategy::new().at(day(1), Signal::buy("AAPL", 100.0, day(1)));

    let bars = vec![
        flat_bar("AAPL", 1, 100.0),
        flat_bar("AAPL", 2, 99.0),
        flat_bar("AAPL", 3, 97.9), // below the 98.00 trigger
    ];
    let result = engine.run(&mut strategy, bars).unwrap();

    assert_eq!(result.metrics.stops_triggered, 1);
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].exit_time, day(3));
    assert!((result.trades[0].exit_price - 97.9).abs() < 1e-10);
}

#[test]
fn trailing_pct_zero_degenerates_to_entry_stop() {
    let stops = StopConfig {
        position_stop_pct: 0.0,
        trailing_stop_pct: 0.0,
        use_trailing_stops: true,
        enable_circuit_breaker: false,
        ..StopConfig::default()
    };
    let mut engine =
        BacktestEngine::new(config(10_000.0, stops), Box::new(PercentSizer::new(1.0))).unwrap();
    let mut strategy = ScriptedStrategy::new().at(day(1), Signal::buy("AAPL", 100.0, day(1)));

    let bars = vec![
        flat_bar("AAPL", 1, 100.0),
        flat_bar("AAPL", 2, 100.0), // at entry: trigger == entry fires immediately
        flat_bar("AAPL", 3, 101.0),
    ];
    let result = engine.run(&mut strategy, bars).unwrap();

    assert_eq!(result.metrics.stops_triggered, 1);
    assert_eq!(result.trades[0].exit_time, day(2));
    assert!((result.trades[0].exit_price - 100.0).abs() < 1e-10);
}

#[test]
fn signal_stop_loss_arms_absolute_stop() {
    let stops = StopConfig {
        position_stop_pct: 0.0,
        use_trailing_stops: false,
        enable_circuit_breaker: false,
        ..StopConfig::default()
    };
    let mut engine =
        BacktestEngine::new(config(10_000.0, stops), Box::new(PercentSizer::new(1.0))).unwrap();
    let mut strategy = ScriptedStrategy::new()
        .at(day(1), Signal::buy("AAPL", 100.0, day(1)).with_stop_loss(96.5));

    let bars = vec![
        flat_bar("AAPL", 1, 100.0),
        flat_bar("AAPL", 2, 97.0),
        flat_bar("AAPL", 3, 96.0), // breaches 96.5
        flat_bar("AAPL", 4, 99.0),
    ];
    let result = engine.run(&mut strategy, bars).unwrap();

    assert_eq!(result.metrics.stops_triggered, 1);
    assert_eq!(result.trades[0].exit_time, day(3));
}

#[test]
fn s5_circuit_breaker_halts_new_entries() {
    let stops = StopConfig {
        position_stop_pct: 0.0,
        use_trailing_stops: false,
        portfolio_stop_pct: 0.99, // isolate the drawdown trigger
        max_drawdown_pct: 0.10,
        enable_circuit_breaker: true,
        ..StopConfig::default()
    };
    let mut engine =
        BacktestEngine::new(config(100_000.0, stops), Box::new(PercentSizer::new(1.0))).unwrap();
    // The day-4 SELL would close the position, but the tripped breaker
    // suppresses all signal-driven orders.
    let mut strategy = ScriptedStrategy::new()
        .at(day(1), Signal::buy("X", 100.0, day(1)))
        .at(day(4), Signal::sell("X", 94.0, day(4)));

    let bars = vec![
        flat_bar("X", 1, 100.0),    // buy 1000 @ 100
        flat_bar("X", 2, 105.0),    // equity 105,000 = HWM
        flat_bar("X", 3, 94.499),   // equity 94,499: 94,499/105,000 < 0.90
        flat_bar("X", 4, 94.0),
    ];
    let result = engine.run(&mut strategy, bars).unwrap();

    assert!(engine.risk().breaker_tripped());
    // The SELL signal never reached the engine; only the entry counted.
    assert_eq!(result.metrics.signals_generated, 1);
    // Position survived until the end-of-stream forced close at 94.
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].exit_time, day(4));
    assert!((result.trades[0].exit_price - 94.0).abs() < 1e-10);
}

#[test]
fn breaker_leaves_stop_exits_alive() {
    let stops = StopConfig {
        position_stop_pct: 0.08,
        use_trailing_stops: false,
        portfolio_stop_pct: 0.99,
        max_drawdown_pct: 0.05,
        enable_circuit_breaker: true,
        ..StopConfig::default()
    };
    let mut engine =
        BacktestEngine::new(config(100_000.0, stops), Box::new(PercentSizer::new(1.0))).unwrap();
    let mut strategy = ScriptedStrategy::new().at(day(1), Signal::buy("X", 100.0, day(1)));

    let bars = vec![
        flat_bar("X", 1, 100.0), // buy 1000 @ 100, fixed stop at 92
        flat_bar("X", 2, 94.0),  // equity 94,000: breaker trips (6% > 5%)
        flat_bar("X", 3, 91.0),  // position stop fires despite the breaker
        flat_bar("X", 4, 91.0),
    ];
    let result = engine.run(&mut strategy, bars).unwrap();

    assert!(engine.risk().breaker_tripped());
    assert_eq!(result.metrics.stops_triggered, 1);
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].exit_time, day(3));
}

#[test]
fn breaker_reset_reopens_trading() {
    let stops = StopConfig {
        position_stop_pct: 0.0,
        use_trailing_stops: false,
        portfolio_stop_pct: 0.99,
        max_drawdown_pct: 0.05,
        enable_circuit_breaker: true,
        ..StopConfig::default()
    };
    let mut engine =
        BacktestEngine::new(config(100_000.0, stops), Box::new(PercentSizer::new(0.5))).unwrap();
    let mut strategy = ScriptedStrategy::new().at(day(1), Signal::buy("X", 100.0, day(1)));

    // 500 shares at 100: day-2 equity 50,000 + 500 * 89 = 94,500 < 95,000.
    let bars = vec![flat_bar("X", 1, 100.0), flat_bar("X", 2, 89.0)];
    engine.run(&mut strategy, bars).unwrap();
    assert!(engine.risk().breaker_tripped());

    engine.reset_circuit_breaker();
    assert!(!engine.risk().breaker_tripped());
}

#[test]
fn one_exit_reason_when_multiple_stops_breach() {
    let stops = StopConfig {
        position_stop_pct: 0.02,
        trailing_stop_pct: 0.01,
        use_trailing_stops: true,
        enable_circuit_breaker: false,
        ..StopConfig::default()
    };
    let mut engine =
        BacktestEngine::new(config(10_000.0, stops), Box::new(PercentSizer::new(1.0))).unwrap();
    let mut strategy = ScriptedStrategy::new().at(day(1), Signal::buy("AAPL", 100.0, day(1)));

    let bars = vec![
        flat_bar("AAPL", 1, 100.0),
        flat_bar("AAPL", 2, 90.0), // breaches fixed (98) and trailing (99)
    ];
    let result = engine.run(&mut strategy, bars).unwrap();

    // Exactly one exit despite both stop kinds being breached.
    assert_eq!(result.metrics.stops_triggered, 1);
    assert_eq!(result.trades.len(), 1);
    let _ = ExitReason::PositionStop; // reason ordering covered in unit tests
}
