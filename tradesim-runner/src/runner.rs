//! Backtest orchestration: config + bar source + strategy in, results out.

use crate::config::RunConfig;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tradesim_core::data::BarSource;
use tradesim_core::engine::{BacktestEngine, BacktestResult};
use tradesim_core::sizers::Sizer;
use tradesim_core::strategy::Strategy;
use tracing::info;

/// Install the global tracing subscriber. Call once, from binaries only;
/// the core crates never install subscribers.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Load bars for every configured symbol and run the backtest.
pub fn run_backtest(
    config: &RunConfig,
    source: &dyn BarSource,
    strategy: &mut dyn Strategy,
    sizer: Box<dyn Sizer>,
) -> Result<BacktestResult> {
    let timeframe = config.timeframe()?;
    let start = config
        .start_date()?
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid");
    let end = config
        .end_date()?
        .and_hms_opt(23, 59, 59)
        .expect("end of day is always valid");

    let engine_config = config.to_engine_config()?;
    let mut engine = BacktestEngine::new(engine_config, sizer)
        .context("failed to construct backtest engine")?;

    if config.run.symbols.len() == 1 {
        let symbol = &config.run.symbols[0];
        let bars = source
            .bars(symbol, timeframe, start, end)
            .with_context(|| format!("loading bars for {symbol}"))?;
        info!(%symbol, bars = bars.len(), "loaded bar stream");
        engine.run(strategy, bars).context("backtest run failed")
    } else {
        let mut bars_by_symbol = BTreeMap::new();
        for symbol in &config.run.symbols {
            let bars = source
                .bars(symbol, timeframe, start, end)
                .with_context(|| format!("loading bars for {symbol}"))?;
            info!(%symbol, bars = bars.len(), "loaded bar stream");
            bars_by_symbol.insert(symbol.clone(), bars);
        }
        engine
            .run_multi(strategy, bars_by_symbol)
            .context("backtest run failed")
    }
}
