use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use signal_bot::logging::SignalLogger;
use signal_bot::{
    AppConfig, BinanceFutures, EngineConfig, SignalEngine, SignalHistory, Timeframe,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load("config.yaml").unwrap_or_else(|err| {
        warn!(error = %err, "config.yaml not usable, falling back to defaults");
        AppConfig::default()
    });
    let timeframe: Timeframe = config.timeframe.parse()?;
    info!(
        symbols = ?config.symbols,
        timeframe = %timeframe,
        strategy = %config.strategy,
        "starting signal engine"
    );

    let data = Arc::new(BinanceFutures::new(config.binance_base_url.clone()));
    let history = Arc::new(SignalHistory::new());
    let engine = SignalEngine::new(data, history, EngineConfig::from_app(&config));
    let logger = config.signal_log_path.as_deref().map(SignalLogger::new);

    let mut ticker = tokio::time::interval(Duration::from_secs(config.scan_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for symbol in &config.symbols {
                    match engine.analyze(symbol, timeframe).await {
                        Ok(response) => {
                            if let Some(logger) = &logger {
                                if let Err(err) = logger.append(&response) {
                                    warn!(error = %err, "failed to append signal log");
                                }
                            }
                        }
                        Err(err) => {
                            warn!(symbol = %symbol, error = %err, "analysis failed");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}
