use thiserror::Error;

/// Errors surfaced by the signal pipeline.
///
/// Indicator or detector shortfalls (not enough candles, missing values) are
/// not errors: detectors degrade to neutral output instead. Only transport
/// failures and unusable market data abort an analysis.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The fetch failed upstream or the exchange returned an empty candle
    /// set. A short-but-nonempty history is not this error; it degrades to a
    /// neutral HOLD instead.
    #[error("market data unavailable for {symbol} {timeframe}: {reason}")]
    DataUnavailable {
        symbol: String,
        timeframe: String,
        reason: String,
    },

    /// HTTP transport failure talking to the exchange.
    #[error("exchange request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The exchange responded, but the payload did not parse.
    #[error("malformed exchange response: {0}")]
    BadResponse(String),

    /// An unrecognized timeframe string in config or a request.
    #[error("unknown timeframe '{0}'")]
    UnknownTimeframe(String),
}

pub type Result<T> = std::result::Result<T, SignalError>;
