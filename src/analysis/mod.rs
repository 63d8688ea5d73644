//! Pure price-series analytics computed locally from OHLCV history.

pub mod technical;

pub use technical::{analyze, summary, Direction, TechnicalSnapshot};
