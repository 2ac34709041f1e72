//! Market Data Sources
//!
//! Implementations of [`DataSource`](crate::pipeline::DataSource).

mod yahoo;

pub use yahoo::YahooFinanceSource;
