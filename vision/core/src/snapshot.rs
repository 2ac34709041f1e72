//! Market Data Snapshots
//!
//! A [`StockSnapshot`] is one fetch worth of market data: the daily bars of
//! the configured range plus the headline numbers derived from them. It is
//! produced by a [`DataSource`](crate::pipeline::DataSource), shared by `Arc`
//! and never mutated afterwards.

use chrono::{DateTime, Local, NaiveDate};

/// One daily bar
#[derive(Clone, Debug, PartialEq)]
pub struct PricePoint {
    /// Trading day
    pub date: NaiveDate,
    /// Opening price
    pub open: f64,
    /// Session high
    pub high: f64,
    /// Session low
    pub low: f64,
    /// Closing price
    pub close: f64,
    /// Traded volume
    pub volume: u64,
}

/// Direction of the latest move
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trend {
    /// Price went up
    Rising,
    /// Price went down
    Falling,
    /// No measurable change
    Flat,
}

/// Immutable market data snapshot
#[derive(Clone, Debug, PartialEq)]
pub struct StockSnapshot {
    /// Ticker symbol
    pub symbol: String,
    /// Display name of the company
    pub company_name: String,
    /// Latest close
    pub current_price: f64,
    /// Latest open
    pub open_price: f64,
    /// Latest high
    pub high_price: f64,
    /// Latest low
    pub low_price: f64,
    /// Change vs the previous close (or vs the open with a single bar)
    pub price_change: f64,
    /// `price_change` in percent
    pub price_change_pct: f64,
    /// Date of the latest bar
    pub latest_date: Option<NaiveDate>,
    /// Bars of the fetched range, oldest first
    pub history: Vec<PricePoint>,
    /// When the data was fetched
    pub fetched_at: DateTime<Local>,
    /// Market capitalisation, if the source reports it
    pub market_cap: Option<f64>,
    /// Latest session volume, if the source reports it
    pub volume: Option<u64>,
    /// Average daily volume, if the source reports it
    pub average_volume: Option<u64>,
}

impl StockSnapshot {
    /// Build a snapshot from daily bars, deriving the headline numbers
    ///
    /// An empty `history` yields an empty snapshot (see
    /// [`StockSnapshot::is_empty`]) with zeroed prices.
    #[must_use]
    pub fn from_history(
        symbol: impl Into<String>,
        company_name: impl Into<String>,
        history: Vec<PricePoint>,
    ) -> Self {
        let (current, open, high, low, latest_date, change, change_pct, volume) =
            match history.as_slice() {
                [] => (0.0, 0.0, 0.0, 0.0, None, 0.0, 0.0, None),
                [.., prev, last] => {
                    let change = last.close - prev.close;
                    (
                        last.close,
                        last.open,
                        last.high,
                        last.low,
                        Some(last.date),
                        change,
                        percent(change, prev.close),
                        Some(last.volume),
                    )
                }
                [only] => {
                    let change = only.close - only.open;
                    (
                        only.close,
                        only.open,
                        only.high,
                        only.low,
                        Some(only.date),
                        change,
                        percent(change, only.open),
                        Some(only.volume),
                    )
                }
            };

        Self {
            symbol: symbol.into(),
            company_name: company_name.into(),
            current_price: current,
            open_price: open,
            high_price: high,
            low_price: low,
            price_change: change,
            price_change_pct: change_pct,
            latest_date,
            history,
            fetched_at: Local::now(),
            market_cap: None,
            volume,
            average_volume: None,
        }
    }

    /// Attach a market capitalisation
    #[must_use]
    pub fn with_market_cap(mut self, market_cap: Option<f64>) -> Self {
        self.market_cap = market_cap;
        self
    }

    /// Attach an average daily volume
    #[must_use]
    pub fn with_average_volume(mut self, average_volume: Option<u64>) -> Self {
        self.average_volume = average_volume;
        self
    }

    /// Whether the snapshot carries no bars
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Direction of the latest move
    #[must_use]
    pub fn trend(&self) -> Trend {
        if self.price_change_pct > f64::EPSILON {
            Trend::Rising
        } else if self.price_change_pct < -f64::EPSILON {
            Trend::Falling
        } else {
            Trend::Flat
        }
    }

    /// First and last date of the history
    #[must_use]
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.history.first()?.date, self.history.last()?.date))
    }

    /// Lowest low and highest high across the history
    #[must_use]
    pub fn price_bounds(&self) -> Option<(f64, f64)> {
        if self.history.is_empty() {
            return None;
        }
        Some(self.history.iter().fold((f64::MAX, f64::MIN), |(lo, hi), p| {
            (lo.min(p.low), hi.max(p.high))
        }))
    }
}

fn percent(change: f64, base: f64) -> f64 {
    if base.abs() < f64::EPSILON {
        0.0
    } else {
        change / base * 100.0
    }
}
