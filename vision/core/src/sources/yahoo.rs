//! Yahoo Finance Data Source
//!
//! Fetches daily bars from the public chart API:
//!
//! - `GET {api_base}/v8/finance/chart/{symbol}?range={range}&interval=1d`
//! - `GET {api_base}/v7/finance/quote?symbols={symbol}` (market cap)
//!
//! Bars with missing fields (holidays, halted sessions) are skipped. The
//! average volume is computed over the fetched range. The quote lookup is
//! best effort: when it fails the snapshot simply carries no market cap.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;

use crate::config::StockConfig;
use crate::pipeline::DataSource;
use crate::snapshot::{PricePoint, StockSnapshot};

/// Chart API client
#[derive(Clone, Debug)]
pub struct YahooFinanceSource {
    symbol: String,
    range: String,
    api_base: String,
    http_client: reqwest::Client,
}

impl YahooFinanceSource {
    /// Create a source for `symbol`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        symbol: impl Into<String>,
        range: impl Into<String>,
        api_base: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stockvision/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            symbol: symbol.into(),
            range: range.into(),
            api_base: api_base.into(),
            http_client,
        })
    }

    /// Create from the stock section of the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &StockConfig) -> anyhow::Result<Self> {
        Self::new(
            config.symbol.clone(),
            config.chart_range.clone(),
            config.api_base.clone(),
            config.timeout,
        )
    }

    /// Ticker symbol
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn chart_url(&self) -> String {
        format!("{}/v8/finance/chart/{}", self.api_base, self.symbol)
    }

    fn quote_url(&self) -> String {
        format!("{}/v7/finance/quote", self.api_base)
    }

    async fn fetch_market_cap(&self) -> anyhow::Result<Option<f64>> {
        let response = self
            .http_client
            .get(self.quote_url())
            .query(&[("symbols", self.symbol.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("Yahoo Finance quote returned {}", response.status());
        }

        let quote: QuoteResponse = response.json().await?;
        Ok(parse_market_cap(&self.symbol, quote))
    }
}

#[async_trait]
impl DataSource for YahooFinanceSource {
    fn name(&self) -> &'static str {
        "yahoo-finance"
    }

    async fn fetch(&self) -> anyhow::Result<StockSnapshot> {
        let response = self
            .http_client
            .get(self.chart_url())
            .query(&[("range", self.range.as_str()), ("interval", "1d")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Yahoo Finance returned {status}: {body}");
        }

        let chart: ChartResponse = response.json().await?;
        let snapshot = parse_chart(&self.symbol, chart)?;

        let market_cap = match self.fetch_market_cap().await {
            Ok(market_cap) => market_cap,
            Err(e) => {
                tracing::debug!(symbol = %self.symbol, error = %e, "Market cap unavailable");
                None
            }
        };
        Ok(snapshot.with_market_cap(market_cap))
    }
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    symbol: Option<String>,
    short_name: Option<String>,
    long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Quote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    quote_response: QuoteBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteBody {
    result: Vec<QuoteResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResult {
    symbol: String,
    market_cap: Option<f64>,
}

fn parse_market_cap(symbol: &str, quote: QuoteResponse) -> Option<f64> {
    quote
        .quote_response
        .result
        .into_iter()
        .find(|r| r.symbol.eq_ignore_ascii_case(symbol))
        .and_then(|r| r.market_cap)
        .filter(|cap| cap.is_finite() && *cap > 0.0)
}

fn parse_chart(symbol: &str, chart: ChartResponse) -> anyhow::Result<StockSnapshot> {
    if let Some(err) = chart.chart.error {
        anyhow::bail!("Yahoo Finance error {}: {}", err.code, err.description);
    }
    let result = chart
        .chart
        .result
        .and_then(|results| results.into_iter().next())
        .context("Yahoo Finance returned no chart result")?;

    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();
    let history: Vec<PricePoint> = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let value = |series: &[Option<f64>]| series.get(i).copied().flatten();
            Some(PricePoint {
                date: DateTime::from_timestamp(ts, 0)?.date_naive(),
                open: value(&quote.open)?,
                high: value(&quote.high)?,
                low: value(&quote.low)?,
                close: value(&quote.close)?,
                volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
            })
        })
        .collect();

    let average_volume = (!history.is_empty())
        .then(|| history.iter().map(|p| p.volume).sum::<u64>() / history.len() as u64);

    let symbol = result.meta.symbol.unwrap_or_else(|| symbol.to_string());
    let company_name = result
        .meta
        .short_name
        .or(result.meta.long_name)
        .unwrap_or_else(|| symbol.clone());

    Ok(StockSnapshot::from_history(symbol, company_name, history).with_average_volume(average_volume))
}
