//! Exchange ticker feed (Binance spot REST).
//!
//! Endpoint: `GET {base}/api/v3/ticker/price?symbol=BNBUSDT`
//! Auth: none. Weight 2 per request.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use super::PriceFeed;
use crate::types::{BotError, BotResult};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// `/api/v3/ticker/price` response. Prices arrive as strings.
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

pub struct BinanceTicker {
    http: Client,
    base_url: String,
    symbol: String,
}

impl BinanceTicker {
    pub fn new(base_url: Option<String>, symbol: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("roundwager/0.1.0")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            symbol: symbol.to_uppercase(),
        })
    }

    fn parse_ticker(&self, ticker: TickerPrice) -> BotResult<Decimal> {
        if ticker.symbol != self.symbol {
            return Err(BotError::transient(
                "binance ticker",
                format!("asked for {}, got {}", self.symbol, ticker.symbol),
            ));
        }
        Decimal::from_str(&ticker.price)
            .map_err(|e| BotError::Conversion(format!("ticker price {}: {e}", ticker.price)))
    }
}

#[async_trait]
impl PriceFeed for BinanceTicker {
    async fn latest_price(&self) -> BotResult<(Decimal, DateTime<Utc>)> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);

        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", self.symbol.as_str())])
            .send()
            .await
            .map_err(|e| BotError::transient("binance ticker", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::transient(
                "binance ticker",
                format!("HTTP {status}: {body}"),
            ));
        }

        let ticker: TickerPrice = resp
            .json()
            .await
            .map_err(|e| BotError::transient("binance ticker", e))?;

        let price = self.parse_ticker(ticker)?;
        debug!(symbol = %self.symbol, %price, "Ticker price");
        Ok((price, Utc::now()))
    }

    fn name(&self) -> &str {
        "binance"
    }
}
