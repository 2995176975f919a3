//! Price feeds.
//!
//! Two independent sources are compared every decision cycle:
//! - primary: exchange last-trade price (`binance`)
//! - secondary: on-chain oracle answer (`chainlink`)
//!
//! A partial failure is reported distinctly so the caller can treat the
//! cycle as indeterminate instead of trading on one price.

pub mod binance;
pub mod chainlink;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use crate::types::{BotError, BotResult, PriceSample, PriceSource};

#[cfg(test)]
use mockall::automock;

/// A single price source.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn latest_price(&self) -> BotResult<(Decimal, chrono::DateTime<chrono::Utc>)>;

    fn name(&self) -> &str;
}

/// Reads the current price from both sources.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PriceSampler: Send + Sync {
    async fn sample_primary(&self) -> BotResult<PriceSample>;

    async fn sample_secondary(&self) -> BotResult<PriceSample>;
}

/// Outcome of sampling both sources for one cycle.
#[derive(Debug)]
pub enum PairSample {
    Both {
        primary: PriceSample,
        secondary: PriceSample,
    },
    /// One source answered, the other failed.
    Partial { failed: PriceSource, error: BotError },
}

/// Sample both feeds concurrently.
///
/// Returns an error only when both sources fail.
pub async fn sample_pair(sampler: &dyn PriceSampler) -> BotResult<PairSample> {
    let (primary, secondary) =
        futures::join!(sampler.sample_primary(), sampler.sample_secondary());

    match (primary, secondary) {
        (Ok(primary), Ok(secondary)) => Ok(PairSample::Both { primary, secondary }),
        (Ok(_), Err(error)) => Ok(PairSample::Partial {
            failed: PriceSource::Secondary,
            error,
        }),
        (Err(error), Ok(_)) => Ok(PairSample::Partial {
            failed: PriceSource::Primary,
            error,
        }),
        (Err(primary_err), Err(secondary_err)) => Err(BotError::transient(
            "price feeds",
            format!("primary: {primary_err}; secondary: {secondary_err}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// Feed pair
// ---------------------------------------------------------------------------

/// `PriceSampler` over two concrete feeds.
pub struct FeedPair {
    primary: Box<dyn PriceFeed>,
    secondary: Box<dyn PriceFeed>,
}

impl FeedPair {
    pub fn new(primary: Box<dyn PriceFeed>, secondary: Box<dyn PriceFeed>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl PriceSampler for FeedPair {
    async fn sample_primary(&self) -> BotResult<PriceSample> {
        let (value, observed_at) = self.primary.latest_price().await?;
        debug!(feed = self.primary.name(), %value, "Primary price");
        Ok(PriceSample {
            source: PriceSource::Primary,
            value,
            observed_at,
        })
    }

    async fn sample_secondary(&self) -> BotResult<PriceSample> {
        let (value, observed_at) = self.secondary.latest_price().await?;
        debug!(feed = self.secondary.name(), %value, "Secondary price");
        Ok(PriceSample {
            source: PriceSource::Secondary,
            value,
            observed_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
