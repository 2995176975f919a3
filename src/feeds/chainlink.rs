//! On-chain oracle feed (Chainlink aggregator `latestRoundData`).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ethers::contract::abigen;
use ethers::prelude::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::PriceFeed;
use crate::ledger::units;
use crate::types::{BotError, BotResult};

abigen!(
    AggregatorV3,
    r#"[
        function decimals() external view returns (uint8)
        function latestRoundData() external view returns (uint80, int256, uint256, uint256, uint80)
    ]"#
);

pub struct ChainlinkFeed {
    aggregator: AggregatorV3<Provider<Http>>,
    decimals: u32,
    call_timeout: Duration,
}

impl ChainlinkFeed {
    /// Connect to an aggregator and read its answer scale once.
    pub async fn connect(rpc_url: &str, address: &str, call_timeout: Duration) -> BotResult<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| BotError::Configuration(format!("invalid oracle RPC url: {e}")))?;
        let address: Address = address
            .parse()
            .map_err(|e| BotError::Configuration(format!("invalid oracle address: {e}")))?;
        let aggregator = AggregatorV3::new(address, Arc::new(provider));

        let call = aggregator.decimals();
        let decimals = match tokio::time::timeout(call_timeout, call.call()).await {
            Ok(Ok(d)) => d as u32,
            Ok(Err(e)) => {
                return Err(BotError::Configuration(format!("oracle decimals(): {e}")))
            }
            Err(_) => {
                return Err(BotError::Configuration(
                    "oracle decimals() timed out".to_string(),
                ))
            }
        };

        info!(oracle = ?address, decimals, "Connected to price oracle");

        Ok(Self {
            aggregator,
            decimals,
            call_timeout,
        })
    }
}

/// Scale a raw answer and its update time.
fn answer_to_price(
    answer: I256,
    decimals: u32,
    updated_at: U256,
) -> BotResult<(Decimal, DateTime<Utc>)> {
    let price = units::scaled_to_decimal(answer, decimals)?;
    if price <= Decimal::ZERO {
        return Err(BotError::transient(
            "oracle",
            format!("non-positive answer {price}"),
        ));
    }
    let secs = units::u256_to_u64(updated_at, "oracle updatedAt")?;
    let observed_at = Utc
        .timestamp_opt(secs as i64, 0)
        .single()
        .ok_or_else(|| BotError::Conversion(format!("invalid oracle timestamp {secs}")))?;
    Ok((price, observed_at))
}

#[async_trait]
impl PriceFeed for ChainlinkFeed {
    async fn latest_price(&self) -> BotResult<(Decimal, DateTime<Utc>)> {
        let call = self.aggregator.latest_round_data();
        let (round_id, answer, _started_at, updated_at, _answered_in_round) =
            match tokio::time::timeout(self.call_timeout, call.call()).await {
                Ok(Ok(data)) => data,
                Ok(Err(e)) => return Err(BotError::transient("latestRoundData", e)),
                Err(_) => {
                    return Err(BotError::transient(
                        "latestRoundData",
                        format!("timed out after {}ms", self.call_timeout.as_millis()),
                    ))
                }
            };

        let (price, observed_at) = answer_to_price(answer, self.decimals, updated_at)?;
        debug!(round_id = %round_id, %price, %observed_at, "Oracle price");
        Ok((price, observed_at))
    }

    fn name(&self) -> &str {
        "chainlink"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_answer_scaling() {
        let (price, at) =
            answer_to_price(I256::from(30_512_000_000i64), 8, U256::from(1_700_000_000u64))
                .unwrap();
        assert_eq!(price, dec!(305.12));
        assert_eq!(at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_non_positive_answer_rejected() {
        let err = answer_to_price(I256::zero(), 8, U256::from(1u64)).unwrap_err();
        assert!(matches!(err, BotError::TransientNetwork { .. }));
    }
}
