//! Cached account balance.
//!
//! A single refresher task owns the write side of a `watch` channel; the
//! betting loop, heartbeat and status server only read snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ledger::AccountReader;
use crate::types::BotResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceSnapshot {
    /// Spendable balance after the gas reserve (or the configured override).
    pub value: Decimal,
    pub refreshed_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.refreshed_at
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age()
            .to_std()
            .map(|age| age > max_age)
            .unwrap_or(false)
    }
}

/// Read side of the balance cache. `None` until the first refresh lands.
pub type BalanceWatch = watch::Receiver<Option<BalanceSnapshot>>;

#[derive(Debug, Clone)]
pub struct BalanceConfig {
    pub refresh_interval: Duration,
    pub gas_reserve: Decimal,
    /// Replaces the chain balance when > 0.
    pub balance_override: Decimal,
}

pub struct BalanceRefresher {
    reader: Arc<dyn AccountReader>,
    config: BalanceConfig,
    tx: watch::Sender<Option<BalanceSnapshot>>,
}

impl BalanceRefresher {
    pub fn new(reader: Arc<dyn AccountReader>, config: BalanceConfig) -> (Self, BalanceWatch) {
        let (tx, rx) = watch::channel(None);
        (Self { reader, config, tx }, rx)
    }

    pub fn subscribe(&self) -> BalanceWatch {
        self.tx.subscribe()
    }

    /// Read the chain once and publish. On failure the previous snapshot
    /// stays in place.
    pub async fn refresh(&self) -> BotResult<BalanceSnapshot> {
        let value = if self.config.balance_override > Decimal::ZERO {
            self.config.balance_override
        } else {
            let chain = self.reader.balance().await?;
            (chain - self.config.gas_reserve).max(Decimal::ZERO)
        };

        let snapshot = BalanceSnapshot {
            value,
            refreshed_at: Utc::now(),
        };
        self.tx.send_replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// Refresh every `refresh_interval` until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.refresh_interval);
        info!(
            interval_secs = self.config.refresh_interval.as_secs(),
            override_active = self.config.balance_override > Decimal::ZERO,
            "Balance refresher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh().await {
                        Ok(snapshot) => info!(balance = %snapshot.value, "Balance refreshed"),
                        Err(e) => warn!(error = %e, "Balance refresh failed, keeping last snapshot"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Balance refresher stopping");
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
