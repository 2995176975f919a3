//! Periodic status message.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::balance::BalanceWatch;
use crate::ledger::RoundReader;
use crate::notify::{status_message, Notifier, StatusReport};
use crate::types::BotResult;

pub struct Heartbeat {
    name: String,
    interval: Duration,
    reader: Arc<dyn RoundReader>,
    notifier: Arc<dyn Notifier>,
    balance: BalanceWatch,
}

impl Heartbeat {
    pub fn new(
        name: String,
        interval: Duration,
        reader: Arc<dyn RoundReader>,
        notifier: Arc<dyn Notifier>,
        balance: BalanceWatch,
    ) -> Self {
        Self {
            name,
            interval,
            reader,
            notifier,
            balance,
        }
    }

    /// Gather one status report and send it silently.
    pub async fn beat(&self) -> BotResult<StatusReport> {
        let paused = self.reader.is_paused().await?;
        let epoch = self.reader.current_epoch().await?;
        let round = self.reader.round_details(epoch).await?;
        let latest_block = self.reader.latest_block().await?;
        let balance = self.balance.borrow().as_ref().map(|s| s.value);

        let report = StatusReport {
            paused,
            epoch,
            lock_block: round.lock_block,
            end_block: round.end_block,
            latest_block,
            balance,
        };

        info!(
            paused,
            epoch,
            lock_block = round.lock_block,
            end_block = round.end_block,
            latest_block,
            balance = ?balance,
            "Heartbeat"
        );
        self.notifier
            .notify(&status_message(&self.name, &report), true)
            .await;
        Ok(report)
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.beat().await {
                        warn!(error = %e, "Heartbeat failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Heartbeat stopping");
                    break;
                }
            }
        }
    }
}
