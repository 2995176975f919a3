//! Transaction executor.
//!
//! Submits signed write operations with strictly sequenced nonces and waits
//! for their receipts. In dry-run mode nothing is broadcast: submissions
//! return a synthetic `dry-run-<uuid>` hash whose receipt is SUCCESS.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::ledger::{AccountReader, LedgerCall, LedgerWriter, TxParams};
use crate::types::{BotError, BotResult, Receipt, TxHandle, TxStatus, DRY_RUN_PREFIX};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Sending account address.
    pub account: String,
    /// Gas limit for bets.
    pub gas: u64,
    /// Gas limit for claims.
    pub claim_gas: u64,
    pub gas_price_gwei: Decimal,
    pub dry_run: bool,
    pub receipt_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            gas: 200_000,
            claim_gas: 200_000,
            gas_price_gwei: Decimal::from(5),
            dry_run: true,
            receipt_poll_interval: Duration::from_millis(500),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TransactionExecutor {
    config: ExecutorConfig,
    writer: Arc<dyn LedgerWriter>,
    account: Arc<dyn AccountReader>,
    /// Next nonce this process intends to use. Held locked for the whole
    /// read-send-increment sequence.
    nonce: Mutex<u64>,
}

impl TransactionExecutor {
    pub fn new(
        config: ExecutorConfig,
        writer: Arc<dyn LedgerWriter>,
        account: Arc<dyn AccountReader>,
    ) -> Self {
        Self {
            config,
            writer,
            account,
            nonce: Mutex::new(0),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Local nonce counter (next nonce to use if the chain agrees).
    pub async fn nonce_counter(&self) -> u64 {
        *self.nonce.lock().await
    }

    /// Seed the local counter from the chain's pending transaction count.
    /// Dry runs never touch the chain and keep the counter at zero.
    pub async fn sync_nonce(&self) -> BotResult<u64> {
        let mut counter = self.nonce.lock().await;
        if self.config.dry_run {
            return Ok(*counter);
        }
        let chain_nonce = self.account.transaction_count().await?;
        *counter = (*counter).max(chain_nonce);
        info!(account = %self.config.account, nonce = *counter, "Nonce counter synchronised");
        Ok(*counter)
    }

    /// Submit a write operation carrying `value` native coin.
    ///
    /// Nonce = max(local counter, chain count). The counter advances by one
    /// after every send attempt, successful or not. A `NonceConflict`
    /// resynchronises the counter to the chain and is returned to the
    /// caller without resubmitting.
    pub async fn submit(&self, call: LedgerCall, value: Decimal) -> BotResult<TxHandle> {
        if self.config.dry_run {
            let tx_hash = format!("{DRY_RUN_PREFIX}{}", uuid::Uuid::new_v4());
            info!(%call, %value, %tx_hash, "[DRY RUN] Would send transaction");
            return Ok(TxHandle {
                tx_hash,
                nonce: None,
                submitted_at: Utc::now(),
            });
        }

        let mut counter = self.nonce.lock().await;

        let chain_nonce = self.account.transaction_count().await?;
        let nonce = (*counter).max(chain_nonce);

        let params = TxParams {
            from: self.config.account.clone(),
            value,
            gas: if call.is_claim() {
                self.config.claim_gas
            } else {
                self.config.gas
            },
            gas_price_gwei: self.config.gas_price_gwei,
            nonce,
        };

        let result = self.writer.send(call, params).await;
        *counter = nonce + 1;

        match result {
            Ok(tx_hash) => {
                info!(%call, %value, nonce, %tx_hash, "Transaction sent");
                Ok(TxHandle {
                    tx_hash,
                    nonce: Some(nonce),
                    submitted_at: Utc::now(),
                })
            }
            Err(e @ BotError::NonceConflict { .. }) => {
                match self.account.transaction_count().await {
                    Ok(fresh) => {
                        warn!(%call, nonce, resync = fresh, error = %e, "Nonce conflict, resynchronised");
                        *counter = fresh;
                    }
                    Err(read_err) => {
                        warn!(%call, nonce, error = %e, resync_error = %read_err, "Nonce conflict, resync failed");
                    }
                }
                Err(e)
            }
            Err(e) => {
                warn!(%call, nonce, error = %e, "Transaction send failed");
                Err(e)
            }
        }
    }

    /// One non-blocking receipt check.
    pub async fn poll_receipt(&self, handle: &TxHandle) -> BotResult<Option<Receipt>> {
        if handle.is_dry_run() {
            return Ok(Some(Receipt {
                tx_hash: handle.tx_hash.clone(),
                status: TxStatus::Success,
            }));
        }
        let status = self.writer.receipt(&handle.tx_hash).await?;
        Ok(status.map(|status| Receipt {
            tx_hash: handle.tx_hash.clone(),
            status,
        }))
    }

    /// Poll until the transaction is mined or `timeout` elapses.
    ///
    /// Read errors while polling are logged and polling continues; only the
    /// deadline ends the wait early.
    pub async fn await_receipt(&self, handle: &TxHandle, timeout: Duration) -> BotResult<Receipt> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.poll_receipt(handle).await {
                Ok(Some(receipt)) => {
                    debug!(tx_hash = %receipt.tx_hash, status = ?receipt.status, "Receipt received");
                    return Ok(receipt);
                }
                Ok(None) => {}
                Err(e) => debug!(tx_hash = %handle.tx_hash, error = %e, "Receipt poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BotError::ReceiptTimeout {
                    tx_hash: handle.tx_hash.clone(),
                    waited_secs: timeout.as_secs(),
                });
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.config.receipt_poll_interval.min(remaining)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MockAccountReader, MockLedgerWriter};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn live_config() -> ExecutorConfig {
        ExecutorConfig {
            account: "0x00000000000000000000000000000000000000aa".into(),
            dry_run: false,
            receipt_poll_interval: Duration::from_millis(5),
            ..ExecutorConfig::default()
        }
    }

    fn chain_at(count: u64) -> MockAccountReader {
        let mut account = MockAccountReader::new();
        account.expect_transaction_count().returning(move || Ok(count));
        account
    }

    #[tokio::test]
    async fn test_dry_run_uses_no_nonce() {
        let executor = TransactionExecutor::new(
            ExecutorConfig::default(),
            Arc::new(MockLedgerWriter::new()),
            Arc::new(MockAccountReader::new()),
        );
        let handle = executor.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap();
        assert!(handle.tx_hash.starts_with("dry-run-"));
        assert!(handle.is_dry_run());
        assert_eq!(executor.nonce_counter().await, 0);

        let receipt = executor
            .await_receipt(&handle, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(receipt.succeeded());
    }

    #[tokio::test]
    async fn test_sync_nonce_seeds_from_chain() {
        let executor = TransactionExecutor::new(
            live_config(),
            Arc::new(MockLedgerWriter::new()),
            Arc::new(chain_at(7)),
        );
        assert_eq!(executor.nonce_counter().await, 0);
        assert_eq!(executor.sync_nonce().await.unwrap(), 7);
        assert_eq!(executor.nonce_counter().await, 7);
    }

    #[tokio::test]
    async fn test_sync_nonce_skips_chain_in_dry_run() {
        let mut account = MockAccountReader::new();
        account.expect_transaction_count().never();
        let executor = TransactionExecutor::new(
            ExecutorConfig::default(),
            Arc::new(MockLedgerWriter::new()),
            Arc::new(account),
        );
        assert_eq!(executor.sync_nonce().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_nonce_propagates_read_error() {
        let mut account = MockAccountReader::new();
        account
            .expect_transaction_count()
            .returning(|| Err(BotError::transient("nonce", "rpc down")));
        let executor = TransactionExecutor::new(
            live_config(),
            Arc::new(MockLedgerWriter::new()),
            Arc::new(account),
        );
        assert!(executor.sync_nonce().await.is_err());
        assert_eq!(executor.nonce_counter().await, 0);
    }

    #[tokio::test]
    async fn test_nonce_sequence_increments_by_one() {
        let mut writer = MockLedgerWriter::new();
        writer
            .expect_send()
            .returning(|_, params| Ok(format!("0xhash{}", params.nonce)));

        let executor =
            TransactionExecutor::new(live_config(), Arc::new(writer), Arc::new(chain_at(7)));

        let first = executor.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap();
        let second = executor.submit(LedgerCall::Claim(3), Decimal::ZERO).await.unwrap();
        assert_eq!(first.nonce, Some(7));
        assert_eq!(second.nonce, Some(8));
        assert_eq!(executor.nonce_counter().await, 9);
    }

    #[tokio::test]
    async fn test_scenario_nonce_increments_on_send_failure() {
        let mut writer = MockLedgerWriter::new();
        writer
            .expect_send()
            .returning(|_, _| Err(BotError::transient("send", "connection reset")));

        let executor =
            TransactionExecutor::new(live_config(), Arc::new(writer), Arc::new(chain_at(3)));

        assert!(executor.submit(LedgerCall::BetDown, dec!(0.1)).await.is_err());
        assert_eq!(executor.nonce_counter().await, 4);
        assert!(executor.submit(LedgerCall::BetDown, dec!(0.1)).await.is_err());
        assert_eq!(executor.nonce_counter().await, 5);
    }

    #[tokio::test]
    async fn test_chain_ahead_of_counter_wins() {
        let chain = Arc::new(AtomicU64::new(2));
        let chain_reader = chain.clone();
        let mut account = MockAccountReader::new();
        account
            .expect_transaction_count()
            .returning(move || Ok(chain_reader.load(Ordering::SeqCst)));

        let mut writer = MockLedgerWriter::new();
        writer
            .expect_send()
            .returning(|_, params| Ok(format!("0x{}", params.nonce)));

        let executor = TransactionExecutor::new(live_config(), Arc::new(writer), Arc::new(account));
        executor.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap();

        // another wallet user advanced the chain
        chain.store(10, Ordering::SeqCst);
        let handle = executor.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap();
        assert_eq!(handle.nonce, Some(10));
    }

    #[tokio::test]
    async fn test_nonce_conflict_resyncs_and_returns_error() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let mut account = MockAccountReader::new();
        // first read 5 (pre-send), second read 9 (resync)
        account.expect_transaction_count().returning(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(5)
            } else {
                Ok(9)
            }
        });

        let mut writer = MockLedgerWriter::new();
        writer.expect_send().times(1).returning(|_, params| {
            Err(BotError::NonceConflict {
                nonce: params.nonce,
                message: "nonce too low".into(),
            })
        });

        let executor = TransactionExecutor::new(live_config(), Arc::new(writer), Arc::new(account));
        let err = executor.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap_err();
        assert!(matches!(err, BotError::NonceConflict { nonce: 5, .. }));
        assert_eq!(executor.nonce_counter().await, 9);
    }

    #[tokio::test]
    async fn test_chain_nonce_read_failure_does_not_advance() {
        let mut account = MockAccountReader::new();
        account
            .expect_transaction_count()
            .returning(|| Err(BotError::transient("rpc", "timeout")));
        let mut writer = MockLedgerWriter::new();
        writer.expect_send().never();

        let executor = TransactionExecutor::new(live_config(), Arc::new(writer), Arc::new(account));
        assert!(executor.submit(LedgerCall::BetUp, dec!(0.1)).await.is_err());
        assert_eq!(executor.nonce_counter().await, 0);
    }

    #[tokio::test]
    async fn test_claim_uses_claim_gas() {
        let mut writer = MockLedgerWriter::new();
        writer
            .expect_send()
            .withf(|call, params| call.is_claim() && params.gas == 90_000 && params.value.is_zero())
            .returning(|_, _| Ok("0xclaim".into()));

        let config = ExecutorConfig {
            claim_gas: 90_000,
            ..live_config()
        };
        let executor = TransactionExecutor::new(config, Arc::new(writer), Arc::new(chain_at(0)));
        executor.submit(LedgerCall::Claim(12), Decimal::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn test_await_receipt_reverted() {
        let mut writer = MockLedgerWriter::new();
        writer.expect_send().returning(|_, _| Ok("0xabc".into()));
        writer
            .expect_receipt()
            .returning(|_| Ok(Some(TxStatus::Reverted)));

        let executor =
            TransactionExecutor::new(live_config(), Arc::new(writer), Arc::new(chain_at(0)));
        let handle = executor.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap();
        let receipt = executor
            .await_receipt(&handle, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(receipt.status, TxStatus::Reverted);
        assert!(!receipt.succeeded());
    }

    #[tokio::test]
    async fn test_await_receipt_times_out() {
        let mut writer = MockLedgerWriter::new();
        writer.expect_send().returning(|_, _| Ok("0xslow".into()));
        writer.expect_receipt().returning(|_| Ok(None));

        let executor =
            TransactionExecutor::new(live_config(), Arc::new(writer), Arc::new(chain_at(0)));
        let handle = executor.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap();
        let err = executor
            .await_receipt(&handle, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::ReceiptTimeout { .. }));
    }

    #[tokio::test]
    async fn test_await_receipt_survives_poll_errors() {
        let polls = Arc::new(AtomicU64::new(0));
        let seen = polls.clone();
        let mut writer = MockLedgerWriter::new();
        writer.expect_send().returning(|_, _| Ok("0xflaky".into()));
        writer.expect_receipt().returning(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BotError::transient("receipt", "503"))
            } else {
                Ok(Some(TxStatus::Success))
            }
        });

        let executor =
            TransactionExecutor::new(live_config(), Arc::new(writer), Arc::new(chain_at(0)));
        let handle = executor.submit(LedgerCall::BetUp, dec!(0.1)).await.unwrap();
        let receipt = executor
            .await_receipt(&handle, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(receipt.succeeded());
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }
}
