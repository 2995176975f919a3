//! EVM adapter for the prediction round contract.
//!
//! One signer-backed HTTP client serves reads and writes. Every RPC call is
//! bounded by `call_timeout` and reported as `TransientNetwork` on failure;
//! nothing is retried here.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ethers::contract::abigen;
use ethers::prelude::*;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::units::{self, PRICE_DECIMALS};
use super::{classify_send_error, AccountReader, LedgerCall, LedgerWriter, RoundReader, TxParams};
use crate::types::{BotError, BotResult, Round, TxStatus};

abigen!(
    PredictionContract,
    r#"[
        function currentEpoch() external view returns (uint256)
        function rounds(uint256 epoch) external view returns (uint256, uint256, uint256, uint256, int256, int256, uint256, uint256, uint256, uint256, uint256, bool)
        function paused() external view returns (bool)
        function minBetAmount() external view returns (uint256)
        function claimable(uint256 epoch, address user) external view returns (bool)
        function betBull() external payable
        function betBear() external payable
        function claim(uint256 epoch) external
    ]"#
);

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Connection settings for [`EvmLedger::connect`].
#[derive(Debug, Clone)]
pub struct EvmSettings {
    pub rpc_url: String,
    pub contract_address: String,
    pub chain_id: u64,
    pub call_timeout: Duration,
}

pub struct EvmLedger {
    client: Arc<SignerClient>,
    contract: PredictionContract<SignerClient>,
    account: Address,
    call_timeout: Duration,
}

impl EvmLedger {
    /// Build the client and prove the endpoint answers.
    ///
    /// Any failure here is a `Configuration` error: the process must not
    /// start against an unreachable or misconfigured node.
    pub async fn connect(settings: &EvmSettings, private_key: &SecretString) -> BotResult<Self> {
        let provider = Provider::<Http>::try_from(settings.rpc_url.as_str())
            .map_err(|e| BotError::Configuration(format!("invalid RPC url: {e}")))?;

        let wallet: LocalWallet = private_key
            .expose_secret()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| BotError::Configuration(format!("invalid private key: {e}")))?
            .with_chain_id(settings.chain_id);
        let account = wallet.address();

        let contract_address: Address = settings
            .contract_address
            .parse()
            .map_err(|e| BotError::Configuration(format!("invalid contract address: {e}")))?;

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let contract = PredictionContract::new(contract_address, client.clone());

        let ledger = Self {
            client,
            contract,
            account,
            call_timeout: settings.call_timeout,
        };

        let block = ledger
            .latest_block()
            .await
            .map_err(|e| BotError::Configuration(format!("RPC endpoint unreachable: {e}")))?;

        info!(
            rpc = %settings.rpc_url,
            contract = %settings.contract_address,
            account = ?account,
            block,
            "Connected to ledger"
        );

        Ok(ledger)
    }

    /// Lowercase hex address of the betting account.
    pub fn account(&self) -> String {
        format!("{:?}", self.account)
    }

    async fn bounded<T, E, F>(&self, what: &str, fut: F) -> BotResult<T>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BotError::transient(what, e)),
            Err(_) => Err(BotError::transient(
                what,
                format!("timed out after {}ms", self.call_timeout.as_millis()),
            )),
        }
    }
}

#[async_trait]
impl RoundReader for EvmLedger {
    async fn current_epoch(&self) -> BotResult<u64> {
        let call = self.contract.current_epoch();
        let epoch = self.bounded("currentEpoch", call.call()).await?;
        units::u256_to_u64(epoch, "epoch")
    }

    async fn round_details(&self, epoch: u64) -> BotResult<Round> {
        let call = self.contract.rounds(U256::from(epoch));
        let (
            round_epoch,
            start_block,
            lock_block,
            end_block,
            lock_price,
            close_price,
            total_amount,
            bull_amount,
            bear_amount,
            reward_base_cal_amount,
            reward_amount,
            oracle_called,
        ) = self.bounded("rounds", call.call()).await?;

        Ok(Round {
            epoch: units::u256_to_u64(round_epoch, "epoch")?,
            start_block: units::u256_to_u64(start_block, "start block")?,
            lock_block: units::u256_to_u64(lock_block, "lock block")?,
            end_block: units::u256_to_u64(end_block, "end block")?,
            lock_price: units::scaled_to_decimal(lock_price, PRICE_DECIMALS)?,
            close_price: units::scaled_to_decimal(close_price, PRICE_DECIMALS)?,
            total_amount: units::wei_to_decimal(total_amount)?,
            bull_amount: units::wei_to_decimal(bull_amount)?,
            bear_amount: units::wei_to_decimal(bear_amount)?,
            reward_base_cal_amount: units::wei_to_decimal(reward_base_cal_amount)?,
            reward_amount: units::wei_to_decimal(reward_amount)?,
            oracle_called,
        })
    }

    async fn is_paused(&self) -> BotResult<bool> {
        let call = self.contract.paused();
        self.bounded("paused", call.call()).await
    }

    async fn latest_block(&self) -> BotResult<u64> {
        let block = self
            .bounded("blockNumber", self.client.get_block_number())
            .await?;
        Ok(block.as_u64())
    }

    async fn min_bet_amount(&self) -> BotResult<Decimal> {
        let call = self.contract.min_bet_amount();
        let wei = self.bounded("minBetAmount", call.call()).await?;
        units::wei_to_decimal(wei)
    }

    async fn claimable(&self, epoch: u64) -> BotResult<bool> {
        let call = self.contract.claimable(U256::from(epoch), self.account);
        self.bounded("claimable", call.call()).await
    }

    async fn block_timestamp(&self, block: u64) -> BotResult<DateTime<Utc>> {
        let header = self
            .bounded("getBlock", self.client.get_block(block))
            .await?
            .ok_or_else(|| BotError::transient("getBlock", format!("block {block} not found")))?;
        let secs = units::u256_to_u64(header.timestamp, "block timestamp")?;
        Utc.timestamp_opt(secs as i64, 0)
            .single()
            .ok_or_else(|| BotError::Conversion(format!("invalid block timestamp {secs}")))
    }
}

#[async_trait]
impl AccountReader for EvmLedger {
    async fn balance(&self) -> BotResult<Decimal> {
        let wei = self
            .bounded("getBalance", self.client.get_balance(self.account, None))
            .await?;
        units::wei_to_decimal(wei)
    }

    async fn transaction_count(&self) -> BotResult<u64> {
        let pending: BlockId = BlockNumber::Pending.into();
        let count = self
            .bounded(
                "getTransactionCount",
                self.client.get_transaction_count(self.account, Some(pending)),
            )
            .await?;
        units::u256_to_u64(count, "nonce")
    }
}

#[async_trait]
impl LedgerWriter for EvmLedger {
    async fn send(&self, call: LedgerCall, params: TxParams) -> BotResult<String> {
        let from: Address = params
            .from
            .parse()
            .map_err(|e| BotError::Configuration(format!("invalid sender address: {e}")))?;
        let value = units::decimal_to_wei(params.value)?;
        let gas_price = units::gwei_to_wei(params.gas_price_gwei)?;

        let function = match call {
            LedgerCall::BetUp => self.contract.bet_bull(),
            LedgerCall::BetDown => self.contract.bet_bear(),
            LedgerCall::Claim(epoch) => self.contract.claim(U256::from(epoch)),
        }
        .from(from)
        .value(value)
        .gas(params.gas)
        .gas_price(gas_price)
        .nonce(params.nonce)
        .legacy();

        debug!(%call, nonce = params.nonce, value = %params.value, gas = params.gas, "Building transaction");

        let pending = match tokio::time::timeout(self.call_timeout, function.send()).await {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => return Err(classify_send_error(params.nonce, &e.to_string())),
            Err(_) => {
                return Err(BotError::transient(
                    "sendRawTransaction",
                    format!("timed out after {}ms", self.call_timeout.as_millis()),
                ))
            }
        };

        Ok(format!("{:?}", pending.tx_hash()))
    }

    async fn receipt(&self, tx_hash: &str) -> BotResult<Option<TxStatus>> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|e| BotError::Conversion(format!("invalid tx hash {tx_hash}: {e}")))?;
        let receipt = self
            .bounded("getTransactionReceipt", self.client.get_transaction_receipt(hash))
            .await?;

        Ok(receipt.map(|r| {
            if r.status == Some(U64::from(1)) {
                TxStatus::Success
            } else {
                TxStatus::Reverted
            }
        }))
    }
}
