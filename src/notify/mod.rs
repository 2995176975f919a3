//! Operator notifications.
//!
//! Fire-and-forget: a failed notification is logged and never reaches the
//! caller. Telegram is used when a bot token and chat id are configured,
//! otherwise messages go to the log only.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::{Decision, Direction, Round};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text`. `silent` suppresses the recipient's alert sound.
    async fn notify(&self, text: &str, silent: bool);
}

// ---------------------------------------------------------------------------
// Log-only
// ---------------------------------------------------------------------------

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str, silent: bool) {
        info!(silent, "{text}");
    }
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_notification: bool,
}

pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    bot_token: SecretString,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: SecretString,
        chat_id: String,
        base_url: Option<String>,
    ) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.unwrap_or_else(|| TELEGRAM_API.to_string()),
            bot_token,
            chat_id,
        })
    }

    async fn send(&self, text: &str, silent: bool) -> Result<(), reqwest::Error> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.bot_token.expose_secret()
        );
        self.http
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
                disable_notification: silent,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str, silent: bool) {
        match self.send(text, silent).await {
            // reqwest errors carry the URL, which embeds the token
            Ok(()) => debug!(silent, "Telegram message sent"),
            Err(e) => warn!(error = %e.without_url(), "Telegram delivery failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message formats
// ---------------------------------------------------------------------------

pub fn bet_message(round: &Round, decision: &Decision, tx_hash: &str) -> String {
    let direction = decision
        .direction
        .map(|d| d.to_string())
        .unwrap_or_else(|| "NONE".to_string());
    let odds = decision
        .direction
        .and_then(|d| round.odds(d))
        .map(|o| format!("{o:.3}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "Bet placed\nEpoch: {}\nDirection: {}\nStake: {:.4}\nOdds: {}\nPremium: {:.4}%\nPool: {:.3} (bull {:.3} / bear {:.3})\nTx: {}",
        round.epoch,
        direction,
        decision.stake,
        odds,
        decision.premium * Decimal::ONE_HUNDRED,
        round.total_amount,
        round.bull_amount,
        round.bear_amount,
        tx_hash,
    )
}

pub fn claim_message(epoch: u64, direction: Direction, tx_hash: &str) -> String {
    format!("Claimed\nEpoch: {epoch}\nDirection: {direction}\nTx: {tx_hash}")
}

/// One status line per heartbeat.
pub struct StatusReport {
    pub paused: bool,
    pub epoch: u64,
    pub lock_block: u64,
    pub end_block: u64,
    pub latest_block: u64,
    pub balance: Option<Decimal>,
}

pub fn status_message(name: &str, report: &StatusReport) -> String {
    let balance = report
        .balance
        .map(|b| format!("{b:.4}"))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{name} status\nPaused: {}\nEpoch: {}\nLock block: {}\nEnd block: {}\nLatest block: {}\nBalance: {}",
        report.paused,
        report.epoch,
        report.lock_block,
        report.end_block,
        report.latest_block,
        balance,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
