//! Stake sizing.
//!
//! Turns a cross-feed price premium into a direction, then sizes the stake
//! with half-Kelly on the pool's parimutuel odds, capped and floored.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::debug;

use crate::types::{BotError, BotResult, Decision, Direction, PriceSample, Round};

/// Kelly fraction reported for a side that cannot be bet (empty pool side
/// or no positive payout). Always loses to any real fraction.
pub const KELLY_SENTINEL: Decimal = Decimal::NEGATIVE_ONE;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the stake amount is derived once a direction is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// balance × capped half-Kelly.
    Kelly,
    /// `default_bet_size`, clamped into the bet bounds.
    Fixed,
}

impl Default for SizingMode {
    fn default() -> Self {
        SizingMode::Kelly
    }
}

/// Stake sizing configuration.
#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Probability our signal's direction wins.
    pub win_probability: Decimal,
    /// Minimum |premium| between the two feeds before we act.
    pub bet_threshold: Decimal,
    /// Upper bound on the half-Kelly fraction.
    pub kelly_cap: Decimal,
    pub min_bet_size: Decimal,
    pub max_bet_size: Decimal,
    pub default_bet_size: Decimal,
    pub mode: SizingMode,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            win_probability: dec!(0.55),
            bet_threshold: dec!(0.001),
            kelly_cap: dec!(0.3),
            min_bet_size: dec!(0.05),
            max_bet_size: dec!(1),
            default_bet_size: dec!(0.2),
            mode: SizingMode::Kelly,
        }
    }
}

// ---------------------------------------------------------------------------
// Stake sizer
// ---------------------------------------------------------------------------

pub struct StakeSizer {
    config: SizingConfig,
}

impl StakeSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Raise the minimum stake to the contract's own minimum if higher.
    ///
    /// A contract minimum above `max_bet_size` leaves no valid stake and is
    /// a configuration error.
    pub fn apply_contract_minimum(&mut self, contract_min: Decimal) -> BotResult<()> {
        if contract_min > self.config.max_bet_size {
            return Err(BotError::Configuration(format!(
                "contract minimum bet {contract_min} exceeds max_bet_size {}",
                self.config.max_bet_size
            )));
        }
        if contract_min > self.config.min_bet_size {
            debug!(
                configured = %self.config.min_bet_size,
                contract = %contract_min,
                "Raising minimum bet to contract minimum"
            );
            self.config.min_bet_size = contract_min;
        }
        Ok(())
    }

    /// Half-Kelly fraction for each side, `(up, down)`, before capping.
    ///
    /// Kelly: f* = p − (1 − p) / (odds − 1), with odds = total / side.
    /// A side with no money, or odds ≤ 1, yields [`KELLY_SENTINEL`].
    pub fn kelly_fractions(&self, round: &Round) -> (Decimal, Decimal) {
        (
            self.side_kelly(round, Direction::Up),
            self.side_kelly(round, Direction::Down),
        )
    }

    fn side_kelly(&self, round: &Round, direction: Direction) -> Decimal {
        let p = self.config.win_probability;
        let Some(odds) = round.odds(direction) else {
            return KELLY_SENTINEL;
        };
        let net_odds = odds - Decimal::ONE;
        if net_odds <= Decimal::ZERO {
            return KELLY_SENTINEL;
        }
        match (Decimal::ONE - p).checked_div(net_odds) {
            Some(loss_term) => (p - loss_term) / Decimal::TWO,
            None => KELLY_SENTINEL,
        }
    }

    /// Decide direction and stake for this tick.
    ///
    /// Never fails: every degenerate input resolves to a `None` direction
    /// with the reason recorded.
    pub fn compute_decision(
        &self,
        round: &Round,
        primary: &PriceSample,
        secondary: &PriceSample,
        balance: Decimal,
    ) -> Decision {
        if secondary.value <= Decimal::ZERO {
            return Decision::none(Decimal::ZERO, "secondary price not positive");
        }

        let premium = (primary.value - secondary.value) / secondary.value;

        if premium.abs() <= self.config.bet_threshold {
            return Decision::none(
                premium,
                format!(
                    "premium {:.4}% within threshold {:.4}%",
                    premium * Decimal::ONE_HUNDRED,
                    self.config.bet_threshold * Decimal::ONE_HUNDRED,
                ),
            );
        }

        let direction = if premium > Decimal::ZERO {
            Direction::Up
        } else {
            Direction::Down
        };

        let (up_kelly, down_kelly) = self.kelly_fractions(round);
        let kelly = match direction {
            Direction::Up => up_kelly,
            Direction::Down => down_kelly,
        };

        if kelly == KELLY_SENTINEL {
            return Decision::none(premium, format!("no payable odds on {direction} side"));
        }

        let fraction = kelly.max(Decimal::ZERO).min(self.config.kelly_cap);

        let stake = match self.config.mode {
            SizingMode::Kelly => {
                let raw = balance * fraction;
                if raw < self.config.min_bet_size {
                    debug!(
                        epoch = round.epoch,
                        %direction,
                        kelly = %fraction,
                        raw = %raw,
                        min = %self.config.min_bet_size,
                        "Stake below minimum"
                    );
                    return Decision::none(
                        premium,
                        format!(
                            "stake {raw:.4} below minimum {}",
                            self.config.min_bet_size
                        ),
                    );
                }
                raw.min(self.config.max_bet_size)
            }
            SizingMode::Fixed => self
                .config
                .default_bet_size
                .max(self.config.min_bet_size)
                .min(self.config.max_bet_size),
        };

        debug!(
            epoch = round.epoch,
            %direction,
            premium = format!("{:.4}%", premium * Decimal::ONE_HUNDRED),
            up_kelly = %up_kelly,
            down_kelly = %down_kelly,
            fraction = %fraction,
            stake = %stake,
            "Stake sized"
        );

        Decision {
            direction: Some(direction),
            stake_fraction: fraction,
            stake,
            premium,
            reason: format!(
                "premium {:.4}% beyond threshold",
                premium * Decimal::ONE_HUNDRED
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
