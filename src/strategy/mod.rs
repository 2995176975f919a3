//! Strategy engine: admission gates and stake sizing.

pub mod admission;
pub mod kelly;

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::types::{Decision, PriceSample, Round};
use admission::{AdmissionController, Rejection};
use kelly::StakeSizer;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Outcome of one sizing pass over an armed round.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Place this bet.
    Bet(Decision),
    /// Sizing chose not to bet this tick.
    Pass(Decision),
    /// A direction was chosen but its odds failed the gate.
    Rejected {
        decision: Decision,
        reason: Rejection,
    },
}

impl Verdict {
    pub fn decision(&self) -> &Decision {
        match self {
            Verdict::Bet(d) | Verdict::Pass(d) => d,
            Verdict::Rejected { decision, .. } => decision,
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Admission followed by sizing followed by the odds gate.
pub struct Strategy {
    admission: AdmissionController,
    sizer: StakeSizer,
}

impl Strategy {
    pub fn new(admission: AdmissionController, sizer: StakeSizer) -> Self {
        Self { admission, sizer }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn sizer(&self) -> &StakeSizer {
        &self.sizer
    }

    pub fn sizer_mut(&mut self) -> &mut StakeSizer {
        &mut self.sizer
    }

    pub fn admit(
        &self,
        round: &Round,
        current_block: u64,
        paused: bool,
        balance: Decimal,
    ) -> Result<(), Rejection> {
        self.admission.admit(round, current_block, paused, balance)
    }

    /// Size a bet for an admitted round and run the odds gate on the
    /// chosen side.
    pub fn decide(
        &self,
        round: &Round,
        primary: &PriceSample,
        secondary: &PriceSample,
        balance: Decimal,
    ) -> Verdict {
        let decision = self
            .sizer
            .compute_decision(round, primary, secondary, balance);

        let Some(direction) = decision.direction else {
            debug!(epoch = round.epoch, %decision, "No bet this tick");
            return Verdict::Pass(decision);
        };

        match self.admission.check_odds(round, direction) {
            Ok(odds) => {
                info!(
                    epoch = round.epoch,
                    %direction,
                    odds = format!("{odds:.3}"),
                    stake = %decision.stake,
                    premium = format!("{:.4}%", decision.premium * Decimal::ONE_HUNDRED),
                    "Bet selected"
                );
                Verdict::Bet(decision)
            }
            Err(reason) => {
                debug!(epoch = round.epoch, %reason, "Odds gate rejected bet");
                Verdict::Rejected { decision, reason }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
