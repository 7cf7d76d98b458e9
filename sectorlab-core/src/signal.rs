//! Signal decision: maps the current price and its sector to an action.
//!
//! `decide` is a pure function. The boundary guard is evaluated first: near
//! either sector bound membership is unstable, so no signal is emitted there
//! regardless of how far the price sits from the expected value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::sector::Sector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide BUY/SELL/HOLD for `current_price` inside `sector`.
pub fn decide(current_price: f64, sector: &Sector) -> Action {
    if !current_price.is_finite() {
        return Action::Hold;
    }

    let near_lower = (current_price - sector.lower_bound).abs() <= sector.epsilon;
    let near_upper = (current_price - sector.upper_bound).abs() <= sector.epsilon;
    if near_lower || near_upper {
        return Action::Hold;
    }

    let deviation = current_price - sector.expected_value;
    if deviation < -sector.threshold {
        Action::Buy
    } else if deviation > sector.threshold {
        Action::Sell
    } else {
        Action::Hold
    }
}
