#![doc = include_str!("../README.md")]

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Time constant of both inertial stages, in seconds.
pub const TIME_CONSTANT: f64 = 0.7;

/// Errors raised when building a [`ParameterSet`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// Sample time must be a finite number of seconds greater than zero.
    #[error("sample time must be finite and > 0, got {0}")]
    InvalidSampleTime(f64),

    /// Gain must be finite.
    #[error("gain must be finite, got {0}")]
    InvalidGain(f64),
}

/// Gain and sample time of one sampling regime.
///
/// Immutable once built. Reconfiguration swaps whole sets rather than
/// editing one in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParameterSet")]
pub struct ParameterSet {
    gain: f64,
    sample_time: f64,
}

#[derive(Deserialize)]
struct RawParameterSet {
    gain: f64,
    sample_time: f64,
}

impl TryFrom<RawParameterSet> for ParameterSet {
    type Error = ParameterError;

    fn try_from(raw: RawParameterSet) -> Result<Self, Self::Error> {
        Self::new(raw.gain, raw.sample_time)
    }
}

/// Idle regime used when nothing else is configured: slow, high gain.
pub const DEFAULT_BELOW_THRESHOLD: ParameterSet = ParameterSet {
    gain: 2.0,
    sample_time: 1.0,
};

/// Active regime used when nothing else is configured: ten samples per second.
pub const DEFAULT_ABOVE_THRESHOLD: ParameterSet = ParameterSet {
    gain: 0.1,
    sample_time: 0.1,
};

impl ParameterSet {
    /// Create a parameter set, validating both values.
    pub fn new(gain: f64, sample_time: f64) -> Result<Self, ParameterError> {
        if !gain.is_finite() {
            return Err(ParameterError::InvalidGain(gain));
        }
        if !sample_time.is_finite() || sample_time <= 0.0 {
            return Err(ParameterError::InvalidSampleTime(sample_time));
        }
        Ok(Self { gain, sample_time })
    }

    /// Filter gain of this regime.
    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Sampling period of this regime, in seconds.
    pub fn sample_time(&self) -> f64 {
        self.sample_time
    }
}

/// Which of the two parameter sets is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Regime {
    /// Idle: slow sampling.
    BelowThreshold,
    /// Active: fast sampling.
    AboveThreshold,
}

/// Filtered activation estimate of a single camera node.
///
/// Owns the filter memory (`activation_level` and its derivative stage).
/// That memory survives parameter and threshold changes and is only reset
/// by building a new controller.
///
/// # Timing
///
/// [`update`](Self::update) is meant to be called once per scheduling tick,
/// with the tick period equal to the [`sample_time`](Self::sample_time)
/// that was in force *before* the call. The regime picked by an update
/// takes effect on the next one.
#[derive(Debug, Clone)]
pub struct ActivityController {
    below_threshold: ParameterSet,
    above_threshold: ParameterSet,
    threshold: f64,
    regime: Regime,
    percentage_active_pixels: f64,
    activation_level: f64,
    activation_level_derivative: f64,
    neighbour_activation: f64,
}

impl ActivityController {
    /// Create a controller at rest, starting in the below-threshold regime.
    pub fn new(below_threshold: ParameterSet, above_threshold: ParameterSet, threshold: f64) -> Self {
        Self {
            below_threshold,
            above_threshold,
            threshold,
            regime: Regime::BelowThreshold,
            percentage_active_pixels: 0.0,
            activation_level: 0.0,
            activation_level_derivative: 0.0,
            neighbour_activation: 0.0,
        }
    }

    /// Parameter set currently in force.
    pub fn active_parameters(&self) -> &ParameterSet {
        match self.regime {
            Regime::BelowThreshold => &self.below_threshold,
            Regime::AboveThreshold => &self.above_threshold,
        }
    }

    fn lowpass(&self, previous: f64, input: f64, gain: f64) -> f64 {
        let decay = (-self.active_parameters().sample_time() / TIME_CONSTANT).exp();
        (gain / TIME_CONSTANT) * input + previous * decay
    }

    /// Feed the latest activity percentage and advance both filter stages.
    ///
    /// The regime is re-selected after the new activation level is known,
    /// so the returned regime governs the next update, not this one.
    pub fn update(&mut self, percentage_active_pixels: f64) -> Regime {
        self.percentage_active_pixels = percentage_active_pixels;

        let gain = self.active_parameters().gain();
        self.activation_level_derivative = self.lowpass(
            self.activation_level_derivative,
            percentage_active_pixels + self.neighbour_activation,
            gain,
        );
        self.activation_level = self.lowpass(self.activation_level, self.activation_level_derivative, 1.0);

        self.regime = if self.activation_level < self.threshold {
            Regime::BelowThreshold
        } else {
            Regime::AboveThreshold
        };

        trace!(
            percentage_active_pixels,
            activation_level = self.activation_level,
            regime = ?self.regime,
            "activity update"
        );

        self.regime
    }

    /// Set the weighted activation reported by neighbouring nodes.
    pub fn set_neighbour_activation(&mut self, value: f64) {
        self.neighbour_activation = value;
    }

    /// Move the regime switching point. Takes effect on the next update.
    pub fn set_threshold(&mut self, value: f64) {
        self.threshold = value;
    }

    /// Swap both parameter sets without touching the filter memory.
    pub fn replace_parameter_sets(&mut self, below_threshold: ParameterSet, above_threshold: ParameterSet) {
        self.below_threshold = below_threshold;
        self.above_threshold = above_threshold;
    }

    pub fn sample_time(&self) -> f64 {
        self.active_parameters().sample_time()
    }

    pub fn gain(&self) -> f64 {
        self.active_parameters().gain()
    }

    pub fn activation_level(&self) -> f64 {
        self.activation_level
    }

    pub fn percentage_active_pixels(&self) -> f64 {
        self.percentage_active_pixels
    }

    pub fn neighbour_activation(&self) -> f64 {
        self.neighbour_activation
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn regime(&self) -> Regime {
        self.regime
    }

    /// Strict `activation_level < threshold`, evaluated on the current level.
    ///
    /// No hysteresis: a level sitting on the threshold chatters between
    /// regimes from one update to the next.
    pub fn is_below_threshold(&self) -> bool {
        self.activation_level < self.threshold
    }
}

/// Fixed point of the activation level under a constant input held in one regime.
///
/// Each stage converges to `(g / τ) * u / (1 - exp(-T / τ))`, so the cascade
/// settles at the product of both stage gains times the input.
pub fn steady_state_activation(parameters: &ParameterSet, input: f64) -> f64 {
    let pole = 1.0 - (-parameters.sample_time() / TIME_CONSTANT).exp();
    let derivative = (parameters.gain() / TIME_CONSTANT) * input / pole;
    (1.0 / TIME_CONSTANT) * derivative / pole
}
