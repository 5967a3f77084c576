//! Band-pass filtering and feature extraction.
//!
//! A [`SignalProcessor`] designs its filter once from fixed
//! [`FilterParams`] and turns frames into [`Feature`] vectors for the
//! classifier. Two feature modes exist:
//!
//! - `temporal` keeps a rolling window of recent frames per channel, removes
//!   its mean, filters each channel along time and yields one log-variance
//!   per channel.
//! - `across_channels` filters the 14 values of a single frame as if they
//!   were a time series and yields one log-variance. This matches how models
//!   trained by the older pipeline expect their input.

pub mod butterworth;
pub mod window;

pub use butterworth::{BandPass, Section};
pub use window::{ChannelWindow, WindowSnapshot};

use crate::stream::{Frame, CHANNEL_COUNT};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use thiserror::Error;

/// Largest timestamp step, in sample periods, before a window restarts.
///
/// Anything past one period means a frame was dropped or skipped, and the
/// filter coefficients no longer match the spacing of the samples.
pub const MAX_GAP_PERIODS: f64 = 1.5;

/// Fixed band-pass parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub sample_rate_hz: f64,
    pub low_cut_hz: f64,
    pub high_cut_hz: f64,
    pub order: usize,
    /// Frames per channel in `temporal` mode
    pub window_len: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            sample_rate_hz: 128.0,
            low_cut_hz: 1.0,
            high_cut_hz: 50.0,
            order: 5,
            window_len: 256,
        }
    }
}

impl FilterParams {
    pub fn nyquist_hz(&self) -> f64 {
        self.sample_rate_hz / 2.0
    }

    /// Largest timestamp step a window tolerates, seconds.
    pub fn max_gap_secs(&self) -> f64 {
        MAX_GAP_PERIODS / self.sample_rate_hz
    }

    /// Check that a band-pass can be designed from these parameters.
    pub fn validate(&self) -> Result<(), FilterError> {
        if !(self.sample_rate_hz.is_finite() && self.sample_rate_hz > 0.0) {
            return Err(FilterError::InvalidSampleRate(self.sample_rate_hz));
        }
        let nyquist = self.nyquist_hz();
        if !(self.low_cut_hz > 0.0
            && self.low_cut_hz < self.high_cut_hz
            && self.high_cut_hz < nyquist)
        {
            return Err(FilterError::InvalidCutoffs {
                low: self.low_cut_hz,
                high: self.high_cut_hz,
                nyquist,
            });
        }
        if self.order == 0 {
            return Err(FilterError::ZeroOrder);
        }
        Ok(())
    }
}

/// How frames become features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    #[default]
    Temporal,
    AcrossChannels,
}

impl FeatureMode {
    /// Length of the feature vectors this mode produces.
    pub fn feature_len(&self) -> usize {
        match self {
            FeatureMode::Temporal => CHANNEL_COUNT,
            FeatureMode::AcrossChannels => 1,
        }
    }
}

impl std::fmt::Display for FeatureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureMode::Temporal => write!(f, "temporal"),
            FeatureMode::AcrossChannels => write!(f, "across_channels"),
        }
    }
}

/// Invalid filter or window parameters.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FilterError {
    #[error("sample rate must be positive, got {0} Hz")]
    InvalidSampleRate(f64),

    #[error("cutoffs must satisfy 0 < low < high < {nyquist} Hz, got {low}..{high} Hz")]
    InvalidCutoffs { low: f64, high: f64, nyquist: f64 },

    #[error("filter order must be at least 1")]
    ZeroOrder,

    #[error("temporal window needs at least 2 frames, got {0}")]
    WindowTooShort(usize),

    #[error("filter design is numerically degenerate")]
    Degenerate,
}

/// Feature vector handed to the classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature(Vec<f64>);

impl Feature {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<f64>> for Feature {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

/// Natural log of the population variance, floored so the result is finite.
pub fn log_variance(values: &[f64]) -> f64 {
    let variance = values.iter().population_variance();
    variance.max(f64::MIN_POSITIVE).ln()
}

/// Filter plus feature extraction for one stream.
#[derive(Debug, Clone)]
pub struct SignalProcessor {
    params: FilterParams,
    mode: FeatureMode,
    filter: BandPass,
    window: ChannelWindow,
}

impl SignalProcessor {
    /// Design the filter once for the given parameters.
    pub fn new(params: FilterParams, mode: FeatureMode) -> Result<Self, FilterError> {
        if mode == FeatureMode::Temporal && params.window_len < 2 {
            return Err(FilterError::WindowTooShort(params.window_len));
        }
        let filter = BandPass::design(&params)?;
        let window = ChannelWindow::new(params.window_len, params.max_gap_secs());
        Ok(Self {
            params,
            mode,
            filter,
            window,
        })
    }

    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    pub fn mode(&self) -> FeatureMode {
        self.mode
    }

    /// Band-pass `samples`. The output has the same length.
    pub fn bandpass(&self, samples: &[f64]) -> Vec<f64> {
        self.filter.apply(samples)
    }

    /// Turn the next frame into a feature.
    ///
    /// In `temporal` mode this returns `None` until the window has filled.
    pub fn features(&mut self, frame: &Frame) -> Option<Feature> {
        match self.mode {
            FeatureMode::AcrossChannels => {
                let filtered = self.bandpass(&frame.channels);
                Some(Feature(vec![log_variance(&filtered)]))
            }
            FeatureMode::Temporal => {
                self.window.push(frame);
                if !self.window.is_full() {
                    return None;
                }
                let values = (0..CHANNEL_COUNT)
                    .map(|channel| self.channel_power(&self.window.samples(channel)))
                    .collect();
                Some(Feature(values))
            }
        }
    }

    /// Temporal feature of a window filled by someone else, typically the
    /// ingestion thread, which sees every frame.
    ///
    /// `None` in `across_channels` mode or when the window length differs
    /// from `window_len`.
    pub fn window_features(&self, window: &WindowSnapshot) -> Option<Feature> {
        if self.mode != FeatureMode::Temporal || window.len() != self.params.window_len {
            return None;
        }
        let values = (0..CHANNEL_COUNT)
            .map(|channel| self.channel_power(window.channel(channel)))
            .collect();
        Some(Feature(values))
    }

    /// Log-variance of one channel's band-passed window.
    fn channel_power(&self, samples: &[f64]) -> f64 {
        // Remove the electrode offset so the filter does not ring on a DC step
        let mean = samples.iter().mean();
        let centred: Vec<f64> = samples.iter().map(|x| x - mean).collect();
        log_variance(&self.bandpass(&centred))
    }

    /// Frames still needed before `features` produces output.
    pub fn frames_until_ready(&self) -> usize {
        match self.mode {
            FeatureMode::AcrossChannels => 0,
            FeatureMode::Temporal => self.window.capacity() - self.window.len(),
        }
    }
}
