//! Butterworth band-pass design as cascaded second-order sections.
//!
//! The analog low-pass prototype is shifted to a band-pass around the
//! prewarped cutoffs and mapped to the z-plane with the bilinear transform.
//! Every section carries one zero at z = 1 and one at z = -1, so its
//! numerator is `1 - z^-2` up to a gain chosen to make the section unity at
//! the band centre.

use super::{FilterError, FilterParams};
use num_complex::Complex64;
use std::f64::consts::PI;

/// Poles closer than this to the real axis are treated as real.
const IMAG_EPS: f64 = 1e-9;

/// One biquad: `H(z) = (b0 + b1 z^-1 + b2 z^-2) / (1 + a1 z^-1 + a2 z^-2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    pub b: [f64; 3],
    /// `a[0]` is always 1
    pub a: [f64; 3],
}

impl Section {
    fn from_poles(p1: Complex64, p2: Complex64) -> Self {
        Self {
            b: [1.0, 0.0, -1.0],
            a: [1.0, -(p1 + p2).re, (p1 * p2).re],
        }
    }

    /// Complex response at normalised angular frequency `omega` (rad/sample).
    fn response(&self, omega: f64) -> Complex64 {
        let z1 = Complex64::from_polar(1.0, -omega);
        let z2 = z1 * z1;
        let num = Complex64::from(self.b[0]) + z1 * self.b[1] + z2 * self.b[2];
        let den = Complex64::from(self.a[0]) + z1 * self.a[1] + z2 * self.a[2];
        num / den
    }
}

/// Direct Form II Transposed delay line for one section.
#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    z1: f64,
    z2: f64,
}

impl SectionState {
    #[inline]
    fn process(&mut self, section: &Section, input: f64) -> f64 {
        let output = section.b[0] * input + self.z1;
        self.z1 = section.b[1] * input - section.a[1] * output + self.z2;
        self.z2 = section.b[2] * input - section.a[2] * output;
        output
    }
}

/// A designed band-pass filter.
///
/// Coefficients are fixed at design time; [`BandPass::apply`] starts every
/// call from a zero state, so the same input always yields the same output.
#[derive(Debug, Clone)]
pub struct BandPass {
    sections: Vec<Section>,
    sample_rate_hz: f64,
}

impl BandPass {
    /// Design the filter for `params`.
    pub fn design(params: &FilterParams) -> Result<Self, FilterError> {
        params.validate()?;

        let fs = params.sample_rate_hz;
        let order = params.order;
        let fs2 = 2.0 * fs;
        let prewarp = |f: f64| fs2 * (PI * f / fs).tan();

        let low = prewarp(params.low_cut_hz);
        let high = prewarp(params.high_cut_hz);
        let bandwidth = high - low;
        let centre_sq = low * high;

        let mut poles = Vec::with_capacity(2 * order);
        for k in 0..order {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            let half = Complex64::from_polar(1.0, theta) * (bandwidth / 2.0);
            let root = (half * half - centre_sq).sqrt();
            for s in [half + root, half - root] {
                poles.push((Complex64::from(fs2) + s) / (Complex64::from(fs2) - s));
            }
        }

        if poles.iter().any(|p| !p.is_finite() || p.norm() >= 1.0) {
            return Err(FilterError::Degenerate);
        }

        let mut sections = Vec::with_capacity(order);
        let mut real = Vec::new();
        for pole in &poles {
            if pole.im > IMAG_EPS {
                sections.push(Section::from_poles(*pole, pole.conj()));
            } else if pole.im.abs() <= IMAG_EPS {
                real.push(pole.re);
            }
        }
        real.sort_by(f64::total_cmp);
        for pair in real.chunks(2) {
            let section = match pair {
                &[p1, p2] => Section::from_poles(Complex64::from(p1), Complex64::from(p2)),
                &[p] => Section {
                    b: [1.0, 0.0, -1.0],
                    a: [1.0, -p, 0.0],
                },
                _ => continue,
            };
            sections.push(section);
        }

        // Unity gain per section at the band centre
        let centre_omega = 2.0 * (centre_sq.sqrt() / fs2).atan();
        for section in &mut sections {
            let gain = section.response(centre_omega).norm();
            if !gain.is_finite() || gain <= 0.0 {
                return Err(FilterError::Degenerate);
            }
            section.b = [1.0 / gain, 0.0, -1.0 / gain];
        }

        Ok(Self {
            sections,
            sample_rate_hz: fs,
        })
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Filter `samples` from a zero initial state. Output has the same length.
    pub fn apply(&self, samples: &[f64]) -> Vec<f64> {
        let mut states = vec![SectionState::default(); self.sections.len()];
        samples
            .iter()
            .map(|&sample| {
                self.sections
                    .iter()
                    .zip(states.iter_mut())
                    .fold(sample, |x, (section, state)| state.process(section, x))
            })
            .collect()
    }

    /// Magnitude response at `freq_hz`.
    pub fn magnitude(&self, freq_hz: f64) -> f64 {
        let omega = 2.0 * PI * freq_hz / self.sample_rate_hz;
        self.sections
            .iter()
            .map(|s| s.response(omega).norm())
            .product()
    }
}
