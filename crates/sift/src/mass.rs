use std::ops::Mul;

use serde::{Deserialize, Serialize};

pub const H2O: f32 = 18.010_565;
pub const NH3: f32 = 17.030_52;

#[derive(Copy, Clone, Serialize, Deserialize, Debug, PartialEq, PartialOrd)]
#[serde(rename_all = "lowercase")]
/// Symmetric mass tolerance, either relative (parts-per-million) or absolute (Da)
pub enum Tolerance {
    Ppm(f32),
    Da(f32),
}

impl Tolerance {
    /// Half-width of the tolerance window (in Da) around `center`
    pub fn delta(&self, center: f32) -> f32 {
        match self {
            Tolerance::Ppm(ppm) => Self::ppm_to_delta_mass(center, *ppm),
            Tolerance::Da(da) => *da,
        }
    }

    /// Compute the (`lower`, `upper`) window (in Da) for a mass and a given tolerance
    pub fn bounds(&self, center: f32) -> (f32, f32) {
        let delta = self.delta(center);
        (center - delta, center + delta)
    }

    /// Are two masses within tolerance of each other?
    ///
    /// The ppm flavour is symmetric: the difference is normalized by the mean
    /// of both masses rather than by either one of them
    pub fn matches(&self, lhs: f32, rhs: f32) -> bool {
        let delta = lhs - rhs;
        match self {
            Tolerance::Ppm(ppm) => (2.0 * delta / (lhs + rhs) * 1E6).abs() <= *ppm,
            Tolerance::Da(da) => delta.abs() <= *da,
        }
    }

    pub fn ppm_to_delta_mass(center: f32, ppm: f32) -> f32 {
        center / 1_000_000.0 * ppm
    }
}

impl Mul<f32> for Tolerance {
    type Output = Tolerance;

    fn mul(self, rhs: f32) -> Self::Output {
        match self {
            Tolerance::Ppm(ppm) => Tolerance::Ppm(ppm * rhs),
            Tolerance::Da(da) => Tolerance::Da(da * rhs),
        }
    }
}

/// Relative mass difference in ppm, normalized by the mean of both masses
pub fn ppm_difference(lhs: f32, rhs: f32) -> f32 {
    let sum = lhs + rhs;
    if sum == 0.0 {
        0.0
    } else {
        2.0 * (lhs - rhs) / sum * 1E6
    }
}

/// Neutral losses considered when annotating matched fragment ions
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Loss {
    None,
    H2O,
    NH3,
}

impl Loss {
    /// All losses, in the order used for ion tables and hit counts
    pub const ALL: [Loss; 3] = [Loss::None, Loss::H2O, Loss::NH3];

    pub fn mass(&self) -> f32 {
        match self {
            Loss::None => 0.0,
            Loss::H2O => H2O,
            Loss::NH3 => NH3,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Loss::None => 0,
            Loss::H2O => 1,
            Loss::NH3 => 2,
        }
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Loss::None => "",
            Loss::H2O => "-H2O",
            Loss::NH3 => "-NH3",
        }
    }
}
