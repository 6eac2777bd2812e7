use ndarray::{Array1, ArrayView1};
use std::ops::{Deref, DerefMut};

/// State of one examinee × item cell of the response matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ResponseCell {
    /// The item was not part of the examinee's effective form, or the answer was the
    /// no-answer sentinel. Never scored.
    #[default]
    NotAdministered,
    Incorrect,
    Correct,
}

impl ResponseCell {
    pub fn is_administered(self) -> bool {
        !matches!(self, Self::NotAdministered)
    }

    /// The binary outcome used as a regression response, if the item was administered.
    pub fn outcome(self) -> Option<f64> {
        match self {
            Self::NotAdministered => None,
            Self::Incorrect => Some(0.0),
            Self::Correct => Some(1.0),
        }
    }
}

/// Discrimination and difficulty of one item. The guessing parameter is shared and
/// lives in [`crate::calibrate::model::GUESSING`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ItemParameters {
    pub a: f64,
    pub b: f64,
}

impl Default for ItemParameters {
    fn default() -> Self {
        Self { a: 1.0, b: 0.0 }
    }
}

/// Per-examinee ability estimates on the standardized latent scale.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq)]
pub struct Abilities(pub Array1<f64>);

impl Abilities {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn zeros(len: usize) -> Self {
        Self(Array1::zeros(len))
    }

    pub fn as_view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    /// Maps theta onto a reporting scale: `theta * sd + mean`.
    pub fn to_display_scale(&self, mean: f64, sd: f64) -> Array1<f64> {
        self.0.mapv(|theta| theta * sd + mean)
    }
}

impl Deref for Abilities {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Abilities {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Array1<f64>> for Abilities {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

/// Why a single item or examinee fit fell back to its previous value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DegenerateFit {
    /// Nobody answered the item, or the examinee answered nothing.
    EmptyRespondentSet,
    /// Every administered response is the same (all correct or all incorrect).
    IdenticalResponses,
    /// The fitted slope is too close to zero for `b = -intercept / a` to be defined.
    FlatSlope,
    /// The solver produced no usable optimum.
    SolverFailure,
}

/// Counters for one phase (all items, or all examinees) of one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseSummary {
    pub fitted: usize,
    pub empty: usize,
    pub identical: usize,
    pub flat_slope: usize,
    pub failed: usize,
    /// Fits accepted although the solver hit its iteration budget.
    pub not_converged: usize,
}

impl PhaseSummary {
    pub fn record(&mut self, kind: DegenerateFit) {
        match kind {
            DegenerateFit::EmptyRespondentSet => self.empty += 1,
            DegenerateFit::IdenticalResponses => self.identical += 1,
            DegenerateFit::FlatSlope => self.flat_slope += 1,
            DegenerateFit::SolverFailure => self.failed += 1,
        }
    }

    /// Fits that kept their previous value for any reason other than an empty set.
    pub fn degenerate(&self) -> usize {
        self.identical + self.flat_slope + self.failed
    }
}

/// Population mean and standard deviation (`ddof = 0`).
pub fn mean_and_sd(values: ArrayView1<f64>) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.sum() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
