use crate::calibrate::matrix::{DEFAULT_NO_ANSWER, ResponseMatrix};
use crate::calibrate::types::ItemParameters;
use ndarray::ArrayView1;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Guessing parameter shared by every item. Never estimated.
pub const GUESSING: f64 = 0.2;

/// Probability of a correct answer under the three-parameter logistic model:
///
/// ```text
/// P(u = 1 | theta) = c + (1 - c) / (1 + exp(-a * (theta - b)))
/// ```
pub fn probability_correct(theta: f64, item: ItemParameters) -> f64 {
    let eta = (item.a * (theta - item.b)).clamp(-700.0, 700.0);
    GUESSING + (1.0 - GUESSING) / (1.0 + (-eta).exp())
}

/// Mean per-response log-likelihood of the administered cells under the 3PL model.
/// Returns `None` when nothing was administered.
pub fn mean_log_likelihood(
    matrix: &ResponseMatrix,
    theta: ArrayView1<f64>,
    items: &[ItemParameters],
) -> Option<f64> {
    const PROB_EPS: f64 = 1e-12;
    let mut total = 0.0;
    let mut count = 0usize;
    for ((examinee, item), cell) in matrix.cells().indexed_iter() {
        let Some(outcome) = cell.outcome() else {
            continue;
        };
        let p = probability_correct(theta[examinee], items[item]).clamp(PROB_EPS, 1.0 - PROB_EPS);
        total += if outcome > 0.5 { p.ln() } else { (1.0 - p).ln() };
        count += 1;
    }
    (count > 0).then(|| total / count as f64)
}

// --- Configuration ---
// These structs define the human-readable TOML configuration. Every field has a
// default, so a config file only needs the values it overrides.

/// Settings of the single-predictor logistic solver used by both phases.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    /// Inverse L2 regularization strength `C`; the penalty is `0.5 * slope^2 / C`.
    pub inverse_regularization: f64,
    pub max_iterations: usize,
    /// Convergence tolerance on the mean gradient per observation.
    pub tolerance: f64,
    pub max_step_halvings: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            inverse_regularization: 1.0,
            max_iterations: 100,
            tolerance: 1e-9,
            max_step_halvings: 30,
        }
    }
}

/// Everything that shapes one calibration run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    /// Number of item/ability passes. There is no early stopping.
    pub iterations: usize,
    /// Step `ALPHA` of the damped ability update.
    pub damping: f64,
    /// Answer character marking a slot as not administered.
    pub no_answer: char,
    /// Highest form code considered a standard form.
    pub max_standard_form: i64,
    /// Read at most this many microdata rows.
    pub max_rows: Option<usize>,
    /// Knowledge areas to calibrate, each independently.
    pub areas: Vec<String>,
    pub solver: SolverConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            iterations: 30,
            damping: 0.125,
            no_answer: DEFAULT_NO_ANSWER,
            max_standard_form: 406,
            max_rows: None,
            areas: ["MT", "CH", "CN", "LC"].map(String::from).to_vec(),
            solver: SolverConfig::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl CalibrationConfig {
    /// Loads a configuration from a TOML file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            })
        };
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return invalid("damping", "must lie in (0, 1]");
        }
        if !(self.solver.inverse_regularization.is_finite()
            && self.solver.inverse_regularization > 0.0)
        {
            return invalid("solver.inverse_regularization", "must be positive and finite");
        }
        if self.solver.max_iterations == 0 {
            return invalid("solver.max_iterations", "must be at least 1");
        }
        if !(self.solver.tolerance > 0.0) {
            return invalid("solver.tolerance", "must be positive");
        }
        if self.areas.is_empty() {
            return invalid("areas", "at least one knowledge area is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::types::ResponseCell;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn probability_spans_guessing_floor_to_one() {
        let item = ItemParameters { a: 1.5, b: 0.3 };
        assert_abs_diff_eq!(probability_correct(0.3, item), 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(probability_correct(-50.0, item), GUESSING, epsilon = 1e-9);
        assert_abs_diff_eq!(probability_correct(50.0, item), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn log_likelihood_skips_not_administered_cells() {
        let cells = Array2::from_shape_vec(
            (2, 2),
            vec![
                ResponseCell::Correct,
                ResponseCell::NotAdministered,
                ResponseCell::Incorrect,
                ResponseCell::NotAdministered,
            ],
        )
        .unwrap();
        let matrix = ResponseMatrix::from_cells(cells);
        let items = [ItemParameters { a: 1.0, b: 0.0 }; 2];
        let ll = mean_log_likelihood(&matrix, array![0.0, 0.0].view(), &items).unwrap();
        let expected = (0.6_f64.ln() + 0.4_f64.ln()) / 2.0;
        assert_abs_diff_eq!(ll, expected, epsilon = 1e-12);

        let empty = ResponseMatrix::from_cells(Array2::from_elem((1, 1), ResponseCell::NotAdministered));
        assert_eq!(mean_log_likelihood(&empty, array![0.0].view(), &items), None);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "iterations = 5\nareas = [\"MT\"]\n\n[solver]\ninverse_regularization = 0.5"
        )
        .unwrap();
        let config = CalibrationConfig::load(file.path()).unwrap();
        assert_eq!(config.iterations, 5);
        assert_eq!(config.areas, vec!["MT".to_string()]);
        assert_eq!(config.solver.inverse_regularization, 0.5);
        assert_eq!(config.solver.max_iterations, 100);
        assert_eq!(config.damping, 0.125);
        assert_eq!(config.no_answer, '9');
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = CalibrationConfig {
            damping: 1.5,
            ..CalibrationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "damping", .. })
        ));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "unknown_key = 1").unwrap();
        assert!(matches!(
            CalibrationConfig::load(file.path()),
            Err(ConfigError::TomlParseError(_))
        ));
    }
}
