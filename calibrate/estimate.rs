// calibrate/estimate.rs

//! # Calibration Loop
//!
//! Owns the mutable [`CalibrationState`] of one knowledge area and drives the fixed
//! number of passes. Each pass, in order:
//!
//! 1.  Display score: `theta * target_sd + target_mean`, with the target moments
//!     taken once from the ground-truth scores. Reporting only.
//! 2.  Report: RMSE and R² of the display score against ground truth, plus the
//!     3PL mean log-likelihood, handed to the [`CalibrationObserver`].
//! 3.  Item phase: every item re-fitted against the current theta.
//! 4.  Ability phase: every examinee re-fitted against the items just written,
//!     then theta re-standardized.
//!
//! Phases run strictly in sequence over `&mut CalibrationState`; only the fits inside
//! a phase run in parallel. There is no convergence check.

use crate::calibrate::ability::{self, AbilityPhase, Initialization, Standardization};
use crate::calibrate::items;
use crate::calibrate::matrix::{BuildSummary, BuiltMatrix, ResponseMatrix};
use crate::calibrate::model::{CalibrationConfig, ConfigError, mean_log_likelihood};
use crate::calibrate::types::{Abilities, ItemParameters, PhaseSummary, mean_and_sd};
use ndarray::{Array1, ArrayView1, Zip};
use std::time::Instant;
use thiserror::Error;

/// A comprehensive error type for conditions that stop an area before any pass.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("The response matrix has no examinees left after filtering; nothing to calibrate.")]
    NoExaminees,
    #[error("The response matrix has no item columns; nothing to calibrate.")]
    NoItems,
    #[error(
        "{scores} ground-truth scores were supplied for a matrix of {examinees} examinees."
    )]
    GroundTruthMismatch { scores: usize, examinees: usize },
    #[error("Invalid calibration configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// The long-lived per-area state mutated by the two phases.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationState {
    pub theta: Abilities,
    pub items: Vec<ItemParameters>,
}

impl CalibrationState {
    /// Abilities from the initializer, every item at the default `(a, b) = (1, 0)`.
    pub fn new(theta: Abilities, n_items: usize) -> Self {
        Self {
            theta,
            items: vec![ItemParameters::default(); n_items],
        }
    }
}

/// Agreement between display scores and ground truth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitQuality {
    pub rmse: f64,
    pub r2: f64,
}

impl FitQuality {
    pub fn measure(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> Self {
        Self {
            rmse: rmse(truth, predicted),
            r2: r_squared(truth, predicted),
        }
    }
}

pub fn rmse(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    let sse = Zip::from(truth)
        .and(predicted)
        .fold(0.0, |acc, &t, &p| acc + (t - p) * (t - p));
    (sse / truth.len() as f64).sqrt()
}

/// Coefficient of determination `1 - SS_res / SS_tot`. With constant ground truth it
/// is 1 for a perfect prediction and 0 otherwise.
pub fn r_squared(truth: ArrayView1<f64>, predicted: ArrayView1<f64>) -> f64 {
    let (mean, _) = mean_and_sd(truth);
    let ss_res = Zip::from(truth)
        .and(predicted)
        .fold(0.0, |acc, &t, &p| acc + (t - p) * (t - p));
    let ss_tot = truth.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Everything the reporting layer sees about one pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    /// Fit of the theta that entered this pass.
    pub fit: FitQuality,
    pub log_likelihood: Option<f64>,
    pub items: PhaseSummary,
    pub abilities: PhaseSummary,
    pub standardization: Standardization,
    pub malformed_rows: usize,
    pub excluded_examinees: usize,
}

/// Observer for per-pass progress, called after each pass completes.
pub trait CalibrationObserver {
    fn on_start(&mut self, initialization: &Initialization, target_mean: f64, target_sd: f64) {
        let _ = (initialization, target_mean, target_sd);
    }
    fn on_iteration(&mut self, report: &IterationReport) {
        let _ = report;
    }
}

#[derive(Default)]
pub struct NoopObserver;

impl CalibrationObserver for NoopObserver {}

/// Terminal state of an area run.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationOutcome {
    pub state: CalibrationState,
    pub display_scores: Array1<f64>,
    pub final_fit: FitQuality,
    pub reports: Vec<IterationReport>,
    pub initialization: Initialization,
    pub target_mean: f64,
    pub target_sd: f64,
}

/// Runs the item phase and then the ability phase over the state.
pub fn run_pass(
    matrix: &ResponseMatrix,
    state: &mut CalibrationState,
    config: &CalibrationConfig,
) -> (PhaseSummary, AbilityPhase) {
    let item_summary = items::estimate_item_parameters(
        matrix,
        state.theta.as_view(),
        &mut state.items,
        &config.solver,
    );
    let ability_phase = ability::estimate_abilities(
        matrix,
        &mut state.theta,
        &state.items,
        config.damping,
        &config.solver,
    );
    (item_summary, ability_phase)
}

/// The main entry point for one area: initializes abilities and runs every pass.
pub fn calibrate(
    built: &BuiltMatrix,
    config: &CalibrationConfig,
    observer: &mut dyn CalibrationObserver,
) -> Result<CalibrationOutcome, EstimationError> {
    config.validate()?;
    let matrix = &built.matrix;
    if matrix.n_examinees() == 0 {
        return Err(EstimationError::NoExaminees);
    }
    if matrix.n_items() == 0 {
        return Err(EstimationError::NoItems);
    }
    if built.ground_truth.len() != matrix.n_examinees() {
        return Err(EstimationError::GroundTruthMismatch {
            scores: built.ground_truth.len(),
            examinees: matrix.n_examinees(),
        });
    }

    log::info!(
        "Starting calibration: {} examinees, {} items, {} passes.",
        matrix.n_examinees(),
        matrix.n_items(),
        config.iterations
    );
    let start = Instant::now();

    let truth = built.ground_truth.view();
    let (target_mean, target_sd) = mean_and_sd(truth);
    let initialization = ability::initial_abilities(matrix);
    observer.on_start(&initialization, target_mean, target_sd);

    let mut state = CalibrationState::new(initialization.theta.clone(), matrix.n_items());
    let BuildSummary {
        malformed_rows,
        excluded_examinees,
    } = built.summary;

    let mut reports = Vec::with_capacity(config.iterations);
    for iteration in 0..config.iterations {
        let display = state.theta.to_display_scale(target_mean, target_sd);
        let fit = FitQuality::measure(truth, display.view());
        let log_likelihood = mean_log_likelihood(matrix, state.theta.as_view(), &state.items);

        let (item_summary, ability_phase) = run_pass(matrix, &mut state, config);

        let report = IterationReport {
            iteration,
            fit,
            log_likelihood,
            items: item_summary,
            abilities: ability_phase.summary,
            standardization: ability_phase.standardization,
            malformed_rows,
            excluded_examinees,
        };
        log::debug!("Pass {iteration} complete: {report:?}");
        observer.on_iteration(&report);
        reports.push(report);
    }

    let display_scores = state.theta.to_display_scale(target_mean, target_sd);
    let final_fit = FitQuality::measure(truth, display_scores.view());
    log::info!(
        "Calibration finished in {:.2?}: RMSE {:.3}, R2 {:.3}",
        start.elapsed(),
        final_fit.rmse,
        final_fit.r2
    );

    Ok(CalibrationOutcome {
        state,
        display_scores,
        final_fit,
        reports,
        initialization,
        target_mean,
        target_sd,
    })
}
