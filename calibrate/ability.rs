//! # Ability Estimation
//!
//! Starting values come from standardized raw correct counts. Each pass then fits,
//! per examinee, a logistic curve of their administered responses against the current
//! discriminations of those items, without intercept. Under the logit
//! `a_i * (theta - b_i)` the fitted slope estimates theta minus the `a_i^2`-weighted
//! mean difficulty of the answered items, so the proposal adds that weighted mean
//! back. Each term `a_i^2 * b_i = -a_i * intercept_i` stays bounded as `a_i` goes to
//! 0, so a barely discriminating item cannot shift the examinees who answered it.
//!
//! Proposals are applied with a damped step and the full vector is re-standardized
//! afterwards. The latent scale is only identified up to an affine map, and the
//! standardization pins it to mean 0 and unit variance every pass.

use crate::calibrate::matrix::ResponseMatrix;
use crate::calibrate::model::SolverConfig;
use crate::calibrate::pirls::{Intercept, PirlsStatus, fit_logistic};
use crate::calibrate::types::{
    Abilities, DegenerateFit, ItemParameters, PhaseSummary, ResponseCell, mean_and_sd,
};
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;

/// Below this standard deviation a vector is treated as constant.
const MIN_SD: f64 = 1e-12;

/// Starting abilities plus the raw-count moments they were standardized with.
#[derive(Clone, Debug, PartialEq)]
pub struct Initialization {
    pub theta: Abilities,
    pub raw_mean: f64,
    pub raw_sd: f64,
    /// Every examinee had the same raw count; theta was set to 0 for all of them.
    pub zero_variance: bool,
}

/// `theta_j = (count_j - mean) / sd` over the correct counts of the matrix.
pub fn initial_abilities(matrix: &ResponseMatrix) -> Initialization {
    let counts = matrix.correct_counts();
    let (raw_mean, raw_sd) = mean_and_sd(counts.view());
    if raw_sd < MIN_SD {
        log::warn!(
            "All {} examinees share the raw score {:.1}; starting every ability at 0",
            counts.len(),
            raw_mean
        );
        return Initialization {
            theta: Abilities::zeros(counts.len()),
            raw_mean,
            raw_sd,
            zero_variance: true,
        };
    }
    Initialization {
        theta: Abilities::new(counts.mapv(|c| (c - raw_mean) / raw_sd)),
        raw_mean,
        raw_sd,
        zero_variance: false,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Standardization {
    Standardized,
    /// The spread collapsed; the vector was centered but not rescaled.
    CenteredOnly,
}

/// Rescales theta in place to mean 0 and unit population variance.
pub fn standardize(theta: &mut Abilities) -> Standardization {
    let (mean, sd) = mean_and_sd(theta.as_view());
    if !(sd.is_finite() && sd >= MIN_SD) {
        theta.mapv_inplace(|t| t - mean);
        log::warn!("Ability spread collapsed (sd = {sd:.3e}); centering without rescaling");
        return Standardization::CenteredOnly;
    }
    theta.mapv_inplace(|t| (t - mean) / sd);
    Standardization::Standardized
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AbilityFit {
    Updated { theta: f64, converged: bool },
    Degenerate(DegenerateFit),
}

/// Proposes and damps a new ability for one examinee from their matrix row.
pub fn fit_examinee(
    row: ArrayView1<ResponseCell>,
    theta: f64,
    items: &[ItemParameters],
    damping: f64,
    solver: &SolverConfig,
) -> AbilityFit {
    let mut discriminations = Vec::new();
    let mut outcomes = Vec::new();
    let mut weighted_difficulty = 0.0;
    let mut weight = 0.0;
    for (cell, item) in row.iter().zip(items) {
        if let Some(outcome) = cell.outcome() {
            discriminations.push(item.a);
            outcomes.push(outcome);
            weighted_difficulty += item.a * item.a * item.b;
            weight += item.a * item.a;
        }
    }

    let fit = match fit_logistic(
        Array1::from_vec(discriminations).view(),
        Array1::from_vec(outcomes).view(),
        Intercept::Omitted,
        solver,
    ) {
        Ok(fit) => fit,
        Err(e) => return AbilityFit::Degenerate(e.degenerate_kind()),
    };

    let anchor = weighted_difficulty / weight;
    let proposal = fit.slope + anchor;
    let updated = theta + damping * (proposal - theta);
    if !updated.is_finite() {
        return AbilityFit::Degenerate(DegenerateFit::SolverFailure);
    }
    AbilityFit::Updated {
        theta: updated,
        converged: fit.status != PirlsStatus::MaxIterationsReached,
    }
}

/// Result of one ability phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbilityPhase {
    pub summary: PhaseSummary,
    pub standardization: Standardization,
}

/// Updates every examinee against the current item parameters, then re-standardizes.
/// Degenerate examinees keep their theta from before the phase.
pub fn estimate_abilities(
    matrix: &ResponseMatrix,
    theta: &mut Abilities,
    items: &[ItemParameters],
    damping: f64,
    solver: &SolverConfig,
) -> AbilityPhase {
    let current = theta.as_view();
    let fits: Vec<AbilityFit> = (0..matrix.n_examinees())
        .into_par_iter()
        .map(|examinee| {
            fit_examinee(
                matrix.row(examinee),
                current[examinee],
                items,
                damping,
                solver,
            )
        })
        .collect();

    let mut summary = PhaseSummary::default();
    for (examinee, fit) in fits.into_iter().enumerate() {
        match fit {
            AbilityFit::Updated {
                theta: updated,
                converged,
            } => {
                theta[examinee] = updated;
                summary.fitted += 1;
                if !converged {
                    summary.not_converged += 1;
                }
            }
            AbilityFit::Degenerate(kind) => summary.record(kind),
        }
    }
    if summary.degenerate() > 0 {
        log::debug!(
            "{} examinees kept their ability ({} with identical responses)",
            summary.degenerate(),
            summary.identical
        );
    }

    let standardization = standardize(theta);
    AbilityPhase {
        summary,
        standardization,
    }
}
