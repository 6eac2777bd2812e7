//! # Penalized IRLS for a single predictor
//!
//! Fits `P(y = 1 | x) = 1 / (1 + exp(-(slope * x + intercept)))` by minimizing
//!
//! ```text
//! sum_i [ log(1 + exp(eta_i)) - y_i * eta_i ] + 0.5 * lambda * slope^2,   lambda = 1 / C
//! ```
//!
//! with Newton steps (equivalently IRLS on the working response) and step halving
//! whenever a full step fails to decrease the penalized objective. Only the slope is
//! penalized; the intercept, when fitted, is free. This matches an L2 logistic
//! regression with inverse regularization strength `C`.
//!
//! With two parameters the penalized Hessian is a 2×2 matrix and is inverted in closed
//! form. Identical responses are rejected up front: with a free intercept the optimum
//! is at infinity, and the callers treat them as a degenerate fit in both phases.

use crate::calibrate::model::SolverConfig;
use crate::calibrate::types::DegenerateFit;
use ndarray::ArrayView1;
use thiserror::Error;

/// Whether the fitted curve has a free intercept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intercept {
    Fitted,
    Omitted,
}

/// The status of the Newton iterations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PirlsStatus {
    /// Gradient norm fell below the tolerance.
    Converged,
    /// No decreasing step exists, but the gradient is already negligible.
    StalledAtValidMinimum,
    /// Iteration budget spent; the last accepted iterate is returned.
    MaxIterationsReached,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LogisticFit {
    pub slope: f64,
    pub intercept: f64,
    pub status: PirlsStatus,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("no observations were supplied to the logistic fit")]
    Empty,
    #[error("predictor has {predictor} observations but response has {response}")]
    LengthMismatch { predictor: usize, response: usize },
    #[error("all {count} responses are identical ({value}); the slope is not identified")]
    IdenticalResponses { count: usize, value: f64 },
    #[error("non-finite values appeared at Newton iteration {iteration}")]
    NonFinite { iteration: usize },
    #[error(
        "the penalized objective did not decrease after {halvings} step halvings at iteration {iteration}"
    )]
    StepHalvingFailed { iteration: usize, halvings: usize },
}

impl FitError {
    /// How the estimators classify this failure when falling back.
    pub fn degenerate_kind(&self) -> DegenerateFit {
        match self {
            Self::Empty => DegenerateFit::EmptyRespondentSet,
            Self::IdenticalResponses { .. } => DegenerateFit::IdenticalResponses,
            Self::LengthMismatch { .. } | Self::NonFinite { .. } | Self::StepHalvingFailed { .. } => {
                DegenerateFit::SolverFailure
            }
        }
    }
}

/// Smallest IRLS weight `mu * (1 - mu)` allowed into the Hessian.
const MIN_WEIGHT: f64 = 1e-10;

/// Mean gradient below which a failed line search is accepted as a minimum.
const STALL_GRADIENT: f64 = 1e-6;

/// Clamp on the linear predictor, mirroring the exp() overflow guard of the logit link.
const ETA_CLAMP: f64 = 700.0;

pub fn fit_logistic(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    intercept: Intercept,
    config: &SolverConfig,
) -> Result<LogisticFit, FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch {
            predictor: x.len(),
            response: y.len(),
        });
    }
    if y.is_empty() {
        return Err(FitError::Empty);
    }
    let first = y[0];
    if y.iter().all(|&v| v == first) {
        return Err(FitError::IdenticalResponses {
            count: y.len(),
            value: first,
        });
    }

    let lambda = 1.0 / config.inverse_regularization;
    // The tolerance applies to the mean gradient per observation.
    let n = y.len() as f64;
    let mut beta = match intercept {
        Intercept::Fitted => {
            let mean = (y.sum() / n).clamp(1e-6, 1.0 - 1e-6);
            [0.0, (mean / (1.0 - mean)).ln()]
        }
        Intercept::Omitted => [0.0, 0.0],
    };
    let mut objective = penalized_objective(x, y, beta, lambda);

    for iter in 1..=config.max_iterations {
        let (gradient, hessian) = gradient_and_hessian(x, y, beta, lambda);
        let step = match newton_step(gradient, hessian, intercept) {
            Some(step) => step,
            None => return Err(FitError::NonFinite { iteration: iter }),
        };

        let gradient_norm = match intercept {
            Intercept::Fitted => gradient[0].abs().max(gradient[1].abs()),
            Intercept::Omitted => gradient[0].abs(),
        };
        if gradient_norm < config.tolerance * n {
            log::trace!("Logistic fit converged at iteration {iter}, gradient {gradient_norm:.3e}");
            return Ok(LogisticFit {
                slope: beta[0],
                intercept: beta[1],
                status: PirlsStatus::Converged,
            });
        }

        let mut scale = 1.0;
        let mut halvings = 0;
        let accepted = loop {
            let trial = [beta[0] - scale * step[0], beta[1] - scale * step[1]];
            let trial_objective = penalized_objective(x, y, trial, lambda);
            if trial_objective.is_finite() && trial_objective <= objective {
                break Some((trial, trial_objective));
            }
            if halvings == config.max_step_halvings {
                break None;
            }
            scale *= 0.5;
            halvings += 1;
        };

        let Some((trial, trial_objective)) = accepted else {
            // Rounding can block any decrease right next to the optimum.
            if gradient_norm < STALL_GRADIENT * n {
                return Ok(LogisticFit {
                    slope: beta[0],
                    intercept: beta[1],
                    status: PirlsStatus::StalledAtValidMinimum,
                });
            }
            return Err(FitError::StepHalvingFailed {
                iteration: iter,
                halvings,
            });
        };
        if halvings > 0 {
            log::trace!("Step halving accepted after {halvings} halvings at iteration {iter}");
        }

        beta = trial;
        objective = trial_objective;
        if !beta.iter().all(|v| v.is_finite()) {
            return Err(FitError::NonFinite { iteration: iter });
        }
    }

    log::debug!(
        "Logistic fit stopped after {} iterations without meeting tolerance {:.1e}",
        config.max_iterations,
        config.tolerance
    );
    Ok(LogisticFit {
        slope: beta[0],
        intercept: beta[1],
        status: PirlsStatus::MaxIterationsReached,
    })
}

/// Numerically stable `log(1 + exp(eta))`.
fn softplus(eta: f64) -> f64 {
    if eta > 0.0 {
        eta + (-eta).exp().ln_1p()
    } else {
        eta.exp().ln_1p()
    }
}

fn sigmoid(eta: f64) -> f64 {
    let eta = eta.clamp(-ETA_CLAMP, ETA_CLAMP);
    1.0 / (1.0 + (-eta).exp())
}

fn penalized_objective(x: ArrayView1<f64>, y: ArrayView1<f64>, beta: [f64; 2], lambda: f64) -> f64 {
    let loss: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(&xi, &yi)| {
            let eta = beta[0] * xi + beta[1];
            softplus(eta) - yi * eta
        })
        .sum();
    loss + 0.5 * lambda * beta[0] * beta[0]
}

/// Gradient `[d/dslope, d/dintercept]` and Hessian `[[hss, hsi], [hsi, hii]]`.
fn gradient_and_hessian(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    beta: [f64; 2],
    lambda: f64,
) -> ([f64; 2], [f64; 3]) {
    let mut gradient = [lambda * beta[0], 0.0];
    let mut hessian = [lambda, 0.0, 0.0];
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        let mu = sigmoid(beta[0] * xi + beta[1]);
        let weight = (mu * (1.0 - mu)).max(MIN_WEIGHT);
        let residual = mu - yi;
        gradient[0] += residual * xi;
        gradient[1] += residual;
        hessian[0] += weight * xi * xi;
        hessian[1] += weight * xi;
        hessian[2] += weight;
    }
    (gradient, hessian)
}

fn newton_step(gradient: [f64; 2], hessian: [f64; 3], intercept: Intercept) -> Option<[f64; 2]> {
    let step = match intercept {
        Intercept::Omitted => [gradient[0] / hessian[0], 0.0],
        Intercept::Fitted => {
            let [hss, hsi, hii] = hessian;
            let det = hss * hii - hsi * hsi;
            if det <= 0.0 || !det.is_finite() {
                return None;
            }
            [
                (hii * gradient[0] - hsi * gradient[1]) / det,
                (hss * gradient[1] - hsi * gradient[0]) / det,
            ]
        }
    };
    step.iter().all(|v| v.is_finite()).then_some(step)
}
