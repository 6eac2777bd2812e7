//! # Item Parameter Estimation
//!
//! With abilities held fixed, each item is fitted independently: a logistic curve of
//! its administered responses against the current theta of exactly those examinees,
//! with a free intercept. The slope is the discrimination `a`, and the point where the
//! curve crosses its midpoint gives the difficulty `b = -intercept / a`.
//!
//! Items are fitted in parallel. Each fit only reads theta; results are written back
//! by the caller after the whole phase, so no item observes another item's update.

use crate::calibrate::matrix::ResponseMatrix;
use crate::calibrate::model::SolverConfig;
use crate::calibrate::pirls::{Intercept, PirlsStatus, fit_logistic};
use crate::calibrate::types::{DegenerateFit, ItemParameters, PhaseSummary, ResponseCell};
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;

/// Slopes below this magnitude leave `b` undefined.
pub const MIN_ABS_SLOPE: f64 = 1e-8;

/// Largest accepted `|b|` on the standardized ability scale. Larger values come from
/// slopes too flat to locate the item and are treated like a flat slope.
pub const MAX_ABS_DIFFICULTY: f64 = 6.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ItemFit {
    Fitted {
        params: ItemParameters,
        converged: bool,
    },
    Degenerate(DegenerateFit),
}

/// Fits one item from its matrix column.
pub fn fit_item(
    column: ArrayView1<ResponseCell>,
    theta: ArrayView1<f64>,
    solver: &SolverConfig,
) -> ItemFit {
    let (x, y): (Vec<f64>, Vec<f64>) = column
        .iter()
        .zip(theta.iter())
        .filter_map(|(cell, &t)| cell.outcome().map(|outcome| (t, outcome)))
        .unzip();

    let fit = match fit_logistic(
        Array1::from_vec(x).view(),
        Array1::from_vec(y).view(),
        Intercept::Fitted,
        solver,
    ) {
        Ok(fit) => fit,
        Err(e) => return ItemFit::Degenerate(e.degenerate_kind()),
    };

    if fit.slope.abs() < MIN_ABS_SLOPE {
        return ItemFit::Degenerate(DegenerateFit::FlatSlope);
    }
    let params = ItemParameters {
        a: fit.slope,
        b: -fit.intercept / fit.slope,
    };
    if !(params.a.is_finite() && params.b.is_finite()) {
        return ItemFit::Degenerate(DegenerateFit::SolverFailure);
    }
    if params.b.abs() > MAX_ABS_DIFFICULTY {
        return ItemFit::Degenerate(DegenerateFit::FlatSlope);
    }
    ItemFit::Fitted {
        params,
        converged: fit.status != PirlsStatus::MaxIterationsReached,
    }
}

/// Re-estimates every item against the current abilities. Degenerate items keep the
/// parameters they had on entry.
pub fn estimate_item_parameters(
    matrix: &ResponseMatrix,
    theta: ArrayView1<f64>,
    items: &mut [ItemParameters],
    solver: &SolverConfig,
) -> PhaseSummary {
    let fits: Vec<ItemFit> = (0..matrix.n_items())
        .into_par_iter()
        .map(|item| fit_item(matrix.column(item), theta, solver))
        .collect();

    let mut summary = PhaseSummary::default();
    for (item, fit) in fits.into_iter().enumerate() {
        match fit {
            ItemFit::Fitted { params, converged } => {
                items[item] = params;
                summary.fitted += 1;
                if !converged {
                    summary.not_converged += 1;
                }
            }
            ItemFit::Degenerate(kind) => {
                log::debug!("Item column {item} kept previous parameters: {kind:?}");
                summary.record(kind);
            }
        }
    }

    if summary.degenerate() > 0 || summary.empty > 0 {
        log::warn!(
            "{} items kept previous parameters ({} identical responses, {} flat slopes, {} solver failures, {} without respondents)",
            summary.degenerate() + summary.empty,
            summary.identical,
            summary.flat_slope,
            summary.failed,
            summary.empty
        );
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn cells(rows: &[&[i8]]) -> ResponseMatrix {
        let n_items = rows[0].len();
        let flat = rows
            .iter()
            .flat_map(|row| row.iter())
            .map(|&v| match v {
                1 => ResponseCell::Correct,
                0 => ResponseCell::Incorrect,
                _ => ResponseCell::NotAdministered,
            })
            .collect();
        ResponseMatrix::from_cells(Array2::from_shape_vec((rows.len(), n_items), flat).unwrap())
    }

    #[test]
    fn discriminating_item_gets_positive_slope_and_centered_difficulty() {
        let theta = array![-2.0, -1.5, -1.0, -0.5, 0.5, 1.0, 1.5, 2.0];
        let column = array![
            ResponseCell::Incorrect,
            ResponseCell::Incorrect,
            ResponseCell::Incorrect,
            ResponseCell::Correct,
            ResponseCell::Incorrect,
            ResponseCell::Correct,
            ResponseCell::Correct,
            ResponseCell::Correct
        ];
        let ItemFit::Fitted { params, .. } = fit_item(column.view(), theta.view(), &SolverConfig::default())
        else {
            panic!("expected a fitted item");
        };
        assert!(params.a > 0.0);
        assert!(params.b.abs() < 0.5, "symmetric data should give b near 0, got {}", params.b);
    }

    #[test]
    fn all_correct_item_keeps_prior_parameters_and_is_counted() {
        let matrix = cells(&[&[1, 1], &[1, 0], &[1, -1], &[1, 1]]);
        let theta = array![1.0, -1.0, 0.5, 0.2];
        let prior = ItemParameters { a: 0.7, b: -0.4 };
        let mut items = vec![prior, prior];
        let summary =
            estimate_item_parameters(&matrix, theta.view(), &mut items, &SolverConfig::default());
        assert_eq!(items[0], prior);
        assert_eq!(summary.identical, 1);
        assert_eq!(summary.fitted, 1);
        assert!(items[1].a.is_finite() && items[1].b.is_finite());
    }

    #[test]
    fn weakly_discriminating_item_is_treated_as_flat() {
        // Twenty examinees at each ability level, about three in four correct
        // everywhere: the slope is tiny and the implied difficulty lies far off scale.
        let mut theta = Vec::new();
        let mut column = Vec::new();
        for (level, correct) in [(-2.0, 15), (-1.0, 15), (0.0, 15), (1.0, 15), (2.0, 16)] {
            for k in 0..20 {
                theta.push(level);
                column.push(if k < correct {
                    ResponseCell::Correct
                } else {
                    ResponseCell::Incorrect
                });
            }
        }
        let fit = fit_item(
            Array1::from_vec(column).view(),
            Array1::from_vec(theta).view(),
            &SolverConfig::default(),
        );
        assert_eq!(fit, ItemFit::Degenerate(DegenerateFit::FlatSlope));
    }

    #[test]
    fn item_without_respondents_is_skipped() {
        let matrix = cells(&[&[-1, 1], &[-1, 0]]);
        let theta = array![1.0, -1.0];
        let mut items = vec![ItemParameters::default(); 2];
        let summary =
            estimate_item_parameters(&matrix, theta.view(), &mut items, &SolverConfig::default());
        assert_eq!(summary.empty, 1);
        assert_eq!(items[0], ItemParameters::default());
    }
}
