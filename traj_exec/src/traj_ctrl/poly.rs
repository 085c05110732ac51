//! # Polynomial curve fitting
//!
//! The local path is approximated as `y = f(x)` in the Vehicle frame, with `f` a low degree
//! polynomial fitted by least squares.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Diagonal entries of the triangular factor smaller than this (relative to the largest) mean the
/// fit is singular.
const RANK_TOL: f64 = 1e-10;

/// Samples closer than this in x are counted as the same sample when choosing a reduced degree.
const DISTINCT_X_TOL_M: f64 = 1e-6;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Polynomial coefficients, lowest power first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolyCoeffs(Vec<f64>);

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum FitError {
    #[error("Cannot fit a degree {degree} polynomial to {num_samples} samples")]
    UnderdeterminedFit { num_samples: usize, degree: usize },

    #[error("The fit is ill-conditioned, the samples do not span enough distinct x values")]
    IllConditionedFit,

    #[error("Got {num_x} x values but {num_y} y values")]
    MismatchedSamples { num_x: usize, num_y: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PolyCoeffs {
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self(coeffs)
    }

    /// Least squares fit of a degree `degree` polynomial to the given samples, using a Householder
    /// QR decomposition of the Vandermonde matrix.
    ///
    /// x is scaled into [-1, 1] before building the matrix and the coefficients are scaled back
    /// afterwards.
    pub fn fit(xs: &[f64], ys: &[f64], degree: usize) -> Result<Self, FitError> {
        if xs.len() != ys.len() {
            return Err(FitError::MismatchedSamples {
                num_x: xs.len(),
                num_y: ys.len(),
            });
        }
        if xs.len() < degree + 1 {
            return Err(FitError::UnderdeterminedFit {
                num_samples: xs.len(),
                degree,
            });
        }

        let scale = x_scale(xs);
        let a = DMatrix::from_fn(xs.len(), degree + 1, |i, j| (xs[i] / scale).powi(j as i32));
        let b = DVector::from_column_slice(ys);

        let qr = a.qr();
        let r = qr.r();

        let diag_max = r.diagonal().iter().fold(0f64, |m, d| m.max(d.abs()));
        let diag_min = r.diagonal().iter().fold(std::f64::INFINITY, |m, d| m.min(d.abs()));
        if !(diag_max > 0.0) || diag_min <= RANK_TOL * diag_max {
            return Err(FitError::IllConditionedFit);
        }

        let qtb = qr.q().transpose() * b;
        let coeffs = r
            .solve_upper_triangular(&qtb)
            .ok_or(FitError::IllConditionedFit)?;

        let coeffs: Vec<f64> = coeffs
            .iter()
            .enumerate()
            .map(|(j, c)| c / scale.powi(j as i32))
            .collect();

        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(FitError::IllConditionedFit);
        }

        Ok(Self(coeffs))
    }

    /// Fit the highest degree up to `degree` that the samples support, then zero-pad the result so
    /// it always has `degree + 1` coefficients.
    ///
    /// The starting degree is limited by the number of distinct x values. If the fit at that degree
    /// is ill-conditioned, which happens when the x values are distinct but tightly bunched, the
    /// degree is lowered until a fit succeeds. A degree 0 fit only fails on non-finite samples.
    pub fn fit_reduced(xs: &[f64], ys: &[f64], degree: usize) -> Result<Self, FitError> {
        let num_distinct = count_distinct(xs);
        if num_distinct == 0 {
            return Err(FitError::UnderdeterminedFit {
                num_samples: 0,
                degree,
            });
        }

        let fit_degree = degree.min(num_distinct - 1);
        if fit_degree < degree {
            trace!(
                "Only {} distinct samples, reducing fit degree from {} to {}",
                num_distinct,
                degree,
                fit_degree
            );
        }

        let mut fit_degree = fit_degree;
        let mut coeffs = loop {
            match Self::fit(xs, ys, fit_degree) {
                Ok(c) => break c,
                Err(FitError::IllConditionedFit) if fit_degree > 0 => {
                    trace!(
                        "Degree {} fit is ill-conditioned, trying degree {}",
                        fit_degree,
                        fit_degree - 1
                    );
                    fit_degree -= 1;
                }
                Err(e) => return Err(e),
            }
        };
        coeffs.0.resize(degree + 1, 0.0);

        Ok(coeffs)
    }

    pub fn coeffs(&self) -> &[f64] {
        &self.0
    }

    /// The degree of the polynomial, i.e. one less than the number of coefficients.
    pub fn degree(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Evaluate the polynomial at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        self.0.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }

    /// Evaluate the first derivative of the polynomial at `x`.
    pub fn eval_deriv(&self, x: f64) -> f64 {
        self.0
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (i, c)| acc * x + i as f64 * c)
    }

    /// Sample the curve at every `step` from `x_start` up to and including `x_end`, for
    /// visualisation.
    pub fn sample(&self, x_start: f64, x_end: f64, step: f64) -> Vec<(f64, f64)> {
        if !(step > 0.0) || !(x_end >= x_start) {
            return Vec::new();
        }

        let num = ((x_end - x_start) / step).floor() as usize + 1;

        (0..num)
            .map(|i| {
                let x = x_start + i as f64 * step;
                (x, self.eval(x))
            })
            .collect()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Largest absolute x value, or 1 if there is no usable one.
fn x_scale(xs: &[f64]) -> f64 {
    let max = xs.iter().fold(0f64, |m, x| m.max(x.abs()));

    if max > 0.0 && max.is_finite() {
        max
    } else {
        1.0
    }
}

fn count_distinct(xs: &[f64]) -> usize {
    let mut sorted: Vec<f64> = xs.iter().cloned().filter(|x| x.is_finite()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut count = 0;
    let mut last: Option<f64> = None;
    for x in sorted {
        match last {
            Some(l) if (x - l).abs() <= DISTINCT_X_TOL_M => (),
            _ => {
                count += 1;
                last = Some(x);
            }
        }
    }

    count
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
