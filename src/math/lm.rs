//! Unconstrained nonlinear least squares (Levenberg-Marquardt).
//!
//! Minimizes `||y - f(p)||^2` for a model that returns both its predictions and
//! its Jacobian. Damping uses Marquardt's diagonal scaling
//! `(J^T J + lambda diag(J^T J)) dp = J^T r`, which keeps the step invariant to
//! the very different units of the parameters (Q ~ 1e2 mol/s, tau ~ 1e4 s).
//!
//! This is only the engine behind the robust curve fit; it is not meant as a
//! general optimizer.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::math::linalg::{invert, nan_matrix, solve_symmetric};

/// Failure of a least-squares fit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LeastSquaresError {
    #[error("improper input: {n} samples cannot determine {p} parameters")]
    TooFewSamples { n: usize, p: usize },

    #[error("optimal parameters not found after {0} iterations")]
    NotConverged(usize),

    #[error("non-finite cost during iteration {0}")]
    NonFinite(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    /// Stop when the relative cost reduction of an accepted step is below this.
    pub ftol: f64,
    /// Stop when the relative step length is below this.
    pub xtol: f64,
    /// Iteration cap; `None` means `200 * (n_params + 1)`.
    pub max_iterations: Option<usize>,
    pub initial_damping: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            ftol: 1.49012e-8,
            xtol: 1.49012e-8,
            max_iterations: None,
            initial_damping: 1e-3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmSolution {
    pub params: DVector<f64>,
    /// `(J^T J)^-1 * SSR / (n - p)`; NaN when `n <= p` or `J^T J` is singular.
    pub covariance: DMatrix<f64>,
    pub predictions: DVector<f64>,
    pub cost: f64,
    pub iterations: usize,
}

const MAX_DAMPING: f64 = 1e20;

/// Fit `params` so that `model(params).0` matches `y` in the least-squares sense.
///
/// `model` returns `(predictions, jacobian)` with the Jacobian of shape `n x p`.
pub fn levenberg_marquardt<F>(
    model: F,
    y: &DVector<f64>,
    initial: DVector<f64>,
    opts: &LmOptions,
) -> Result<LmSolution, LeastSquaresError>
where
    F: Fn(&DVector<f64>) -> (DVector<f64>, DMatrix<f64>),
{
    let n = y.len();
    let p = initial.len();
    if n < p {
        return Err(LeastSquaresError::TooFewSamples { n, p });
    }
    let max_iter = opts.max_iterations.unwrap_or(200 * (p + 1));

    let mut params = initial;
    let (mut pred, mut jac) = model(&params);
    let mut resid = y - &pred;
    let mut cost = resid.norm_squared();
    if !cost.is_finite() {
        return Err(LeastSquaresError::NonFinite(0));
    }

    let mut lambda = opts.initial_damping;
    let mut converged = cost == 0.0;
    let mut iterations = 0;

    while !converged {
        if iterations >= max_iter {
            return Err(LeastSquaresError::NotConverged(iterations));
        }
        iterations += 1;

        let jtj = jac.transpose() * &jac;
        let grad = jac.transpose() * &resid;
        let scale = jtj.diagonal().map(|v| if v > 0.0 { v } else { f64::EPSILON });

        let mut damped = jtj.clone();
        for i in 0..p {
            damped[(i, i)] += lambda * scale[i];
        }
        let step = match solve_symmetric(&damped, &grad, "damped normal") {
            Ok(step) => step,
            Err(_) => {
                lambda *= 10.0;
                if lambda > MAX_DAMPING {
                    return Err(LeastSquaresError::NotConverged(iterations));
                }
                continue;
            }
        };

        let rel_step = relative_step(&step, &params);
        let trial = &params + &step;
        let (trial_pred, trial_jac) = model(&trial);
        let trial_resid = y - &trial_pred;
        let trial_cost = trial_resid.norm_squared();

        if trial_cost.is_finite() && trial_cost <= cost {
            let reduction = (cost - trial_cost) / cost;
            params = trial;
            pred = trial_pred;
            jac = trial_jac;
            resid = trial_resid;
            cost = trial_cost;
            lambda = (lambda / 10.0).max(1e-12);
            converged = cost == 0.0 || reduction <= opts.ftol || rel_step <= opts.xtol;
        } else {
            // A rejected step this small means no further progress is possible.
            if rel_step <= opts.xtol {
                converged = true;
            } else {
                lambda *= 10.0;
                if lambda > MAX_DAMPING {
                    if trial_cost.is_finite() {
                        converged = true;
                    } else {
                        return Err(LeastSquaresError::NonFinite(iterations));
                    }
                }
            }
        }
    }

    let covariance = covariance(&jac, cost, n, p);
    Ok(LmSolution {
        params,
        covariance,
        predictions: pred,
        cost,
        iterations,
    })
}

fn relative_step(step: &DVector<f64>, params: &DVector<f64>) -> f64 {
    step.iter()
        .zip(params.iter())
        .map(|(s, x)| {
            let r = s / (x.abs() + f64::EPSILON);
            r * r
        })
        .sum::<f64>()
        .sqrt()
}

fn covariance(jac: &DMatrix<f64>, cost: f64, n: usize, p: usize) -> DMatrix<f64> {
    if n <= p {
        return nan_matrix(p, p);
    }
    let jtj = jac.transpose() * jac;
    match invert(&jtj, "J^T J") {
        Ok(inv) => inv * (cost / (n - p) as f64),
        Err(_) => nan_matrix(p, p),
    }
}
