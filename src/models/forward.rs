//! Forward model relating wind speed to integrated mass enhancement.
//!
//! For one sample with wind speed `ws`, basin length scale `L`, area `A = L^2`
//! and shape factor `f`, the steady-state enhancement of a species emitted at
//! rate `Q` and removed with lifetime `tau` is:
//!
//! ```text
//! k = ws / (L f) + 1 / tau
//! y = (Q + Omega_bg ws A / (f L)) / (A k)
//! ```
//!
//! with analytic partials
//!
//! ```text
//! dy/dQ   = 1 / (A k)
//! dy/dtau = (Q + Omega_bg ws A / (f L)) / A / k^2 / tau^2
//! ```
//!
//! `Omega_bg = 0` when no background column is supplied.

use nalgebra::{DMatrix, DVector};

use crate::domain::MonthRanges;

/// Immutable view of the geometry needed by one forward evaluation.
#[derive(Debug, Clone, Copy)]
pub struct ForwardInput<'a> {
    pub ws: &'a [f64],
    pub shape: &'a [f64],
    pub background: Option<&'a [f64]>,
    pub length_scale: f64,
}

impl<'a> ForwardInput<'a> {
    pub fn new(ws: &'a [f64], shape: &'a [f64], length_scale: f64) -> Self {
        Self {
            ws,
            shape,
            background: None,
            length_scale,
        }
    }

    pub fn with_background(mut self, background: &'a [f64]) -> Self {
        self.background = Some(background);
        self
    }

    pub fn len(&self) -> usize {
        self.ws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ws.is_empty()
    }

    pub fn area(&self) -> f64 {
        self.length_scale * self.length_scale
    }
}

/// Forward values and Jacobian (one column per state component).
#[derive(Debug, Clone)]
pub struct ForwardEval {
    pub y: DVector<f64>,
    pub jacobian: DMatrix<f64>,
}

#[derive(Debug, Clone, Copy)]
struct SampleTerms {
    y: f64,
    dq: f64,
    dtau: f64,
}

#[inline]
fn sample_terms(ws: f64, f: f64, bg: f64, l: f64, a: f64, q: f64, tau: f64) -> SampleTerms {
    let k = ws / (l * f) + 1.0 / tau;
    let numer = q + bg * ws * a / (f * l);
    SampleTerms {
        y: numer / (a * k),
        dq: 1.0 / (a * k),
        dtau: numer / a / (k * k) / (tau * tau),
    }
}

/// Predicted enhancement for every sample.
pub fn predict(input: &ForwardInput<'_>, q: f64, tau: f64) -> Vec<f64> {
    let a = input.area();
    (0..input.len())
        .map(|i| {
            let bg = input.background.map_or(0.0, |b| b[i]);
            sample_terms(input.ws[i], input.shape[i], bg, input.length_scale, a, q, tau).y
        })
        .collect()
}

/// Predictions plus the `n x 2` Jacobian with columns `(dy/dQ, dy/dtau)`.
pub fn forward(input: &ForwardInput<'_>, q: f64, tau: f64) -> ForwardEval {
    let n = input.len();
    let a = input.area();
    let mut y = DVector::zeros(n);
    let mut jacobian = DMatrix::zeros(n, 2);
    for i in 0..n {
        let bg = input.background.map_or(0.0, |b| b[i]);
        let t = sample_terms(input.ws[i], input.shape[i], bg, input.length_scale, a, q, tau);
        y[i] = t.y;
        jacobian[(i, 0)] = t.dq;
        jacobian[(i, 1)] = t.dtau;
    }
    ForwardEval { y, jacobian }
}

/// Samples from several months pooled into one flat array.
///
/// Month `i` owns `ranges.ranges()[i]` and has length scale `length_scales[i]`.
#[derive(Debug, Clone, Copy)]
pub struct PooledInput<'a> {
    pub ws: &'a [f64],
    pub shape: &'a [f64],
    pub length_scales: &'a [f64],
    pub ranges: &'a MonthRanges,
}

/// Evaluate each month's `(Q_i, tau_i)` on its own slice.
///
/// The Jacobian is `n x 2m` with the Q columns first, then the tau columns.
/// Entries outside a month's slice stay at NaN (predictions) or 0 (derivatives).
pub fn forward_multi(input: &PooledInput<'_>, q: &[f64], tau: &[f64]) -> ForwardEval {
    let n = input.ws.len();
    let m = input.ranges.months();
    let mut y = DVector::from_element(n, f64::NAN);
    let mut jacobian = DMatrix::zeros(n, 2 * m);

    for (month, range) in input.ranges.ranges().iter().enumerate() {
        let l = input.length_scales[month];
        let a = l * l;
        for i in range.clone() {
            let t = sample_terms(input.ws[i], input.shape[i], 0.0, l, a, q[month], tau[month]);
            y[i] = t.y;
            jacobian[(i, month)] = t.dq;
            jacobian[(i, m + month)] = t.dtau;
        }
    }

    ForwardEval { y, jacobian }
}
