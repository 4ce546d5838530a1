//! Sample selection shared by all estimators.
//!
//! A sample takes part in a fit iff its wind speed and enhancement are finite
//! and the wind speed lies inside the configured window.

use crate::domain::{MonthlyObservation, WindRange};
use crate::models::ForwardInput;

/// The kept samples of one month, in their original order.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedSamples {
    /// Index of each kept sample in the source record.
    pub index: Vec<usize>,
    pub ws: Vec<f64>,
    pub c: Vec<f64>,
    pub d: Vec<f64>,
    pub b: Vec<f64>,
    pub shape: Vec<f64>,
    /// Zeros when the record has no background column.
    pub background: Vec<f64>,
    pub length_scale: f64,
}

impl MaskedSamples {
    pub fn len(&self) -> usize {
        self.ws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ws.is_empty()
    }

    /// Forward-model view, with or without the background term.
    pub fn forward_input(&self, with_background: bool) -> ForwardInput<'_> {
        let input = ForwardInput::new(&self.ws, &self.shape, self.length_scale);
        if with_background {
            input.with_background(&self.background)
        } else {
            input
        }
    }

    /// Keep the samples whose flag is true.
    pub fn retain(&self, keep: &[bool]) -> MaskedSamples {
        let pick = |v: &[f64]| -> Vec<f64> {
            v.iter()
                .zip(keep)
                .filter_map(|(x, &k)| k.then_some(*x))
                .collect()
        };
        MaskedSamples {
            index: self
                .index
                .iter()
                .zip(keep)
                .filter_map(|(x, &k)| k.then_some(*x))
                .collect(),
            ws: pick(&self.ws),
            c: pick(&self.c),
            d: pick(&self.d),
            b: pick(&self.b),
            shape: pick(&self.shape),
            background: pick(&self.background),
            length_scale: self.length_scale,
        }
    }
}

/// Whether a single `(ws, C)` pair is usable inside `range`.
pub fn is_usable(ws: f64, c: f64, range: &WindRange) -> bool {
    ws.is_finite() && c.is_finite() && range.contains(ws)
}

/// Apply the finite/wind-range mask to one month.
pub fn mask_samples(obs: &MonthlyObservation, range: &WindRange) -> MaskedSamples {
    let keep: Vec<bool> = obs
        .ws()
        .iter()
        .zip(obs.c())
        .map(|(&ws, &c)| is_usable(ws, c, range))
        .collect();

    let all = MaskedSamples {
        index: (0..obs.len()).collect(),
        ws: obs.ws().to_vec(),
        c: obs.c().to_vec(),
        d: obs.d().to_vec(),
        b: obs.b().to_vec(),
        shape: obs.shape_factor().to_vec(),
        background: obs
            .background()
            .map(<[f64]>::to_vec)
            .unwrap_or_else(|| vec![0.0; obs.len()]),
        length_scale: obs.length_scale(),
    };
    all.retain(&keep)
}
