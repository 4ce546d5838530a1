//! Formatted terminal output for the estimators.
//!
//! Formatting stays here so the solvers only produce numbers. Lifetimes are
//! shown in hours, emissions in mol/s (plus kg/s when the molecule is known).

use crate::basin::BasinSetup;
use crate::domain::{
    CurveFitPass, EmissionEstimate, FitStatus, MultiMonthFit, OeFit, PassStatus, SECONDS_PER_HOUR,
    TwoPassFit,
};
use crate::io::ingest::IngestedMonths;

/// One sample with its fit, for the residual table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleResidual {
    pub index: usize,
    pub ws: f64,
    pub c: f64,
    pub y_hat: f64,
    /// `(c - y_hat) / y_hat`.
    pub relative: f64,
}

/// The `top_n` samples with the largest fractional residual magnitude.
pub fn largest_residuals(ws: &[f64], c: &[f64], y_hat: &[f64], top_n: usize) -> Vec<SampleResidual> {
    let mut rows: Vec<SampleResidual> = ws
        .iter()
        .zip(c)
        .zip(y_hat)
        .enumerate()
        .map(|(index, ((&ws, &c), &y_hat))| SampleResidual {
            index,
            ws,
            c,
            y_hat,
            relative: (c - y_hat) / y_hat,
        })
        .filter(|r| r.relative.is_finite())
        .collect();
    rows.sort_by(|a, b| b.relative.abs().total_cmp(&a.relative.abs()));
    rows.truncate(top_n);
    rows
}

pub fn format_ingest_summary(data: &IngestedMonths) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Rows: read={} used={} errors={}\n",
        data.rows_read,
        data.rows_used,
        data.row_errors.len()
    ));
    for m in &data.months {
        out.push_str(&format!(
            "  {} n={} L={:.0}m{}\n",
            m.month().format("%Y-%m"),
            m.len(),
            m.length_scale(),
            if m.background().is_some() { " (background)" } else { "" }
        ));
    }
    for e in data.row_errors.iter().take(5) {
        out.push_str(&format!("  line {}: {}\n", e.line, e.message));
    }
    if data.row_errors.len() > 5 {
        out.push_str(&format!("  ... {} more row errors\n", data.row_errors.len() - 5));
    }
    out
}

pub fn format_oe_summary(label: &str, fit: &OeFit, basin: Option<&BasinSetup>) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== Optimal estimation: {label} ===\n"));
    out.push_str(&format!("Status: {} after {} iterations\n", status_label(&fit.status), fit.n_iter));
    out.push_str(&format!("Samples: n={}\n", fit.ws.len()));
    out.push_str(&format!(
        "Prior:     Q={:.1} mol/s  tau={:.2} h\n",
        fit.prior_state[0],
        hours(fit.prior_state[1])
    ));
    out.push_str(&format!(
        "Posterior: Q={} ± {:.1} mol/s  tau={:.2} ± {:.2} h\n",
        fmt_q(fit.q, basin),
        sd(fit.posterior_cov[(0, 0)]),
        hours(fit.tau),
        hours(sd(fit.posterior_cov[(1, 1)]))
    ));
    out.push_str(&format!(
        "Averaging kernel diag: [{:.3}, {:.3}]  r(Q,tau)={:.3}\n",
        fit.averaging_kernel[(0, 0)],
        fit.averaging_kernel[(1, 1)],
        fit.r_hat
    ));
    out.push_str(&format!(
        "Cost: J_prior={:.3e} J_obs={:.3e}  residual rms={:.3e}\n",
        fit.j_prior, fit.j_obs, fit.residual_rms
    ));
    let y_hat: Vec<f64> = fit.y_hat.iter().copied().collect();
    out.push_str(&format_residual_table(&largest_residuals(&fit.ws, &fit.c, &y_hat, 5)));
    out
}

pub fn format_joint_summary(fit: &MultiMonthFit, basin: Option<&BasinSetup>) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== Joint optimal estimation: {} months ===\n", fit.months.len()));
    out.push_str(&format!(
        "Status: {} after {} iterations (statistic {:.3e})\n",
        status_label(&fit.status),
        fit.n_iter,
        fit.convergence_statistic
    ));
    out.push_str(&format!(
        "{:<8} {:>5} {:>12} {:>10} {:>10} {:>10} {:>8}\n",
        "month", "n", "Q", "sd(Q)", "tau[h]", "sd(tau)", "r"
    ));
    out.push_str(&format!(
        "{:-<8} {:->5} {:->12} {:->10} {:->10} {:->10} {:->8}\n",
        "", "", "", "", "", "", ""
    ));
    let m = fit.months.len();
    let counts = fit.ranges.counts();
    for (i, month) in fit.months.iter().enumerate() {
        out.push_str(&format!(
            "{:<8} {:>5} {:>12} {:>10.1} {:>10.2} {:>10.2} {:>8.3}\n",
            month.format("%Y-%m"),
            counts[i],
            fmt_q(fit.q[i], basin),
            sd(fit.posterior_cov[(i, i)]),
            hours(fit.tau[i]),
            hours(sd(fit.posterior_cov[(m + i, m + i)])),
            fit.r_hat_per_month[i]
        ));
    }
    out.push_str(&format!(
        "Cost: J_prior={:.3e} J_obs={:.3e}  residual rms={:.3e}\n",
        fit.j_prior, fit.j_obs, fit.residual_rms
    ));
    out
}

pub fn format_two_pass_summary(label: &str, fit: &TwoPassFit, basin: Option<&BasinSetup>) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== Two-pass curve fit: {label} ===\n"));
    out.push_str(&format_pass("first ", &fit.first, basin));
    out.push_str(&format_pass("second", &fit.second, basin));
    if !fit.rejected.is_empty() {
        out.push_str(&format!("Rejected samples: {:?}\n", fit.rejected));
    }
    out.push_str(&format_residual_table(&largest_residuals(
        &fit.first.ws,
        &fit.first.c,
        &fit.first.y_hat,
        5,
    )));
    out
}

pub fn format_emission_summary(label: &str, est: &EmissionEstimate, basin: Option<&BasinSetup>) -> String {
    format!(
        "=== Emission sum: {label} ===\nQ={} mol/s at tau={:.2} h (n={}, total weight={:.1})\n",
        fmt_q(est.q, basin),
        hours(est.tau),
        est.n_samples,
        est.total_weight
    )
}

fn format_pass(name: &str, pass: &CurveFitPass, basin: Option<&BasinSetup>) -> String {
    let status = match &pass.status {
        PassStatus::Fitted => "fitted".to_string(),
        PassStatus::ReusedFirstPass => "reused first pass".to_string(),
        PassStatus::Failed { reason } => format!("failed ({reason})"),
    };
    format!(
        "Pass {name}: n={:<4} Q={} ± {:.1} mol/s  tau={:.2} ± {:.2} h  [{status}]\n",
        pass.c.len(),
        fmt_q(pass.q(), basin),
        sd(pass.param_cov[(0, 0)]),
        hours(pass.tau()),
        hours(sd(pass.param_cov[(1, 1)]))
    )
}

fn format_residual_table(rows: &[SampleResidual]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    out.push_str("Largest residuals:\n");
    out.push_str(&format!(
        "{:>6} {:>8} {:>12} {:>12} {:>9}\n",
        "index", "ws", "C", "fit", "rel"
    ));
    for r in rows {
        out.push_str(&format!(
            "{:>6} {:>8.2} {:>12.4e} {:>12.4e} {:>8.1}%\n",
            r.index,
            r.ws,
            r.c,
            r.y_hat,
            r.relative * 100.0
        ));
    }
    out
}

fn status_label(status: &FitStatus) -> String {
    match status {
        FitStatus::Converged => "converged".to_string(),
        FitStatus::MaxIterations => "max iterations".to_string(),
        FitStatus::LinalgFailure { iteration, reason } => {
            format!("linear algebra failure at iteration {iteration} ({reason})")
        }
        FitStatus::PosteriorFailure { reason } => format!("posterior failure ({reason})"),
    }
}

fn fmt_q(q: f64, basin: Option<&BasinSetup>) -> String {
    let mass = basin
        .and_then(BasinSetup::primary_molecule)
        .and_then(|m| m.to_mass_rate(q));
    match mass {
        Some(kg) => format!("{q:.1} ({kg:.2} kg/s)"),
        None => format!("{q:.1}"),
    }
}

fn hours(seconds: f64) -> f64 {
    seconds / SECONDS_PER_HOUR
}

fn sd(variance: f64) -> f64 {
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basin::Molecule;
    use crate::logging::SilentLogger;

    #[test]
    fn largest_residuals_sorted_by_magnitude() {
        let ws = [2.0, 3.0, 4.0, 5.0];
        let c = [1.0, 1.5, 0.5, 1.0];
        let y_hat = [1.0, 1.0, 1.0, 0.0];
        let rows = largest_residuals(&ws, &c, &y_hat, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[1].index, 2);
        assert!((rows[1].relative + 0.5).abs() < 1e-12);
    }

    #[test]
    fn emission_summary_converts_to_mass_for_known_molecule() {
        let est = EmissionEstimate {
            q: 500.0,
            tau: 7200.0,
            n_samples: 12,
            total_weight: 30.0,
        };
        let basin = BasinSetup::new("po", "TROPOMI", vec![Molecule::No2], Vec::new(), &SilentLogger);
        let text = format_emission_summary("2019-07", &est, Some(&basin));
        assert!(text.contains("Q=500.0 (23.00 kg/s)"));
        assert!(text.contains("tau=2.00 h"));
        assert!(format_emission_summary("2019-07", &est, None).contains("Q=500.0 mol/s"));
    }
}
