// src/forecast/arima.rs
//! Autoregressive-integrated candidate: a small (p, d, q) order grid scored
//! by AIC, conditional-least-squares estimation (Hannan-Rissanen two-stage
//! for the moving-average part), and 95% prediction intervals from
//! psi-weight accumulation.
//!
//! The grid search runs under a wall-clock budget so one pathological topic
//! cannot stall a batch; on exhaustion the remaining orders are skipped and
//! the best order found so far (or the (1,1,1) fallback) is used.

use anyhow::{bail, Result};
use chrono::{Days, NaiveDate};
use std::time::{Duration, Instant};

use crate::forecast::{ForecastModel, FittedModel};
use crate::types::{ForecastPoint, ModelMetrics};

const P_VALUES: [usize; 3] = [0, 1, 2];
const D_VALUES: [usize; 2] = [0, 1];
const Q_VALUES: [usize; 3] = [0, 1, 2];
const FALLBACK_ORDER: (usize, usize, usize) = (1, 1, 1);

pub struct AutoregressiveModel {
    grid_budget: Duration,
}

impl AutoregressiveModel {
    pub fn new(grid_budget: Duration) -> Self {
        Self { grid_budget }
    }
}

impl ForecastModel for AutoregressiveModel {
    fn name(&self) -> &'static str {
        "ARIMA"
    }

    fn fit(&self, series: &[f64]) -> Result<Box<dyn FittedModel>> {
        if series.len() < 10 {
            bail!(
                "autoregressive candidate needs at least 10 points, got {}",
                series.len()
            );
        }

        // Order grid scored by AIC, bounded by wall clock.
        let started = Instant::now();
        let mut best: Option<FittedArima> = None;
        'grid: for &p in &P_VALUES {
            for &d in &D_VALUES {
                for &q in &Q_VALUES {
                    if started.elapsed() > self.grid_budget {
                        tracing::debug!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "order grid budget exhausted, stopping search"
                        );
                        break 'grid;
                    }
                    if let Ok(fit) = css_fit(series, p, d, q) {
                        let better = best.as_ref().map(|b| fit.aic < b.aic).unwrap_or(true);
                        if better {
                            best = Some(fit);
                        }
                    }
                }
            }
        }

        match best {
            Some(fit) => Ok(Box::new(fit)),
            None => {
                // Grid found nothing usable: simple fallback order.
                let (p, d, q) = FALLBACK_ORDER;
                let fit = css_fit(series, p, d, q)?;
                Ok(Box::new(fit))
            }
        }
    }
}

struct FittedArima {
    order: (usize, usize, usize),
    intercept: f64,
    ar: Vec<f64>,
    ma: Vec<f64>,
    sigma2: f64,
    aic: f64,
    metrics: ModelMetrics,
    /// Differenced series and aligned residuals, kept for the forecast
    /// recursion (pre-sample residuals are zero).
    w: Vec<f64>,
    resid: Vec<f64>,
    last_y: f64,
}

impl FittedModel for FittedArima {
    fn model_type(&self) -> &'static str {
        "ARIMA"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::json!({
            "order": [self.order.0, self.order.1, self.order.2],
            "aic": self.aic,
        })
    }

    fn in_sample_error(&self) -> ModelMetrics {
        self.metrics
    }

    fn forecast(&self, horizon_days: usize, start: NaiveDate) -> Vec<ForecastPoint> {
        let (p, d, q) = self.order;
        let psi = psi_weights(&self.ar, &self.ma, d, horizon_days);

        let mut w_ext = self.w.clone();
        let mut e_ext = self.resid.clone();
        let mut y_prev = self.last_y;
        let mut cum_var = 0.0;

        let mut curve = Vec::with_capacity(horizon_days);
        for step in 0..horizon_days {
            let t = w_ext.len();
            let mut pred = self.intercept;
            for i in 1..=p {
                pred += self.ar[i - 1] * w_ext[t - i];
            }
            for j in 1..=q {
                pred += self.ma[j - 1] * e_ext[t - j];
            }
            w_ext.push(pred);
            e_ext.push(0.0); // future innovations have zero expectation

            let yhat = if d == 0 { pred } else { y_prev + pred };
            y_prev = yhat;

            cum_var += psi[step] * psi[step];
            let se = (self.sigma2 * cum_var).sqrt();
            curve.push(ForecastPoint::with_bounds(
                start + Days::new(step as u64),
                yhat,
                yhat - 1.96 * se,
                yhat + 1.96 * se,
            ));
        }
        curve
    }
}

/// Conditional-least-squares fit of an ARIMA(p,d,q). The moving-average
/// part uses Hannan-Rissanen: a long AR regression estimates innovations,
/// then the final regression includes their lags.
fn css_fit(series: &[f64], p: usize, d: usize, q: usize) -> Result<FittedArima> {
    let w = difference(series, d);
    let n = w.len();
    let k = p + q + 1; // regressors incl. intercept

    let long_order = if q > 0 {
        (p.max(q) + 2).min(n / 3).max(1)
    } else {
        0
    };
    let start = p.max(long_order + q);
    if n < start + k + 2 {
        bail!("series too short for order ({p},{d},{q})");
    }

    // Stage 1: innovations from a long AR fit (only needed for MA terms).
    let mut innov = vec![0.0; n];
    if q > 0 {
        let coef = ols_ar(&w, long_order)?;
        for t in long_order..n {
            let mut pred = coef[0];
            for i in 1..=long_order {
                pred += coef[i] * w[t - i];
            }
            innov[t] = w[t] - pred;
        }
    }

    // Stage 2: normal equations for w_t ~ 1 + lags(w, p) + lags(innov, q).
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    let mut x = vec![0.0; k];
    for t in start..n {
        x[0] = 1.0;
        for i in 1..=p {
            x[i] = w[t - i];
        }
        for j in 1..=q {
            x[p + j] = innov[t - j];
        }
        for a in 0..k {
            xty[a] += x[a] * w[t];
            for b in 0..k {
                xtx[a][b] += x[a] * x[b];
            }
        }
    }
    let beta = solve_linear(xtx, xty)?;
    let intercept = beta[0];
    let ar = beta[1..=p].to_vec();
    let ma = beta[p + 1..].to_vec();

    // Recursive residuals on the differenced scale. For d <= 1 the one-step
    // error on the original scale equals the differenced-scale residual, so
    // in-sample metrics fall out of the same pass.
    let mut resid = vec![0.0; n];
    let mut abs_err = 0.0;
    let mut sq_err = 0.0;
    for t in start..n {
        let mut pred = intercept;
        for i in 1..=p {
            pred += ar[i - 1] * w[t - i];
        }
        for j in 1..=q {
            pred += ma[j - 1] * resid[t - j];
        }
        resid[t] = w[t] - pred;
        abs_err += resid[t].abs();
        sq_err += resid[t] * resid[t];
    }

    let n_eff = (n - start) as f64;
    let sigma2 = (sq_err / n_eff).max(1e-12);
    let aic = n_eff * sigma2.ln() + 2.0 * k as f64;

    Ok(FittedArima {
        order: (p, d, q),
        intercept,
        ar,
        ma,
        sigma2,
        aic,
        metrics: ModelMetrics {
            mae: abs_err / n_eff,
            mse: sq_err / n_eff,
        },
        w,
        resid,
        last_y: *series.last().expect("non-empty series"),
    })
}

/// Difference a series `d` times.
fn difference(series: &[f64], d: usize) -> Vec<f64> {
    let mut w = series.to_vec();
    for _ in 0..d {
        w = w.windows(2).map(|pair| pair[1] - pair[0]).collect();
    }
    w
}

/// OLS fit of an AR(m) with intercept; returns `[c, phi_1, ..., phi_m]`.
fn ols_ar(w: &[f64], m: usize) -> Result<Vec<f64>> {
    let n = w.len();
    let k = m + 1;
    if n < m + k + 2 {
        bail!("series too short for AR({m}) innovations fit");
    }
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    let mut x = vec![0.0; k];
    for t in m..n {
        x[0] = 1.0;
        for i in 1..=m {
            x[i] = w[t - i];
        }
        for a in 0..k {
            xty[a] += x[a] * w[t];
            for b in 0..k {
                xtx[a][b] += x[a] * x[b];
            }
        }
    }
    solve_linear(xtx, xty)
}

/// Gaussian elimination with partial pivoting for the small normal-equation
/// systems here (at most 6x6). A collinear design is reported as an error.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&r1, &r2| {
                a[r1][col]
                    .abs()
                    .partial_cmp(&a[r2][col].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("non-empty pivot range");
        if a[pivot_row][col].abs() < 1e-10 {
            bail!("singular design matrix");
        }
        a.swap(col, pivot_row);
        b.swap(col, pivot_row);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for c in col..n {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for c in row + 1..n {
            sum -= a[row][c] * x[c];
        }
        x[row] = sum / a[row][row];
    }
    Ok(x)
}

/// Psi weights of the ARIMA process on the original scale: expand
/// `ar(L) * (1-L)^d` and run the standard MA-infinity recursion. The h-step
/// forecast variance is `sigma2 * sum(psi[0..h]^2)`.
fn psi_weights(ar: &[f64], ma: &[f64], d: usize, n: usize) -> Vec<f64> {
    // Polynomial with c0 = 1, c_i = -phi_i.
    let mut poly: Vec<f64> = std::iter::once(1.0).chain(ar.iter().map(|a| -a)).collect();
    for _ in 0..d {
        poly = poly_mul(&poly, &[1.0, -1.0]);
    }
    let phi_star: Vec<f64> = poly[1..].iter().map(|c| -c).collect();

    let mut psi = vec![0.0; n.max(1)];
    for j in 0..psi.len() {
        let mut value = if j == 0 {
            1.0
        } else {
            ma.get(j - 1).copied().unwrap_or(0.0)
        };
        for i in 1..=phi_star.len().min(j) {
            value += phi_star[i - 1] * psi[j - i];
        }
        psi[j] = value;
    }
    psi
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        for (j, &bj) in b.iter().enumerate() {
            out[i + j] += ai * bj;
        }
    }
    out
}
