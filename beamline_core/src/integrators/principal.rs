//! Principal trajectory functions and the integrals built from them.
//!
//! # Definitions
//! For a focusing strength κ the principal functions are
//!
//! ```text
//! E_j(κ, s) = Σ_n (−κ)^n s^(2n+j) / (2n+j)!        (j ≥ −1)
//! ```
//!
//! so that `E_0 = C` (cosine-like), `E_1 = S` (sine-like), `E_2 = D`, `E_3 = F`
//! and `E_{−1} = −κ S`. They satisfy `E_j' = E_{j−1}` and `∫₀ˢ E_j = E_{j+1}`.
//!
//! # Design choices
//! - Every closed form has a power-series twin. The switch happens on the
//!   dimensionless argument |κ|·s² and is controlled by a named threshold.
//!   Both forms agree to rounding error at the switch point.
//! - Second-order maps need integrals of products of principal functions.
//!   These reduce to two primitives: a *convolution*
//!   `∫₀ᴸ E_m(c, L−s) E_n(d, s) ds`, which is a divided difference in κ, and
//!   a *correlation* `∫₀ᴸ E_j(c, s) E_p(a, s) ds`, which follows from a
//!   Wronskian identity. Both divide by a strength difference and switch to
//!   their series when that difference is small (the resonant and equal-κ
//!   regimes).

/// Below this |κ|·s², orders ≤ 3 are evaluated from the series.
pub const SERIES_THRESHOLD: f64 = 1e-2;

/// Below this |κ|·s², orders ≥ 4 are evaluated from the series. The closed
/// form of high orders subtracts nearly equal quantities, so the series is
/// kept over a wider range.
pub const HIGH_ORDER_SERIES_THRESHOLD: f64 = 1.0;

/// Below this |κ₁ − κ₂|·s², divided differences and correlation integrals
/// use their series instead of dividing by κ₁ − κ₂.
pub const DEGENERATE_THRESHOLD: f64 = 1e-2;

/// Hard cap on series length; convergence normally takes < 30 terms.
const MAX_TERMS: usize = 200;

/// Relative size at which a series term no longer changes the sum.
const SERIES_TOLERANCE: f64 = f64::EPSILON * 1e-2;

fn factorial(n: i32) -> f64 {
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

// ---------------------------------------------------------------------------
// Principal functions
// ---------------------------------------------------------------------------

/// `E_order(κ, s)`, choosing the closed form or the series.
pub fn principal(order: i32, kappa: f64, s: f64) -> f64 {
    let threshold = if order <= 3 {
        SERIES_THRESHOLD
    } else {
        HIGH_ORDER_SERIES_THRESHOLD
    };
    if kappa.abs() * s * s < threshold {
        principal_series(order, kappa, s)
    } else {
        principal_closed(order, kappa, s)
    }
}

/// Series form of `E_order(κ, s)`. Exact (a polynomial) when κ = 0.
pub fn principal_series(order: i32, kappa: f64, s: f64) -> f64 {
    debug_assert!(order >= -1);
    let x = -kappa * s * s;
    let (mut n, mut term) = if order >= 0 {
        (0, s.powi(order) / factorial(order))
    } else {
        (1, -kappa * s)
    };
    let mut sum = term;
    while n < MAX_TERMS as i32 {
        let m = f64::from(2 * n + order);
        term *= x / ((m + 1.0) * (m + 2.0));
        sum += term;
        n += 1;
        if term.abs() <= SERIES_TOLERANCE * sum.abs() {
            break;
        }
    }
    sum
}

/// Closed form of `E_order(κ, s)` through cos/sin (κ > 0) or cosh/sinh
/// (κ < 0). Requires κ ≠ 0.
pub fn principal_closed(order: i32, kappa: f64, s: f64) -> f64 {
    let k = kappa.abs().sqrt();
    let (c, sn) = if kappa > 0.0 {
        ((k * s).cos(), (k * s).sin() / k)
    } else {
        ((k * s).cosh(), (k * s).sinh() / k)
    };
    match order {
        -1 => -kappa * sn,
        0 => c,
        1 => sn,
        j => (s.powi(j - 2) / factorial(j - 2) - principal_closed(j - 2, kappa, s)) / kappa,
    }
}

/// Leading terms `(−κ)^n s^(2n+order)/(2n+order)!` of the series, down to
/// rounding level.
fn series_terms(order: i32, kappa: f64, s: f64) -> Vec<f64> {
    let x = -kappa * s * s;
    let mut term = s.powi(order) / factorial(order);
    let mut sum = term;
    let mut terms = vec![term];
    for n in 0..MAX_TERMS as i32 {
        let m = f64::from(2 * n + order);
        term *= x / ((m + 1.0) * (m + 2.0));
        if term == 0.0 || term.abs() <= SERIES_TOLERANCE * sum.abs() {
            break;
        }
        sum += term;
        terms.push(term);
    }
    terms
}

// ---------------------------------------------------------------------------
// Divided differences and convolutions
// ---------------------------------------------------------------------------

/// `(E_order(c, s) − E_order(d, s)) / (c − d)`, continuous through c = d.
pub fn divided_difference(order: i32, c: f64, d: f64, s: f64) -> f64 {
    if (c - d).abs() * s * s < DEGENERATE_THRESHOLD {
        divided_difference_series(order, c, d, s)
    } else {
        (principal(order, c, s) - principal(order, d, s)) / (c - d)
    }
}

/// Series of the divided difference:
/// `Σ_{n≥1} (−1)^n s^(2n+j)/(2n+j)! · h_{n−1}(c, d)`, where
/// `h_n = c·h_{n−1} + dⁿ` is the complete homogeneous polynomial of degree n.
pub fn divided_difference_series(order: i32, c: f64, d: f64, s: f64) -> f64 {
    let mut q = -s.powi(order + 2) / factorial(order + 2);
    let mut h = 1.0;
    let mut d_pow = 1.0;
    let mut sum = 0.0;
    let mut negligible = 0;
    for n in 1..=MAX_TERMS as i32 {
        let term = q * h;
        sum += term;
        // h may vanish for single n (c = −d), so require two quiet terms
        if term.abs() <= SERIES_TOLERANCE * sum.abs() {
            negligible += 1;
            if negligible == 2 {
                break;
            }
        } else {
            negligible = 0;
        }
        d_pow *= d;
        h = c * h + d_pow;
        let m = f64::from(2 * n + order);
        q *= -s * s / ((m + 1.0) * (m + 2.0));
    }
    sum
}

/// `∫₀ᴸ E_m(c, L − s) E_n(d, s) ds`.
pub fn convolution(m: i32, c: f64, n: i32, d: f64, length: f64) -> f64 {
    -divided_difference(m + n - 1, c, d, length)
}

// ---------------------------------------------------------------------------
// Correlations
// ---------------------------------------------------------------------------

/// `∫₀ᴸ E_j(c, s) E_p(a, s) ds` for `j, p ∈ {0, 1, 2}`.
///
/// From `(E_j E_{p−1} − E_{j−1} E_p)' = (c − a) E_j E_p` plus the
/// inhomogeneous terms of `E_2`.
pub fn correlation(j: i32, c: f64, p: i32, a: f64, length: f64) -> f64 {
    debug_assert!((0..=2).contains(&j) && (0..=2).contains(&p));
    if (c - a).abs() * length * length < DEGENERATE_THRESHOLD {
        return correlation_series(j, c, p, a, length);
    }
    let e = |order: i32, kappa: f64| principal(order, kappa, length);
    let w_end = e(j, c) * e(p - 1, a) - e(j - 1, c) * e(p, a);
    let w_start = match (j, p) {
        (0, 1) => 1.0,
        (1, 0) => -1.0,
        _ => 0.0,
    };
    let upper = if p == 2 { e(j + 1, c) } else { 0.0 };
    let lower = if j == 2 { e(p + 1, a) } else { 0.0 };
    (w_end - w_start - upper + lower) / (c - a)
}

/// Double-series form of [`correlation`], valid for any c, a.
pub fn correlation_series(j: i32, c: f64, p: i32, a: f64, length: f64) -> f64 {
    let first = series_terms(j, c, length);
    let second = series_terms(p, a, length);
    let mut sum = 0.0;
    for (n, u) in first.iter().enumerate() {
        for (q, v) in second.iter().enumerate() {
            let e = (2 * (n + q)) as f64 + f64::from(j + p + 1);
            sum += u * v * length / e;
        }
    }
    sum
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
