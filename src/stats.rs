//! Binomial statistics for session summaries.

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Inverse of the standard normal CDF (Acklam's rational approximation,
/// relative error below 1.2e-9). `p` must be within (0, 1).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838,
        -2.549732539343734,
        4.374664141464968,
        2.938163982698783,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996,
        3.754408661907416,
    ];
    const LOW: f64 = 0.02425;

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p > 1.0 - LOW {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    } else {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    }
}

/// Wilson score interval for `successes` out of `trials` at confidence
/// `level`, or `None` without trials.
pub fn wilson_interval(successes: usize, trials: usize, level: f64) -> Option<(f64, f64)> {
    if trials == 0 {
        return None;
    }
    let n = trials as f64;
    let p = successes as f64 / n;
    let z = normal_quantile(1.0 - (1.0 - level) / 2.0);
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let half = z * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denom;
    Some(((center - half).max(0.0), (center + half).min(1.0)))
}

/// Percentile bootstrap interval of the proportion of `true` outcomes, or
/// `None` without outcomes. Resampling is seeded, so the interval is
/// reproducible.
pub fn bootstrap_interval(
    outcomes: &[bool],
    level: f64,
    resamples: usize,
    seed: u64,
) -> Option<(f64, f64)> {
    if outcomes.is_empty() || resamples == 0 {
        return None;
    }
    let n = outcomes.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut means: Vec<f64> = (0..resamples)
        .map(|_| {
            let hits = (0..n).filter(|_| outcomes[rng.gen_range(0..n)]).count();
            hits as f64 / n as f64
        })
        .collect();
    means.sort_by(f64::total_cmp);

    let alpha = (1.0 - level) / 2.0;
    let at = |q: f64| {
        let i = (q * (resamples - 1) as f64).round() as usize;
        means[i.min(resamples - 1)]
    };
    Some((at(alpha), at(1.0 - alpha)))
}

/// Removes chance from a proportion correct when each trial had `guess`
/// probability of being right by luck: `(p - g) / (1 - g)`, clamped to
/// [0, 1].
pub fn guess_corrected(p: f64, guess: f64) -> f64 {
    if guess >= 1.0 {
        return p.clamp(0.0, 1.0);
    }
    ((p - guess) / (1.0 - guess)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn quantiles() {
        assert!(close(normal_quantile(0.5), 0.0, 1e-12));
        assert!(close(normal_quantile(0.975), 1.959963984540054, 1e-8));
        assert!(close(normal_quantile(0.95), 1.644853626951472, 1e-8));
        assert!(close(normal_quantile(0.005), -2.575829303548901, 1e-8));
    }

    #[test]
    fn wilson_seven_of_nine() {
        let (lo, hi) = wilson_interval(7, 9, 0.95).unwrap();
        assert!(close(lo, 0.452589, 1e-5), "{lo}");
        assert!(close(hi, 0.936775, 1e-5), "{hi}");
    }

    #[test]
    fn wilson_edges() {
        assert_eq!(wilson_interval(0, 0, 0.95), None);
        let (lo, hi) = wilson_interval(0, 10, 0.95).unwrap();
        assert!(close(lo, 0.0, 1e-12));
        assert!(close(hi, 0.277533, 1e-5));
        let (lo, hi) = wilson_interval(10, 10, 0.95).unwrap();
        assert!(close(lo, 0.722467, 1e-5));
        assert!(close(hi, 1.0, 1e-12));
    }

    #[test]
    fn bootstrap_brackets_the_estimate() {
        let outcomes: Vec<bool> = (0..40).map(|i| i % 4 != 0).collect();
        let (lo, hi) = bootstrap_interval(&outcomes, 0.95, 2000, 11).unwrap();
        assert!(lo < 0.75 && 0.75 < hi, "{lo}..{hi}");
        assert_eq!(
            bootstrap_interval(&outcomes, 0.95, 2000, 11),
            Some((lo, hi))
        );
        assert_eq!(bootstrap_interval(&[], 0.95, 100, 1), None);
        assert_eq!(bootstrap_interval(&[true; 5], 0.95, 100, 1), Some((1.0, 1.0)));
    }

    #[test]
    fn guess_correction() {
        // six alternatives, one in six by chance
        let g = 1.0 / 6.0;
        assert!(close(guess_corrected(1.0, g), 1.0, 1e-12));
        assert!(close(guess_corrected(g, g), 0.0, 1e-12));
        assert_eq!(guess_corrected(0.05, g), 0.0);
        assert!(close(guess_corrected(7.0 / 9.0, 0.25), (7.0 / 9.0 - 0.25) / 0.75, 1e-12));
    }
}
