//! Bound/unbound threshold estimation from background signal.

use log::debug;
use log::info;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;

use crate::err::Error;
use crate::gmm::GaussianMixture;

/// Values with an absolute value below this are treated as zero.
pub const ZERO_TOLERANCE: f64 = 1e-8;

const GOLDEN_ITER: usize = 200;
const QUANTILE_EPSILON: f64 = 1e-12;

// --- LogNormal ---------------------------------------------------------------

/// A shifted log-normal distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogNormal {
    pub shape: f64,
    pub loc: f64,
    pub scale: f64,
}

impl LogNormal {
    /// Fit the location of a log-normal with fixed shape and scale.
    ///
    /// The location is the maximum likelihood estimate below the smallest
    /// value, found with a golden-section search.
    pub fn fit_loc(values: &[f64], shape: f64, scale: f64) -> Self {
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let span = scale + (max - min);
        let mut lo = min - 100.0 * span;
        let mut hi = min - 1e-9 * min.abs().max(1.0);

        let nll = |loc: f64| -> f64 {
            values
                .iter()
                .map(|&x| {
                    let z = (x - loc).ln();
                    z + (z - scale.ln()).powi(2) / (2.0 * shape * shape)
                })
                .sum()
        };

        let ratio = (5f64.sqrt() - 1.0) / 2.0;
        let mut a = hi - ratio * (hi - lo);
        let mut b = lo + ratio * (hi - lo);
        let (mut fa, mut fb) = (nll(a), nll(b));
        for _ in 0..GOLDEN_ITER {
            if fa < fb {
                hi = b;
                b = a;
                fb = fa;
                a = hi - ratio * (hi - lo);
                fa = nll(a);
            } else {
                lo = a;
                a = b;
                fa = fb;
                b = lo + ratio * (hi - lo);
                fb = nll(b);
            }
            if (hi - lo).abs() <= 1e-12 * (1.0 + lo.abs()) {
                break;
            }
        }

        Self {
            shape,
            loc: (lo + hi) / 2.0,
            scale,
        }
    }

    /// Get the quantile function at `q`.
    pub fn ppf(&self, q: f64) -> f64 {
        let q = q.clamp(QUANTILE_EPSILON, 1.0 - QUANTILE_EPSILON);
        match Normal::new(0.0, 1.0) {
            Ok(normal) => self.loc + self.scale * (self.shape * normal.inverse_cdf(q)).exp(),
            Err(_) => f64::NAN,
        }
    }

    /// Get the mode of the distribution.
    pub fn mode(&self) -> f64 {
        self.loc + self.scale * (-self.shape * self.shape).exp()
    }

    /// Get the density at `x`.
    pub fn pdf(&self, x: f64) -> f64 {
        let y = x - self.loc;
        if y <= 0.0 {
            return 0.0;
        }
        let z = (y / self.scale).ln() / self.shape;
        (-0.5 * z * z).exp() / (y * self.shape * (2.0 * std::f64::consts::PI).sqrt())
    }
}

// --- ThresholdEstimate -------------------------------------------------------

/// The bound/unbound threshold of one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdEstimate {
    /// Minimum signal of a bound site.
    pub threshold: f64,
    /// Pseudocount candidate, half of the mode of the fitted distribution.
    pub pseudocount: f64,
    /// The log-normal fitted to the background.
    pub distribution: LogNormal,
    /// Number of mixture components selected on the log-signal.
    pub components: usize,
    /// Number of background values used.
    pub samples: usize,
}

/// Get the `p`-th percentile of `values` with linear interpolation.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let (i, frac) = (rank.floor() as usize, rank.fract());
    match sorted.get(i + 1) {
        Some(next) => sorted[i] + frac * (next - sorted[i]),
        None => sorted[i],
    }
}

/// Estimate the bound/unbound threshold of a condition.
///
/// Only positive background values are used. The log-values are modelled
/// with a one- or two-component Gaussian mixture, and the component with
/// the largest mean anchors a log-normal fitted to the values below their
/// 99th percentile. The threshold is the quantile `1 - bound_threshold` of
/// that log-normal, rounded to 5 decimals.
pub fn estimate_threshold(
    condition: &str,
    background: &[f64],
    bound_threshold: f64,
    seed: u64,
) -> Result<ThresholdEstimate, Error> {
    let values = background
        .iter()
        .cloned()
        .filter(|x| *x > ZERO_TOLERANCE)
        .collect::<Vec<_>>();
    debug!(
        "{} of {} background values of {:?} kept for fitting",
        values.len(),
        background.len(),
        condition
    );
    if values.is_empty() {
        return Err(Error::DegenerateBackground {
            condition: condition.to_string(),
        });
    }

    let target = format!("threshold of condition {:?}", condition);
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    if max - min <= ZERO_TOLERANCE {
        return Err(Error::fit(target, "background values are constant"));
    }
    let logs = values.iter().map(|x| [x.ln()]).collect::<Vec<_>>();
    let gmm =
        GaussianMixture::select(&logs, 1..=2, seed).map_err(|e| e.retarget(target.as_str()))?;
    let chosen = gmm
        .components()
        .iter()
        .max_by(|x, y| x.mean[0].total_cmp(&y.mean[0]))
        .ok_or_else(|| Error::fit(target.as_str(), "mixture has no component"))?;
    let shape = chosen.covariance[0][0].sqrt();
    let scale = chosen.mean[0].exp();

    let x_max = percentile(&values, 99.0);
    let mut trimmed = values.iter().cloned().filter(|&x| x < x_max).collect::<Vec<_>>();
    if trimmed.is_empty() {
        trimmed = values.clone();
    }
    let distribution = LogNormal::fit_loc(&trimmed, shape, scale);

    let threshold = round5(distribution.ppf(1.0 - bound_threshold));
    if !threshold.is_finite() {
        return Err(Error::fit(target, "threshold is not finite"));
    }
    let pseudocount = distribution.mode() / 2.0;
    info!(
        "Threshold for condition {:?} estimated at {} ({} components, {} values)",
        condition,
        threshold,
        gmm.components().len(),
        values.len()
    );

    Ok(ThresholdEstimate {
        threshold,
        pseudocount,
        distribution,
        components: gmm.components().len(),
        samples: values.len(),
    })
}

/// Get the pseudocount used for fold-changes.
///
/// A configured pseudocount takes precedence over the mean of the
/// per-condition candidates.
pub fn resolve_pseudocount(
    configured: Option<f64>,
    estimates: &[ThresholdEstimate],
) -> Result<f64, Error> {
    if let Some(pseudocount) = configured {
        return Ok(pseudocount);
    }
    let mean = estimates.iter().map(|e| e.pseudocount).sum::<f64>() / estimates.len() as f64;
    if mean > 0.0 && mean.is_finite() {
        info!("Pseudocount estimated at {:.5}", mean);
        Ok(mean)
    } else {
        Err(Error::fit(
            "pseudocount",
            format!("estimated value {} is not positive", mean),
        ))
    }
}

/// Round a value to 5 decimals.
pub fn round5(x: f64) -> f64 {
    (x * 1e5).round() / 1e5
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::Distribution;

    use super::*;

    fn lognormal(n: usize, mu: f64, sigma: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = rand_distr::LogNormal::new(mu, sigma).unwrap();
        (0..n).map(|_| dist.sample(&mut rng)).collect()
    }

    #[test]
    fn percentiles() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert_eq!(percentile(&values, 25.0), 2.0);
        assert!((percentile(&values, 10.0) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn lognormal_functions() {
        let d = LogNormal {
            shape: 0.5,
            loc: 1.0,
            scale: 2.0,
        };
        assert!((d.ppf(0.5) - 3.0).abs() < 1e-9);
        assert!((d.mode() - (1.0 + 2.0 * (-0.25f64).exp())).abs() < 1e-12);
        assert_eq!(d.pdf(0.5), 0.0);
        assert!(d.pdf(d.mode()) > d.pdf(d.mode() + 0.5));
        assert!(d.ppf(1.0).is_finite());
    }

    #[test]
    fn estimate_median() {
        let values = lognormal(5000, 1.0, 0.4, 1);
        let estimate = estimate_threshold("a", &values, 0.5, 1).unwrap();
        let median = 1f64.exp();
        assert!((estimate.threshold - median).abs() / median < 0.1);
        assert!(estimate.pseudocount > 0.0);
        assert_eq!(estimate.samples, 5000);
    }

    #[test]
    fn monotonic() {
        let values = lognormal(2000, 0.0, 0.8, 3);
        let thresholds = [0.0, 0.1, 0.4, 0.7, 1.0]
            .iter()
            .map(|&b| estimate_threshold("a", &values, b, 1).unwrap().threshold)
            .collect::<Vec<_>>();
        for pair in thresholds.windows(2) {
            assert!(pair[1] <= pair[0], "{:?}", thresholds);
        }
    }

    #[test]
    fn zeros_are_excluded() {
        let mut values = lognormal(1000, 0.0, 0.5, 2);
        let estimate = estimate_threshold("a", &values, 0.4, 1).unwrap();
        values.extend(std::iter::repeat(0.0).take(1000));
        let with_zeros = estimate_threshold("a", &values, 0.4, 1).unwrap();
        assert_eq!(estimate, with_zeros);
    }

    #[test]
    fn degenerate() {
        let values = vec![0.0; 100];
        match estimate_threshold("cond", &values, 0.4, 1) {
            Err(Error::DegenerateBackground { condition }) => assert_eq!(condition, "cond"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn constant() {
        let values = vec![2.0; 1000];
        match estimate_threshold("cond", &values, 0.4, 1) {
            Err(Error::Fit { target, reason }) => {
                assert!(target.contains("\"cond\""), "{}", target);
                assert!(reason.contains("constant"), "{}", reason);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // zeros are filtered before the check
        let mut values = vec![2.0; 1000];
        values.extend(std::iter::repeat(0.0).take(500));
        assert!(matches!(
            estimate_threshold("cond", &values, 0.4, 1),
            Err(Error::Fit { .. })
        ));
    }

    #[test]
    fn pseudocount() {
        let values = lognormal(1000, 0.0, 0.5, 4);
        let estimate = estimate_threshold("a", &values, 0.4, 1).unwrap();
        assert_eq!(resolve_pseudocount(Some(0.3), &[estimate.clone()]).unwrap(), 0.3);
        let mean = resolve_pseudocount(None, &[estimate.clone(), estimate.clone()]).unwrap();
        assert!((mean - estimate.pseudocount).abs() < 1e-12);
    }
}
