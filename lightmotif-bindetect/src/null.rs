//! Differential null model over background log2 fold-changes.
//!
//! For each pair of conditions, the background positions are mapped to a
//! (log2 fold-change, GC content) point and modelled with a 2-D Gaussian
//! mixture. To assess a TF, the mixture is conditioned on the mean GC
//! content of the TF sites, which gives a 1-D mixture over log2
//! fold-changes. That mixture is summarized by its mean and variance, and
//! the mean fold-change of the `n` TF sites is compared to it with a
//! two-sided z-test using a standard error of `sqrt(variance / n)`.

use log::debug;
use log::info;
use statrs::distribution::ContinuousCDF;
use statrs::distribution::Normal;

use crate::err::Error;
use crate::gmm::GaussianMixture;
use crate::threshold::ZERO_TOLERANCE;

/// Get the log2 fold-change between two signal values.
pub fn log2_fold_change(first: f64, second: f64, pseudocount: f64) -> f64 {
    ((first + pseudocount) / (second + pseudocount)).log2()
}

/// The background distribution of fold-changes between two conditions.
#[derive(Debug, Clone)]
pub struct NullModel {
    first: String,
    second: String,
    mixture: GaussianMixture<2>,
    samples: usize,
}

impl NullModel {
    /// Fit the null model of a pair of conditions.
    ///
    /// Positions where both signals are zero are excluded. The number of
    /// components is selected by BIC between 1 and `max_components`.
    #[allow(clippy::too_many_arguments)]
    pub fn fit(
        first: &str,
        second: &str,
        signal1: &[f64],
        signal2: &[f64],
        gc: &[f64],
        pseudocount: f64,
        max_components: usize,
        seed: u64,
    ) -> Result<Self, Error> {
        let points = signal1
            .iter()
            .zip(signal2)
            .zip(gc)
            .filter(|((a, b), _)| a.abs() > ZERO_TOLERANCE || b.abs() > ZERO_TOLERANCE)
            .map(|((&a, &b), &g)| [log2_fold_change(a, b, pseudocount), g])
            .collect::<Vec<_>>();
        if points.is_empty() {
            return Err(Error::IndistinguishableConditions {
                first: first.to_string(),
                second: second.to_string(),
            });
        }
        debug!(
            "Fitting null model {}/{} on {} positions",
            first,
            second,
            points.len()
        );
        let target = format!("null model of {:?} / {:?}", first, second);
        let mixture = GaussianMixture::select(&points, 1..=max_components.max(1), seed)
            .map_err(|e| e.retarget(target))?;
        info!(
            "Null model for {} / {} uses {} components",
            first,
            second,
            mixture.components().len()
        );
        Ok(Self {
            first: first.to_string(),
            second: second.to_string(),
            mixture,
            samples: points.len(),
        })
    }

    /// Get the names of the compared conditions.
    pub fn conditions(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }

    /// Get the underlying mixture.
    pub fn mixture(&self) -> &GaussianMixture<2> {
        &self.mixture
    }

    /// Get the number of background positions the model was fitted on.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Get the mean and variance of background fold-changes at `gc`.
    pub fn conditional(&self, gc: f64) -> (f64, f64) {
        let components = self.mixture.components();
        let log_weights = components
            .iter()
            .map(|c| {
                let var = c.covariance[1][1];
                let d = gc - c.mean[1];
                c.weight.ln() - 0.5 * ((2.0 * std::f64::consts::PI * var).ln() + d * d / var)
            })
            .collect::<Vec<_>>();
        let max = log_weights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut weights = if max.is_finite() {
            log_weights.iter().map(|w| (w - max).exp()).collect::<Vec<_>>()
        } else {
            components.iter().map(|c| c.weight).collect()
        };
        let total = weights.iter().sum::<f64>();
        weights.iter_mut().for_each(|w| *w /= total);

        let mut mean = 0.0;
        let mut second_moment = 0.0;
        for (c, w) in components.iter().zip(weights) {
            let slope = c.covariance[0][1] / c.covariance[1][1];
            let m = c.mean[0] + slope * (gc - c.mean[1]);
            let v = (c.covariance[0][0] - slope * c.covariance[0][1]).max(f64::MIN_POSITIVE);
            mean += w * m;
            second_moment += w * (v + m * m);
        }
        (mean, (second_moment - mean * mean).max(f64::MIN_POSITIVE))
    }

    /// Get the two-sided p-value of a mean fold-change over `n` sites.
    pub fn pvalue(&self, change: f64, gc: f64, n: usize) -> f64 {
        if n == 0 || !change.is_finite() {
            return f64::NAN;
        }
        let (mean, variance) = self.conditional(gc);
        let z = (change - mean) / (variance / n as f64).sqrt();
        match Normal::new(0.0, 1.0) {
            Ok(normal) => (2.0 * normal.cdf(-z.abs())).min(1.0),
            Err(_) => f64::NAN,
        }
    }
}
