//! Gaussian mixture models with full covariance.
//!
//! Mixtures are fitted with expectation-maximization, starting from a
//! k-means clustering seeded with k-means++. The random generator is
//! seeded explicitly, so fitting the same data twice gives the same model.
//! The number of components is chosen with the Bayesian Information
//! Criterion.

use std::f64::consts::PI;
use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::err::Error;

const MAX_ITER: usize = 100;
const KMEANS_ITER: usize = 100;
const TOL: f64 = 1e-3;
const REG_COVAR: f64 = 1e-6;

// --- Cholesky ----------------------------------------------------------------

/// The Cholesky factor of a covariance matrix.
#[derive(Debug, Clone)]
struct Cholesky<const D: usize> {
    lower: [[f64; D]; D],
    log_det: f64,
}

impl<const D: usize> Cholesky<D> {
    fn new(covariance: &[[f64; D]; D]) -> Option<Self> {
        let mut lower = [[0.0; D]; D];
        for j in 0..D {
            let mut s = covariance[j][j];
            for k in 0..j {
                s -= lower[j][k] * lower[j][k];
            }
            if !(s > 0.0 && s.is_finite()) {
                return None;
            }
            lower[j][j] = s.sqrt();
            for i in j + 1..D {
                let mut s = covariance[i][j];
                for k in 0..j {
                    s -= lower[i][k] * lower[j][k];
                }
                lower[i][j] = s / lower[j][j];
            }
        }
        let log_det = 2.0 * (0..D).map(|j| lower[j][j].ln()).sum::<f64>();
        Some(Self { lower, log_det })
    }

    fn log_pdf(&self, mean: &[f64; D], x: &[f64; D]) -> f64 {
        // forward substitution of L y = x - mean
        let mut y = [0.0; D];
        let mut maha = 0.0;
        for i in 0..D {
            let mut s = x[i] - mean[i];
            for k in 0..i {
                s -= self.lower[i][k] * y[k];
            }
            y[i] = s / self.lower[i][i];
            maha += y[i] * y[i];
        }
        -0.5 * (D as f64 * (2.0 * PI).ln() + self.log_det + maha)
    }
}

// --- Component ---------------------------------------------------------------

/// A weighted multivariate normal component.
#[derive(Debug, Clone, PartialEq)]
pub struct Component<const D: usize> {
    pub weight: f64,
    pub mean: [f64; D],
    pub covariance: [[f64; D]; D],
}

// --- GaussianMixture ---------------------------------------------------------

/// A fitted Gaussian mixture over `D`-dimensional points.
#[derive(Debug, Clone)]
pub struct GaussianMixture<const D: usize> {
    components: Vec<Component<D>>,
    factors: Vec<Cholesky<D>>,
    log_likelihood: f64,
    samples: usize,
    converged: bool,
}

impl<const D: usize> GaussianMixture<D> {
    /// Fit a mixture of `k` components to `data`.
    pub fn fit(data: &[[f64; D]], k: usize, seed: u64) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::fit("gaussian mixture", "no samples"));
        }
        if k == 0 || k > data.len() {
            return Err(Error::fit(
                "gaussian mixture",
                format!("cannot fit {} components to {} samples", k, data.len()),
            ));
        }
        if data.iter().flatten().any(|x| !x.is_finite()) {
            return Err(Error::fit("gaussian mixture", "samples are not finite"));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let labels = kmeans(data, k, &mut rng);
        let mut resp = vec![0.0; data.len() * k];
        for (i, &label) in labels.iter().enumerate() {
            resp[i * k + label] = 1.0;
        }

        let mut mixture = Self {
            components: Vec::new(),
            factors: Vec::new(),
            log_likelihood: f64::NEG_INFINITY,
            samples: data.len(),
            converged: false,
        };
        mixture.maximize(data, &resp)?;

        let mut lower_bound = f64::NEG_INFINITY;
        for _ in 0..MAX_ITER {
            let ll = mixture.expect(data, &mut resp);
            mixture.maximize(data, &resp)?;
            let mean_ll = ll / data.len() as f64;
            if (mean_ll - lower_bound).abs() < TOL {
                mixture.converged = true;
                break;
            }
            lower_bound = mean_ll;
        }
        mixture.log_likelihood = data.iter().map(|x| mixture.log_pdf(x)).sum();
        Ok(mixture)
    }

    /// Fit mixtures for every number of components in `ks` and keep the
    /// one with the lowest BIC.
    ///
    /// Component counts larger than the number of samples are skipped.
    pub fn select(data: &[[f64; D]], ks: RangeInclusive<usize>, seed: u64) -> Result<Self, Error> {
        let mut best: Option<Self> = None;
        for k in ks.filter(|&k| k >= 1 && k <= data.len()) {
            let mixture = Self::fit(data, k, seed)?;
            if best.as_ref().map_or(true, |b| mixture.bic() < b.bic()) {
                best = Some(mixture);
            }
        }
        best.ok_or_else(|| {
            Error::fit(
                "gaussian mixture",
                format!("no valid component count for {} samples", data.len()),
            )
        })
    }

    /// E-step: fill responsibilities and return the total log-likelihood.
    fn expect(&self, data: &[[f64; D]], resp: &mut [f64]) -> f64 {
        let k = self.components.len();
        let mut total = 0.0;
        for (x, r) in data.iter().zip(resp.chunks_mut(k)) {
            for (j, (c, f)) in self.components.iter().zip(&self.factors).enumerate() {
                r[j] = c.weight.ln() + f.log_pdf(&c.mean, x);
            }
            let lse = log_sum_exp(r);
            r.iter_mut().for_each(|v| *v = (*v - lse).exp());
            total += lse;
        }
        total
    }

    /// M-step: update the parameters from the responsibilities.
    fn maximize(&mut self, data: &[[f64; D]], resp: &[f64]) -> Result<(), Error> {
        let n = data.len();
        let k = resp.len() / n;
        let mut components = Vec::with_capacity(k);
        let mut factors = Vec::with_capacity(k);
        for j in 0..k {
            let nk = (0..n).map(|i| resp[i * k + j]).sum::<f64>() + 10.0 * f64::EPSILON;
            let mut mean = [0.0; D];
            for (i, x) in data.iter().enumerate() {
                for d in 0..D {
                    mean[d] += resp[i * k + j] * x[d];
                }
            }
            mean.iter_mut().for_each(|m| *m /= nk);
            let mut covariance = [[0.0; D]; D];
            for (i, x) in data.iter().enumerate() {
                let r = resp[i * k + j];
                for a in 0..D {
                    for b in 0..=a {
                        covariance[a][b] += r * (x[a] - mean[a]) * (x[b] - mean[b]);
                    }
                }
            }
            for a in 0..D {
                for b in 0..=a {
                    covariance[a][b] /= nk;
                    covariance[b][a] = covariance[a][b];
                }
                covariance[a][a] += REG_COVAR;
            }
            let factor = Cholesky::new(&covariance).ok_or_else(|| {
                Error::fit("gaussian mixture", "covariance is not positive definite")
            })?;
            components.push(Component {
                weight: nk / n as f64,
                mean,
                covariance,
            });
            factors.push(factor);
        }
        self.components = components;
        self.factors = factors;
        Ok(())
    }

    /// Get the log-density of the mixture at `x`.
    pub fn log_pdf(&self, x: &[f64; D]) -> f64 {
        let terms = self
            .components
            .iter()
            .zip(&self.factors)
            .map(|(c, f)| c.weight.ln() + f.log_pdf(&c.mean, x))
            .collect::<Vec<_>>();
        log_sum_exp(&terms)
    }

    /// Get the components of the mixture.
    pub fn components(&self) -> &[Component<D>] {
        &self.components
    }

    /// Get the total log-likelihood of the fitted samples.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// Check whether EM converged before the iteration limit.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Get the number of free parameters of the model.
    pub fn n_parameters(&self) -> usize {
        let k = self.components.len();
        k * D * (D + 1) / 2 + k * D + k - 1
    }

    /// Get the Bayesian Information Criterion of the model.
    pub fn bic(&self) -> f64 {
        -2.0 * self.log_likelihood + self.n_parameters() as f64 * (self.samples as f64).ln()
    }
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

fn squared_distance<const D: usize>(x: &[f64; D], y: &[f64; D]) -> f64 {
    x.iter().zip(y).map(|(a, b)| (a - b) * (a - b)).sum()
}

/// Cluster `data` into `k` groups, returning the label of every point.
fn kmeans<const D: usize>(data: &[[f64; D]], k: usize, rng: &mut StdRng) -> Vec<usize> {
    // k-means++ seeding
    let mut centers = vec![data[rng.gen_range(0..data.len())]];
    let mut dist = data
        .iter()
        .map(|x| squared_distance(x, &centers[0]))
        .collect::<Vec<_>>();
    while centers.len() < k {
        let total = dist.iter().sum::<f64>();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            dist.iter()
                .position(|d| {
                    acc += d;
                    acc > target
                })
                .unwrap_or(data.len() - 1)
        } else {
            rng.gen_range(0..data.len())
        };
        let center = data[next];
        for (d, x) in dist.iter_mut().zip(data) {
            *d = d.min(squared_distance(x, &center));
        }
        centers.push(center);
    }

    // Lloyd iterations
    let mut labels = vec![usize::MAX; data.len()];
    for _ in 0..KMEANS_ITER {
        let mut changed = false;
        for (label, x) in labels.iter_mut().zip(data) {
            let nearest = (0..k)
                .min_by(|&a, &b| {
                    squared_distance(x, &centers[a]).total_cmp(&squared_distance(x, &centers[b]))
                })
                .unwrap_or(0);
            if *label != nearest {
                *label = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        let mut sums = vec![[0.0; D]; k];
        let mut counts = vec![0usize; k];
        for (&label, x) in labels.iter().zip(data) {
            counts[label] += 1;
            for d in 0..D {
                sums[label][d] += x[d];
            }
        }
        for j in 0..k {
            if counts[j] > 0 {
                for d in 0..D {
                    centers[j][d] = sums[j][d] / counts[j] as f64;
                }
            }
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use rand_distr::Distribution;
    use rand_distr::Normal;

    use super::*;

    fn bimodal(n: usize, seed: u64) -> Vec<[f64; 1]> {
        let mut rng = StdRng::seed_from_u64(seed);
        let low = Normal::new(-3.0, 0.5).unwrap();
        let high = Normal::new(3.0, 0.5).unwrap();
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    [low.sample(&mut rng)]
                } else {
                    [high.sample(&mut rng)]
                }
            })
            .collect()
    }

    #[test]
    fn fit_single() {
        let mut rng = StdRng::seed_from_u64(42);
        let normal = Normal::new(2.0, 1.5).unwrap();
        let data = (0..2000).map(|_| [normal.sample(&mut rng)]).collect::<Vec<_>>();
        let gmm = GaussianMixture::fit(&data, 1, 1).unwrap();
        let c = &gmm.components()[0];
        assert!((c.mean[0] - 2.0).abs() < 0.1);
        assert!((c.covariance[0][0].sqrt() - 1.5).abs() < 0.1);
        assert!((c.weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn select_bimodal() {
        let data = bimodal(2000, 7);
        let gmm = GaussianMixture::select(&data, 1..=4, 1).unwrap();
        assert_eq!(gmm.components().len(), 2);
        let mut means = gmm.components().iter().map(|c| c.mean[0]).collect::<Vec<_>>();
        means.sort_by(f64::total_cmp);
        assert!((means[0] + 3.0).abs() < 0.1);
        assert!((means[1] - 3.0).abs() < 0.1);
    }

    #[test]
    fn deterministic() {
        let data = bimodal(500, 3);
        let a = GaussianMixture::fit(&data, 3, 11).unwrap();
        let b = GaussianMixture::fit(&data, 3, 11).unwrap();
        assert_eq!(a.components(), b.components());
        assert_eq!(a.bic(), b.bic());
    }

    #[test]
    fn two_dimensional() {
        let mut rng = StdRng::seed_from_u64(5);
        let x = Normal::new(0.0, 1.0).unwrap();
        let noise = Normal::new(0.0, 0.1).unwrap();
        let data = (0..1000)
            .map(|_| {
                let v = x.sample(&mut rng);
                [v, 0.5 * v + noise.sample(&mut rng)]
            })
            .collect::<Vec<_>>();
        let gmm = GaussianMixture::fit(&data, 1, 1).unwrap();
        let c = &gmm.components()[0];
        assert!((c.covariance[0][1] - 0.5).abs() < 0.1);
        assert_eq!(c.covariance[0][1], c.covariance[1][0]);
        assert_eq!(gmm.n_parameters(), 5);
        assert!(gmm.log_pdf(&[0.0, 0.0]) > gmm.log_pdf(&[0.0, 2.0]));
    }

    #[test]
    fn invalid() {
        let data: Vec<[f64; 1]> = Vec::new();
        assert!(GaussianMixture::fit(&data, 1, 1).is_err());
        let data = vec![[1.0], [f64::NAN]];
        assert!(GaussianMixture::fit(&data, 1, 1).is_err());
        let data = vec![[1.0]];
        assert!(GaussianMixture::fit(&data, 2, 1).is_err());
        assert!(GaussianMixture::select(&data, 2..=3, 1).is_err());
    }

    #[test]
    fn constant_data() {
        let data = vec![[1.0]; 50];
        let gmm = GaussianMixture::fit(&data, 1, 1).unwrap();
        assert!((gmm.components()[0].mean[0] - 1.0).abs() < 1e-9);
        assert!(gmm.bic().is_finite());
    }
}
