use log::debug;
use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::control::Control;
use crate::error::{IntegrationFailure, Interrupted};

/// Scaled RMS residual at which a linear solve is accepted, as a fraction of
/// the Newton convergence threshold.
const LINEAR_TOLERANCE: f64 = 0.05 * NEWTON_TOLERANCE;
const NEWTON_TOLERANCE: f64 = 0.1;




/**
 * Step size bounds and tolerances handed to the stiff integrator once, from
 * the run configuration.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverSettings {
    pub init_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub reltol: f64,
    pub abstol: f64,
    pub max_newton_iterations: usize,
    /// Consecutive failed attempts at one step before giving up
    pub max_failures: usize,
    /// Largest Krylov subspace built for one linear solve
    pub max_krylov: usize,
}

impl SolverSettings {
    pub fn from_control(control: &Control) -> Self {
        Self {
            init_step: control.init_step,
            min_step: control.min_step,
            max_step: control.max_step,
            reltol: control.reltol,
            abstol: control.abstol,
            max_newton_iterations: 6,
            max_failures: 12,
            max_krylov: 30,
        }
    }
}




/**
 * Running totals kept by an integrator.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SolverStats {
    pub steps: u64,
    pub rejected: u64,
    pub newton_failures: u64,
    pub evaluations: u64,
    pub linear_iterations: u64,
}




/**
 * The contract between the time-stepping controller and a stiff ODE solver.
 * The solver is lent the state for one call; `rhs(t, y, dydt)` writes the
 * time derivative of `y`. On success the state holds the solution at the
 * returned time, which must not exceed `tout`. On failure the state holds
 * the last accepted solution, and the error carries its time.
 */
pub trait Integrator {
    fn integrate<F>(&mut self, t: f64, tout: f64, y: &mut [f64], rhs: F) -> Result<f64, Interrupted>
    where
        F: FnMut(f64, &[f64], &mut [f64]);

    fn stats(&self) -> SolverStats;
}




/**
 * Adaptive backward Euler. Each step is predicted with forward Euler and
 * corrected by an inexact Newton iteration. The Newton systems are solved by
 * GMRES in the error-weighted norm, with Jacobian-vector products taken as
 * finite differences of the right-hand side, so no matrix is ever formed.
 * Half the difference between predictor and corrector estimates the local
 * error, which is kept below one in a weighted RMS norm.
 */
pub struct ImplicitEuler {
    settings: SolverSettings,
    step: f64,
    stats: SolverStats,
}

enum Attempt {
    Converged(Vec<f64>),
    Diverged,
    Stalled,
}




// ============================================================================
impl ImplicitEuler {

    pub fn new(settings: SolverSettings) -> Self {
        Self {
            step: settings.init_step,
            settings,
            stats: SolverStats::default(),
        }
    }

    /// The step size that will be tried next.
    pub fn step(&self) -> f64 {
        self.step
    }

    fn weights(&self, y: &[f64]) -> Vec<f64> {
        y.iter()
            .map(|y| 1.0 / (self.settings.reltol * y.abs() + self.settings.abstol))
            .collect()
    }

    /**
     * Solve (I - h J) delta = residual, where J is the Jacobian at z and fz
     * the derivative there. Works on weighted vectors u = w delta; each
     * product perturbs z by a unit of the weighted RMS norm.
     */
    fn linear_solve<F>(&mut self, time: f64, h: f64, z: &[f64], fz: &[f64], residual: &[f64], weights: &[f64], rhs: &mut F) -> Option<Vec<f64>>
    where
        F: FnMut(f64, &[f64], &mut [f64]),
    {
        let n = z.len();
        let root_n = (n as f64).sqrt();
        let scaled: Vec<f64> = residual.iter().zip(weights).map(|(r, w)| r * w).collect();
        let mut perturbed = vec![0.0; n];
        let mut fp = vec![0.0; n];
        let mut evaluations = 0;

        let product = |u: &[f64], out: &mut [f64]| {
            let size = norm(u) / root_n;

            if size == 0.0 {
                out.iter_mut().for_each(|x| *x = 0.0);
                return;
            }
            let sigma = 1.0 / size;

            for i in 0..n {
                perturbed[i] = z[i] + sigma * u[i] / weights[i];
            }
            rhs(time, &perturbed, &mut fp);
            evaluations += 1;

            for i in 0..n {
                out[i] = u[i] - h * weights[i] * (fp[i] - fz[i]) / sigma;
            }
        };
        let solved = gmres(&scaled, self.settings.max_krylov, LINEAR_TOLERANCE * root_n, product);

        self.stats.evaluations += evaluations;

        let (u, iterations) = solved?;
        self.stats.linear_iterations += iterations as u64;
        Some(u.iter().zip(weights).map(|(u, w)| u / w).collect())
    }

    /**
     * Solve z = y + h f(t + h, z) starting from the predictor.
     */
    fn correct<F>(&mut self, t: f64, h: f64, y: &[f64], predictor: &[f64], weights: &[f64], rhs: &mut F) -> Attempt
    where
        F: FnMut(f64, &[f64], &mut [f64]),
    {
        let n = y.len();
        let time = t + h;
        let mut z = predictor.to_vec();
        let mut fz = vec![0.0; n];
        let mut previous = f64::INFINITY;

        for _ in 0..self.settings.max_newton_iterations {
            rhs(time, &z, &mut fz);
            self.stats.evaluations += 1;

            let residual: Vec<f64> = (0..n).map(|i| y[i] + h * fz[i] - z[i]).collect();

            let delta = match self.linear_solve(time, h, &z, &fz, &residual, weights, rhs) {
                Some(delta) => delta,
                None => return Attempt::Stalled,
            };
            for i in 0..n {
                z[i] += delta[i];
            }

            let size = wrms(delta.iter().cloned(), weights);

            if !size.is_finite() || size > 2.0 * previous {
                return Attempt::Diverged;
            }
            if size <= NEWTON_TOLERANCE {
                return Attempt::Converged(z);
            }
            previous = size;
        }
        Attempt::Diverged
    }
}




// ============================================================================
impl Integrator for ImplicitEuler {

    fn integrate<F>(&mut self, t: f64, tout: f64, y: &mut [f64], mut rhs: F) -> Result<f64, Interrupted>
    where
        F: FnMut(f64, &[f64], &mut [f64]),
    {
        let stop = |reached, failure| Err(Interrupted { reached, failure });

        if y.iter().any(|y| !y.is_finite()) {
            return stop(t, IntegrationFailure::NonFiniteState);
        }
        let n = y.len();
        let settings = self.settings;
        let mut t = t;
        let mut h = self.step.min(settings.max_step);
        let mut f0 = vec![0.0; n];
        let mut failures = 0;

        rhs(t, y, &mut f0);
        self.stats.evaluations += 1;

        while t < tout {
            let remaining = tout - t;
            let untruncated = h;
            let last = h >= remaining * (1.0 - 1e-12);

            if last {
                h = remaining
            }
            if h < settings.min_step && !last {
                return stop(t, IntegrationFailure::StepTooSmall { step: h, min_step: settings.min_step });
            }
            if f0.iter().any(|f| !f.is_finite()) {
                return stop(t, IntegrationFailure::NonFiniteState);
            }

            let weights = self.weights(y);
            let predictor: Vec<f64> = y.iter().zip(&f0).map(|(y, f)| y + h * f).collect();

            let corrected = match self.correct(t, h, y, &predictor, &weights, &mut rhs) {
                Attempt::Converged(z) => z,
                failed => {
                    failures += 1;
                    self.stats.newton_failures += 1;
                    debug!("newton iteration failed at t={} with h={:e}", t, h);

                    if failures >= settings.max_failures {
                        return stop(t, match failed {
                            Attempt::Stalled => IntegrationFailure::LinearSolveFailed,
                            _ => IntegrationFailure::NewtonDiverged { attempts: failures },
                        });
                    }
                    h *= 0.25;
                    continue;
                }
            };

            let error = 0.5 * wrms(corrected.iter().zip(&predictor).map(|(z, p)| z - p), &weights);

            if !error.is_finite() || corrected.iter().any(|z| !z.is_finite()) {
                return stop(t, IntegrationFailure::NonFiniteState);
            }
            if error > 1.0 {
                self.stats.rejected += 1;
                failures += 1;
                debug!("step rejected at t={} with h={:e} (error {:.3})", t, h, error);

                if failures >= settings.max_failures && h <= settings.min_step {
                    return stop(t, IntegrationFailure::StepTooSmall { step: h, min_step: settings.min_step });
                }
                h *= (0.9 / error.sqrt()).max(0.2);
                continue;
            }

            y.copy_from_slice(&corrected);
            t = if last { tout } else { t + h };
            failures = 0;
            self.stats.steps += 1;

            rhs(t, y, &mut f0);
            self.stats.evaluations += 1;

            h = (h * (0.9 / error.max(1e-10).sqrt()).min(5.0)).min(settings.max_step);

            if last {
                h = h.max(untruncated)
            }
            self.step = h;
        }
        Ok(t)
    }

    fn stats(&self) -> SolverStats {
        self.stats
    }
}




// ============================================================================
/**
 * Unrestarted GMRES from a zero initial guess. Builds an orthonormal Krylov
 * basis by modified Gram-Schmidt, reduces the Hessenberg matrix with Givens
 * rotations, and stops once the residual 2-norm falls to `tolerance` or the
 * basis reaches `max_dim` vectors. Returns the solution and the number of
 * products taken, or None on breakdown or when the residual did not shrink.
 */
fn gmres<A>(b: &[f64], max_dim: usize, tolerance: f64, mut apply: A) -> Option<(Vec<f64>, usize)>
where
    A: FnMut(&[f64], &mut [f64]),
{
    let n = b.len();
    let beta = norm(b);

    if !beta.is_finite() {
        return None;
    }
    if beta <= tolerance {
        return Some((vec![0.0; n], 0));
    }

    let m = max_dim.min(n).max(1);
    let mut basis: Vec<Vec<f64>> = vec![b.iter().map(|x| x / beta).collect()];
    let mut hessenberg = DMatrix::<f64>::zeros(m + 1, m);
    let mut rotations: Vec<(f64, f64)> = Vec::with_capacity(m);
    let mut g = DVector::<f64>::zeros(m + 1);
    let mut w = vec![0.0; n];
    let mut k = 0;
    g[0] = beta;

    while k < m {
        apply(&basis[k], &mut w);

        for (j, v) in basis.iter().enumerate() {
            let hjk = dot(&w, v);
            hessenberg[(j, k)] = hjk;
            w.iter_mut().zip(v).for_each(|(w, v)| *w -= hjk * v);
        }
        let next = norm(&w);
        hessenberg[(k + 1, k)] = next;

        for (j, &(c, s)) in rotations.iter().enumerate() {
            let (p, q) = (hessenberg[(j, k)], hessenberg[(j + 1, k)]);
            hessenberg[(j, k)] = c * p + s * q;
            hessenberg[(j + 1, k)] = c * q - s * p;
        }
        let (p, q) = (hessenberg[(k, k)], hessenberg[(k + 1, k)]);
        let r = p.hypot(q);

        if !(r > 0.0 && r.is_finite()) {
            return None;
        }
        let (c, s) = (p / r, q / r);
        rotations.push((c, s));
        hessenberg[(k, k)] = r;
        hessenberg[(k + 1, k)] = 0.0;
        g[k + 1] = -s * g[k];
        g[k] *= c;
        k += 1;

        if g[k].abs() <= tolerance || next <= 1e-14 * beta {
            break;
        }
        if k < m {
            basis.push(w.iter().map(|x| x / next).collect());
        }
    }

    if !(g[k].abs() < beta) {
        return None;
    }
    let upper = hessenberg.view((0, 0), (k, k)).into_owned();
    let coefficients = upper.solve_upper_triangular(&g.rows(0, k).into_owned())?;
    let mut x = vec![0.0; n];

    for (c, v) in coefficients.iter().zip(&basis) {
        x.iter_mut().zip(v).for_each(|(x, v)| *x += c * v);
    }
    Some((x, k))
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

fn wrms(values: impl Iterator<Item = f64>, weights: &[f64]) -> f64 {
    let n = weights.len().max(1) as f64;
    let sum: f64 = values.zip(weights).map(|(v, w)| (v * w) * (v * w)).sum();
    (sum / n).sqrt()
}
