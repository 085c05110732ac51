//! # Horizon optimiser
//!
//! Finds the control sequence minimising the tracking cost over the horizon using projected
//! gradient descent with an Armijo backtracking line search. Projection is a clamp of each input
//! into the actuator limits.
//!
//! The cost is the sum over the horizon of:
//!
//! - squared position error to the reference,
//! - squared (wrapped) heading error to the reference,
//! - squared speed error to the reference,
//! - squared control magnitude,
//! - squared change in control from the previous step (the first step is compared against the
//!   last applied control).
//!
//! The gradient is computed exactly by propagating adjoints backwards through the kinematic model.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace};
use nalgebra::{Vector2, Vector4};
use serde::Serialize;
use util::maths::wrap_to_pi;

use super::{
    model::{predict, step_jacobians},
    ControlInput, CostWeights, HorizonConfig, OptimiserParams, StateVector,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct HorizonOptimiser {
    config: HorizonConfig,
    weights: CostWeights,
    params: OptimiserParams,
}

/// Fixed inputs to a single solve.
#[derive(Debug, Clone, Copy)]
pub struct Problem<'a> {
    /// State at the start of the horizon
    pub initial: StateVector,

    /// Reference state for the end of each step
    pub reference: &'a [StateVector],

    /// The control applied before the horizon starts
    pub last_applied: ControlInput,
}

/// The result of a successful solve.
#[derive(Debug, Clone, Serialize)]
pub struct Solution {
    /// Optimised controls, all within the actuator limits
    pub controls: Vec<ControlInput>,

    /// Predicted state after each control
    pub predicted: Vec<StateVector>,

    /// Cost of the optimised controls
    pub cost: f64,

    /// Number of descent iterations performed
    pub iterations: usize,

    /// True if the solve stopped on the cost tolerance rather than the iteration limit
    pub converged: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OptError {
    #[error("Expected {expected} {what} but found {found}")]
    HorizonMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Optimisation diverged at iteration {iteration}: {reason}")]
    Divergence {
        iteration: usize,
        reason: &'static str,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HorizonOptimiser {
    pub fn new(config: HorizonConfig, weights: CostWeights, params: OptimiserParams) -> Self {
        Self {
            config,
            weights,
            params,
        }
    }

    pub fn config(&self) -> &HorizonConfig {
        &self.config
    }

    /// Optimise the controls for the given problem, starting from `seed`.
    ///
    /// The seed is clamped into the actuator limits before the descent starts.
    pub fn solve(&self, problem: &Problem, seed: &[ControlInput]) -> Result<Solution, OptError> {
        let n = self.config.horizon_len;
        check_len("reference states", n, problem.reference.len())?;
        check_len("seed controls", n, seed.len())?;

        let mut controls: Vec<ControlInput> =
            seed.iter().map(|u| u.clamped(&self.config)).collect();
        let mut cost = self.cost(problem, &controls);

        if !cost.is_finite() {
            return Err(OptError::Divergence {
                iteration: 0,
                reason: "cost of the seed is not finite",
            });
        }

        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.params.max_iters {
            let (_, grad) = self.gradient(problem, &controls);

            if grad.iter().any(|g| !g.iter().all(|v| v.is_finite())) {
                return Err(OptError::Divergence {
                    iteration: iter,
                    reason: "gradient is not finite",
                });
            }

            // Distance moved by a unit projected step, zero at a constrained minimum
            let stationarity = controls
                .iter()
                .zip(grad.iter())
                .map(|(u, g)| (u.to_vector() - self.project(&(u.to_vector() - g))).norm_squared())
                .sum::<f64>()
                .sqrt();

            if stationarity <= self.params.stationary_tol {
                converged = true;
                break;
            }

            iterations = iter + 1;

            match self.line_search(problem, &controls, &grad, cost) {
                Some((trial, trial_cost)) => {
                    let improvement = (cost - trial_cost) / cost.abs().max(std::f64::MIN_POSITIVE);

                    trace!(
                        "iter {}: cost {:.6e} -> {:.6e} (stationarity {:.3e})",
                        iter,
                        cost,
                        trial_cost,
                        stationarity
                    );

                    controls = trial;
                    cost = trial_cost;

                    if improvement < self.params.rel_cost_tol {
                        converged = true;
                        break;
                    }
                }
                None if iter == 0 => {
                    return Err(OptError::Divergence {
                        iteration: 0,
                        reason: "line search could not reduce a non-stationary cost",
                    })
                }
                // No further decrease can be found, the current controls are the best we have
                None => break,
            }
        }

        let predicted = predict(&problem.initial, &controls, &self.config);

        if !cost.is_finite()
            || !controls.iter().all(|u| u.is_finite())
            || !predicted.iter().all(|s| s.is_finite())
        {
            return Err(OptError::Divergence {
                iteration: iterations,
                reason: "solution is not finite",
            });
        }

        debug!(
            "Optimiser finished after {} iterations with cost {:.6e} (converged: {})",
            iterations, cost, converged
        );

        Ok(Solution {
            controls,
            predicted,
            cost,
            iterations,
            converged,
        })
    }

    /// Total cost of the given controls.
    pub fn cost(&self, problem: &Problem, controls: &[ControlInput]) -> f64 {
        let states = predict(&problem.initial, controls, &self.config);
        self.cost_of_rollout(problem, controls, &states)
    }

    /// Cost of the given controls and its gradient with respect to each control.
    pub fn gradient(
        &self,
        problem: &Problem,
        controls: &[ControlInput],
    ) -> (f64, Vec<Vector2<f64>>) {
        let w = &self.weights;
        let states = predict(&problem.initial, controls, &self.config);
        let cost = self.cost_of_rollout(problem, controls, &states);

        let n = controls.len().min(problem.reference.len());
        let mut grad = vec![Vector2::zeros(); controls.len()];

        // Adjoint of the state after step k, accumulated backwards from the end of the horizon
        let mut lambda = Vector4::zeros();

        for k in (0..n).rev() {
            let s = &states[k];
            let r = &problem.reference[k];
            let u = &controls[k];

            lambda += Vector4::new(
                2.0 * w.position * (s.x_m - r.x_m),
                2.0 * w.position * (s.y_m - r.y_m),
                2.0 * w.heading * wrap_to_pi(s.heading_rad - r.heading_rad),
                2.0 * w.speed * (s.speed_ms - r.speed_ms),
            );

            let prev_u = if k == 0 {
                problem.last_applied
            } else {
                controls[k - 1]
            };

            let mut g = Vector2::new(
                2.0 * w.accel * u.accel_mss
                    + 2.0 * w.accel_change * (u.accel_mss - prev_u.accel_mss),
                2.0 * w.steer_rate * u.steer_rate_rads
                    + 2.0 * w.steer_rate_change * (u.steer_rate_rads - prev_u.steer_rate_rads),
            );

            if k + 1 < n {
                let next_u = &controls[k + 1];
                g -= Vector2::new(
                    2.0 * w.accel_change * (next_u.accel_mss - u.accel_mss),
                    2.0 * w.steer_rate_change * (next_u.steer_rate_rads - u.steer_rate_rads),
                );
            }

            let prev_state = if k == 0 {
                problem.initial
            } else {
                states[k - 1]
            };
            let (a, b) = step_jacobians(&prev_state, u, &self.config);

            grad[k] = g + b.transpose() * lambda;
            lambda = a.transpose() * lambda;
        }

        (cost, grad)
    }

    fn cost_of_rollout(
        &self,
        problem: &Problem,
        controls: &[ControlInput],
        states: &[StateVector],
    ) -> f64 {
        let w = &self.weights;
        let mut prev_u = problem.last_applied;
        let mut cost = 0.0;

        for ((s, r), u) in states.iter().zip(problem.reference).zip(controls) {
            cost += w.position * ((s.x_m - r.x_m).powi(2) + (s.y_m - r.y_m).powi(2))
                + w.heading * wrap_to_pi(s.heading_rad - r.heading_rad).powi(2)
                + w.speed * (s.speed_ms - r.speed_ms).powi(2)
                + w.accel * u.accel_mss.powi(2)
                + w.steer_rate * u.steer_rate_rads.powi(2)
                + w.accel_change * (u.accel_mss - prev_u.accel_mss).powi(2)
                + w.steer_rate_change * (u.steer_rate_rads - prev_u.steer_rate_rads).powi(2);

            prev_u = *u;
        }

        cost
    }

    /// Backtracking search along the projected gradient. Returns the accepted controls and their
    /// cost, or `None` if no step satisfied the Armijo condition.
    fn line_search(
        &self,
        problem: &Problem,
        controls: &[ControlInput],
        grad: &[Vector2<f64>],
        cost: f64,
    ) -> Option<(Vec<ControlInput>, f64)> {
        let mut step = self.params.init_step;

        for _ in 0..=self.params.max_backtracks {
            let trial: Vec<ControlInput> = controls
                .iter()
                .zip(grad.iter())
                .map(|(u, g)| ControlInput::from_vector(&self.project(&(u.to_vector() - g * step))))
                .collect();

            let decrease: f64 = controls
                .iter()
                .zip(trial.iter())
                .zip(grad.iter())
                .map(|((u, t), g)| g.dot(&(u.to_vector() - t.to_vector())))
                .sum();

            let trial_cost = self.cost(problem, &trial);

            if trial_cost.is_finite() && trial_cost <= cost - self.params.armijo_const * decrease {
                return Some((trial, trial_cost));
            }

            step *= self.params.backtrack_factor;
        }

        None
    }

    fn project(&self, u: &Vector2<f64>) -> Vector2<f64> {
        ControlInput::from_vector(u).clamped(&self.config).to_vector()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the seed for the next solve from the previous solution: shift everything one step
/// earlier and repeat the final control. The result always has `horizon_len` elements.
pub fn shift_warm_start(prev: &[ControlInput], horizon_len: usize) -> Vec<ControlInput> {
    let last = prev.last().cloned().unwrap_or_default();

    let mut seed: Vec<ControlInput> = prev.iter().skip(1).cloned().collect();
    seed.resize(horizon_len, last);

    seed
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), OptError> {
    if expected == found {
        Ok(())
    } else {
        Err(OptError::HorizonMismatch {
            what,
            expected,
            found,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj_ctrl::{build_reference, PolyCoeffs};
    use approx::assert_relative_eq;

    fn config() -> HorizonConfig {
        HorizonConfig {
            horizon_len: 10,
            step_s: 0.1,
            wheelbase_m: 0.5,
            max_speed_ms: 1.0,
            max_accel_mss: 1.0,
            max_steer_rate_rads: 0.5,
        }
    }

    fn weights() -> CostWeights {
        CostWeights {
            position: 1.0,
            heading: 0.5,
            speed: 1.0,
            accel: 0.05,
            steer_rate: 0.05,
            accel_change: 0.5,
            steer_rate_change: 0.5,
        }
    }

    fn opt_params() -> OptimiserParams {
        OptimiserParams {
            max_iters: 100,
            rel_cost_tol: 1e-9,
            init_step: 1.0,
            backtrack_factor: 0.5,
            armijo_const: 1e-4,
            max_backtracks: 30,
            stationary_tol: 1e-6,
        }
    }

    fn optimiser() -> HorizonOptimiser {
        HorizonOptimiser::new(config(), weights(), opt_params())
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let opt = optimiser();
        let curve = PolyCoeffs::new(vec![0.05, 0.1, 0.2, -0.05]);
        let reference = build_reference(&curve, 0.8, 0.5, &config());
        let problem = Problem {
            initial: StateVector::new(0.0, 0.0, 0.0, 0.5),
            reference: &reference,
            last_applied: ControlInput::new(0.1, 0.05),
        };
        let controls: Vec<ControlInput> = (0..10)
            .map(|i| ControlInput::new(0.3 - 0.05 * i as f64, 0.2 * (i as f64 * 0.7).sin()))
            .collect();

        let (_, grad) = opt.gradient(&problem, &controls);
        let h = 1e-6;

        for k in 0..controls.len() {
            for j in 0..2 {
                let mut plus = controls.clone();
                let mut minus = controls.clone();
                let mut up = plus[k].to_vector();
                let mut down = minus[k].to_vector();
                up[j] += h;
                down[j] -= h;
                plus[k] = ControlInput::from_vector(&up);
                minus[k] = ControlInput::from_vector(&down);

                let fd = (opt.cost(&problem, &plus) - opt.cost(&problem, &minus)) / (2.0 * h);

                assert_relative_eq!(grad[k][j], fd, epsilon = 1e-6, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn test_straight_line_from_standstill() {
        let opt = optimiser();
        let line = PolyCoeffs::new(vec![0.0, 0.0, 0.0, 0.0]);
        let reference = build_reference(&line, 1.0, 0.0, &config());
        let problem = Problem {
            initial: StateVector::at_origin(0.0),
            reference: &reference,
            last_applied: ControlInput::default(),
        };
        let seed = vec![ControlInput::default(); 10];

        let solution = opt.solve(&problem, &seed).unwrap();

        assert_eq!(solution.controls.len(), 10);
        assert_eq!(solution.predicted.len(), 10);
        assert!(solution.controls[0].accel_mss > 0.0);
        for u in &solution.controls {
            assert!(u.steer_rate_rads.abs() < 1e-9);
        }
        assert!(solution.cost < opt.cost(&problem, &seed));
    }

    #[test]
    fn test_steers_towards_offset_path() {
        let opt = optimiser();
        // Path runs parallel to the vehicle, 0.5 m to its left
        let offset = PolyCoeffs::new(vec![0.5, 0.0]);
        let reference = build_reference(&offset, 0.5, 0.5, &config());
        let problem = Problem {
            initial: StateVector::at_origin(0.5),
            reference: &reference,
            last_applied: ControlInput::default(),
        };

        let solution = opt.solve(&problem, &vec![ControlInput::default(); 10]).unwrap();

        assert!(solution.controls[0].steer_rate_rads > 0.0);
    }

    #[test]
    fn test_controls_within_limits() {
        let opt = optimiser();
        let cfg = config();
        // A very tight curve to saturate the steering
        let curve = PolyCoeffs::new(vec![0.0, 0.0, 3.0]);
        let reference = build_reference(&curve, 1.0, 1.0, &cfg);
        let problem = Problem {
            initial: StateVector::at_origin(1.0),
            reference: &reference,
            last_applied: ControlInput::default(),
        };
        let seed = vec![ControlInput::new(5.0, -5.0); 10];

        let solution = opt.solve(&problem, &seed).unwrap();

        for u in &solution.controls {
            assert!(u.accel_mss.abs() <= cfg.max_accel_mss);
            assert!(u.steer_rate_rads.abs() <= cfg.max_steer_rate_rads);
        }
    }

    #[test]
    fn test_non_finite_state_diverges() {
        let opt = optimiser();
        let line = PolyCoeffs::new(vec![0.0, 0.0]);
        let reference = build_reference(&line, 1.0, 0.0, &config());
        let problem = Problem {
            initial: StateVector::at_origin(std::f64::NAN),
            reference: &reference,
            last_applied: ControlInput::default(),
        };

        assert!(matches!(
            opt.solve(&problem, &vec![ControlInput::default(); 10]),
            Err(OptError::Divergence { iteration: 0, .. })
        ));
    }

    #[test]
    fn test_horizon_mismatch() {
        let opt = optimiser();
        let reference = vec![StateVector::default(); 10];
        let problem = Problem {
            initial: StateVector::default(),
            reference: &reference,
            last_applied: ControlInput::default(),
        };

        assert!(matches!(
            opt.solve(&problem, &vec![ControlInput::default(); 9]),
            Err(OptError::HorizonMismatch {
                expected: 10,
                found: 9,
                ..
            })
        ));
    }

    #[test]
    fn test_shift_warm_start() {
        let prev: Vec<ControlInput> = (0..5).map(|i| ControlInput::new(i as f64, 0.0)).collect();

        let seed = shift_warm_start(&prev, 5);
        let accels: Vec<f64> = seed.iter().map(|u| u.accel_mss).collect();
        assert_eq!(accels, vec![1.0, 2.0, 3.0, 4.0, 4.0]);

        assert_eq!(shift_warm_start(&[], 3), vec![ControlInput::default(); 3]);
    }
}
