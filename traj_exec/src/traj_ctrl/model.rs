//! # Kinematic vehicle model
//!
//! Explicit-Euler kinematic bicycle model used to predict the vehicle's state over the horizon:
//!
//! ```text
//! x     += v cos(theta) dt
//! y     += v sin(theta) dt
//! theta += v delta / Lf dt
//! v     += a dt
//! ```

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Matrix4, Matrix4x2, Vector2, Vector4};
use serde::Serialize;
use util::maths::clamp_sym;

use super::HorizonConfig;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State of the vehicle, either measured at the start of a tick or predicted at a horizon step.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct StateVector {
    pub x_m: f64,
    pub y_m: f64,
    pub heading_rad: f64,
    pub speed_ms: f64,
}

/// Control input applied for one horizon step.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct ControlInput {
    pub accel_mss: f64,
    pub steer_rate_rads: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl StateVector {
    pub fn new(x_m: f64, y_m: f64, heading_rad: f64, speed_ms: f64) -> Self {
        Self {
            x_m,
            y_m,
            heading_rad,
            speed_ms,
        }
    }

    /// Vehicle frame state at the start of a tick: at the origin with the measured speed.
    pub fn at_origin(speed_ms: f64) -> Self {
        Self::new(0.0, 0.0, 0.0, speed_ms)
    }

    pub fn to_vector(&self) -> Vector4<f64> {
        Vector4::new(self.x_m, self.y_m, self.heading_rad, self.speed_ms)
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|v| v.is_finite())
    }
}

impl ControlInput {
    pub fn new(accel_mss: f64, steer_rate_rads: f64) -> Self {
        Self {
            accel_mss,
            steer_rate_rads,
        }
    }

    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.accel_mss, self.steer_rate_rads)
    }

    pub fn from_vector(v: &Vector2<f64>) -> Self {
        Self::new(v[0], v[1])
    }

    /// Clamp the input into the actuator limits.
    pub fn clamped(&self, config: &HorizonConfig) -> Self {
        Self::new(
            clamp_sym(self.accel_mss, config.max_accel_mss),
            clamp_sym(self.steer_rate_rads, config.max_steer_rate_rads),
        )
    }

    pub fn is_finite(&self) -> bool {
        self.accel_mss.is_finite() && self.steer_rate_rads.is_finite()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Advance the state by one horizon step.
pub fn step(state: &StateVector, control: &ControlInput, config: &HorizonConfig) -> StateVector {
    let dt = config.step_s;
    let v = state.speed_ms;

    StateVector {
        x_m: state.x_m + v * state.heading_rad.cos() * dt,
        y_m: state.y_m + v * state.heading_rad.sin() * dt,
        heading_rad: state.heading_rad + v * control.steer_rate_rads / config.wheelbase_m * dt,
        speed_ms: v + control.accel_mss * dt,
    }
}

/// Predict the state after each control in the sequence.
///
/// The returned sequence has the same length as `controls`, the initial state is not included.
pub fn predict(
    initial: &StateVector,
    controls: &[ControlInput],
    config: &HorizonConfig,
) -> Vec<StateVector> {
    let mut states = Vec::with_capacity(controls.len());
    let mut state = *initial;

    for control in controls {
        state = step(&state, control, config);
        states.push(state);
    }

    states
}

/// Jacobians of `step` with respect to the state (A) and the control (B).
pub fn step_jacobians(
    state: &StateVector,
    control: &ControlInput,
    config: &HorizonConfig,
) -> (Matrix4<f64>, Matrix4x2<f64>) {
    let dt = config.step_s;
    let lf = config.wheelbase_m;
    let v = state.speed_ms;
    let (sin, cos) = state.heading_rad.sin_cos();

    #[rustfmt::skip]
    let a = Matrix4::new(
        1.0, 0.0, -v * sin * dt, cos * dt,
        0.0, 1.0,  v * cos * dt, sin * dt,
        0.0, 0.0,  1.0,          control.steer_rate_rads / lf * dt,
        0.0, 0.0,  0.0,          1.0,
    );

    #[rustfmt::skip]
    let b = Matrix4x2::new(
        0.0, 0.0,
        0.0, 0.0,
        0.0, v / lf * dt,
        dt,  0.0,
    );

    (a, b)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
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

    #[test]
    fn test_straight_line_motion() {
        let initial = StateVector::at_origin(1.0);
        let controls = vec![ControlInput::default(); 10];

        let states = predict(&initial, &controls, &config());

        assert_eq!(states.len(), 10);
        assert_relative_eq!(states[9].x_m, 1.0, epsilon = 1e-12);
        assert_relative_eq!(states[9].y_m, 0.0);
        assert_relative_eq!(states[9].heading_rad, 0.0);
        assert_relative_eq!(states[9].speed_ms, 1.0);
    }

    #[test]
    fn test_single_step() {
        let state = StateVector::new(1.0, 2.0, std::f64::consts::FRAC_PI_2, 2.0);
        let next = step(&state, &ControlInput::new(0.5, 0.25), &config());

        assert_relative_eq!(next.x_m, 1.0, epsilon = 1e-12);
        assert_relative_eq!(next.y_m, 2.2, epsilon = 1e-12);
        assert_relative_eq!(
            next.heading_rad,
            std::f64::consts::FRAC_PI_2 + 0.1,
            epsilon = 1e-12
        );
        assert_relative_eq!(next.speed_ms, 2.05, epsilon = 1e-12);
    }

    #[test]
    fn test_prediction_is_deterministic() {
        let initial = StateVector::new(0.1, -0.2, 0.3, 0.4);
        let controls: Vec<ControlInput> = (0..10)
            .map(|i| ControlInput::new(0.1 * i as f64, -0.05 * i as f64))
            .collect();

        assert_eq!(
            predict(&initial, &controls, &config()),
            predict(&initial, &controls, &config())
        );
    }

    #[test]
    fn test_clamped() {
        let c = ControlInput::new(3.0, -2.0).clamped(&config());

        assert_eq!(c, ControlInput::new(1.0, -0.5));
    }

    #[test]
    fn test_jacobians_match_finite_differences() {
        let state = StateVector::new(0.3, -0.1, 0.7, 0.8);
        let control = ControlInput::new(0.2, -0.3);
        let cfg = config();
        let (a, b) = step_jacobians(&state, &control, &cfg);
        let h = 1e-6;

        for j in 0..4 {
            let mut plus = state.to_vector();
            let mut minus = state.to_vector();
            plus[j] += h;
            minus[j] -= h;
            let to_state = |v: Vector4<f64>| StateVector::new(v[0], v[1], v[2], v[3]);
            let diff = (step(&to_state(plus), &control, &cfg).to_vector()
                - step(&to_state(minus), &control, &cfg).to_vector())
                / (2.0 * h);

            for i in 0..4 {
                assert_relative_eq!(a[(i, j)], diff[i], epsilon = 1e-6);
            }
        }

        for j in 0..2 {
            let mut plus = control.to_vector();
            let mut minus = control.to_vector();
            plus[j] += h;
            minus[j] -= h;
            let diff = (step(&state, &ControlInput::from_vector(&plus), &cfg).to_vector()
                - step(&state, &ControlInput::from_vector(&minus), &cfg).to_vector())
                / (2.0 * h);

            for i in 0..4 {
                assert_relative_eq!(b[(i, j)], diff[i], epsilon = 1e-6);
            }
        }
    }
}
