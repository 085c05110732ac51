//! # Reference state builder
//!
//! Turns the fitted curve into the states the optimiser tracks. The reference speed ramps from the
//! measured speed towards the target, changing by at most `max_accel * dt` per step, and the
//! reference position advances along the curve by `v_ref * dt` of arc length per step.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use util::maths::clamp_sym;

use super::{HorizonConfig, PolyCoeffs, StateVector};

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the `horizon_len` reference states for the horizon.
///
/// Reference `k` is the state the vehicle should be in after `k + 1` steps.
pub fn build_reference(
    curve: &PolyCoeffs,
    target_speed_ms: f64,
    measured_speed_ms: f64,
    config: &HorizonConfig,
) -> Vec<StateVector> {
    let dt = config.step_s;
    let max_dv = config.max_accel_mss * dt;

    let mut refs = Vec::with_capacity(config.horizon_len);
    let mut speed_ms = measured_speed_ms;
    let mut x_m = 0.0;

    for _ in 0..config.horizon_len {
        speed_ms += clamp_sym(target_speed_ms - speed_ms, max_dv);

        // Arc length ds along y = f(x) corresponds to dx = ds / sqrt(1 + f'(x)^2)
        let slope = curve.eval_deriv(x_m);
        x_m += speed_ms * dt / (1.0 + slope * slope).sqrt();

        refs.push(StateVector::new(
            x_m,
            curve.eval(x_m),
            curve.eval_deriv(x_m).atan(),
            speed_ms,
        ));
    }

    refs
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
