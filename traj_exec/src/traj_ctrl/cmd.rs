//! # Command post-processing
//!
//! Converts the first optimised control into the velocity command sent to the vehicle. The
//! acceleration is integrated onto the previous command's speed over the time elapsed since the
//! previous tick, and the angular rate follows from the kinematic model.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use ctrl_if::Twist;
use log::warn;
use util::maths::clamp_sym;

use super::{ControlInput, HorizonConfig};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CmdPostProcessor {
    config: HorizonConfig,
    max_tick_gap_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CmdPostProcessor {
    pub fn new(config: HorizonConfig, max_tick_gap_s: f64) -> Self {
        Self {
            config,
            max_tick_gap_s,
        }
    }

    /// The time step to integrate over for the given time since the last tick.
    ///
    /// Gaps longer than the maximum tick gap are a stall and give zero, so the command speed
    /// doesn't jump. Negative and non-finite gaps also give zero.
    pub fn effective_dt(&self, elapsed_s: f64) -> f64 {
        if !elapsed_s.is_finite() || elapsed_s < 0.0 {
            return 0.0;
        }

        if elapsed_s > self.max_tick_gap_s {
            warn!(
                "{:.3} s since the last tick is longer than the maximum gap of {:.3} s, \
                 ignoring the elapsed time",
                elapsed_s, self.max_tick_gap_s
            );
            return 0.0;
        }

        elapsed_s
    }

    /// Produce the command for this tick.
    ///
    /// - `control` is the first control of the optimised horizon.
    /// - `prev` is the previously published command.
    /// - `elapsed_s` is the time since the previous tick.
    /// - `speed_limit_ms` is the active speed limit, which never exceeds the configured maximum.
    ///
    /// If the control is not finite the previous command is returned unchanged.
    pub fn process(
        &self,
        control: &ControlInput,
        prev: &Twist,
        elapsed_s: f64,
        speed_limit_ms: f64,
    ) -> Twist {
        if !control.is_finite() {
            warn!("Non-finite control {:?}, holding the previous command", control);
            return if prev.is_finite() { *prev } else { Twist::zero() };
        }

        let control = control.clamped(&self.config);
        let dt = self.effective_dt(elapsed_s);
        let max_speed_ms = if speed_limit_ms.is_finite() && speed_limit_ms > 0.0 {
            speed_limit_ms.min(self.config.max_speed_ms)
        } else {
            self.config.max_speed_ms
        };

        let prev_speed_ms = if prev.linear_ms.is_finite() {
            prev.linear_ms
        } else {
            0.0
        };

        let linear_ms = clamp_sym(prev_speed_ms + control.accel_mss * dt, max_speed_ms);
        let angular_rads = linear_ms * control.steer_rate_rads / self.config.wheelbase_m;

        Twist::new(linear_ms, angular_rads)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn post() -> CmdPostProcessor {
        CmdPostProcessor::new(
            HorizonConfig {
                horizon_len: 10,
                step_s: 0.1,
                wheelbase_m: 0.5,
                max_speed_ms: 1.0,
                max_accel_mss: 1.0,
                max_steer_rate_rads: 0.5,
            },
            0.5,
        )
    }

    #[test]
    fn test_integrates_accel() {
        let twist = post().process(
            &ControlInput::new(0.5, 0.25),
            &Twist::new(0.2, 0.0),
            0.1,
            1.0,
        );

        assert_relative_eq!(twist.linear_ms, 0.25, epsilon = 1e-12);
        assert_relative_eq!(twist.angular_rads, 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_speed_limit_applied() {
        let twist = post().process(
            &ControlInput::new(1.0, 0.0),
            &Twist::new(0.45, 0.0),
            0.1,
            0.5,
        );
        assert_relative_eq!(twist.linear_ms, 0.5);

        // Limits above the configured maximum are capped
        let twist = post().process(
            &ControlInput::new(1.0, 0.0),
            &Twist::new(0.95, 0.0),
            0.1,
            3.0,
        );
        assert_relative_eq!(twist.linear_ms, 1.0);
    }

    #[test]
    fn test_large_gap_ignored() {
        let prev = Twist::new(0.3, 0.0);
        let twist = post().process(&ControlInput::new(1.0, 0.0), &prev, 2.0, 1.0);

        assert_relative_eq!(twist.linear_ms, 0.3);
        assert_eq!(post().effective_dt(-0.1), 0.0);
        assert_eq!(post().effective_dt(0.2), 0.2);
    }

    #[test]
    fn test_non_finite_holds_previous() {
        let prev = Twist::new(0.3, 0.1);
        let twist = post().process(&ControlInput::new(std::f64::NAN, 0.0), &prev, 0.1, 1.0);

        assert_eq!(twist, prev);
    }

    proptest! {
        #[test]
        fn prop_speed_within_limits(
            accel in -1e3..1e3f64,
            steer in -10.0..10.0f64,
            prev_speed in -5.0..5.0f64,
            dt in -1.0..1.0f64,
            limit in -2.0..2.0f64,
        ) {
            let twist = post().process(
                &ControlInput::new(accel, steer),
                &Twist::new(prev_speed, 0.0),
                dt,
                limit,
            );

            prop_assert!(twist.is_finite());
            prop_assert!(twist.linear_ms.abs() <= 1.0);
            prop_assert!(twist.angular_rads.abs() <= 1.0 * 0.5 / 0.5 + 1e-12);
        }
    }
}
