//! # Horizon Optimisation Benchmark

use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion};

use ctrl_if::{Frame, Path, Pose, Twist};
use traj_lib::traj_ctrl::{
    build_reference, optimiser::Problem, ControlInput, Controller, HorizonOptimiser,
    MpcController, Params, PolyCoeffs, StateVector,
};

fn horizon_opt_benchmark(c: &mut Criterion) {
    let params: Params = util::params::parse(include_str!("../../params/traj_ctrl.toml")).unwrap();

    // ---- Single solve from a cold start ----

    let optimiser = HorizonOptimiser::new(params.horizon, params.weights, params.optimiser);

    // Gentle left hand curve ahead of the vehicle
    let curve = PolyCoeffs::new(vec![0.0, 0.0, 0.1, 0.0]);
    let reference = build_reference(&curve, params.target_speed_ms, 0.3, &params.horizon);
    let problem = Problem {
        initial: StateVector::at_origin(0.3),
        reference: &reference,
        last_applied: ControlInput::default(),
    };
    let seed = vec![ControlInput::default(); params.horizon.horizon_len];

    c.bench_function("HorizonOptimiser::solve", |b| {
        b.iter(|| optimiser.solve(&problem, &seed).unwrap())
    });

    // ---- Full controller tick on a circular path ----

    let start = Pose::origin(Frame::World);
    let path = Path::circle(&start, 3.0, 1.5 * std::f64::consts::PI, 0.25).unwrap();

    let mut mpc = MpcController::configure(&params).unwrap();
    mpc.set_plan(path).unwrap();

    let pose = Pose::new(Frame::World, 0.1, 0.05, 0.05);
    let measured = Twist::new(0.4, 0.0);

    c.bench_function("MpcController::compute_command", |b| {
        b.iter(|| mpc.compute_command(&pose, &measured, Instant::now()).unwrap())
    });
}

criterion_group!(benches, horizon_opt_benchmark);
criterion_main!(benches);
