use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geom::{
    CurveFitFlags, CurveFitOptions, CurveFitter, FitError, LmSettings, Point3, fit_curve,
    fit_curve_with_progress,
};

fn line_cloud() -> Vec<Point3> {
    (0..=10).map(|k| Point3::new(f64::from(k), 0.0, 0.0)).collect()
}

fn ends(first: Point3, last: Point3, n: usize) -> Vec<Point3> {
    let mut cps = vec![Point3::ORIGIN; n];
    cps[0] = first;
    cps[n - 1] = last;
    cps
}

fn noisy_arc(seed: u64, m: usize) -> Vec<Point3> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..m)
        .map(|k| {
            let a = std::f64::consts::PI * k as f64 / (m - 1) as f64;
            Point3::new(
                2.0 * a.cos() + rng.random_range(-0.01..0.01),
                2.0 * a.sin() + rng.random_range(-0.01..0.01),
                rng.random_range(-0.01..0.01),
            )
        })
        .collect()
}

#[test]
fn straight_line_is_fitted_exactly() {
    let cloud = line_cloud();
    let cps = ends(cloud[0], cloud[10], 5);
    let fit = fit_curve(&cloud, &cps, CurveFitOptions::ordered()).unwrap();

    assert!(fit.rms_error < 1e-6, "rms={}", fit.rms_error);
    assert!(fit.max_error < 1e-5, "max={}", fit.max_error);
    for cp in &fit.control_points {
        assert!(cp.y.abs() < 1e-9 && cp.z.abs() < 1e-9, "{cp:?}");
    }
    assert!(fit.min_polygon_dot > 0.999);
    assert!(fit.diagnostics.converged);
    assert!(fit.iterations <= 100);
    assert_eq!(fit.parameters.len(), cloud.len());
}

#[test]
fn end_control_points_are_kept() {
    let cloud = noisy_arc(1, 40);
    let first = Point3::new(2.0, 0.0, 0.0);
    let last = Point3::new(-2.0, 0.0, 0.0);
    let cps = ends(first, last, 7);
    let fit = fit_curve(&cloud, &cps, CurveFitOptions::ordered().with_smoothing(0.05)).unwrap();

    assert!(fit.control_points[0].distance_to(first) < 1e-12);
    assert!(fit.control_points[6].distance_to(last) < 1e-12);
    assert!(fit.point_at(0.0).unwrap().distance_to(first) < 1e-12);
    assert!(fit.point_at(4.0).unwrap().distance_to(last) < 1e-12);
    assert!(fit.parameters.iter().all(|t| (0.0..=4.0).contains(t)));
}

#[test]
fn arc_fit_is_close_to_the_cloud() {
    let cloud = noisy_arc(2, 60);
    let cps = ends(Point3::new(2.0, 0.0, 0.0), Point3::new(-2.0, 0.0, 0.0), 8);
    let fit = fit_curve(&cloud, &cps, CurveFitOptions::ordered()).unwrap();
    assert!(fit.rms_error < 0.015, "rms={}", fit.rms_error);
    assert!(fit.iterations > LmSettings::default().frozen_iterations);
    assert!(fit.min_points_per_span > 0);
    assert!(!fit.diagnostics.has_warnings());
}

fn exact_arc(m: usize) -> Vec<Point3> {
    (0..m)
        .map(|k| {
            let a = std::f64::consts::PI * k as f64 / (m - 1) as f64;
            Point3::new(2.0 * a.cos(), 2.0 * a.sin(), 0.0)
        })
        .collect()
}

#[test]
fn control_points_are_solved_after_frozen_steps() {
    let cloud = exact_arc(40);
    for n in [6, 8] {
        let cps = ends(cloud[0], cloud[39], n);
        let fit = fit_curve(&cloud, &cps, CurveFitOptions::ordered()).unwrap();

        let mut unfrozen = CurveFitOptions::ordered();
        unfrozen.lm.frozen_iterations = 0;
        let reference = fit_curve(&cloud, &cps, unfrozen).unwrap();

        assert!(
            fit.iterations > LmSettings::default().frozen_iterations,
            "n={n} iterations={}",
            fit.iterations
        );
        assert!(
            fit.rms_error < 10.0 * reference.rms_error + 1e-5,
            "n={n} rms={} reference={}",
            fit.rms_error,
            reference.rms_error
        );
    }
}

#[test]
fn accepted_steps_never_increase_rms() {
    let cloud = noisy_arc(3, 30);
    let cps = ends(Point3::new(2.0, 0.0, 0.0), Point3::new(-2.0, 0.0, 0.0), 6);
    let flags = CurveFitFlags {
        ordered: true,
        ..Default::default()
    };
    let mut fitter = CurveFitter::new(&cloud, &cps, flags, 0.2, LmSettings::default()).unwrap();

    let frozen = LmSettings::default().frozen_iterations;
    let mut last = fitter.rms_error();
    let mut smoothing = 0.2;
    for k in 0..30 {
        let report = fitter.step(smoothing).unwrap();
        assert_eq!(report.frozen, k < frozen, "step {k}");
        if report.accepted {
            assert!(report.rms <= last, "{} > {last}", report.rms);
        }
        last = fitter.rms_error();
        smoothing *= 0.99;
    }
    let fit = fitter.finish();
    assert_eq!(fit.iterations, 30);
    assert_eq!(fit.diagnostics.total_steps(), 30);
}

#[test]
fn unordered_cloud_uses_index_parametrization() {
    let cloud = noisy_arc(4, 25);
    let cps = ends(cloud[0], cloud[24], 6);
    let options = CurveFitOptions::default().with_smoothing(0.1).with_max_iterations(60);
    let fit = fit_curve(&cloud, &cps, options).unwrap();
    assert!(fit.rms_error < 0.05, "rms={}", fit.rms_error);
    assert!(fit.iterations > LmSettings::default().frozen_iterations);
}

#[test]
fn given_interior_is_used_as_start() {
    let cloud = line_cloud();
    let cps: Vec<Point3> = [0.0, 2.0, 5.0, 8.0, 10.0]
        .iter()
        .map(|&x| Point3::new(x, 0.0, 0.0))
        .collect();
    let options = CurveFitOptions::default().with_interior_given(true);
    let fit = fit_curve(&cloud, &cps, options).unwrap();
    assert!(fit.rms_error < 1e-6, "rms={}", fit.rms_error);
}

#[test]
fn fit_is_frame_independent() {
    let cloud = noisy_arc(5, 30);
    let cps = ends(Point3::new(2.0, 0.0, 0.0), Point3::new(-2.0, 0.0, 0.0), 6);
    let options = CurveFitOptions::ordered().with_max_iterations(8);

    let moved = |p: Point3| Point3::new(3.0 * p.x + 5.0, 3.0 * p.y - 2.0, 3.0 * p.z + 1.0);
    let cloud_moved: Vec<Point3> = cloud.iter().copied().map(moved).collect();
    let cps_moved: Vec<Point3> = cps.iter().copied().map(moved).collect();

    let base = fit_curve(&cloud, &cps, options).unwrap();
    let other = fit_curve(&cloud_moved, &cps_moved, options).unwrap();

    assert!((other.normalization.scale - 3.0 * base.normalization.scale).abs() < 1e-9);
    assert!((other.rms_error - 3.0 * base.rms_error).abs() < 1e-6);
    for (a, b) in base.control_points.iter().zip(&other.control_points) {
        assert!(moved(*a).distance_to(*b) < 1e-6);
    }
}

#[test]
fn progress_sink_gets_one_line_per_step() {
    let cloud = noisy_arc(6, 20);
    let cps = ends(Point3::new(2.0, 0.0, 0.0), Point3::new(-2.0, 0.0, 0.0), 5);
    let mut sink: Vec<u8> = Vec::new();
    let fit = fit_curve_with_progress(
        &cloud,
        &cps,
        CurveFitOptions::ordered().with_max_iterations(12),
        Some(&mut sink as &mut dyn std::io::Write),
    )
    .unwrap();
    let text = String::from_utf8(sink).unwrap();
    assert_eq!(text.lines().count(), fit.iterations);
    assert!(text.lines().all(|l| l.starts_with("iter ") && l.contains("lambda=")));
}

#[test]
fn coincident_cloud_is_degenerate() {
    let cloud = vec![Point3::new(1.0, 1.0, 1.0); 6];
    let cps = ends(Point3::ORIGIN, Point3::new(1.0, 0.0, 0.0), 5);
    assert!(matches!(
        fit_curve(&cloud, &cps, CurveFitOptions::default()),
        Err(FitError::DegenerateGeometry { .. })
    ));
}

#[test]
fn invalid_inputs_are_rejected() {
    let cloud = line_cloud();
    let cps = ends(cloud[0], cloud[10], 5);

    let mut periodic = CurveFitOptions::default();
    periodic.flags.periodic = true;
    assert!(matches!(
        fit_curve(&cloud, &cps, periodic),
        Err(FitError::InvalidFlag { .. })
    ));
    assert!(matches!(
        fit_curve(&cloud, &cps, CurveFitOptions::default().with_smoothing(1.5)),
        Err(FitError::InvalidSmoothing { .. })
    ));
    assert!(matches!(
        fit_curve(&cloud, &cps[..3], CurveFitOptions::default()),
        Err(FitError::InvalidControlCount { .. })
    ));
    assert!(matches!(
        fit_curve(&cloud[..1], &cps, CurveFitOptions::default()),
        Err(FitError::EmptyCloud { provided: 1 })
    ));
    // More free control points than data and no smoothing.
    let many = ends(cloud[0], cloud[10], 20);
    assert!(matches!(
        fit_curve(&cloud, &many, CurveFitOptions::default()),
        Err(FitError::InvalidControlCount { .. })
    ));

    let mut bad = cloud.clone();
    bad[4].y = f64::NAN;
    assert!(matches!(
        fit_curve(&bad, &cps, CurveFitOptions::default()),
        Err(FitError::NonFiniteInput { index: 4 })
    ));
}
