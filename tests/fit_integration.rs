use bspline_fitter::geom::{DenseMatrix, Normalization, Tolerance, solve_dense};
use bspline_fitter::{
    CurveFitOptions, FitError, FitJob, Point3, SurfaceFitOptions, fit_batch, fit_curve,
    fit_surface,
};

#[test]
fn line_scenario_through_public_api() {
    let cloud: Vec<Point3> = (0..=10).map(|k| Point3::new(f64::from(k), 0.0, 0.0)).collect();
    let mut cps = vec![Point3::ORIGIN; 5];
    cps[4] = Point3::new(10.0, 0.0, 0.0);

    let fit = fit_curve(&cloud, &cps, CurveFitOptions::ordered()).expect("line fit");
    assert!(fit.rms_error < 1e-6);
    assert!((fit.min_polygon_dot - 1.0).abs() < 1e-6);
    for (q, &t) in cloud.iter().zip(&fit.parameters) {
        let p = fit.point_at(t).expect("evaluate");
        assert!(p.distance_to(*q) < 1e-4);
    }
}

#[test]
fn planar_scenario_through_public_api() {
    let mut cloud = Vec::new();
    for j in 0..5 {
        for i in 0..5 {
            cloud.push(Point3::new(f64::from(i) * 0.25, f64::from(j) * 0.25, 0.0));
        }
    }
    let mut grid = vec![Point3::ORIGIN; 25];
    for j in 0..5 {
        for i in 0..5 {
            grid[i + 5 * j] = Point3::new(i as f64 * 0.25, j as f64 * 0.25, 0.0);
        }
    }
    let fit = fit_surface(
        &cloud,
        5,
        5,
        &grid,
        SurfaceFitOptions::default().with_smoothing(0.1),
    )
    .expect("plane fit");
    assert!(fit.rms_error < 1e-4);
    assert!(fit.control_points.iter().all(|p| p.z.abs() < 1e-12));
}

#[test]
fn dense_solver_known_and_singular_systems() {
    let a = DenseMatrix::from_row_major(3, vec![2.0, 1.0, -1.0, -3.0, -1.0, 2.0, -2.0, 1.0, 2.0])
        .expect("3x3");
    let x = solve_dense(a, vec![8.0, -11.0, -3.0]).expect("solvable");
    let tol = Tolerance::DEFAULT;
    assert!(tol.approx_eq_f64(x[0], 2.0));
    assert!(tol.approx_eq_f64(x[1], 3.0));
    assert!(tol.approx_eq_f64(x[2], -1.0));

    let singular = DenseMatrix::from_row_major(2, vec![1.0, 2.0, 2.0, 4.0]).expect("2x2");
    assert!(matches!(
        solve_dense(singular, vec![1.0, 2.0]),
        Err(FitError::SingularSystem { .. })
    ));
}

#[test]
fn normalization_round_trip() {
    let cloud = [
        Point3::new(-4.0, 2.0, 1.0),
        Point3::new(6.0, 3.0, 1.5),
        Point3::new(1.0, -1.0, 0.0),
    ];
    let norm = Normalization::from_cloud(&cloud).expect("extent");
    assert!((norm.scale - 10.0).abs() < 1e-12);
    for p in cloud {
        assert!(norm.restore(norm.apply(p)).distance_to(p) < 1e-12);
    }
}

#[test]
fn batch_mixes_success_and_failure() {
    let good: Vec<Point3> = (0..12).map(|k| Point3::new(0.0, f64::from(k), 0.0)).collect();
    let mut cps = vec![Point3::ORIGIN; 5];
    cps[4] = Point3::new(0.0, 11.0, 0.0);
    let jobs = vec![
        FitJob::Curve {
            cloud: good,
            control_points: cps.clone(),
            options: CurveFitOptions::ordered(),
        },
        FitJob::Curve {
            cloud: vec![Point3::ORIGIN; 3],
            control_points: cps,
            options: CurveFitOptions::default().with_smoothing(2.0),
        },
    ];
    let outcomes = fit_batch(&jobs, 2);
    assert!(outcomes[0].is_ok());
    assert!(matches!(outcomes[1], Err(FitError::InvalidSmoothing { .. })));
}
