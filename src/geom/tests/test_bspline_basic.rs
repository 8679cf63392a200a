use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::geom::{Point3, Tolerance, cubic_basis, eval_curve, eval_surface};

fn random_net(rng: &mut StdRng, len: usize) -> Vec<Point3> {
    (0..len)
        .map(|_| {
            Point3::new(
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
            )
        })
        .collect()
}

#[test]
fn basis_is_partition_of_unity() {
    let mut rng = StdRng::seed_from_u64(11);
    for ncp in 4..12 {
        let tmax = (ncp - 3) as f64;
        for _ in 0..50 {
            let t = rng.random_range(0.0..=tmax);
            let basis = cubic_basis(ncp, t).unwrap();
            let sum: f64 = basis.values.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "ncp={ncp} t={t} sum={sum}");
            assert!(basis.values.iter().all(|v| *v >= -1e-15));
            let dsum: f64 = basis.derivs.iter().sum();
            assert!(dsum.abs() < 1e-12);
        }
    }
}

#[test]
fn basis_at_end_parameter_selects_last_control_point() {
    let basis = cubic_basis(7, 4.0).unwrap();
    assert_eq!(basis.span, 3);
    assert!((basis.values[3] - 1.0).abs() < 1e-15);
}

#[test]
fn curve_tangent_matches_finite_difference() {
    let mut rng = StdRng::seed_from_u64(3);
    let cps = random_net(&mut rng, 8);
    let h = 1e-6;
    for _ in 0..40 {
        let t = rng.random_range(0.01..4.99);
        let eval = eval_curve(t, &cps).unwrap();
        let ahead = eval_curve(t + h, &cps).unwrap().point;
        let behind = eval_curve(t - h, &cps).unwrap().point;
        let numeric = (ahead - behind) / (2.0 * h);
        assert!(
            (numeric - eval.tangent).length() < 1e-5,
            "t={t} numeric={numeric:?} analytic={:?}",
            eval.tangent
        );
    }
}

#[test]
fn curve_interpolates_end_control_points() {
    let mut rng = StdRng::seed_from_u64(5);
    let cps = random_net(&mut rng, 6);
    let tol = Tolerance::DEFAULT;
    assert!(tol.approx_eq_point3(eval_curve(0.0, &cps).unwrap().point, cps[0]));
    assert!(tol.approx_eq_point3(eval_curve(3.0, &cps).unwrap().point, cps[5]));
}

#[test]
fn control_derivatives_reproduce_position() {
    let mut rng = StdRng::seed_from_u64(17);
    let cps = random_net(&mut rng, 7);
    let eval = eval_curve(2.3, &cps).unwrap();
    let weights = eval.control_derivatives(cps.len());
    assert_eq!(weights.iter().filter(|w| **w != 0.0).count(), 4);
    let rebuilt = cps
        .iter()
        .zip(&weights)
        .fold(crate::geom::Vec3::ZERO, |acc, (p, w)| acc + p.to_vec3() * *w);
    assert!((rebuilt - eval.point.to_vec3()).length() < 1e-12);
}

#[test]
fn surface_derivatives_match_finite_difference() {
    let mut rng = StdRng::seed_from_u64(23);
    let (nu, nv) = (6, 5);
    let cps = random_net(&mut rng, nu * nv);
    let h = 1e-6;
    for _ in 0..30 {
        let u = rng.random_range(0.01..2.99);
        let v = rng.random_range(0.01..1.99);
        let eval = eval_surface(u, v, nu, nv, &cps).unwrap();
        let du = (eval_surface(u + h, v, nu, nv, &cps).unwrap().point
            - eval_surface(u - h, v, nu, nv, &cps).unwrap().point)
            / (2.0 * h);
        let dv = (eval_surface(u, v + h, nu, nv, &cps).unwrap().point
            - eval_surface(u, v - h, nu, nv, &cps).unwrap().point)
            / (2.0 * h);
        assert!((du - eval.du).length() < 1e-5);
        assert!((dv - eval.dv).length() < 1e-5);
    }
}

#[test]
fn surface_corners_are_interpolated() {
    let mut rng = StdRng::seed_from_u64(29);
    let (nu, nv) = (5, 7);
    let cps = random_net(&mut rng, nu * nv);
    let tol = Tolerance::DEFAULT;
    let corner = |u, v| eval_surface(u, v, nu, nv, &cps).unwrap().point;
    assert!(tol.approx_eq_point3(corner(0.0, 0.0), cps[0]));
    assert!(tol.approx_eq_point3(corner(2.0, 0.0), cps[nu - 1]));
    assert!(tol.approx_eq_point3(corner(0.0, 4.0), cps[nu * (nv - 1)]));
    assert!(tol.approx_eq_point3(corner(2.0, 4.0), cps[nu * nv - 1]));
}

#[test]
fn surface_rejects_wrong_grid_length() {
    let cps = vec![Point3::ORIGIN; 15];
    assert!(eval_surface(0.5, 0.5, 4, 4, &cps).is_err());
}
