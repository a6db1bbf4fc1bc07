use tessera_quadrature::integrate;
use tessera_quadrature::univariate::{gauss, gauss_unit_interval};

use matrixcompare::assert_scalar_eq;

fn monomial_integral_1d(alpha: i32) -> f64 {
    (1.0 - (-1.0f64).powi(alpha + 1)) / (alpha as f64 + 1.0)
}

#[test]
fn gauss_rules_integrate_monomials_exactly() {
    for n in 1..=64 {
        let rule = gauss(n);
        assert_eq!(rule.0.len(), n);
        assert!(rule.0.iter().all(|&w| w > 0.0));

        for alpha in 0..=(2 * n - 1) as i32 {
            let estimated = integrate(&rule, |&[x]| x.powi(alpha));
            assert_scalar_eq!(estimated, monomial_integral_1d(alpha), comp = abs, tol = 1e-13);
        }
    }
}

#[test]
fn gauss_points_are_sorted_and_symmetric() {
    for n in 1..=20 {
        let (weights, points) = gauss(n);
        for i in 1..n {
            assert!(points[i - 1][0] < points[i][0]);
        }
        for i in 0..n {
            assert_eq!(points[i][0], -points[n - 1 - i][0]);
            assert_eq!(weights[i], weights[n - 1 - i]);
        }
    }
}

#[test]
fn unit_interval_rule_has_unit_measure() {
    for n in 1..=10 {
        let rule = gauss_unit_interval(n);
        assert_scalar_eq!(rule.0.iter().sum::<f64>(), 1.0, comp = abs, tol = 1e-14);
        assert!(rule.1.iter().all(|&[x]| 0.0 < x && x < 1.0));
    }
}
