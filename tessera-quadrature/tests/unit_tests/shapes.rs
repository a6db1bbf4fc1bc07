use tessera_quadrature::{gauss_points_for_order, rule_for_shape, Error, ReferenceShape, MAX_ORDER};

use matrixcompare::assert_scalar_eq;

#[test]
fn weights_sum_to_reference_measure() {
    let shapes = [
        ReferenceShape::Point,
        ReferenceShape::Line,
        ReferenceShape::Triangle,
        ReferenceShape::Quadrilateral,
        ReferenceShape::Tetrahedron,
        ReferenceShape::Hexahedron,
    ];
    for shape in shapes {
        for order in 0..=5 {
            let (weights, points) = rule_for_shape(shape, order).unwrap();
            assert_eq!(weights.len(), points.len());
            assert_scalar_eq!(weights.iter().sum::<f64>(), shape.measure(), comp = abs, tol = 1e-14);
            for point in &points {
                for coord in &point[shape.dim()..] {
                    assert_eq!(*coord, 0.0);
                }
            }
        }
    }
}

#[test]
fn second_order_quadrilateral_rule_is_two_by_two() {
    assert_eq!(gauss_points_for_order(2), 2);
    assert_eq!(gauss_points_for_order(3), 2);
    let (weights, _) = rule_for_shape(ReferenceShape::Quadrilateral, 2).unwrap();
    assert_eq!(weights.len(), 4);
}

#[test]
fn excessive_order_is_rejected() {
    let err = rule_for_shape(ReferenceShape::Line, MAX_ORDER + 1).unwrap_err();
    assert_eq!(
        err,
        Error::NoRuleAvailable {
            shape: ReferenceShape::Line,
            order: MAX_ORDER + 1
        }
    );
    assert!(err.to_string().contains("Line"));
}
