use crate::sketch::constraint::{Constraint, ConstraintIdGen, ConstraintKind};
use crate::sketch::params::ParameterTable;
use crate::sketch::types::{EntityId, GeometryRef, Sketch, SketchGeometry};
use crate::SketchError;
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

fn residuals_of(sketch: &Sketch) -> DVector<f64> {
    let table = ParameterTable::build_from_entities(&sketch.entities, &sketch.system);
    let mut residuals = DVector::zeros(sketch.system.total_equations());
    let mut row = 0;
    for c in sketch.system.iter() {
        c.evaluate(&table, &mut residuals, row);
        row += c.equation_count();
    }
    residuals
}

/// Check every constraint's analytic Jacobian against central finite
/// differences of its residuals.
fn assert_jacobian_matches_fd(sketch: &Sketch) {
    let table = ParameterTable::build_from_entities(&sketch.entities, &sketch.system);
    let n = table.parameter_count();
    let h = 1e-6;

    for c in sketch.system.iter() {
        let m = c.equation_count();
        let mut analytic = DMatrix::zeros(m, n);
        c.jacobian(&table, &mut analytic, 0);

        for col in 0..n {
            let mut plus = table.clone();
            plus.set_value(col, table.value(col) + h);
            let mut r_plus = DVector::zeros(m);
            c.evaluate(&plus, &mut r_plus, 0);

            let mut minus = table.clone();
            minus.set_value(col, table.value(col) - h);
            let mut r_minus = DVector::zeros(m);
            c.evaluate(&minus, &mut r_minus, 0);

            for row in 0..m {
                let fd = (r_plus[row] - r_minus[row]) / (2.0 * h);
                assert!(
                    (analytic[(row, col)] - fd).abs() < 1e-4,
                    "{} jacobian mismatch at ({}, {}): analytic {} vs fd {}",
                    c.type_name(),
                    row,
                    col,
                    analytic[(row, col)],
                    fd
                );
            }
        }
    }
}

#[test]
fn test_equation_counts() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [3.0, 1.0] });
    let l2 = sketch.add_entity(SketchGeometry::Line { start: [1.0, 2.0], end: [4.0, 5.0] });
    let c1 = sketch.add_entity(SketchGeometry::Circle { center: [2.0, 2.0], radius: 1.0 });
    let c2 = sketch.add_entity(SketchGeometry::Circle { center: [6.0, 2.0], radius: 2.0 });

    let p1 = GeometryRef::point(l1, 0);
    let p2 = GeometryRef::point(l2, 1);
    let kinds = [
        (ConstraintKind::Coincident { a: p1, b: p2 }, 2),
        (ConstraintKind::Horizontal { a: p1, b: p2 }, 1),
        (ConstraintKind::Vertical { a: p1, b: p2 }, 1),
        (ConstraintKind::Perpendicular { a: GeometryRef::line(l1), b: GeometryRef::line(l2) }, 1),
        (ConstraintKind::Parallel { a: GeometryRef::line(l1), b: GeometryRef::line(l2) }, 1),
        (ConstraintKind::Tangent { line: GeometryRef::line(l1), circle: GeometryRef::circle(c1) }, 1),
        (ConstraintKind::Equal { a: GeometryRef::circle(c1), b: GeometryRef::circle(c2) }, 1),
        (ConstraintKind::Fixed { point: p1, target: [0.0, 0.0] }, 2),
        (ConstraintKind::Distance { a: p1, b: p2, value: 5.0 }, 1),
        (ConstraintKind::Angle { a: GeometryRef::line(l1), b: GeometryRef::line(l2), value: 0.5 }, 1),
    ];

    let mut total = 0;
    for (kind, expected) in kinds {
        let id = sketch.add_constraint(kind).unwrap();
        let c = sketch.system.get_constraint(id).unwrap();
        assert_eq!(c.equation_count(), expected, "{}", c.type_name());
        total += expected;
    }
    assert_eq!(sketch.system.total_equations(), total);
}

#[test]
fn test_coincident_residual_literal() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [10.0, 0.0] });
    let l2 = sketch.add_entity(SketchGeometry::Line { start: [10.5, 0.5], end: [20.0, 0.0] });

    sketch
        .add_constraint(ConstraintKind::Coincident {
            a: GeometryRef::point(l1, 1),
            b: GeometryRef::point(l2, 0),
        })
        .unwrap();

    let r = residuals_of(&sketch);
    assert!((r[0] - (-0.5)).abs() < 1e-12);
    assert!((r[1] - (-0.5)).abs() < 1e-12);
}

#[test]
fn test_distance_residual_345() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [3.0, 4.0] });

    // A 3-4-5 line: distance 5 between its endpoints is already satisfied.
    sketch
        .add_constraint(ConstraintKind::Distance {
            a: GeometryRef::point(l1, 0),
            b: GeometryRef::point(l1, 1),
            value: 5.0,
        })
        .unwrap();
    let r = residuals_of(&sketch);
    assert!(r[0].abs() < 1e-12);

    // Squared form: targeting 10 yields 25 - 100 = -75.
    sketch.system.clear();
    sketch
        .add_constraint(ConstraintKind::Distance {
            a: GeometryRef::point(l1, 0),
            b: GeometryRef::point(l1, 1),
            value: 10.0,
        })
        .unwrap();
    let r = residuals_of(&sketch);
    assert!((r[0] - (-75.0)).abs() < 1e-12);
}

#[test]
fn test_horizontal_vertical_residuals() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [10.0, 5.0] });

    sketch.add_constraint(ConstraintKind::horizontal_line(l1)).unwrap();
    let r = residuals_of(&sketch);
    assert!((r[0] - (-5.0)).abs() < 1e-12);

    sketch.system.clear();
    sketch.add_constraint(ConstraintKind::vertical_line(l1)).unwrap();
    let r = residuals_of(&sketch);
    assert!((r[0] - (-10.0)).abs() < 1e-12);
}

#[test]
fn test_perpendicular_parallel_residuals() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [2.0, 0.0] });
    let l2 = sketch.add_entity(SketchGeometry::Line { start: [1.0, 1.0], end: [1.0, 4.0] });
    let l3 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 2.0], end: [5.0, 2.0] });

    sketch
        .add_constraint(ConstraintKind::Perpendicular {
            a: GeometryRef::line(l1),
            b: GeometryRef::line(l2),
        })
        .unwrap();
    sketch
        .add_constraint(ConstraintKind::Parallel {
            a: GeometryRef::line(l1),
            b: GeometryRef::line(l3),
        })
        .unwrap();

    let r = residuals_of(&sketch);
    assert!(r[0].abs() < 1e-12, "axis-aligned lines are perpendicular");
    assert!(r[1].abs() < 1e-12, "horizontal lines are parallel");
}

#[test]
fn test_tangent_residual() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [10.0, 0.0] });
    // Circle of radius 3 centered 3 above the line: exactly tangent.
    let c1 = sketch.add_entity(SketchGeometry::Circle { center: [5.0, 3.0], radius: 3.0 });

    sketch
        .add_constraint(ConstraintKind::Tangent {
            line: GeometryRef::line(l1),
            circle: GeometryRef::circle(c1),
        })
        .unwrap();
    let r = residuals_of(&sketch);
    assert!(r[0].abs() < 1e-9);

    // Shrinking the radius to 2 leaves cross^2 - r^2 |d|^2 = 900 - 400.
    if let Some(e) = sketch.entity_mut(c1) {
        e.geometry = SketchGeometry::Circle { center: [5.0, 3.0], radius: 2.0 };
    }
    let r = residuals_of(&sketch);
    assert!((r[0] - 500.0).abs() < 1e-9);
}

#[test]
fn test_equal_residuals() {
    let mut sketch = Sketch::new();
    let c1 = sketch.add_entity(SketchGeometry::Circle { center: [0.0, 0.0], radius: 3.0 });
    let c2 = sketch.add_entity(SketchGeometry::Circle { center: [9.0, 0.0], radius: 5.0 });
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [2.0, 0.0] });
    let l2 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 1.0], end: [3.0, 1.0] });

    sketch
        .add_constraint(ConstraintKind::Equal {
            a: GeometryRef::circle(c1),
            b: GeometryRef::circle(c2),
        })
        .unwrap();
    sketch
        .add_constraint(ConstraintKind::Equal {
            a: GeometryRef::line(l1),
            b: GeometryRef::line(l2),
        })
        .unwrap();

    let r = residuals_of(&sketch);
    assert!((r[0] - (-2.0)).abs() < 1e-12, "radius difference 3 - 5");
    assert!((r[1] - (-5.0)).abs() < 1e-12, "squared lengths 4 - 9");
}

#[test]
fn test_fixed_residual() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [1.0, 2.0], end: [5.0, 2.0] });

    sketch
        .add_constraint(ConstraintKind::Fixed {
            point: GeometryRef::point(l1, 0),
            target: [0.0, 0.0],
        })
        .unwrap();

    let r = residuals_of(&sketch);
    assert!((r[0] - 1.0).abs() < 1e-12);
    assert!((r[1] - 2.0).abs() < 1e-12);
}

#[test]
fn test_angle_residual_wraps() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [1.0, 0.0] });
    let l2 = sketch.add_entity(SketchGeometry::Line { start: [0.0, 0.0], end: [1.0, 1.0] });

    sketch
        .add_constraint(ConstraintKind::Angle {
            a: GeometryRef::line(l1),
            b: GeometryRef::line(l2),
            value: PI / 4.0,
        })
        .unwrap();
    let r = residuals_of(&sketch);
    assert!(r[0].abs() < 1e-12, "45 degree pair at 45 degree target");

    // A target past the branch cut must come back wrapped into (-pi, pi].
    let id = sketch.system.iter().next().unwrap().id();
    sketch
        .system
        .get_constraint_mut(id)
        .unwrap()
        .set_dimension_value(PI / 4.0 + 2.0 * PI)
        .unwrap();
    let r = residuals_of(&sketch);
    assert!(r[0].abs() < 1e-9);
}

#[test]
fn test_jacobians_match_finite_differences() {
    // Generic (non-degenerate, non-axis-aligned) geometry so every partial
    // derivative is informative.
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [0.3, -1.2], end: [4.1, 2.7] });
    let l2 = sketch.add_entity(SketchGeometry::Line { start: [-2.0, 0.5], end: [1.5, 3.9] });
    let c1 = sketch.add_entity(SketchGeometry::Circle { center: [2.2, -0.8], radius: 1.7 });
    let c2 = sketch.add_entity(SketchGeometry::Circle { center: [-1.0, 2.0], radius: 0.9 });

    let p1 = GeometryRef::point(l1, 0);
    let p2 = GeometryRef::point(l2, 1);
    let kinds = [
        ConstraintKind::Coincident { a: p1, b: p2 },
        ConstraintKind::Horizontal { a: p1, b: p2 },
        ConstraintKind::Vertical { a: p1, b: p2 },
        ConstraintKind::Perpendicular { a: GeometryRef::line(l1), b: GeometryRef::line(l2) },
        ConstraintKind::Parallel { a: GeometryRef::line(l1), b: GeometryRef::line(l2) },
        ConstraintKind::Tangent { line: GeometryRef::line(l1), circle: GeometryRef::circle(c1) },
        ConstraintKind::Equal { a: GeometryRef::line(l1), b: GeometryRef::line(l2) },
        ConstraintKind::Equal { a: GeometryRef::circle(c1), b: GeometryRef::circle(c2) },
        ConstraintKind::Fixed { point: p1, target: [1.0, 1.0] },
        ConstraintKind::Distance { a: p1, b: p2, value: 2.5 },
        ConstraintKind::Angle { a: GeometryRef::line(l1), b: GeometryRef::line(l2), value: 0.3 },
    ];
    for kind in kinds {
        sketch.add_constraint(kind).unwrap();
    }

    assert_jacobian_matches_fd(&sketch);
}

#[test]
fn test_angle_jacobian_degenerate_lines_contribute_nothing() {
    let mut sketch = Sketch::new();
    let l1 = sketch.add_entity(SketchGeometry::Line { start: [1.0, 1.0], end: [1.0, 1.0] });
    let l2 = sketch.add_entity(SketchGeometry::Line { start: [2.0, 2.0], end: [2.0, 2.0] });

    sketch
        .add_constraint(ConstraintKind::Angle {
            a: GeometryRef::line(l1),
            b: GeometryRef::line(l2),
            value: 1.0,
        })
        .unwrap();

    let table = ParameterTable::build_from_entities(&sketch.entities, &sketch.system);
    let c = sketch.system.iter().next().unwrap();

    let mut jacobian = DMatrix::zeros(1, table.parameter_count());
    c.jacobian(&table, &mut jacobian, 0);
    assert!(jacobian.iter().all(|v| *v == 0.0), "degenerate pair leaves the row zero");

    let mut residuals = DVector::zeros(1);
    c.evaluate(&table, &mut residuals, 0);
    assert!(residuals[0].is_finite());
}

#[test]
fn test_referenced_entity_ids_deduplicated() {
    let mut gen = ConstraintIdGen::new();
    let id = EntityId(7);
    let c = Constraint::new(
        &mut gen,
        ConstraintKind::Distance {
            a: GeometryRef::point(id, 0),
            b: GeometryRef::point(id, 1),
            value: 5.0,
        },
    )
    .unwrap();

    assert_eq!(c.referenced_entity_ids(), vec![id]);
}

#[test]
fn test_invalid_reference_rejected() {
    let mut gen = ConstraintIdGen::new();
    let result = Constraint::new(
        &mut gen,
        ConstraintKind::Fixed {
            point: GeometryRef::point(EntityId::INVALID, 0),
            target: [0.0, 0.0],
        },
    );
    assert_eq!(result.unwrap_err(), SketchError::InvalidReference);
}

#[test]
fn test_id_generation_monotonic_and_restorable() {
    let mut gen = ConstraintIdGen::new();
    let a = gen.next_id();
    let b = gen.next_id();
    assert!(b > a);

    // Restoring a stored constraint advances the counter past its id.
    let restored = Constraint::with_id(crate::sketch::constraint::ConstraintId(100), ConstraintKind::horizontal_line(EntityId(1)));
    gen.advance_past(restored.id());
    assert!(gen.next_id() > restored.id());
}

#[test]
fn test_dimension_value_accessors() {
    let mut gen = ConstraintIdGen::new();
    let l1 = EntityId(1);
    let mut distance = Constraint::new(
        &mut gen,
        ConstraintKind::Distance {
            a: GeometryRef::point(l1, 0),
            b: GeometryRef::point(l1, 1),
            value: 5.0,
        },
    )
    .unwrap();
    let mut horizontal = Constraint::new(&mut gen, ConstraintKind::horizontal_line(l1)).unwrap();

    assert_eq!(distance.dimension_value(), Some(5.0));
    distance.set_dimension_value(7.0).unwrap();
    assert_eq!(distance.dimension_value(), Some(7.0));

    assert_eq!(horizontal.dimension_value(), None);
    assert!(matches!(
        horizontal.set_dimension_value(1.0),
        Err(SketchError::NotDimensional(_))
    ));
}

#[test]
fn test_clone_fidelity() {
    let mut gen = ConstraintIdGen::new();
    let l1 = EntityId(1);
    let original = Constraint::new(
        &mut gen,
        ConstraintKind::Distance {
            a: GeometryRef::point(l1, 0),
            b: GeometryRef::point(l1, 1),
            value: 5.0,
        },
    )
    .unwrap();

    let mut copy = original.clone();
    assert_eq!(copy.id(), original.id());
    assert_eq!(copy.type_name(), original.type_name());
    assert_eq!(copy.equation_count(), original.equation_count());

    // Independent instance: mutating the clone leaves the original alone.
    copy.set_dimension_value(9.0).unwrap();
    assert_eq!(original.dimension_value(), Some(5.0));
    assert_eq!(copy.dimension_value(), Some(9.0));
}

#[test]
fn test_constraint_serde_round_trip() {
    let mut gen = ConstraintIdGen::new();
    let c = Constraint::new(
        &mut gen,
        ConstraintKind::Angle {
            a: GeometryRef::line(EntityId(3)),
            b: GeometryRef::line(EntityId(4)),
            value: 1.25,
        },
    )
    .unwrap();

    let json = serde_json::to_string(&c).unwrap();
    let back: Constraint = serde_json::from_str(&json).unwrap();
    assert_eq!(back, c);
}
