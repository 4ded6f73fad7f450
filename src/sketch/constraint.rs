use crate::error::SketchError;
use crate::geometry::wrap_angle;
use crate::sketch::params::ParameterTable;
use crate::sketch::types::{EntityId, FeatureType, GeometryRef};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a constraint, unique within the owning id generator's
/// lifetime and monotonically increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintId(pub u64);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Explicit id counter, owned by whichever object constructs constraints
/// (typically the `Sketch` or a document/session object). Kept out of
/// global state so independent documents never contend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintIdGen {
    next: u64,
}

impl Default for ConstraintIdGen {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintIdGen {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> ConstraintId {
        let id = ConstraintId(self.next);
        self.next += 1;
        id
    }

    /// Ensure ids handed out in the future never collide with `id`. Called
    /// when restoring constraints from storage.
    pub fn advance_past(&mut self, id: ConstraintId) {
        if id.0 >= self.next {
            self.next = id.0 + 1;
        }
    }
}

/// The ten constraint kinds. A closed set: new kinds are rare and each needs
/// bespoke calculus, so a sealed variant keeps `evaluate`/`jacobian`
/// dispatch exhaustiveness-checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Two points identical (2 equations).
    Coincident { a: GeometryRef, b: GeometryRef },
    /// Two points share Y. For a whole line, use the endpoint pair
    /// (see [`ConstraintKind::horizontal_line`]).
    Horizontal { a: GeometryRef, b: GeometryRef },
    /// Two points share X.
    Vertical { a: GeometryRef, b: GeometryRef },
    /// Zero dot product of two line directions.
    Perpendicular { a: GeometryRef, b: GeometryRef },
    /// Zero 2D cross product of two line directions.
    Parallel { a: GeometryRef, b: GeometryRef },
    /// Line tangent to circle, in the squared form
    /// `cross^2 - r^2 |d|^2` which has no sqrt singularity at tangency.
    Tangent { line: GeometryRef, circle: GeometryRef },
    /// Equal length (lines) or equal radius (circles), dispatched on the
    /// feature type of `a`.
    Equal { a: GeometryRef, b: GeometryRef },
    /// Pin a point to an absolute position (2 equations).
    Fixed { point: GeometryRef, target: [f64; 2] },
    /// Point-to-point distance, squared form `|pa - pb|^2 - d^2`.
    Distance { a: GeometryRef, b: GeometryRef, value: f64 },
    /// Signed angle between two line directions, in radians.
    Angle { a: GeometryRef, b: GeometryRef, value: f64 },
}

impl ConstraintKind {
    /// Horizontal over a line's two endpoint features.
    pub fn horizontal_line(line: EntityId) -> Self {
        ConstraintKind::Horizontal {
            a: GeometryRef::point(line, 0),
            b: GeometryRef::point(line, 1),
        }
    }

    /// Vertical over a line's two endpoint features.
    pub fn vertical_line(line: EntityId) -> Self {
        ConstraintKind::Vertical {
            a: GeometryRef::point(line, 0),
            b: GeometryRef::point(line, 1),
        }
    }

    fn refs(&self) -> Vec<GeometryRef> {
        match self {
            ConstraintKind::Coincident { a, b }
            | ConstraintKind::Horizontal { a, b }
            | ConstraintKind::Vertical { a, b }
            | ConstraintKind::Perpendicular { a, b }
            | ConstraintKind::Parallel { a, b }
            | ConstraintKind::Equal { a, b }
            | ConstraintKind::Distance { a, b, .. }
            | ConstraintKind::Angle { a, b, .. } => vec![*a, *b],
            ConstraintKind::Tangent { line, circle } => vec![*line, *circle],
            ConstraintKind::Fixed { point, .. } => vec![*point],
        }
    }
}

/// One active constraint: a stable id plus its kind payload.
///
/// `Clone` preserves the id and parameters but yields an independently
/// mutable instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    id: ConstraintId,
    kind: ConstraintKind,
}

impl Constraint {
    /// Construct with a fresh id from the generator. Fails if any referenced
    /// entity id is the invalid sentinel.
    pub fn new(gen: &mut ConstraintIdGen, kind: ConstraintKind) -> Result<Self, SketchError> {
        if kind.refs().iter().any(|r| !r.is_valid()) {
            return Err(SketchError::InvalidReference);
        }
        Ok(Self { id: gen.next_id(), kind })
    }

    /// Construct with an explicit id, for restoring from storage. The caller
    /// is responsible for advancing its generator past `id`.
    pub fn with_id(id: ConstraintId, kind: ConstraintKind) -> Self {
        Self { id, kind }
    }

    pub fn id(&self) -> ConstraintId {
        self.id
    }

    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ConstraintKind::Coincident { .. } => "coincident",
            ConstraintKind::Horizontal { .. } => "horizontal",
            ConstraintKind::Vertical { .. } => "vertical",
            ConstraintKind::Perpendicular { .. } => "perpendicular",
            ConstraintKind::Parallel { .. } => "parallel",
            ConstraintKind::Tangent { .. } => "tangent",
            ConstraintKind::Equal { .. } => "equal",
            ConstraintKind::Fixed { .. } => "fixed",
            ConstraintKind::Distance { .. } => "distance",
            ConstraintKind::Angle { .. } => "angle",
        }
    }

    /// Number of scalar equations this constraint contributes.
    pub fn equation_count(&self) -> usize {
        match self.kind {
            ConstraintKind::Coincident { .. } | ConstraintKind::Fixed { .. } => 2,
            _ => 1,
        }
    }

    /// Dimensional value for Distance and Angle, `None` otherwise.
    pub fn dimension_value(&self) -> Option<f64> {
        match self.kind {
            ConstraintKind::Distance { value, .. } | ConstraintKind::Angle { value, .. } => {
                Some(value)
            }
            _ => None,
        }
    }

    pub fn set_dimension_value(&mut self, new_value: f64) -> Result<(), SketchError> {
        match &mut self.kind {
            ConstraintKind::Distance { value, .. } | ConstraintKind::Angle { value, .. } => {
                *value = new_value;
                Ok(())
            }
            _ => Err(SketchError::NotDimensional(self.id)),
        }
    }

    /// Unique entity ids this constraint touches, deduplicated when both
    /// references share an entity.
    pub fn referenced_entity_ids(&self) -> Vec<EntityId> {
        let mut ids = Vec::with_capacity(2);
        for r in self.kind.refs() {
            if r.entity.is_valid() && !ids.contains(&r.entity) {
                ids.push(r.entity);
            }
        }
        ids
    }

    /// Write this constraint's residual(s) into `residuals` starting at
    /// `row`. A residual of zero means satisfied.
    pub fn evaluate(&self, params: &ParameterTable, residuals: &mut DVector<f64>, row: usize) {
        match &self.kind {
            ConstraintKind::Coincident { a, b } => {
                let pa = params.point_position(*a);
                let pb = params.point_position(*b);
                residuals[row] = pa.x - pb.x;
                residuals[row + 1] = pa.y - pb.y;
            }
            ConstraintKind::Horizontal { a, b } => {
                let pa = params.point_position(*a);
                let pb = params.point_position(*b);
                residuals[row] = pa.y - pb.y;
            }
            ConstraintKind::Vertical { a, b } => {
                let pa = params.point_position(*a);
                let pb = params.point_position(*b);
                residuals[row] = pa.x - pb.x;
            }
            ConstraintKind::Perpendicular { a, b } => {
                let (s1, e1) = params.line_endpoints(*a);
                let (s2, e2) = params.line_endpoints(*b);
                let d1 = e1 - s1;
                let d2 = e2 - s2;
                residuals[row] = d1.x * d2.x + d1.y * d2.y;
            }
            ConstraintKind::Parallel { a, b } => {
                let (s1, e1) = params.line_endpoints(*a);
                let (s2, e2) = params.line_endpoints(*b);
                let d1 = e1 - s1;
                let d2 = e2 - s2;
                residuals[row] = d1.x * d2.y - d1.y * d2.x;
            }
            ConstraintKind::Tangent { line, circle } => {
                let (s, e) = params.line_endpoints(*line);
                let (c, r) = params.circle_data(*circle);
                let d = e - s;
                let v = c - s;
                let cr = v.x * d.y - v.y * d.x;
                residuals[row] = cr * cr - r * r * d.norm_squared();
            }
            ConstraintKind::Equal { a, b } => match a.feature {
                FeatureType::Line => {
                    let (s1, e1) = params.line_endpoints(*a);
                    let (s2, e2) = params.line_endpoints(*b);
                    residuals[row] = (e1 - s1).norm_squared() - (e2 - s2).norm_squared();
                }
                FeatureType::Circle => {
                    let (_, ra) = params.circle_data(*a);
                    let (_, rb) = params.circle_data(*b);
                    residuals[row] = ra - rb;
                }
                FeatureType::Point => {
                    debug_assert!(false, "equal constraint over point features");
                }
            },
            ConstraintKind::Fixed { point, target } => {
                let p = params.point_position(*point);
                residuals[row] = p.x - target[0];
                residuals[row + 1] = p.y - target[1];
            }
            ConstraintKind::Distance { a, b, value } => {
                let pa = params.point_position(*a);
                let pb = params.point_position(*b);
                residuals[row] = (pa - pb).norm_squared() - value * value;
            }
            ConstraintKind::Angle { a, b, value } => {
                let (s1, e1) = params.line_endpoints(*a);
                let (s2, e2) = params.line_endpoints(*b);
                let d1 = e1 - s1;
                let d2 = e2 - s2;
                let dot = d1.x * d2.x + d1.y * d2.y;
                let cross = d1.x * d2.y - d1.y * d2.x;
                residuals[row] = wrap_angle(cross.atan2(dot) - value);
            }
        }
    }

    /// Accumulate this constraint's partial derivatives into `jacobian` at
    /// rows `row..row + equation_count()`. Entries are added, never
    /// overwritten, because several constraints may touch one parameter.
    pub fn jacobian(&self, params: &ParameterTable, jacobian: &mut DMatrix<f64>, row: usize) {
        match &self.kind {
            ConstraintKind::Coincident { a, b } => {
                let ia = params.parameter_index(*a);
                let ib = params.parameter_index(*b);
                jacobian[(row, ia)] += 1.0;
                jacobian[(row, ib)] -= 1.0;
                jacobian[(row + 1, ia + 1)] += 1.0;
                jacobian[(row + 1, ib + 1)] -= 1.0;
            }
            ConstraintKind::Horizontal { a, b } => {
                let ia = params.parameter_index(*a);
                let ib = params.parameter_index(*b);
                jacobian[(row, ia + 1)] += 1.0;
                jacobian[(row, ib + 1)] -= 1.0;
            }
            ConstraintKind::Vertical { a, b } => {
                let ia = params.parameter_index(*a);
                let ib = params.parameter_index(*b);
                jacobian[(row, ia)] += 1.0;
                jacobian[(row, ib)] -= 1.0;
            }
            ConstraintKind::Perpendicular { a, b } => {
                let (s1, e1) = params.line_endpoints(*a);
                let (s2, e2) = params.line_endpoints(*b);
                let d1 = e1 - s1;
                let d2 = e2 - s2;
                let b1 = params.parameter_index(*a);
                let b2 = params.parameter_index(*b);
                jacobian[(row, b1)] -= d2.x;
                jacobian[(row, b1 + 1)] -= d2.y;
                jacobian[(row, b1 + 2)] += d2.x;
                jacobian[(row, b1 + 3)] += d2.y;
                jacobian[(row, b2)] -= d1.x;
                jacobian[(row, b2 + 1)] -= d1.y;
                jacobian[(row, b2 + 2)] += d1.x;
                jacobian[(row, b2 + 3)] += d1.y;
            }
            ConstraintKind::Parallel { a, b } => {
                let (s1, e1) = params.line_endpoints(*a);
                let (s2, e2) = params.line_endpoints(*b);
                let d1 = e1 - s1;
                let d2 = e2 - s2;
                let b1 = params.parameter_index(*a);
                let b2 = params.parameter_index(*b);
                jacobian[(row, b1)] -= d2.y;
                jacobian[(row, b1 + 1)] += d2.x;
                jacobian[(row, b1 + 2)] += d2.y;
                jacobian[(row, b1 + 3)] -= d2.x;
                jacobian[(row, b2)] += d1.y;
                jacobian[(row, b2 + 1)] -= d1.x;
                jacobian[(row, b2 + 2)] -= d1.y;
                jacobian[(row, b2 + 3)] += d1.x;
            }
            ConstraintKind::Tangent { line, circle } => {
                let (s, e) = params.line_endpoints(*line);
                let (c, r) = params.circle_data(*circle);
                let d = e - s;
                let v = c - s;
                let cr = v.x * d.y - v.y * d.x;
                let len2 = d.norm_squared();
                let lb = params.parameter_index(*line);
                let cb = params.parameter_index(*circle);
                // residual = cr^2 - r^2 |d|^2; chain through cr and |d|^2
                jacobian[(row, lb)] += 2.0 * cr * (v.y - d.y) + 2.0 * r * r * d.x;
                jacobian[(row, lb + 1)] += 2.0 * cr * (d.x - v.x) + 2.0 * r * r * d.y;
                jacobian[(row, lb + 2)] += -2.0 * cr * v.y - 2.0 * r * r * d.x;
                jacobian[(row, lb + 3)] += 2.0 * cr * v.x - 2.0 * r * r * d.y;
                jacobian[(row, cb)] += 2.0 * cr * d.y;
                jacobian[(row, cb + 1)] -= 2.0 * cr * d.x;
                jacobian[(row, cb + 2)] -= 2.0 * r * len2;
            }
            ConstraintKind::Equal { a, b } => match a.feature {
                FeatureType::Line => {
                    let (s1, e1) = params.line_endpoints(*a);
                    let (s2, e2) = params.line_endpoints(*b);
                    let d1 = e1 - s1;
                    let d2 = e2 - s2;
                    let b1 = params.parameter_index(*a);
                    let b2 = params.parameter_index(*b);
                    jacobian[(row, b1)] -= 2.0 * d1.x;
                    jacobian[(row, b1 + 1)] -= 2.0 * d1.y;
                    jacobian[(row, b1 + 2)] += 2.0 * d1.x;
                    jacobian[(row, b1 + 3)] += 2.0 * d1.y;
                    jacobian[(row, b2)] += 2.0 * d2.x;
                    jacobian[(row, b2 + 1)] += 2.0 * d2.y;
                    jacobian[(row, b2 + 2)] -= 2.0 * d2.x;
                    jacobian[(row, b2 + 3)] -= 2.0 * d2.y;
                }
                FeatureType::Circle => {
                    let b1 = params.parameter_index(*a);
                    let b2 = params.parameter_index(*b);
                    jacobian[(row, b1 + 2)] += 1.0;
                    jacobian[(row, b2 + 2)] -= 1.0;
                }
                FeatureType::Point => {
                    debug_assert!(false, "equal constraint over point features");
                }
            },
            ConstraintKind::Fixed { point, .. } => {
                let i = params.parameter_index(*point);
                jacobian[(row, i)] += 1.0;
                jacobian[(row + 1, i + 1)] += 1.0;
            }
            ConstraintKind::Distance { a, b, .. } => {
                let pa = params.point_position(*a);
                let pb = params.point_position(*b);
                let d = pa - pb;
                let ia = params.parameter_index(*a);
                let ib = params.parameter_index(*b);
                jacobian[(row, ia)] += 2.0 * d.x;
                jacobian[(row, ia + 1)] += 2.0 * d.y;
                jacobian[(row, ib)] -= 2.0 * d.x;
                jacobian[(row, ib + 1)] -= 2.0 * d.y;
            }
            ConstraintKind::Angle { a, b, .. } => {
                let (s1, e1) = params.line_endpoints(*a);
                let (s2, e2) = params.line_endpoints(*b);
                let d1 = e1 - s1;
                let d2 = e2 - s2;
                let dot = d1.x * d2.x + d1.y * d2.y;
                let cross = d1.x * d2.y - d1.y * d2.x;
                let denom = dot * dot + cross * cross;
                if denom < 1e-30 {
                    // Near-zero-length directions: leave the row zero for
                    // this iteration; the damping term keeps the normal
                    // equations solvable.
                    return;
                }
                // theta = atan2(cross, dot);
                // d theta = (dot * d cross - cross * d dot) / denom
                let g1x = (dot * d2.y - cross * d2.x) / denom;
                let g1y = -(dot * d2.x + cross * d2.y) / denom;
                let g2x = -(dot * d1.y + cross * d1.x) / denom;
                let g2y = (dot * d1.x - cross * d1.y) / denom;
                let b1 = params.parameter_index(*a);
                let b2 = params.parameter_index(*b);
                jacobian[(row, b1)] -= g1x;
                jacobian[(row, b1 + 1)] -= g1y;
                jacobian[(row, b1 + 2)] += g1x;
                jacobian[(row, b1 + 3)] += g1y;
                jacobian[(row, b2)] -= g2x;
                jacobian[(row, b2 + 1)] -= g2y;
                jacobian[(row, b2 + 2)] += g2x;
                jacobian[(row, b2 + 3)] += g2y;
            }
        }
    }
}
