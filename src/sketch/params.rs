use crate::geometry::Vec2;
use crate::sketch::system::ConstraintSystem;
use crate::sketch::types::{EntityId, FeatureType, GeometryRef, SketchEntity, SketchGeometry};
use nalgebra::DVector;
use std::collections::{HashMap, HashSet};

/// Slot layout class of a registered entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// 4 slots: `[start_x, start_y, end_x, end_y]`
    Line,
    /// 3 slots: `[center_x, center_y, radius]` (circles and arcs)
    Circle,
}

#[derive(Debug, Clone, Copy)]
struct ParamEntry {
    start: usize,
    len: usize,
    kind: ParamKind,
}

/// Maps a collection of geometric entities into one flat vector of scalar
/// unknowns, and back.
///
/// Built fresh per solve request, populated once from entity state, mutated
/// in place by the solver across iterations, then pushed back to entities
/// via [`ParameterTable::apply_to_entities`]. The table never owns entities.
///
/// Feature resolution is a caller precondition: every [`GeometryRef`] handed
/// to the accessors must name an entity registered here. Violations are
/// debug-asserted but not checked in release builds; the accessors sit on
/// the per-iteration hot path.
#[derive(Debug, Clone)]
pub struct ParameterTable {
    values: DVector<f64>,
    entries: HashMap<EntityId, ParamEntry>,
}

impl Default for ParameterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterTable {
    pub fn new() -> Self {
        Self {
            values: DVector::zeros(0),
            entries: HashMap::new(),
        }
    }

    /// Register the entities referenced by at least one constraint in the
    /// system. Unconstrained geometry is deliberately excluded so it never
    /// appears in the Jacobian.
    pub fn build_from_entities(entities: &[SketchEntity], system: &ConstraintSystem) -> Self {
        let mut referenced: HashSet<EntityId> = HashSet::new();
        for constraint in system.iter() {
            referenced.extend(constraint.referenced_entity_ids());
        }

        let mut table = Self::new();
        for entity in entities {
            if referenced.contains(&entity.id) {
                table.register_entity(entity);
            }
        }
        table
    }

    /// Append the entity's parameter slots, seeding them from its current
    /// geometry, and return the assigned start index. Re-registration and
    /// unsupported kinds are silent no-ops contributing zero parameters.
    pub fn register_entity(&mut self, entity: &SketchEntity) -> usize {
        if let Some(entry) = self.entries.get(&entity.id) {
            return entry.start;
        }

        let start = self.values.len();
        match &entity.geometry {
            SketchGeometry::Line { start: s, end: e } => {
                self.values.extend([s[0], s[1], e[0], e[1]]);
                self.entries.insert(entity.id, ParamEntry { start, len: 4, kind: ParamKind::Line });
            }
            SketchGeometry::Circle { center, radius } => {
                self.values.extend([center[0], center[1], *radius]);
                self.entries.insert(entity.id, ParamEntry { start, len: 3, kind: ParamKind::Circle });
            }
            SketchGeometry::Arc { center, radius, .. } => {
                self.values.extend([center[0], center[1], *radius]);
                self.entries.insert(entity.id, ParamEntry { start, len: 3, kind: ParamKind::Circle });
            }
            SketchGeometry::Point { .. } => {}
        }
        start
    }

    pub fn has_entity(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn parameter_count(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut DVector<f64> {
        &mut self.values
    }

    pub fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub fn set_value(&mut self, index: usize, value: f64) {
        self.values[index] = value;
    }

    /// Resolve a reference to the index of the first slot relevant to its
    /// feature: point features resolve to their coordinate pair (line start
    /// for index 0, line end for index 1, circle center), whole-line and
    /// whole-circle references to the base of the 4- or 3-slot block.
    pub fn parameter_index(&self, r: GeometryRef) -> usize {
        let entry = &self.entries[&r.entity];
        match r.feature {
            FeatureType::Point => match entry.kind {
                ParamKind::Line => {
                    debug_assert!(r.feature_index <= 1, "line has point features 0 and 1");
                    entry.start + 2 * r.feature_index as usize
                }
                ParamKind::Circle => entry.start,
            },
            FeatureType::Line | FeatureType::Circle => entry.start,
        }
    }

    /// Current position of a point feature.
    pub fn point_position(&self, r: GeometryRef) -> Vec2 {
        let i = self.parameter_index(r);
        Vec2::new(self.values[i], self.values[i + 1])
    }

    /// Current endpoints of the line entity a reference names.
    pub fn line_endpoints(&self, r: GeometryRef) -> (Vec2, Vec2) {
        let entry = &self.entries[&r.entity];
        debug_assert_eq!(entry.kind, ParamKind::Line, "line feature on a non-line entity");
        let b = entry.start;
        (
            Vec2::new(self.values[b], self.values[b + 1]),
            Vec2::new(self.values[b + 2], self.values[b + 3]),
        )
    }

    /// Current center and radius of the circle entity a reference names.
    pub fn circle_data(&self, r: GeometryRef) -> (Vec2, f64) {
        let entry = &self.entries[&r.entity];
        debug_assert_eq!(entry.kind, ParamKind::Circle, "circle feature on a non-circle entity");
        let b = entry.start;
        (Vec2::new(self.values[b], self.values[b + 1]), self.values[b + 2])
    }

    /// Overwrite the geometry of every registered entity in the collection
    /// from the current parameter vector. Unregistered entities are left
    /// untouched. This is the only path from solved numbers back to the
    /// geometry model.
    pub fn apply_to_entities(&self, entities: &mut [SketchEntity]) {
        for entity in entities.iter_mut() {
            let Some(entry) = self.entries.get(&entity.id) else {
                continue;
            };
            let b = entry.start;
            match (&mut entity.geometry, entry.kind) {
                (SketchGeometry::Line { start, end }, ParamKind::Line) => {
                    start[0] = self.values[b];
                    start[1] = self.values[b + 1];
                    end[0] = self.values[b + 2];
                    end[1] = self.values[b + 3];
                }
                (SketchGeometry::Circle { center, radius }, ParamKind::Circle) => {
                    center[0] = self.values[b];
                    center[1] = self.values[b + 1];
                    *radius = self.values[b + 2];
                }
                (SketchGeometry::Arc { center, radius, .. }, ParamKind::Circle) => {
                    center[0] = self.values[b];
                    center[1] = self.values[b + 1];
                    *radius = self.values[b + 2];
                }
                _ => {}
            }
        }
    }
}
