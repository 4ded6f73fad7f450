use crate::sketch::constraint::{Constraint, ConstraintId, ConstraintIdGen, ConstraintKind};
use crate::sketch::params::ParameterTable;
use crate::sketch::solver::{SketchSolver, SolveResult};
use crate::sketch::system::ConstraintSystem;
use crate::SketchError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a sketch entity. Zero is reserved as the invalid/unset id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    pub const INVALID: EntityId = EntityId(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which facet of an entity a constraint addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeatureType {
    Point,
    Line,
    Circle,
}

/// Immutable reference to one feature of one entity. This is the shared
/// vocabulary between constraints and the parameter table.
///
/// `feature_index` disambiguates multiple point features on one entity:
/// a line's start is 0 and its end is 1; a circle or arc center is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometryRef {
    pub entity: EntityId,
    pub feature: FeatureType,
    pub feature_index: u32,
}

impl GeometryRef {
    pub fn point(entity: EntityId, feature_index: u32) -> Self {
        Self { entity, feature: FeatureType::Point, feature_index }
    }

    pub fn line(entity: EntityId) -> Self {
        Self { entity, feature: FeatureType::Line, feature_index: 0 }
    }

    pub fn circle(entity: EntityId) -> Self {
        Self { entity, feature: FeatureType::Circle, feature_index: 0 }
    }

    pub fn is_valid(&self) -> bool {
        self.entity.is_valid()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SketchGeometry {
    Line { start: [f64; 2], end: [f64; 2] },
    Circle { center: [f64; 2], radius: f64 },
    /// An arc solves as its underlying circle; the sweep angles are not
    /// parameters the constraint solver touches.
    Arc { center: [f64; 2], radius: f64, start_angle: f64, end_angle: f64 },
    Point { pos: [f64; 2] },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SketchEntity {
    pub id: EntityId,
    pub geometry: SketchGeometry,
}

/// Container coupling entities with their constraint system, plus the id
/// generators both sides draw from. This is the thin integration layer the
/// surrounding application drives; the solver itself only ever sees the
/// parameter table and the constraint system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sketch {
    pub entities: Vec<SketchEntity>,
    pub system: ConstraintSystem,
    next_entity_id: u64,
    id_gen: ConstraintIdGen,
}

impl Default for Sketch {
    fn default() -> Self {
        Self::new()
    }
}

impl Sketch {
    pub fn new() -> Self {
        Self {
            entities: Vec::new(),
            system: ConstraintSystem::new(),
            next_entity_id: 1,
            id_gen: ConstraintIdGen::new(),
        }
    }

    pub fn add_entity(&mut self, geometry: SketchGeometry) -> EntityId {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        self.entities.push(SketchEntity { id, geometry });
        id
    }

    pub fn entity(&self, id: EntityId) -> Option<&SketchEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut SketchEntity> {
        self.entities.iter_mut().find(|e| e.id == id)
    }

    /// Remove an entity together with every constraint that references it.
    /// The removed constraints are returned so undo logic can restore them.
    pub fn remove_entity(&mut self, id: EntityId) -> Vec<Constraint> {
        self.entities.retain(|e| e.id != id);
        self.system.remove_constraints_for_entity(id)
    }

    pub fn add_constraint(&mut self, kind: ConstraintKind) -> Result<ConstraintId, SketchError> {
        let constraint = Constraint::new(&mut self.id_gen, kind)?;
        let id = constraint.id();
        self.system.add_constraint(constraint)?;
        Ok(id)
    }

    /// Reinsert a constraint that was removed earlier (or loaded from
    /// storage), advancing the id generator past its id so freshly created
    /// constraints cannot collide with it.
    pub fn restore_constraint(&mut self, constraint: Constraint) -> Result<(), SketchError> {
        self.id_gen.advance_past(constraint.id());
        self.system.add_constraint(constraint)
    }

    /// Build a parameter table, run the solver, and commit the solved
    /// geometry back onto the entities when the outcome warrants it
    /// (`Success` or `UnderConstrained`). On any other status the entities
    /// keep their pre-solve geometry.
    pub fn solve(&mut self, solver: &SketchSolver) -> SolveResult {
        let mut params = ParameterTable::build_from_entities(&self.entities, &self.system);
        let result = solver.solve(&mut params, &self.system);
        if result.should_commit() {
            params.apply_to_entities(&mut self.entities);
        }
        result
    }
}
