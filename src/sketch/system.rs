use crate::error::SketchError;
use crate::sketch::constraint::{Constraint, ConstraintId};
use crate::sketch::types::EntityId;
use serde::{Deserialize, Serialize};

/// Ordered collection of active constraints.
///
/// Insertion order matters only for the stable equation-row ordering used
/// when assembling the global residual vector and Jacobian, not for
/// correctness. The system owns its constraints outright; removal returns
/// them by move so undo logic can resurrect them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintSystem {
    constraints: Vec<Constraint>,
}

impl ConstraintSystem {
    pub fn new() -> Self {
        Self { constraints: Vec::new() }
    }

    /// Insert a constraint. Duplicate ids violate the system invariant and
    /// are rejected.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<(), SketchError> {
        if self.constraints.iter().any(|c| c.id() == constraint.id()) {
            return Err(SketchError::DuplicateConstraintId(constraint.id()));
        }
        self.constraints.push(constraint);
        Ok(())
    }

    /// Remove a constraint by id, returning it if present.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Option<Constraint> {
        let pos = self.constraints.iter().position(|c| c.id() == id)?;
        Some(self.constraints.remove(pos))
    }

    pub fn get_constraint(&self, id: ConstraintId) -> Option<&Constraint> {
        self.constraints.iter().find(|c| c.id() == id)
    }

    pub fn get_constraint_mut(&mut self, id: ConstraintId) -> Option<&mut Constraint> {
        self.constraints.iter_mut().find(|c| c.id() == id)
    }

    /// All constraints touching the given entity. Linear scan; constraint
    /// counts in a sketch are small.
    pub fn constraints_for_entity(&self, id: EntityId) -> Vec<&Constraint> {
        self.constraints
            .iter()
            .filter(|c| c.referenced_entity_ids().contains(&id))
            .collect()
    }

    /// Remove and return every constraint touching the given entity,
    /// preserving their relative order.
    pub fn remove_constraints_for_entity(&mut self, id: EntityId) -> Vec<Constraint> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.constraints.len() {
            if self.constraints[i].referenced_entity_ids().contains(&id) {
                removed.push(self.constraints.remove(i));
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Total scalar equation count contributed by all constraints. The
    /// equation row offset of constraint `i` is the prefix sum over `0..i`.
    pub fn total_equations(&self) -> usize {
        self.constraints.iter().map(|c| c.equation_count()).sum()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn clear(&mut self) {
        self.constraints.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }
}
