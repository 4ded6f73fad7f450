use crate::sketch::params::ParameterTable;
use crate::sketch::system::ConstraintSystem;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Classification of one solve attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    /// All constraints satisfied and no free parameters remain.
    Success,
    /// Converged, but the Jacobian has a nonzero null space: the solution
    /// is not unique.
    UnderConstrained,
    /// Equation count exceeds the solvable rank, trivially (no parameters)
    /// or after exhausting the iteration budget.
    OverConstrained,
    /// Numerically well-ranked but the residual will not go to zero:
    /// contradictory constraint targets.
    Inconsistent,
    /// Iteration budget ran out without a clear rank or consistency verdict.
    FailedToConverge,
    /// Nothing to solve; a no-op signal, not an error.
    NoConstraints,
}

/// Result of constraint solving with detailed status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveResult {
    pub status: SolveStatus,
    /// Number of iterations actually executed
    pub iterations: usize,
    /// Euclidean norm of the final residual vector
    pub residual_norm: f64,
    /// Estimated remaining degrees of freedom
    /// (parameter count minus numerical Jacobian rank)
    pub degrees_of_freedom: usize,
    /// Human-readable status message
    pub message: String,
}

impl SolveResult {
    /// Returns true if the sketch is fully constrained and satisfied
    pub fn is_fully_constrained(&self) -> bool {
        self.status == SolveStatus::Success
    }

    /// Returns true if a constraint-satisfying configuration was found
    pub fn is_solved(&self) -> bool {
        matches!(self.status, SolveStatus::Success | SolveStatus::UnderConstrained)
    }

    /// Commit policy for callers: solved geometry is worth writing back on
    /// `Success` and `UnderConstrained`, and on nothing else.
    pub fn should_commit(&self) -> bool {
        self.is_solved()
    }
}

/// Damped Gauss-Newton (Levenberg-Marquardt) solver over a parameter table
/// and a constraint system.
///
/// Every `solve` call is a fresh run seeded by whatever values are currently
/// in the table - typically the entities' as-drawn geometry. No state
/// persists between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SketchSolver {
    /// Hard iteration cap (default 100)
    pub max_iterations: usize,
    /// Convergence threshold on the residual vector norm (default 1e-10)
    pub tolerance: f64,
    /// Levenberg-Marquardt lambda added to the normal-equations diagonal
    /// (default 1.0)
    pub damping: f64,
}

/// Singular-value cutoff for the SVD rank decision. This tolerance fixes
/// the Success/UnderConstrained boundary and the OverConstrained/
/// FailedToConverge boundary at near-singular Jacobians.
const RANK_EPS: f64 = 1e-9;

/// Singular-value cutoff for the least-squares step solve.
const LSTSQ_EPS: f64 = 1e-12;

impl Default for SketchSolver {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-10,
            damping: 1.0,
        }
    }
}

impl SketchSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn solve(&self, params: &mut ParameterTable, system: &ConstraintSystem) -> SolveResult {
        let equations = system.total_equations();
        let n = params.parameter_count();

        if system.is_empty() || equations == 0 {
            return SolveResult {
                status: SolveStatus::NoConstraints,
                iterations: 0,
                residual_norm: 0.0,
                degrees_of_freedom: n,
                message: "No constraints to solve".to_string(),
            };
        }
        if n == 0 {
            return SolveResult {
                status: SolveStatus::OverConstrained,
                iterations: 0,
                residual_norm: 0.0,
                degrees_of_freedom: 0,
                message: "Constraints reference no solvable parameters".to_string(),
            };
        }

        let mut iterations = 0;
        let mut residual_norm;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;

            let residuals = assemble_residuals(params, system, equations);
            residual_norm = residuals.norm();

            if residual_norm < self.tolerance {
                let jacobian = assemble_jacobian(params, system, equations, n);
                let rank = jacobian.rank(RANK_EPS);
                let dof = n.saturating_sub(rank);
                return if dof > 0 {
                    SolveResult {
                        status: SolveStatus::UnderConstrained,
                        iterations,
                        residual_norm,
                        degrees_of_freedom: dof,
                        message: format!("Under-constrained by {} DOF", dof),
                    }
                } else {
                    SolveResult {
                        status: SolveStatus::Success,
                        iterations,
                        residual_norm,
                        degrees_of_freedom: 0,
                        message: "Fully constrained".to_string(),
                    }
                };
            }

            let jacobian = assemble_jacobian(params, system, equations, n);

            // Damped normal equations: (J^T J + lambda I) dx = -J^T f.
            // The lambda term keeps the system solvable when J^T J is
            // singular or ill-conditioned.
            let jt = jacobian.transpose();
            let mut normal = &jt * &jacobian;
            for i in 0..n {
                normal[(i, i)] += self.damping;
            }
            let rhs = -(&jt * &residuals);

            let svd = normal.svd(true, true);
            let Ok(step) = svd.solve(&rhs, LSTSQ_EPS) else {
                break;
            };
            *params.values_mut() += &step;
        }

        // Iteration budget exhausted: diagnose.
        let residuals = assemble_residuals(params, system, equations);
        residual_norm = residuals.norm();
        let jacobian = assemble_jacobian(params, system, equations, n);
        let rank = jacobian.rank(RANK_EPS);
        let dof = n.saturating_sub(rank);

        if equations > rank {
            SolveResult {
                status: SolveStatus::OverConstrained,
                iterations,
                residual_norm,
                degrees_of_freedom: dof,
                message: format!("Over-constrained: {} equations exceed rank {}", equations, rank),
            }
        } else if residual_norm > 100.0 * self.tolerance {
            SolveResult {
                status: SolveStatus::Inconsistent,
                iterations,
                residual_norm,
                degrees_of_freedom: dof,
                message: "Inconsistent constraints: residual does not vanish".to_string(),
            }
        } else {
            SolveResult {
                status: SolveStatus::FailedToConverge,
                iterations,
                residual_norm,
                degrees_of_freedom: dof,
                message: "Solver did not converge within the iteration budget".to_string(),
            }
        }
    }
}

fn assemble_residuals(
    params: &ParameterTable,
    system: &ConstraintSystem,
    equations: usize,
) -> DVector<f64> {
    let mut residuals = DVector::zeros(equations);
    let mut row = 0;
    for constraint in system.iter() {
        constraint.evaluate(params, &mut residuals, row);
        row += constraint.equation_count();
    }
    residuals
}

fn assemble_jacobian(
    params: &ParameterTable,
    system: &ConstraintSystem,
    equations: usize,
    parameters: usize,
) -> DMatrix<f64> {
    let mut jacobian = DMatrix::zeros(equations, parameters);
    let mut row = 0;
    for constraint in system.iter() {
        constraint.jacobian(params, &mut jacobian, row);
        row += constraint.equation_count();
    }
    jacobian
}
