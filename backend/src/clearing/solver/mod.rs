//! Mixed-integer linear programming
//!
//! The clearing formulation is expressed as a solver-agnostic
//! [`MilpProblem`] (maximization, non-negative variables with bounds) and
//! handed to any [`MilpSolver`]. The crate ships [`BranchAndBound`], a
//! deterministic depth-first branch-and-bound over a dense two-phase simplex.
//!
//! # Determinism
//!
//! Solvers must return identical assignments for identical problems. The
//! bundled solver uses Bland's pivoting rule, branches on the lowest-index
//! fractional variable, and limits work by node and iteration counts only
//! (never wall-clock time).

pub mod branch_bound;
pub(crate) mod simplex;

pub use branch_bound::BranchAndBound;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Constraint sense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    LessEq,
    GreaterEq,
    Equal,
}

/// One decision variable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variable {
    /// Lower bound (must be >= 0)
    pub lower: f64,
    /// Upper bound (may be infinite)
    pub upper: f64,
    /// Objective coefficient (maximized)
    pub objective: f64,
    /// Variable must take an integer value
    pub integer: bool,
}

impl Variable {
    /// Continuous variable in `[0, 1]`
    pub fn unit(objective: f64) -> Self {
        Self {
            lower: 0.0,
            upper: 1.0,
            objective,
            integer: false,
        }
    }

    /// Binary variable
    pub fn binary(objective: f64) -> Self {
        Self {
            lower: 0.0,
            upper: 1.0,
            objective,
            integer: true,
        }
    }
}

/// Linear constraint `sum(coef * x) <relation> rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub terms: Vec<(usize, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

/// Maximization problem over non-negative variables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MilpProblem {
    variables: Vec<Variable>,
    constraints: Vec<Constraint>,
}

impl MilpProblem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable and return its index
    pub fn add_variable(&mut self, variable: Variable) -> usize {
        debug_assert!(variable.lower >= 0.0, "variables must be non-negative");
        self.variables.push(variable);
        self.variables.len() - 1
    }

    pub fn add_constraint(&mut self, terms: Vec<(usize, f64)>, relation: Relation, rhs: f64) {
        self.constraints.push(Constraint {
            terms,
            relation,
            rhs,
        });
    }

    /// Replace the objective coefficient of variable `index`
    pub fn set_objective(&mut self, index: usize, objective: f64) {
        if let Some(variable) = self.variables.get_mut(index) {
            variable.objective = objective;
        }
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    /// Objective value of an assignment
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.variables
            .iter()
            .zip(values)
            .map(|(v, x)| v.objective * x)
            .sum()
    }
}

/// Solution of a [`MilpProblem`]
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub values: Vec<f64>,
    pub objective: f64,
    pub nodes_explored: usize,
    /// False when the search stopped at the node limit with an incumbent
    pub proven_optimal: bool,
}

/// Solver failure (fatal for a clearing run)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SolverError {
    #[error("LP iteration limit of {limit} reached")]
    IterationLimit { limit: usize },

    #[error("Problem is unbounded")]
    Unbounded,

    #[error("Problem has no feasible solution")]
    Infeasible,

    #[error("Node limit of {limit} reached without a feasible solution")]
    NodeLimit { limit: usize },

    #[error("Energy balance violated in interval {interval} by {imbalance}")]
    BalanceViolation { interval: usize, imbalance: f64 },
}

/// Work limits for the bundled solver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Branch-and-bound nodes explored before giving up
    pub max_nodes: usize,
    /// Simplex pivots per LP relaxation
    pub max_lp_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_nodes: 10_000,
            max_lp_iterations: 200_000,
        }
    }
}

/// `solve(constraints) -> assignment` seam between clearing and solver
pub trait MilpSolver: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Maximize the problem's objective
    fn solve(&self, problem: &MilpProblem) -> Result<Assignment, SolverError>;
}
