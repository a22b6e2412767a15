//! Depth-first branch-and-bound over LP relaxations
//!
//! Nodes are explored last-in first-out. At each node the lowest-index
//! integer variable with a fractional value is branched on; the "round up"
//! child is explored first so that commitments (accepting a block, choosing
//! a group member) are tried in ID order before rejections.
//!
//! A node is pruned when its relaxation is infeasible or its bound does not
//! beat the incumbent. Only strictly better incumbents replace the current
//! one, so among equal-objective solutions the first one found wins.

use super::simplex::{solve_relaxation, LpOutcome};
use super::{Assignment, MilpProblem, MilpSolver, SolverConfig, SolverError};
use tracing::{debug, warn};

/// Fractional parts below this are treated as integral
const INTEGRALITY_EPS: f64 = 1e-6;

/// Relative improvement required to replace the incumbent or keep a node
const BOUND_EPS: f64 = 1e-9;

/// Deterministic MILP solver bundled with the crate
#[derive(Debug, Clone, Default)]
pub struct BranchAndBound {
    config: SolverConfig,
}

impl BranchAndBound {
    pub fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SolverConfig {
        self.config
    }
}

fn first_fractional(problem: &MilpProblem, values: &[f64]) -> Option<usize> {
    problem
        .variables()
        .iter()
        .zip(values)
        .position(|(variable, &value)| {
            let fraction = value - value.floor();
            variable.integer && fraction > INTEGRALITY_EPS && fraction < 1.0 - INTEGRALITY_EPS
        })
}

fn beats(candidate: f64, incumbent: f64) -> bool {
    candidate > incumbent + BOUND_EPS * incumbent.abs().max(1.0)
}

impl MilpSolver for BranchAndBound {
    fn name(&self) -> &str {
        "branch-and-bound"
    }

    fn solve(&self, problem: &MilpProblem) -> Result<Assignment, SolverError> {
        let root: Vec<(f64, f64)> = problem
            .variables()
            .iter()
            .map(|v| (v.lower, v.upper))
            .collect();

        let mut stack = vec![root];
        let mut incumbent: Option<(Vec<f64>, f64)> = None;
        let mut nodes = 0;
        let mut limit_hit = false;

        while let Some(bounds) = stack.pop() {
            if nodes >= self.config.max_nodes {
                limit_hit = true;
                break;
            }
            nodes += 1;

            let (values, objective) =
                match solve_relaxation(problem, &bounds, self.config.max_lp_iterations)? {
                    LpOutcome::Infeasible => continue,
                    LpOutcome::Optimal { values, objective } => (values, objective),
                };

            if let Some((_, best)) = &incumbent {
                if !beats(objective, *best) {
                    continue;
                }
            }

            match first_fractional(problem, &values) {
                None => {
                    debug!(node = nodes, objective, "new incumbent");
                    incumbent = Some((values, objective));
                }
                Some(j) => {
                    let mut down = bounds.clone();
                    down[j].1 = values[j].floor();
                    let mut up = bounds;
                    up[j].0 = values[j].ceil();
                    stack.push(down);
                    stack.push(up);
                }
            }
        }

        match incumbent {
            Some((mut values, _)) => {
                for (value, variable) in values.iter_mut().zip(problem.variables()) {
                    if variable.integer {
                        *value = value.round();
                    }
                }
                if limit_hit {
                    warn!(
                        nodes,
                        limit = self.config.max_nodes,
                        "node limit reached; returning best known solution"
                    );
                }
                let objective = problem.objective_value(&values);
                Ok(Assignment {
                    values,
                    objective,
                    nodes_explored: nodes,
                    proven_optimal: !limit_hit,
                })
            }
            None if limit_hit => Err(SolverError::NodeLimit {
                limit: self.config.max_nodes,
            }),
            None => Err(SolverError::Infeasible),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clearing::solver::{Relation, Variable};

    /// Knapsack: values 10, 13, 7 with weights 4, 6, 3 and capacity 9
    fn knapsack() -> MilpProblem {
        let mut p = MilpProblem::new();
        let a = p.add_variable(Variable::binary(10.0));
        let b = p.add_variable(Variable::binary(13.0));
        let c = p.add_variable(Variable::binary(7.0));
        p.add_constraint(vec![(a, 4.0), (b, 6.0), (c, 3.0)], Relation::LessEq, 9.0);
        p
    }

    #[test]
    fn test_knapsack_optimum() {
        let solution = BranchAndBound::default().solve(&knapsack()).unwrap();
        assert_eq!(solution.values, vec![0.0, 1.0, 1.0]);
        assert!((solution.objective - 20.0).abs() < 1e-9);
        assert!(solution.proven_optimal);
    }

    #[test]
    fn test_node_limit_without_incumbent_fails() {
        let solver = BranchAndBound::new(SolverConfig {
            max_nodes: 1,
            max_lp_iterations: 1_000,
        });
        // Root relaxation is fractional, so one node cannot produce an incumbent
        assert_eq!(
            solver.solve(&knapsack()),
            Err(SolverError::NodeLimit { limit: 1 })
        );
    }

    #[test]
    fn test_identical_problems_give_identical_assignments() {
        let solver = BranchAndBound::default();
        let first = solver.solve(&knapsack()).unwrap();
        let second = solver.solve(&knapsack()).unwrap();
        assert_eq!(first, second);
    }
}
