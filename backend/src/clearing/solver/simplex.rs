//! Dense two-phase primal simplex
//!
//! Solves the LP relaxation of a [`MilpProblem`] under per-node variable
//! bounds. Bounds are turned into explicit rows; all variables are
//! non-negative.
//!
//! Phase 1 minimizes the sum of artificial variables to find a feasible
//! basis, phase 2 maximizes the real objective. Entering and leaving
//! variables follow Bland's rule, which rules out cycling and makes the
//! pivot sequence a pure function of the input.

use super::{MilpProblem, Relation, SolverError};

/// Reduced costs above this value are improving
const OPTIMALITY_EPS: f64 = 1e-9;

/// Smallest usable pivot element
const PIVOT_EPS: f64 = 1e-9;

/// Relative slack allowed on phase 1 optimum
const FEASIBILITY_EPS: f64 = 1e-7;

/// Result of one LP solve
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LpOutcome {
    Optimal { values: Vec<f64>, objective: f64 },
    Infeasible,
}

struct Row {
    terms: Vec<(usize, f64)>,
    relation: Relation,
    rhs: f64,
}

struct Tableau {
    /// Row-major, `width` entries per row, last entry is the right-hand side
    cells: Vec<f64>,
    width: usize,
    rows: usize,
    basis: Vec<usize>,
    /// Columns at or after this index are artificial
    artificial_start: usize,
}

impl Tableau {
    fn at(&self, row: usize, col: usize) -> f64 {
        self.cells[row * self.width + col]
    }

    fn rhs(&self, row: usize) -> f64 {
        self.cells[row * self.width + self.width - 1]
    }

    fn columns(&self) -> usize {
        self.width - 1
    }

    fn pivot(&mut self, objective: &mut [f64], row: usize, col: usize) {
        let width = self.width;
        let pivot = self.at(row, col);
        let start = row * width;
        for k in 0..width {
            self.cells[start + k] /= pivot;
        }
        let pivot_row: Vec<f64> = self.cells[start..start + width].to_vec();

        for r in 0..self.rows {
            if r == row {
                continue;
            }
            let factor = self.cells[r * width + col];
            if factor != 0.0 {
                let base = r * width;
                for k in 0..width {
                    self.cells[base + k] -= factor * pivot_row[k];
                }
            }
        }

        let factor = objective[col];
        if factor != 0.0 {
            for k in 0..width {
                objective[k] -= factor * pivot_row[k];
            }
        }

        self.basis[row] = col;
    }

    /// Pivot until no allowed column has a positive reduced cost
    fn optimize(
        &mut self,
        objective: &mut [f64],
        allowed_columns: usize,
        iterations: &mut usize,
        max_iterations: usize,
    ) -> Result<(), SolverError> {
        loop {
            let Some(entering) = (0..allowed_columns).find(|&j| objective[j] > OPTIMALITY_EPS)
            else {
                return Ok(());
            };

            let mut leaving: Option<(usize, f64)> = None;
            for r in 0..self.rows {
                let coef = self.at(r, entering);
                if coef <= PIVOT_EPS {
                    continue;
                }
                let ratio = self.rhs(r).max(0.0) / coef;
                leaving = match leaving {
                    None => Some((r, ratio)),
                    Some((best, best_ratio)) => {
                        if ratio < best_ratio - OPTIMALITY_EPS
                            || (ratio <= best_ratio + OPTIMALITY_EPS
                                && self.basis[r] < self.basis[best])
                        {
                            Some((r, ratio))
                        } else {
                            Some((best, best_ratio))
                        }
                    }
                };
            }

            let Some((row, _)) = leaving else {
                return Err(SolverError::Unbounded);
            };

            self.pivot(objective, row, entering);
            *iterations += 1;
            if *iterations > max_iterations {
                return Err(SolverError::IterationLimit {
                    limit: max_iterations,
                });
            }
        }
    }
}

/// Solve the LP relaxation of `problem` with per-variable `bounds`
pub(crate) fn solve_relaxation(
    problem: &MilpProblem,
    bounds: &[(f64, f64)],
    max_iterations: usize,
) -> Result<LpOutcome, SolverError> {
    let n = problem.num_variables();

    if bounds.iter().any(|&(lower, upper)| lower > upper + FEASIBILITY_EPS) {
        return Ok(LpOutcome::Infeasible);
    }

    // Collect rows, normalized to a non-negative right-hand side
    let mut rows: Vec<Row> = Vec::with_capacity(problem.constraints().len() + 2 * n);
    for constraint in problem.constraints() {
        rows.push(Row {
            terms: constraint.terms.clone(),
            relation: constraint.relation,
            rhs: constraint.rhs,
        });
    }
    for (j, &(lower, upper)) in bounds.iter().enumerate() {
        if upper.is_finite() {
            rows.push(Row {
                terms: vec![(j, 1.0)],
                relation: Relation::LessEq,
                rhs: upper,
            });
        }
        if lower > 0.0 {
            rows.push(Row {
                terms: vec![(j, 1.0)],
                relation: Relation::GreaterEq,
                rhs: lower,
            });
        }
    }
    for row in &mut rows {
        if row.rhs < 0.0 {
            row.rhs = -row.rhs;
            for term in &mut row.terms {
                term.1 = -term.1;
            }
            row.relation = match row.relation {
                Relation::LessEq => Relation::GreaterEq,
                Relation::GreaterEq => Relation::LessEq,
                Relation::Equal => Relation::Equal,
            };
        }
    }

    // Column layout: structural | slack + surplus | artificial | rhs
    let slack_count = rows
        .iter()
        .filter(|r| r.relation != Relation::Equal)
        .count();
    let artificial_count = rows
        .iter()
        .filter(|r| r.relation != Relation::LessEq)
        .count();
    let artificial_start = n + slack_count;
    let columns = artificial_start + artificial_count;
    let width = columns + 1;
    let m = rows.len();

    let mut tableau = Tableau {
        cells: vec![0.0; m * width],
        width,
        rows: m,
        basis: vec![0; m],
        artificial_start,
    };

    let mut next_slack = n;
    let mut next_artificial = artificial_start;
    for (r, row) in rows.iter().enumerate() {
        let base = r * width;
        for &(j, coef) in &row.terms {
            tableau.cells[base + j] += coef;
        }
        tableau.cells[base + columns] = row.rhs;
        match row.relation {
            Relation::LessEq => {
                tableau.cells[base + next_slack] = 1.0;
                tableau.basis[r] = next_slack;
                next_slack += 1;
            }
            Relation::GreaterEq => {
                tableau.cells[base + next_slack] = -1.0;
                next_slack += 1;
                tableau.cells[base + next_artificial] = 1.0;
                tableau.basis[r] = next_artificial;
                next_artificial += 1;
            }
            Relation::Equal => {
                tableau.cells[base + next_artificial] = 1.0;
                tableau.basis[r] = next_artificial;
                next_artificial += 1;
            }
        }
    }

    let mut iterations = 0;

    // Phase 1: maximize -(sum of artificials)
    if artificial_count > 0 {
        let mut phase_one = vec![0.0; width];
        let mut rhs_scale: f64 = 1.0;
        for r in 0..m {
            if tableau.basis[r] >= artificial_start {
                let base = r * width;
                for j in 0..artificial_start {
                    phase_one[j] += tableau.cells[base + j];
                }
                phase_one[columns] += tableau.cells[base + columns];
                rhs_scale = rhs_scale.max(tableau.cells[base + columns].abs());
            }
        }

        tableau.optimize(&mut phase_one, columns, &mut iterations, max_iterations)?;

        // phase_one[rhs] holds the remaining artificial mass
        if phase_one[columns] > FEASIBILITY_EPS * rhs_scale {
            return Ok(LpOutcome::Infeasible);
        }

        // Drive zero-level artificials out of the basis where possible
        for r in 0..m {
            if tableau.basis[r] < artificial_start {
                continue;
            }
            if let Some(col) =
                (0..artificial_start).find(|&j| tableau.at(r, j).abs() > PIVOT_EPS)
            {
                tableau.pivot(&mut phase_one, r, col);
            }
        }
    }

    // Phase 2: reduced costs of the real objective for the current basis
    let cost = |col: usize| -> f64 {
        if col < n {
            problem.variables()[col].objective
        } else {
            0.0
        }
    };
    let mut phase_two = vec![0.0; width];
    for (j, entry) in phase_two.iter_mut().enumerate().take(tableau.columns()) {
        *entry = cost(j);
    }
    for r in 0..m {
        let basic_cost = cost(tableau.basis[r]);
        if basic_cost != 0.0 {
            let base = r * width;
            for k in 0..width {
                phase_two[k] -= basic_cost * tableau.cells[base + k];
            }
        }
    }

    tableau.optimize(
        &mut phase_two,
        tableau.artificial_start,
        &mut iterations,
        max_iterations,
    )?;

    let mut values = vec![0.0; n];
    for r in 0..m {
        let col = tableau.basis[r];
        if col < n {
            values[col] = tableau.rhs(r).max(0.0);
        }
    }
    let objective = problem.objective_value(&values);

    Ok(LpOutcome::Optimal { values, objective })
}
