//! Welfare-maximization problem for books with complex orders
//!
//! Variables, per order in ID order:
//! - `x` continuous acceptance ratio in `[0, 1]`
//! - `y` binary commitment, only for orders that need one (blocks, members
//!   of an exclusive group, either side of a mutually exclusive link)
//!
//! Constraints:
//! - `x <= y` for committed orders, plus `x >= min_ratio * y` for blocks
//! - `sum(y) <= 1` per exclusive group
//! - `x_child <= x_parent` for dependent links
//! - `y_child + y_parent <= 1` for mutually exclusive links
//! - per interval, accepted supply volume equals accepted demand volume
//! - `x = 0` for orders excluded from the book
//!
//! A block has a single `x` for its whole window, which makes its acceptance
//! identical in every interval it covers.
//!
//! The objective is welfare only. Tie-breaking is a second stage: the
//! welfare of the first stage becomes a floor and the ID bonus is added to
//! the objective, so the bonus never pays for a match that loses welfare.

use crate::clearing::solver::{Assignment, MilpProblem, Relation, Variable};
use crate::models::{ClosedOrderBook, ExclusiveGroupId, LinkRelation, Order, Side};
use std::collections::{BTreeMap, BTreeSet};

/// Objective bonus per MW-interval for the earliest order
///
/// Scaled by `(n - rank) / n` and applied in the second stage only.
pub(crate) const TIE_BREAK_WEIGHT: f64 = 1e-6;

/// Relative welfare slack of the second stage
const WELFARE_TOLERANCE: f64 = 1e-9;

/// Ratios closer than this to 0 or 1 are snapped
const RATIO_EPS: f64 = 1e-9;

/// Slack allowed below a block's minimum ratio before it is snapped up
const MIN_RATIO_EPS: f64 = 1e-6;

/// The MILP plus the variable indices of every order
#[derive(Debug, Clone)]
pub(crate) struct Formulation {
    pub problem: MilpProblem,
    /// Ratio variable per order position
    pub ratio_vars: Vec<usize>,
    /// Commitment variable per order position
    pub commit_vars: Vec<Option<usize>>,
}

fn needs_commitment(order: &Order, exclusive_parents: &BTreeSet<usize>, position: usize) -> bool {
    order.is_block()
        || order.exclusive_group().is_some()
        || matches!(
            order.link().map(|l| l.relation),
            Some(LinkRelation::MutuallyExclusive)
        )
        || exclusive_parents.contains(&position)
}

/// Build the welfare problem for `book`, forcing `excluded` positions to zero
pub(crate) fn formulate(book: &ClosedOrderBook, excluded: &BTreeSet<usize>) -> Formulation {
    let orders = book.orders();
    let n = orders.len();

    // Parents of mutually exclusive links need a commitment variable too
    let exclusive_parents: BTreeSet<usize> = orders
        .iter()
        .filter_map(|o| o.link())
        .filter(|l| l.relation == LinkRelation::MutuallyExclusive)
        .filter_map(|l| book.position(l.parent))
        .collect();

    let mut problem = MilpProblem::new();
    let mut ratio_vars = Vec::with_capacity(n);
    let mut commit_vars = Vec::with_capacity(n);

    for (rank, order) in orders.iter().enumerate() {
        let x = problem.add_variable(Variable::unit(order.full_welfare()));
        ratio_vars.push(x);
        if excluded.contains(&rank) {
            problem.add_constraint(vec![(x, 1.0)], Relation::LessEq, 0.0);
        }

        if needs_commitment(order, &exclusive_parents, rank) {
            let y = problem.add_variable(Variable::binary(0.0));
            problem.add_constraint(vec![(x, 1.0), (y, -1.0)], Relation::LessEq, 0.0);
            if let Some(min_ratio) = order.min_acceptance_ratio() {
                problem.add_constraint(vec![(x, 1.0), (y, -min_ratio)], Relation::GreaterEq, 0.0);
            }
            commit_vars.push(Some(y));
        } else {
            commit_vars.push(None);
        }
    }

    let mut groups: BTreeMap<&ExclusiveGroupId, Vec<usize>> = BTreeMap::new();
    for (position, order) in orders.iter().enumerate() {
        if let Some(group) = order.exclusive_group() {
            groups.entry(group).or_default().push(position);
        }
    }
    for members in groups.values() {
        if members.len() < 2 {
            continue;
        }
        let terms = members
            .iter()
            .filter_map(|&p| commit_vars[p])
            .map(|y| (y, 1.0))
            .collect();
        problem.add_constraint(terms, Relation::LessEq, 1.0);
    }

    for (position, order) in orders.iter().enumerate() {
        let Some(link) = order.link() else {
            continue;
        };
        let Some(parent) = book.position(link.parent) else {
            continue;
        };
        match link.relation {
            LinkRelation::Dependent => {
                problem.add_constraint(
                    vec![(ratio_vars[position], 1.0), (ratio_vars[parent], -1.0)],
                    Relation::LessEq,
                    0.0,
                );
            }
            LinkRelation::MutuallyExclusive => {
                if let (Some(child), Some(parent)) = (commit_vars[position], commit_vars[parent]) {
                    problem.add_constraint(
                        vec![(child, 1.0), (parent, 1.0)],
                        Relation::LessEq,
                        1.0,
                    );
                }
            }
        }
    }

    for interval in book.intervals() {
        let terms: Vec<(usize, f64)> = orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.covers(interval))
            .map(|(position, o)| {
                let coef = match o.side() {
                    Side::Supply => o.volume(),
                    Side::Demand => -o.volume(),
                };
                (ratio_vars[position], coef)
            })
            .collect();
        if !terms.is_empty() {
            problem.add_constraint(terms, Relation::Equal, 0.0);
        }
    }

    Formulation {
        problem,
        ratio_vars,
        commit_vars,
    }
}

impl Formulation {
    /// Second-stage problem: welfare at least `optimal_welfare` (less a
    /// rounding slack), objective welfare plus the ID bonus
    pub(crate) fn tie_break_problem(&self, book: &ClosedOrderBook, optimal_welfare: f64) -> MilpProblem {
        let orders = book.orders();
        let n = orders.len();
        let mut problem = self.problem.clone();

        let welfare_terms = orders
            .iter()
            .zip(&self.ratio_vars)
            .map(|(order, &x)| (x, order.full_welfare()))
            .collect();
        let slack = WELFARE_TOLERANCE * (1.0 + optimal_welfare.abs());
        problem.add_constraint(welfare_terms, Relation::GreaterEq, optimal_welfare - slack);

        for (rank, (order, &x)) in orders.iter().zip(&self.ratio_vars).enumerate() {
            let window = order.time_window().len() as f64;
            let bonus = TIE_BREAK_WEIGHT * order.volume() * window * (n - rank) as f64 / n as f64;
            problem.set_objective(x, order.full_welfare() + bonus);
        }
        problem
    }
}

/// Read acceptance ratios per order position out of a solver assignment
pub(crate) fn extract_ratios(
    book: &ClosedOrderBook,
    formulation: &Formulation,
    assignment: &Assignment,
) -> Vec<f64> {
    book.orders()
        .iter()
        .enumerate()
        .map(|(position, order)| {
            let committed = formulation.commit_vars[position]
                .map(|y| assignment.values[y] > 0.5)
                .unwrap_or(true);
            if !committed {
                return 0.0;
            }

            let mut ratio = assignment.values[formulation.ratio_vars[position]].clamp(0.0, 1.0);
            if ratio < RATIO_EPS {
                ratio = 0.0;
            } else if ratio > 1.0 - RATIO_EPS {
                ratio = 1.0;
            }

            if let Some(min_ratio) = order.min_acceptance_ratio() {
                if ratio > 0.0 && ratio < min_ratio && ratio >= min_ratio - MIN_RATIO_EPS {
                    ratio = min_ratio;
                }
            }
            ratio
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderRequest, RunId};

    #[test]
    fn test_variables_and_rows_for_linked_block() {
        let book = ClosedOrderBook::from_requests(
            RunId(0),
            0..2,
            vec![
                OrderRequest::block("G", Side::Supply, 30.0, 10.0, 0..2, 1.0),
                OrderRequest::simple("G", Side::Supply, 20.0, 5.0, 1)
                    .with_link(crate::models::OrderId(1), LinkRelation::MutuallyExclusive),
                OrderRequest::simple("L", Side::Demand, 90.0, 10.0, 0),
            ],
        )
        .unwrap();

        let formulation = formulate(&book, &BTreeSet::new());
        // Block and both sides of the exclusive link get a binary
        assert!(formulation.commit_vars[0].is_some());
        assert!(formulation.commit_vars[1].is_some());
        assert!(formulation.commit_vars[2].is_none());
        assert_eq!(formulation.problem.num_variables(), 5);
        // 2 commitment rows for the block, 1 for the child, 1 link row, 2 balance rows
        assert_eq!(formulation.problem.constraints().len(), 6);
    }

    fn crossing_book() -> ClosedOrderBook {
        ClosedOrderBook::from_requests(
            RunId(0),
            0..1,
            vec![
                OrderRequest::block("G", Side::Supply, 30.0, 10.0, [0], 1.0),
                OrderRequest::simple("L", Side::Demand, 90.0, 10.0, 0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_excluded_orders_are_pinned_to_zero() {
        let book = crossing_book();
        let excluded: BTreeSet<usize> = [1].into_iter().collect();
        let formulation = formulate(&book, &excluded);

        let pinned = formulation
            .problem
            .constraints()
            .iter()
            .filter(|c| c.terms == vec![(formulation.ratio_vars[1], 1.0)] && c.rhs == 0.0)
            .count();
        assert_eq!(pinned, 1);
    }

    #[test]
    fn test_objective_is_pure_welfare_until_second_stage() {
        let book = crossing_book();
        let formulation = formulate(&book, &BTreeSet::new());
        let x = formulation.ratio_vars[1];
        assert_eq!(formulation.problem.variables()[x].objective, 900.0);

        let second = formulation.tie_break_problem(&book, 600.0);
        assert_eq!(
            second.constraints().len(),
            formulation.problem.constraints().len() + 1
        );
        let floor = second.constraints().last().unwrap();
        assert_eq!(floor.relation, Relation::GreaterEq);
        assert!(floor.rhs < 600.0 && floor.rhs > 599.99);
        assert!(second.variables()[x].objective > 900.0);
    }
}
