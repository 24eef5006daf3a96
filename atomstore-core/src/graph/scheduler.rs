//! Recompute Scheduler
//!
//! Determines the order in which invalidated atoms are recomputed after a
//! write. Dependencies always come before their dependents, so a dependent
//! recomputed during the pass never observes a half-updated input.
//!
//! # Algorithm
//!
//! 1. Starting from the changed atoms, walk the live dependent edges
//!    breadth-first and collect every reachable atom.
//! 2. Sort the collected atoms with Kahn's algorithm, counting only edges
//!    inside the collected set.
//! 3. Atoms left over by a cycle are appended in discovery order; the
//!    evaluator reports the cycle itself when it reaches them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use smallvec::SmallVec;

/// Order every node reachable from `roots` so each node follows all of its
/// reachable predecessors.
///
/// `dependents_of` returns the outgoing edges of a node.
pub(crate) fn topological_order<N, F, I>(
    roots: impl IntoIterator<Item = N>,
    mut dependents_of: F,
) -> Vec<N>
where
    N: Copy + Eq + Hash,
    F: FnMut(N) -> I,
    I: IntoIterator<Item = N>,
{
    let mut discovered = Vec::new();
    let mut edges: HashMap<N, SmallVec<[N; 4]>> = HashMap::new();
    let mut seen = HashSet::new();
    let mut queue: VecDeque<N> = roots.into_iter().collect();

    // BFS to collect the affected subgraph
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node) {
            continue;
        }
        discovered.push(node);

        let outgoing: SmallVec<[N; 4]> = dependents_of(node)
            .into_iter()
            .filter(|next| *next != node)
            .collect();
        for &next in &outgoing {
            if !seen.contains(&next) {
                queue.push_back(next);
            }
        }
        edges.insert(node, outgoing);
    }

    let mut in_degree: HashMap<N, usize> = discovered.iter().map(|&node| (node, 0)).collect();
    for outgoing in edges.values() {
        for next in outgoing {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree += 1;
            }
        }
    }

    // Kahn's algorithm
    let mut ready: VecDeque<N> = discovered
        .iter()
        .copied()
        .filter(|node| in_degree.get(node) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(discovered.len());
    let mut placed = HashSet::new();

    while let Some(node) = ready.pop_front() {
        order.push(node);
        placed.insert(node);

        if let Some(outgoing) = edges.get(&node) {
            for next in outgoing {
                if let Some(degree) = in_degree.get_mut(next) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        ready.push_back(*next);
                    }
                }
            }
        }
    }

    if order.len() < discovered.len() {
        order.extend(discovered.into_iter().filter(|node| !placed.contains(node)));
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(u32, u32)]) -> impl FnMut(u32) -> Vec<u32> + '_ {
        move |node| {
            edges
                .iter()
                .filter(|(from, _)| *from == node)
                .map(|(_, to)| *to)
                .collect()
        }
    }

    fn position(order: &[u32], node: u32) -> usize {
        order.iter().position(|&n| n == node).unwrap()
    }

    #[test]
    fn chain_is_ordered() {
        let edges = [(1, 2), (2, 3)];
        let order = topological_order([1], graph(&edges));
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn diamond_puts_join_last() {
        // 1 -> 2 -> 4, 1 -> 3 -> 4
        let edges = [(1, 2), (1, 3), (2, 4), (3, 4)];
        let order = topological_order([1], graph(&edges));

        assert_eq!(order.len(), 4);
        assert!(position(&order, 2) < position(&order, 4));
        assert!(position(&order, 3) < position(&order, 4));
    }

    #[test]
    fn longer_path_still_wins() {
        // 4 is reachable directly from 1 and through 2 -> 3
        let edges = [(1, 4), (1, 2), (2, 3), (3, 4)];
        let order = topological_order([1], graph(&edges));
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn multiple_roots_share_dependents() {
        let edges = [(1, 3), (2, 3)];
        let order = topological_order([1, 2], graph(&edges));
        assert_eq!(order.len(), 3);
        assert_eq!(order[2], 3);
    }

    #[test]
    fn cycles_are_appended_not_dropped() {
        let edges = [(1, 2), (2, 3), (3, 2)];
        let order = topological_order([1], graph(&edges));

        assert_eq!(order[0], 1);
        assert_eq!(order.len(), 3);
        assert!(order.contains(&2));
        assert!(order.contains(&3));
    }

    #[test]
    fn self_edges_are_ignored() {
        let edges = [(1, 1), (1, 2)];
        let order = topological_order([1], graph(&edges));
        assert_eq!(order, vec![1, 2]);
    }
}
