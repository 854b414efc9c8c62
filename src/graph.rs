//! Cycle detection shared by tree building, structural edits and link
//! queries.

use std::{collections::HashMap, hash::Hash};

use petgraph::{algo::tarjan_scc, graphmap::DiGraphMap};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    Grey,
    Black,
}

/// Finds one cycle using a three-colour depth-first search.
///
/// Returns the nodes on the cycle in traversal order, or `None` if the graph
/// is acyclic. Nodes are visited in the order `nodes` yields them, so the
/// result is deterministic.
pub(crate) fn find_cycle<N, I, F>(nodes: I, successors: F) -> Option<Vec<N>>
where
    N: Copy + Eq + Hash,
    I: IntoIterator<Item = N>,
    F: Fn(N) -> Vec<N>,
{
    let mut colours: HashMap<N, Colour> = HashMap::new();

    for start in nodes {
        if colours.contains_key(&start) {
            continue;
        }

        colours.insert(start, Colour::Grey);
        let mut stack = vec![(start, successors(start), 0_usize)];

        while let Some((node, next, cursor)) = stack.last_mut() {
            let Some(&successor) = next.get(*cursor) else {
                colours.insert(*node, Colour::Black);
                stack.pop();
                continue;
            };
            *cursor += 1;

            match colours.get(&successor) {
                Some(Colour::Black) => {}
                Some(Colour::Grey) => {
                    let from = stack
                        .iter()
                        .position(|(candidate, ..)| *candidate == successor)
                        .unwrap_or(0);
                    return Some(stack[from..].iter().map(|(n, ..)| *n).collect());
                }
                None => {
                    colours.insert(successor, Colour::Grey);
                    stack.push((successor, successors(successor), 0));
                }
            }
        }
    }

    None
}

/// Enumerates every elementary cycle of a directed graph over the nodes
/// `0..node_count`.
///
/// The search is restricted to strongly connected components. Each cycle
/// starts at its lowest-numbered node and cycles are returned in ascending
/// order, so callers that number nodes in document order get a stable
/// listing.
pub(crate) fn elementary_cycles(node_count: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    cycles_in_components(node_count, edges, |_| true).1
}

/// Like [`elementary_cycles`], but only searches the strongly connected
/// components holding at least one of `seeds`.
///
/// Also returns the members of those components, sorted.
pub(crate) fn elementary_cycles_through(
    node_count: usize,
    edges: &[(usize, usize)],
    seeds: &[usize],
) -> (Vec<usize>, Vec<Vec<usize>>) {
    cycles_in_components(node_count, edges, |component| {
        component.iter().any(|node| seeds.contains(node))
    })
}

fn cycles_in_components(
    node_count: usize,
    edges: &[(usize, usize)],
    selected: impl Fn(&[usize]) -> bool,
) -> (Vec<usize>, Vec<Vec<usize>>) {
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::with_capacity(node_count, edges.len());
    for &(from, to) in edges {
        graph.add_edge(from, to, ());
    }

    let mut searched = Vec::new();
    let mut cycles = Vec::new();
    for component in tarjan_scc(&graph) {
        if !selected(&component) {
            continue;
        }
        searched.extend_from_slice(&component);

        if component.len() == 1 {
            let node = component[0];
            if graph.contains_edge(node, node) {
                cycles.push(vec![node]);
            }
            continue;
        }

        let mut members = component;
        members.sort_unstable();
        for (i, &start) in members.iter().enumerate() {
            let allowed = &members[i..];
            let mut path = vec![start];
            extend_cycles(&graph, start, start, allowed, &mut path, &mut cycles);
        }
    }

    searched.sort_unstable();
    cycles.sort();
    (searched, cycles)
}

fn extend_cycles(
    graph: &DiGraphMap<usize, ()>,
    start: usize,
    node: usize,
    allowed: &[usize],
    path: &mut Vec<usize>,
    cycles: &mut Vec<Vec<usize>>,
) {
    let mut successors: Vec<usize> = graph.neighbors(node).collect();
    successors.sort_unstable();

    for successor in successors {
        if successor == start {
            cycles.push(path.clone());
        } else if allowed.binary_search(&successor).is_ok() && !path.contains(&successor) {
            path.push(successor);
            extend_cycles(graph, start, successor, allowed, path, cycles);
            path.pop();
        }
    }
}
