//! Shortcut unpacking: expands an overlay node path into the underlying
//! original-graph node sequence.

use log::warn;

use crate::graph::ChGraph;

/// Expansion beyond this depth means the overlay is corrupt; the hop is
/// emitted unexpanded and the incident is logged.
const MAX_UNPACK_DEPTH: u32 = 200;

/// First original edge from `source` to `target` in a CSR, by linear scan
/// of the source's bucket.
pub(crate) fn find_edge(first_out: &[u32], head: &[u32], source: u32, target: u32) -> Option<u32> {
    let start = first_out[source as usize];
    let end = first_out[source as usize + 1];
    (start..end).find(|&e| head[e as usize] == target)
}

/// Minimum-weight original edge from `source` to `target`; parallel edges
/// are scanned in full so the cheapest wins, matching what the search
/// relaxed.
pub(crate) fn find_min_edge(g: &ChGraph, source: u32, target: u32) -> Option<u32> {
    let mut best: Option<u32> = None;
    for e in g.orig_edges_from(source) {
        if g.orig_head[e] != target {
            continue;
        }
        match best {
            Some(b) if g.orig_weight[b as usize] <= g.orig_weight[e] => {}
            _ => best = Some(e as u32),
        }
    }
    best
}

/// Resolves the overlay hop a -> b (original travel direction) to its
/// cheapest entry. An ascending hop lives in the forward overlay under `a`;
/// a descending hop is stored reversed in the backward overlay under `b`.
fn lookup_hop(g: &ChGraph, a: u32, b: u32) -> Option<(u32, i32)> {
    let mut best: Option<(u32, i32)> = None;

    for e in g.fwd_edges_from(a) {
        if g.fwd_head[e] == b {
            let candidate = (g.fwd_weight[e], g.fwd_middle[e]);
            if best.map_or(true, |(w, _)| candidate.0 < w) {
                best = Some(candidate);
            }
        }
    }
    for e in g.bwd_edges_from(b) {
        if g.bwd_head[e] == a {
            let candidate = (g.bwd_weight[e], g.bwd_middle[e]);
            if best.map_or(true, |(w, _)| candidate.0 < w) {
                best = Some(candidate);
            }
        }
    }

    best
}

/// Expands every hop of the overlay node path into original edges, using an
/// explicit stack: a shortcut a -> b via m becomes (a, m) then (m, b).
pub(crate) fn unpack_path(g: &ChGraph, overlay_nodes: &[u32]) -> Vec<u32> {
    if overlay_nodes.is_empty() {
        return Vec::new();
    }

    let mut nodes = Vec::with_capacity(overlay_nodes.len() * 2);
    nodes.push(overlay_nodes[0]);

    let mut stack: Vec<(u32, u32, u32)> = Vec::new();

    for pair in overlay_nodes.windows(2) {
        stack.push((pair[0], pair[1], 0));
        while let Some((a, b, depth)) = stack.pop() {
            let middle = match lookup_hop(g, a, b) {
                Some((_, m)) => m,
                None => -1,
            };

            if middle < 0 {
                nodes.push(b);
                continue;
            }
            if depth >= MAX_UNPACK_DEPTH {
                warn!(
                    "unpack depth limit {} exceeded at hop {} -> {}; truncating (corrupt overlay?)",
                    MAX_UNPACK_DEPTH, a, b
                );
                nodes.push(b);
                continue;
            }

            let m = middle as u32;
            // Push in reverse order so (a, m) expands first.
            stack.push((m, b, depth + 1));
            stack.push((a, m, depth + 1));
        }
    }

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ch::{contract, ContractionParams};
    use crate::graph::{build, RawEdge, RoadNetwork};
    use crate::route::search::{run_bidirectional, QueryState, NO_NODE};
    use crate::route::CancelToken;
    use std::collections::HashMap;

    /// Long bidirectional chain; contraction must produce at least one
    /// shortcut over the interior nodes.
    fn chain(n: i64) -> ChGraph {
        let mut node_lat = HashMap::new();
        let mut node_lon = HashMap::new();
        let mut edges = Vec::new();
        for i in 0..n {
            node_lat.insert(i, 1.0);
            node_lon.insert(i, 103.0 + i as f64 * 0.001);
        }
        for i in 0..n - 1 {
            edges.push(RawEdge {
                from_id: i,
                to_id: i + 1,
                weight_mm: 100,
                ..Default::default()
            });
            edges.push(RawEdge {
                from_id: i + 1,
                to_id: i,
                weight_mm: 100,
                ..Default::default()
            });
        }
        let g = build(RoadNetwork {
            edges,
            node_lat,
            node_lon,
        });
        contract(&g, &ContractionParams::default())
    }

    #[test]
    fn unpacks_chain_into_every_original_node() {
        let chg = chain(8);
        let mut qs = QueryState::new(chg.num_nodes);
        qs.touch_fwd(0, 0);
        qs.fwd_pq.push(0, 0);
        qs.touch_bwd(7, 0);
        qs.bwd_pq.push(7, 0);
        let cancel = CancelToken::new();
        let (mu, meet) = run_bidirectional(&chg, &mut qs, &cancel);
        assert_eq!(mu, 700);
        assert_ne!(meet, NO_NODE);

        let overlay_nodes = crate::route::reconstruct_overlay_path(meet, &qs.pred_fwd, &qs.pred_bwd);
        let nodes = unpack_path(&chg, &overlay_nodes);
        assert_eq!(nodes, (0..8).collect::<Vec<u32>>());
    }

    #[test]
    fn find_min_edge_prefers_cheapest_parallel() {
        let mut node_lat = HashMap::new();
        let mut node_lon = HashMap::new();
        node_lat.insert(1, 1.0);
        node_lon.insert(1, 103.0);
        node_lat.insert(2, 1.0);
        node_lon.insert(2, 103.001);
        let g = build(RoadNetwork {
            edges: vec![
                RawEdge {
                    from_id: 1,
                    to_id: 2,
                    weight_mm: 900,
                    ..Default::default()
                },
                RawEdge {
                    from_id: 1,
                    to_id: 2,
                    weight_mm: 400,
                    ..Default::default()
                },
            ],
            node_lat,
            node_lon,
        });
        let chg = contract(&g, &ContractionParams::default());
        let e = find_min_edge(&chg, 0, 1).unwrap();
        assert_eq!(chg.orig_weight[e as usize], 400);
        assert!(find_min_edge(&chg, 1, 0).is_none());
    }

    #[test]
    fn empty_overlay_path_unpacks_to_nothing() {
        let chg = chain(3);
        assert!(unpack_path(&chg, &[]).is_empty());
    }
}
