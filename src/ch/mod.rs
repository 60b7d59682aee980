//! Contraction hierarchies preprocessing.
//!
//! Repeatedly contracts the minimum-priority node, adding shortcuts that
//! preserve shortest-path distances through it, then partitions the final
//! working adjacency into the forward and backward upward CSR overlays.

mod witness;

pub mod validate;

pub use witness::ContractionParams;

use log::info;

use crate::graph::{ChGraph, Graph};
use witness::{batch_witness_search, WitnessState};

/// An entry in the mutable working adjacency. `middle` is -1 for original
/// edges, otherwise the contracted node the shortcut bypasses.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AdjEntry {
    pub to: u32,
    pub weight: u32,
    pub middle: i32,
}

#[derive(Debug, Clone, Copy)]
struct Shortcut {
    from: u32,
    to: u32,
    weight: u32,
}

/// Runs contraction hierarchies preprocessing on the component-filtered graph.
pub fn contract(g: &Graph, params: &ContractionParams) -> ChGraph {
    let n = g.num_nodes;
    if n == 0 {
        return ChGraph::empty();
    }
    let nu = n as usize;

    // Mutable forward and reverse adjacency built from the CSR graph.
    // Shortcuts are appended during contraction; nothing is ever removed,
    // contracted endpoints are filtered during scans instead.
    let mut out_adj: Vec<Vec<AdjEntry>> = vec![Vec::new(); nu];
    let mut in_adj: Vec<Vec<AdjEntry>> = vec![Vec::new(); nu];

    for u in 0..n {
        for e in g.edges_from(u) {
            let v = g.head[e];
            let w = g.weight[e];
            out_adj[u as usize].push(AdjEntry {
                to: v,
                weight: w,
                middle: -1,
            });
            in_adj[v as usize].push(AdjEntry {
                to: u,
                weight: w,
                middle: -1,
            });
        }
    }

    let mut contracted = vec![false; nu];
    let mut rank = vec![0u32; nu];
    let mut contracted_neighbors = vec![0i64; nu];
    let mut level = vec![0i64; nu];

    let mut pq = PriorityQueue::with_capacity(nu);
    for i in 0..n {
        pq.push(compute_priority(&out_adj, &in_adj, i, &contracted, 0, 0), i);
    }

    let mut ws = WitnessState::new(n);

    info!("starting contraction of {} nodes", n);

    let mut total_shortcuts: u64 = 0;
    let mut order: u32 = 0;

    while let Some((priority, node)) = pq.pop() {
        if contracted[node as usize] {
            continue;
        }

        // Lazy update: recompute on pop, re-insert if the entry went stale
        // and something cheaper is waiting.
        let new_priority = compute_priority(
            &out_adj,
            &in_adj,
            node,
            &contracted,
            contracted_neighbors[node as usize],
            level[node as usize],
        );
        if new_priority > priority {
            if let Some(min) = pq.peek_priority() {
                if new_priority > min {
                    pq.push(new_priority, node);
                    continue;
                }
            }
        }

        let shortcuts = find_shortcuts(&mut ws, &out_adj, &in_adj, node, &contracted, params);

        // Safety valve: a node this dense would blow up the overlay. Stop
        // here; everything still uncontracted becomes the core. Core edges
        // enter both overlays below, so core queries degrade to plain
        // bidirectional Dijkstra and stay correct.
        if shortcuts.len() > params.max_shortcuts_per_node {
            info!(
                "stopping contraction: node {} needs {} shortcuts (limit {}), {} nodes remain in core",
                node,
                shortcuts.len(),
                params.max_shortcuts_per_node,
                n - order
            );
            break;
        }

        contracted[node as usize] = true;
        rank[node as usize] = order;
        order += 1;
        total_shortcuts += shortcuts.len() as u64;

        for sc in &shortcuts {
            out_adj[sc.from as usize].push(AdjEntry {
                to: sc.to,
                weight: sc.weight,
                middle: node as i32,
            });
            in_adj[sc.to as usize].push(AdjEntry {
                to: sc.from,
                weight: sc.weight,
                middle: node as i32,
            });
        }

        let node_level = level[node as usize];
        for e in &out_adj[node as usize] {
            if !contracted[e.to as usize] {
                contracted_neighbors[e.to as usize] += 1;
                if node_level + 1 > level[e.to as usize] {
                    level[e.to as usize] = node_level + 1;
                }
            }
        }
        for e in &in_adj[node as usize] {
            if !contracted[e.to as usize] {
                contracted_neighbors[e.to as usize] += 1;
                if node_level + 1 > level[e.to as usize] {
                    level[e.to as usize] = node_level + 1;
                }
            }
        }

        // Adaptive log interval: more frequent near the end.
        let remaining = n - order;
        let log_interval = if remaining < 1_000 {
            100
        } else if remaining < 10_000 {
            1_000
        } else if remaining < 100_000 {
            10_000
        } else {
            50_000
        };
        if order % log_interval == 0 {
            info!(
                "contracted {}/{} nodes, {} shortcuts so far",
                order, n, total_shortcuts
            );
        }
    }

    // Remaining uncontracted nodes form the core at the top of the
    // hierarchy, ranked in index order.
    let mut core = vec![false; nu];
    let mut core_size = 0u32;
    for i in 0..nu {
        if !contracted[i] {
            core[i] = true;
            contracted[i] = true;
            rank[i] = order;
            order += 1;
            core_size += 1;
        }
    }

    info!(
        "contraction complete: {} shortcuts ({:.1}x original edges), {} core nodes",
        total_shortcuts,
        total_shortcuts as f64 / g.num_edges.max(1) as f64,
        core_size
    );

    build_overlay(g, &out_adj, &in_adj, rank, &core)
}

/// Shortcuts needed to contract `node`, via batch witness search: one
/// Dijkstra per active incoming neighbor instead of one per (in, out) pair.
fn find_shortcuts(
    ws: &mut WitnessState,
    out_adj: &[Vec<AdjEntry>],
    in_adj: &[Vec<AdjEntry>],
    node: u32,
    contracted: &[bool],
    params: &ContractionParams,
) -> Vec<Shortcut> {
    let incoming: Vec<AdjEntry> = in_adj[node as usize]
        .iter()
        .filter(|e| !contracted[e.to as usize])
        .copied()
        .collect();
    let outgoing: Vec<AdjEntry> = out_adj[node as usize]
        .iter()
        .filter(|e| !contracted[e.to as usize])
        .copied()
        .collect();

    if incoming.is_empty() || outgoing.is_empty() {
        return Vec::new();
    }

    let mut shortcuts = Vec::new();

    for inc in &incoming {
        // Upper bound for this batch: the most expensive shortcut any
        // outgoing target could need.
        let mut max_out = 0u32;
        for out in &outgoing {
            if out.to != inc.to && out.weight > max_out {
                max_out = out.weight;
            }
        }
        if max_out == 0 {
            continue; // every outgoing edge loops back to inc.to
        }

        let max_weight = inc.weight.saturating_add(max_out);

        batch_witness_search(ws, out_adj, inc.to, node, max_weight, contracted, params);

        for out in &outgoing {
            if out.to == inc.to {
                continue;
            }

            let sc_weight = inc.weight.saturating_add(out.weight);

            // A witness at least as short as the shortcut makes it redundant.
            if ws.dist(out.to) > sc_weight {
                shortcuts.push(Shortcut {
                    from: inc.to,
                    to: out.to,
                    weight: sc_weight,
                });
            }
        }
    }

    shortcuts
}

/// Priority for contraction ordering (lower contracts first). The edge
/// difference term is the worst-case in*out upper bound, not an exact
/// shortcut count; the 2x weight on contracted neighbors discourages long
/// chains of coupled contractions.
fn compute_priority(
    out_adj: &[Vec<AdjEntry>],
    in_adj: &[Vec<AdjEntry>],
    node: u32,
    contracted: &[bool],
    contracted_neighbors: i64,
    level: i64,
) -> i64 {
    let active_in = in_adj[node as usize]
        .iter()
        .filter(|e| !contracted[e.to as usize])
        .count() as i64;
    let active_out = out_adj[node as usize]
        .iter()
        .filter(|e| !contracted[e.to as usize])
        .count() as i64;

    let edge_difference = active_in * active_out - (active_in + active_out);

    edge_difference + 2 * contracted_neighbors + level
}

#[derive(Debug, Clone, Copy)]
struct CsrEdge {
    from: u32,
    to: u32,
    weight: u32,
    middle: i32,
}

/// Partitions the final working adjacency into forward and backward upward
/// CSR overlays and bundles them with the original graph arrays.
///
/// Edges between two core nodes go into both overlays regardless of rank:
/// the core has no shortcuts over it, so both searches must traverse it as
/// plain Dijkstra rather than upward-only.
fn build_overlay(
    g: &Graph,
    out_adj: &[Vec<AdjEntry>],
    in_adj: &[Vec<AdjEntry>],
    rank: Vec<u32>,
    core: &[bool],
) -> ChGraph {
    let n = g.num_nodes;

    let mut fwd_edges: Vec<CsrEdge> = Vec::new();
    let mut bwd_edges: Vec<CsrEdge> = Vec::new();

    for u in 0..n {
        for e in &out_adj[u as usize] {
            if rank[u as usize] < rank[e.to as usize]
                || (core[u as usize] && core[e.to as usize])
            {
                fwd_edges.push(CsrEdge {
                    from: u,
                    to: e.to,
                    weight: e.weight,
                    middle: e.middle,
                });
            }
        }
        // Backward upward: an original edge v -> u with rank[u] < rank[v]
        // is stored reversed as u -> v, so the backward search ascends.
        for e in &in_adj[u as usize] {
            if rank[u as usize] < rank[e.to as usize]
                || (core[u as usize] && core[e.to as usize])
            {
                bwd_edges.push(CsrEdge {
                    from: u,
                    to: e.to,
                    weight: e.weight,
                    middle: e.middle,
                });
            }
        }
    }

    info!(
        "overlay: {} forward upward edges, {} backward upward edges",
        fwd_edges.len(),
        bwd_edges.len()
    );

    let (fwd_first_out, fwd_head, fwd_weight, fwd_middle) = build_csr(n, &fwd_edges);
    let (bwd_first_out, bwd_head, bwd_weight, bwd_middle) = build_csr(n, &bwd_edges);

    ChGraph {
        num_nodes: n,
        node_lat: g.node_lat.clone(),
        node_lon: g.node_lon.clone(),
        rank,
        fwd_first_out,
        fwd_head,
        fwd_weight,
        fwd_middle,
        bwd_first_out,
        bwd_head,
        bwd_weight,
        bwd_middle,
        orig_first_out: g.first_out.clone(),
        orig_head: g.head.clone(),
        orig_weight: g.weight.clone(),
        geo_first_out: g.geo_first_out.clone(),
        geo_shape_lat: g.geo_shape_lat.clone(),
        geo_shape_lon: g.geo_shape_lon.clone(),
    }
}

/// CSR compaction via prefix-sum counting: one pass to count, one to place.
fn build_csr(n: u32, edges: &[CsrEdge]) -> (Vec<u32>, Vec<u32>, Vec<u32>, Vec<i32>) {
    let mut first_out = vec![0u32; n as usize + 1];
    for e in edges {
        first_out[e.from as usize + 1] += 1;
    }
    for i in 1..=n as usize {
        first_out[i] += first_out[i - 1];
    }

    let m = edges.len();
    let mut head = vec![0u32; m];
    let mut weight = vec![0u32; m];
    let mut middle = vec![-1i32; m];

    let mut pos: Vec<u32> = first_out[..n as usize].to_vec();
    for e in edges {
        let idx = pos[e.from as usize] as usize;
        head[idx] = e.to;
        weight[idx] = e.weight;
        middle[idx] = e.middle;
        pos[e.from as usize] += 1;
    }

    (first_out, head, weight, middle)
}

/// Array-backed binary min-heap over (priority, node) with hole-propagating
/// sifts. Entries go stale instead of being decreased; the pop loop filters
/// already-contracted nodes.
struct PriorityQueue {
    items: Vec<PqItem>,
}

#[derive(Debug, Clone, Copy)]
struct PqItem {
    priority: i64,
    node: u32,
}

impl PriorityQueue {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, priority: i64, node: u32) {
        self.items.push(PqItem { priority, node });
        self.sift_up(self.items.len() - 1);
    }

    fn pop(&mut self) -> Option<(i64, u32)> {
        let n = self.items.len();
        if n == 0 {
            return None;
        }
        let top = self.items[0];
        self.items[0] = self.items[n - 1];
        self.items.truncate(n - 1);
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        Some((top.priority, top.node))
    }

    fn peek_priority(&self) -> Option<i64> {
        self.items.first().map(|item| item.priority)
    }

    fn sift_up(&mut self, mut i: usize) {
        let item = self.items[i];
        while i > 0 {
            let parent = (i - 1) / 2;
            if item.priority >= self.items[parent].priority {
                break;
            }
            self.items[i] = self.items[parent];
            i = parent;
        }
        self.items[i] = item;
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.items.len();
        let item = self.items[i];
        loop {
            let mut child = 2 * i + 1;
            if child >= n {
                break;
            }
            let right = child + 1;
            if right < n && self.items[right].priority < self.items[child].priority {
                child = right;
            }
            if item.priority <= self.items[child].priority {
                break;
            }
            self.items[i] = self.items[child];
            i = child;
        }
        self.items[i] = item;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ch::validate::{overlay_distance, plain_dijkstra};
    use crate::graph::{build, RawEdge, RoadNetwork};
    use std::collections::HashMap;

    fn network(edges: &[(i64, i64, u32)], coords: &[(i64, f64, f64)]) -> RoadNetwork {
        let mut node_lat = HashMap::new();
        let mut node_lon = HashMap::new();
        for &(id, lat, lon) in coords {
            node_lat.insert(id, lat);
            node_lon.insert(id, lon);
        }
        RoadNetwork {
            edges: edges
                .iter()
                .map(|&(from_id, to_id, weight_mm)| RawEdge {
                    from_id,
                    to_id,
                    weight_mm,
                    ..Default::default()
                })
                .collect(),
            node_lat,
            node_lon,
        }
    }

    fn bidir(edges: &[(i64, i64, u32)]) -> Vec<(i64, i64, u32)> {
        let mut out = Vec::with_capacity(edges.len() * 2);
        for &(a, b, w) in edges {
            out.push((a, b, w));
            out.push((b, a, w));
        }
        out
    }

    /// Two rows of three with bidirectional rungs:
    ///
    ///   0 --100-- 1 --200-- 2
    ///   |                   |
    ///  300                 400
    ///   |                   |
    ///   3 --500-- 4 --600-- 5
    fn ladder() -> Graph {
        build(network(
            &bidir(&[
                (10, 20, 100),
                (20, 30, 200),
                (10, 40, 300),
                (30, 60, 400),
                (40, 50, 500),
                (50, 60, 600),
            ]),
            &[
                (10, 1.0, 103.0),
                (20, 1.0, 103.1),
                (30, 1.0, 103.2),
                (40, 1.1, 103.0),
                (50, 1.1, 103.1),
                (60, 1.1, 103.2),
            ],
        ))
    }

    fn assert_all_pairs_match(g: &Graph) {
        let chg = contract(g, &ContractionParams::default());
        for s in 0..g.num_nodes {
            for t in 0..g.num_nodes {
                if s == t {
                    continue;
                }
                let want = plain_dijkstra(&chg, s, t);
                let got = overlay_distance(&chg, s, t);
                assert_eq!(got, want, "distance {s} -> {t}");
            }
        }
    }

    #[test]
    fn rank_is_a_permutation() {
        let g = ladder();
        let chg = contract(&g, &ContractionParams::default());
        assert_eq!(chg.num_nodes, 6);
        let mut seen = vec![false; 6];
        for &r in &chg.rank {
            assert!(r < 6);
            assert!(!seen[r as usize], "duplicate rank {r}");
            seen[r as usize] = true;
        }
    }

    #[test]
    fn shortcut_invariants_hold() {
        let g = ladder();
        let chg = contract(&g, &ContractionParams::default());

        // A shortcut u -> v via m must sit above m in rank on both sides
        // and its weight must decompose as one u -> m entry plus one
        // m -> v entry (parallel entries allowed).
        let assert_shortcut = |u: u32, v: u32, m: u32, w: u32| {
            assert!(chg.rank[m as usize] < chg.rank[u as usize]);
            assert!(chg.rank[m as usize] < chg.rank[v as usize]);
            let firsts = hop_weights(&chg, u, m);
            let seconds = hop_weights(&chg, m, v);
            assert!(
                firsts
                    .iter()
                    .any(|&a| seconds.iter().any(|&b| a + b == w)),
                "shortcut {u} -> {v} via {m} (weight {w}) does not decompose"
            );
        };

        for u in 0..chg.num_nodes {
            for e in chg.fwd_edges_from(u) {
                let m = chg.fwd_middle[e];
                if m >= 0 {
                    assert_shortcut(u, chg.fwd_head[e], m as u32, chg.fwd_weight[e]);
                }
            }
            // Backward entries are stored reversed: u -> v encodes v -> u.
            for e in chg.bwd_edges_from(u) {
                let m = chg.bwd_middle[e];
                if m >= 0 {
                    assert_shortcut(chg.bwd_head[e], u, m as u32, chg.bwd_weight[e]);
                }
            }
        }
    }

    /// All overlay entry weights for the hop a -> b (original travel
    /// direction), whichever overlay stores them.
    fn hop_weights(chg: &ChGraph, a: u32, b: u32) -> Vec<u32> {
        let mut weights = Vec::new();
        for e in chg.fwd_edges_from(a) {
            if chg.fwd_head[e] == b {
                weights.push(chg.fwd_weight[e]);
            }
        }
        for e in chg.bwd_edges_from(b) {
            if chg.bwd_head[e] == a {
                weights.push(chg.bwd_weight[e]);
            }
        }
        assert!(!weights.is_empty(), "no overlay hop {a} -> {b}");
        weights
    }

    #[test]
    fn ladder_all_pairs() {
        assert_all_pairs_match(&ladder());
    }

    #[test]
    fn one_way_chain_all_pairs() {
        let g = build(network(
            &[(1, 2, 100), (2, 3, 200), (3, 4, 300), (4, 5, 400)],
            &[
                (1, 1.0, 103.0),
                (2, 1.0, 103.1),
                (3, 1.0, 103.2),
                (4, 1.0, 103.3),
                (5, 1.0, 103.4),
            ],
        ));
        let chg = contract(&g, &ContractionParams::default());
        assert_eq!(overlay_distance(&chg, 0, 4), 1000);
        assert_eq!(overlay_distance(&chg, 4, 0), u32::MAX);
        assert_all_pairs_match(&g);
    }

    #[test]
    fn star_all_pairs() {
        let g = build(network(
            &bidir(&[(1, 2, 100), (1, 3, 200), (1, 4, 300), (1, 5, 400)]),
            &[
                (1, 1.0, 103.0),
                (2, 1.01, 103.0),
                (3, 1.0, 103.01),
                (4, 0.99, 103.0),
                (5, 1.0, 102.99),
            ],
        ));
        assert_all_pairs_match(&g);
    }

    #[test]
    fn parallel_edges_all_pairs() {
        let g = build(network(
            &[(1, 2, 700), (1, 2, 300), (2, 1, 400), (2, 1, 900)],
            &[(1, 1.0, 103.0), (2, 1.0, 103.01)],
        ));
        let chg = contract(&g, &ContractionParams::default());
        assert_eq!(overlay_distance(&chg, 0, 1), 300);
        assert_eq!(overlay_distance(&chg, 1, 0), 400);
    }

    #[test]
    fn dead_end_spur_all_pairs() {
        // A triangle with a spur hanging off node 3.
        let g = build(network(
            &bidir(&[(1, 2, 100), (2, 3, 200), (3, 1, 300), (3, 9, 50)]),
            &[
                (1, 1.0, 103.0),
                (2, 1.0, 103.01),
                (3, 1.01, 103.0),
                (9, 1.02, 103.0),
            ],
        ));
        assert_all_pairs_match(&g);
    }

    #[test]
    fn empty_graph_contracts_to_empty_overlay() {
        let g = Graph::default();
        let chg = contract(&g, &ContractionParams::default());
        assert_eq!(chg.num_nodes, 0);
        assert_eq!(chg.fwd_first_out, vec![0]);
    }

    #[test]
    fn safety_valve_keeps_queries_correct() {
        // With the valve forced to trip immediately, every node lands in
        // the core and queries degrade to bidirectional Dijkstra over the
        // original edges; distances must not change.
        let g = ladder();
        let params = ContractionParams {
            max_shortcuts_per_node: 0,
            ..ContractionParams::default()
        };
        let chg = contract(&g, &params);
        for s in 0..g.num_nodes {
            for t in 0..g.num_nodes {
                if s == t {
                    continue;
                }
                assert_eq!(
                    overlay_distance(&chg, s, t),
                    plain_dijkstra(&chg, s, t),
                    "core fallback {s} -> {t}"
                );
            }
        }
    }

    #[test]
    fn priority_queue_orders_by_priority() {
        let mut pq = PriorityQueue::with_capacity(4);
        pq.push(5, 0);
        pq.push(-3, 1);
        pq.push(2, 2);
        assert_eq!(pq.peek_priority(), Some(-3));
        assert_eq!(pq.pop(), Some((-3, 1)));
        assert_eq!(pq.pop(), Some((2, 2)));
        assert_eq!(pq.pop(), Some((5, 0)));
        assert_eq!(pq.pop(), None);
    }
}
