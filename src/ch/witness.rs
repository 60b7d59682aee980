//! Bounded local Dijkstra used to decide which shortcuts a contraction needs.

use super::AdjEntry;

/// Contraction tunables.
#[derive(Debug, Clone)]
pub struct ContractionParams {
    /// Max nodes settled per witness search.
    pub settle_limit: u32,
    /// Max hops from the witness search source.
    pub hop_limit: u32,
    /// A node whose contraction would emit more shortcuts than this stops
    /// contraction; everything still uncontracted becomes the core.
    pub max_shortcuts_per_node: usize,
}

impl Default for ContractionParams {
    fn default() -> Self {
        Self {
            settle_limit: 500,
            hop_limit: 5,
            max_shortcuts_per_node: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapItem {
    node: u32,
    dist: u32,
    hops: u32,
}

/// Concrete-typed binary min-heap keyed on distance. Sift operations
/// propagate a hole: one assignment per level instead of a swap.
#[derive(Debug, Default)]
struct WitnessHeap {
    items: Vec<HeapItem>,
}

impl WitnessHeap {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, node: u32, dist: u32, hops: u32) {
        self.items.push(HeapItem { node, dist, hops });
        self.sift_up(self.items.len() - 1);
    }

    fn pop(&mut self) -> Option<HeapItem> {
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
        Some(top)
    }

    fn sift_up(&mut self, mut i: usize) {
        let item = self.items[i];
        while i > 0 {
            let parent = (i - 1) / 2;
            if item.dist >= self.items[parent].dist {
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
            if right < n && self.items[right].dist < self.items[child].dist {
                child = right;
            }
            if item.dist <= self.items[child].dist {
                break;
            }
            self.items[i] = self.items[child];
            i = child;
        }
        self.items[i] = item;
    }

    fn reset(&mut self) {
        self.items.clear();
    }
}

/// Reusable witness search state. The distance array is reset via a touched
/// list, so consecutive searches cost O(|touched|), not O(N).
pub(super) struct WitnessState {
    dist: Vec<u32>,
    touched: Vec<u32>,
    heap: WitnessHeap,
}

impl WitnessState {
    pub(super) fn new(num_nodes: u32) -> Self {
        Self {
            dist: vec![u32::MAX; num_nodes as usize],
            touched: Vec::new(),
            heap: WitnessHeap::with_capacity(256),
        }
    }

    #[inline]
    pub(super) fn dist(&self, node: u32) -> u32 {
        self.dist[node as usize]
    }

    fn reset(&mut self) {
        for &node in &self.touched {
            self.dist[node as usize] = u32::MAX;
        }
        self.touched.clear();
        self.heap.reset();
    }
}

/// One Dijkstra from `source` through the working adjacency, excluding the
/// node being contracted and all already-contracted nodes. The caller then
/// checks every outgoing target against the recorded distances, so a single
/// search serves the whole batch of (incoming, outgoing) pairs.
///
/// Bounded by a settle limit, a hop limit, and the `max_weight` cutoff.
/// The hop limit may leave witnesses undiscovered and therefore produce
/// superfluous shortcuts; it never suppresses a required one.
pub(super) fn batch_witness_search(
    ws: &mut WitnessState,
    out_adj: &[Vec<AdjEntry>],
    source: u32,
    excluded: u32,
    max_weight: u32,
    contracted: &[bool],
    params: &ContractionParams,
) {
    ws.reset();

    ws.dist[source as usize] = 0;
    ws.touched.push(source);
    ws.heap.push(source, 0, 0);

    let mut settled = 0u32;

    while let Some(cur) = ws.heap.pop() {
        // Stale entry: a shorter path to this node was already settled.
        if cur.dist > ws.dist[cur.node as usize] {
            continue;
        }

        settled += 1;
        if settled >= params.settle_limit {
            break;
        }

        if cur.dist > max_weight {
            continue;
        }
        if cur.hops >= params.hop_limit {
            continue;
        }

        for e in &out_adj[cur.node as usize] {
            if e.to == excluded || contracted[e.to as usize] {
                continue;
            }

            let new_dist = cur.dist.saturating_add(e.weight);
            if new_dist > max_weight {
                continue;
            }

            if new_dist < ws.dist[e.to as usize] {
                if ws.dist[e.to as usize] == u32::MAX {
                    ws.touched.push(e.to);
                }
                ws.dist[e.to as usize] = new_dist;
                ws.heap.push(e.to, new_dist, cur.hops + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adj(edges: &[(u32, u32, u32)], n: usize) -> Vec<Vec<AdjEntry>> {
        let mut out = vec![Vec::new(); n];
        for &(u, v, w) in edges {
            out[u as usize].push(AdjEntry {
                to: v,
                weight: w,
                middle: -1,
            });
        }
        out
    }

    #[test]
    fn heap_pops_in_distance_order() {
        let mut h = WitnessHeap::default();
        h.push(1, 30, 0);
        h.push(2, 10, 0);
        h.push(3, 20, 0);
        assert_eq!(h.pop().unwrap().dist, 10);
        assert_eq!(h.pop().unwrap().dist, 20);
        assert_eq!(h.pop().unwrap().dist, 30);
        assert!(h.pop().is_none());
    }

    #[test]
    fn finds_witness_around_excluded_node() {
        // 0 -> 1 -> 3 bypasses the excluded node 2.
        let out = adj(&[(0, 1, 10), (1, 3, 10), (0, 2, 1), (2, 3, 1)], 4);
        let contracted = vec![false; 4];
        let mut ws = WitnessState::new(4);
        batch_witness_search(
            &mut ws,
            &out,
            0,
            2,
            100,
            &contracted,
            &ContractionParams::default(),
        );
        assert_eq!(ws.dist(3), 20);
    }

    #[test]
    fn hop_limit_bounds_the_search() {
        // A five-hop chain is out of reach with hop_limit = 2. Node 6 is
        // isolated and serves as the excluded node.
        let out = adj(
            &[(0, 1, 1), (1, 2, 1), (2, 3, 1), (3, 4, 1), (4, 5, 1)],
            7,
        );
        let contracted = vec![false; 7];
        let mut ws = WitnessState::new(7);
        let params = ContractionParams {
            hop_limit: 2,
            ..ContractionParams::default()
        };
        batch_witness_search(&mut ws, &out, 0, 6, 100, &contracted, &params);
        assert_eq!(ws.dist(2), 2);
        assert_eq!(ws.dist(5), u32::MAX);
    }

    #[test]
    fn cutoff_prunes_expensive_paths() {
        // Node 3 is isolated and serves as the excluded node.
        let out = adj(&[(0, 1, 60), (1, 2, 60)], 4);
        let contracted = vec![false; 4];
        let mut ws = WitnessState::new(4);
        batch_witness_search(
            &mut ws,
            &out,
            0,
            3,
            50,
            &contracted,
            &ContractionParams::default(),
        );
        assert_eq!(ws.dist(1), u32::MAX);
    }

    #[test]
    fn reset_clears_touched_entries() {
        // Node 2 is isolated and serves as the excluded node.
        let out = adj(&[(0, 1, 5)], 3);
        let contracted = vec![false; 3];
        let mut ws = WitnessState::new(3);
        batch_witness_search(
            &mut ws,
            &out,
            0,
            2,
            100,
            &contracted,
            &ContractionParams::default(),
        );
        assert_eq!(ws.dist(1), 5);
        batch_witness_search(
            &mut ws,
            &out,
            1,
            2,
            100,
            &contracted,
            &ContractionParams::default(),
        );
        assert_eq!(ws.dist(1), 0);
        assert_eq!(ws.dist(0), u32::MAX);
    }
}
