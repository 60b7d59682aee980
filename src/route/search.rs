//! Per-query search state and the bidirectional upward Dijkstra.

use crate::graph::ChGraph;

use super::CancelToken;

pub(crate) const NO_NODE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PqItem {
    pub node: u32,
    pub dist: u32,
}

/// Array-backed binary min-heap over plain (node, dist) structs; no boxing,
/// no dispatch. Sift operations propagate a hole, one assignment per level.
#[derive(Debug, Default)]
pub(crate) struct MinHeap {
    items: Vec<PqItem>,
}

impl MinHeap {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, node: u32, dist: u32) {
        self.items.push(PqItem { node, dist });
        self.sift_up(self.items.len() - 1);
    }

    pub fn pop(&mut self) -> Option<PqItem> {
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

    /// Distance of the minimum entry, or `u32::MAX` when empty, so callers
    /// can compare against the meeting bound without a length check.
    pub fn peek_dist(&self) -> u32 {
        self.items.first().map_or(u32::MAX, |item| item.dist)
    }

    pub fn clear(&mut self) {
        self.items.clear();
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
}

/// Transient per-query state: distance and predecessor arrays for both
/// search directions, the two heaps, and the touched list that makes reset
/// O(|settled|) instead of O(N).
pub struct QueryState {
    pub(crate) dist_fwd: Vec<u32>,
    pub(crate) dist_bwd: Vec<u32>,
    pub(crate) pred_fwd: Vec<u32>,
    pub(crate) pred_bwd: Vec<u32>,
    touched: Vec<u32>,
    pub(crate) fwd_pq: MinHeap,
    pub(crate) bwd_pq: MinHeap,
}

impl QueryState {
    pub fn new(num_nodes: u32) -> Self {
        let n = num_nodes as usize;
        Self {
            dist_fwd: vec![u32::MAX; n],
            dist_bwd: vec![u32::MAX; n],
            pred_fwd: vec![NO_NODE; n],
            pred_bwd: vec![NO_NODE; n],
            touched: Vec::with_capacity(1024),
            fwd_pq: MinHeap::with_capacity(256),
            bwd_pq: MinHeap::with_capacity(256),
        }
    }

    /// Restores every touched entry to its sentinel. Required before reuse.
    pub fn reset(&mut self) {
        for &node in &self.touched {
            self.dist_fwd[node as usize] = u32::MAX;
            self.dist_bwd[node as usize] = u32::MAX;
            self.pred_fwd[node as usize] = NO_NODE;
            self.pred_bwd[node as usize] = NO_NODE;
        }
        self.touched.clear();
        self.fwd_pq.clear();
        self.bwd_pq.clear();
    }

    pub(crate) fn touch_fwd(&mut self, node: u32, dist: u32) {
        if self.dist_fwd[node as usize] == u32::MAX && self.dist_bwd[node as usize] == u32::MAX {
            self.touched.push(node);
        }
        self.dist_fwd[node as usize] = dist;
    }

    pub(crate) fn touch_bwd(&mut self, node: u32, dist: u32) {
        if self.dist_fwd[node as usize] == u32::MAX && self.dist_bwd[node as usize] == u32::MAX {
            self.touched.push(node);
        }
        self.dist_bwd[node as usize] = dist;
    }
}

/// Bidirectional Dijkstra over the upward overlays with meet-in-the-middle
/// termination. Expects both heaps seeded. Returns the best meeting distance
/// and the meeting node; `(u32::MAX, NO_NODE)` means no route.
///
/// The cancellation signal is tested every 256 iterations; on cancellation
/// the current bound and meeting node are returned unchanged and the caller
/// surfaces the cancelled error.
pub(crate) fn run_bidirectional(
    g: &ChGraph,
    qs: &mut QueryState,
    cancel: &CancelToken,
) -> (u32, u32) {
    let mut mu = u32::MAX;
    let mut meet = NO_NODE;
    let mut iterations: u32 = 0;

    loop {
        let fwd_min = qs.fwd_pq.peek_dist();
        let bwd_min = qs.bwd_pq.peek_dist();
        // Both minima at or above the best meeting distance: mu is optimal.
        // peek_dist is MAX for an empty heap, so this also covers drained
        // queues.
        if fwd_min >= mu && bwd_min >= mu {
            break;
        }

        iterations = iterations.wrapping_add(1);
        if iterations & 255 == 0 && cancel.is_cancelled() {
            return (mu, meet);
        }

        // Forward step.
        if fwd_min < mu {
            if let Some(item) = qs.fwd_pq.pop() {
                let u = item.node;
                let d = item.dist;
                if d <= qs.dist_fwd[u as usize] {
                    if qs.dist_bwd[u as usize] != u32::MAX {
                        let candidate = d.saturating_add(qs.dist_bwd[u as usize]);
                        if candidate < mu {
                            mu = candidate;
                            meet = u;
                        }
                    }

                    for e in g.fwd_edges_from(u) {
                        let v = g.fwd_head[e];
                        let new_dist = d.saturating_add(g.fwd_weight[e]);
                        if new_dist < qs.dist_fwd[v as usize] {
                            qs.touch_fwd(v, new_dist);
                            qs.fwd_pq.push(v, new_dist);
                            qs.pred_fwd[v as usize] = u;
                        }
                    }
                }
            }
        }

        // Backward step, re-checked against the possibly tightened mu.
        if qs.bwd_pq.peek_dist() < mu {
            if let Some(item) = qs.bwd_pq.pop() {
                let u = item.node;
                let d = item.dist;
                if d <= qs.dist_bwd[u as usize] {
                    if qs.dist_fwd[u as usize] != u32::MAX {
                        let candidate = qs.dist_fwd[u as usize].saturating_add(d);
                        if candidate < mu {
                            mu = candidate;
                            meet = u;
                        }
                    }

                    for e in g.bwd_edges_from(u) {
                        let v = g.bwd_head[e];
                        let new_dist = d.saturating_add(g.bwd_weight[e]);
                        if new_dist < qs.dist_bwd[v as usize] {
                            qs.touch_bwd(v, new_dist);
                            qs.bwd_pq.push(v, new_dist);
                            qs.pred_bwd[v as usize] = u;
                        }
                    }
                }
            }
        }
    }

    (mu, meet)
}

/// Node-to-node overlay distance, used by the validation harness.
pub(crate) fn ch_distance(g: &ChGraph, qs: &mut QueryState, source: u32, target: u32) -> u32 {
    qs.touch_fwd(source, 0);
    qs.fwd_pq.push(source, 0);
    qs.touch_bwd(target, 0);
    qs.bwd_pq.push(target, 0);

    let cancel = CancelToken::new();
    let (mu, _) = run_bidirectional(g, qs, &cancel);
    qs.reset();
    mu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_orders_and_reports_min() {
        let mut h = MinHeap::default();
        assert_eq!(h.peek_dist(), u32::MAX);
        h.push(1, 50);
        h.push(2, 20);
        h.push(3, 90);
        h.push(4, 20);
        assert_eq!(h.peek_dist(), 20);
        let first = h.pop().unwrap();
        assert_eq!(first.dist, 20);
        assert_eq!(h.pop().unwrap().dist, 20);
        assert_eq!(h.pop().unwrap().dist, 50);
        assert_eq!(h.pop().unwrap().dist, 90);
        assert!(h.pop().is_none());
    }

    #[test]
    fn reset_restores_sentinels_via_touched_list() {
        let mut qs = QueryState::new(4);
        qs.touch_fwd(1, 10);
        qs.touch_bwd(2, 20);
        qs.pred_fwd[1] = 0;
        qs.fwd_pq.push(1, 10);
        qs.reset();
        assert_eq!(qs.dist_fwd[1], u32::MAX);
        assert_eq!(qs.dist_bwd[2], u32::MAX);
        assert_eq!(qs.pred_fwd[1], NO_NODE);
        assert_eq!(qs.fwd_pq.peek_dist(), u32::MAX);
        assert!(qs.touched.is_empty());
    }

    #[test]
    fn touch_records_each_node_once() {
        let mut qs = QueryState::new(4);
        qs.touch_fwd(3, 10);
        qs.touch_bwd(3, 20);
        qs.touch_fwd(3, 5);
        assert_eq!(qs.touched.len(), 1);
    }
}
