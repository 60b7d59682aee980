//! Weakly-connected component extraction via union-find.

use super::Graph;

const NO_NODE: u32 = u32::MAX;

/// Disjoint-set structure with path halving and union by rank.
/// Rank fits in a byte: it never exceeds log2(N) < 32 for any feasible N.
pub struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
    size: Vec<u32>,
}

impl UnionFind {
    pub fn new(n: u32) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n as usize],
            size: vec![1; n as usize],
        }
    }

    /// Representative of the set containing `x`, with path halving.
    pub fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            self.parent[x as usize] = self.parent[self.parent[x as usize] as usize];
            x = self.parent[x as usize];
        }
        x
    }

    /// Merges the sets containing `x` and `y`. Returns false if already merged.
    pub fn union(&mut self, x: u32, y: u32) -> bool {
        let mut rx = self.find(x);
        let mut ry = self.find(y);
        if rx == ry {
            return false;
        }

        if self.rank[rx as usize] < self.rank[ry as usize] {
            std::mem::swap(&mut rx, &mut ry);
        }
        self.parent[ry as usize] = rx;
        self.size[rx as usize] += self.size[ry as usize];
        if self.rank[rx as usize] == self.rank[ry as usize] {
            self.rank[rx as usize] += 1;
        }
        true
    }

    /// Size of the set containing `x`.
    pub fn set_size(&mut self, x: u32) -> u32 {
        let root = self.find(x);
        self.size[root as usize]
    }
}

/// Node indices of the largest weakly connected component, treating every
/// directed edge as undirected.
pub fn largest_component(g: &Graph) -> Vec<u32> {
    if g.num_nodes == 0 {
        return Vec::new();
    }

    let mut uf = UnionFind::new(g.num_nodes);
    for u in 0..g.num_nodes {
        for e in g.edges_from(u) {
            uf.union(u, g.head[e]);
        }
    }

    let mut best_root = 0u32;
    let mut best_size = 0u32;
    for i in 0..g.num_nodes {
        let root = uf.find(i);
        if uf.size[root as usize] > best_size {
            best_root = root;
            best_size = uf.size[root as usize];
        }
    }

    let mut nodes = Vec::with_capacity(best_size as usize);
    for i in 0..g.num_nodes {
        if uf.find(i) == best_root {
            nodes.push(i);
        }
    }
    nodes
}

/// Projects the graph onto the given node set, renumbering indices densely
/// and carrying per-edge geometry over.
pub fn filter_to_component(g: &Graph, nodes: &[u32]) -> Graph {
    if nodes.is_empty() {
        return Graph::default();
    }

    let mut old_to_new = vec![NO_NODE; g.num_nodes as usize];
    for (new_idx, &old_idx) in nodes.iter().enumerate() {
        old_to_new[old_idx as usize] = new_idx as u32;
    }

    let num_nodes = nodes.len() as u32;

    let mut first_out = vec![0u32; num_nodes as usize + 1];
    let mut head = Vec::new();
    let mut weight = Vec::new();
    let mut geo_first_out = Vec::new();
    let mut geo_shape_lat = Vec::new();
    let mut geo_shape_lon = Vec::new();

    // `nodes` is ascending, so edges come out grouped by new source index
    // and the CSR arrays can be filled sequentially.
    for &old_u in nodes {
        let new_u = old_to_new[old_u as usize];
        for e in g.edges_from(old_u) {
            let new_v = old_to_new[g.head[e] as usize];
            if new_v == NO_NODE {
                continue;
            }
            first_out[new_u as usize + 1] += 1;
            head.push(new_v);
            weight.push(g.weight[e]);
            geo_first_out.push(geo_shape_lat.len() as u32);
            let gs = g.geo_first_out[e] as usize;
            let ge = g.geo_first_out[e + 1] as usize;
            geo_shape_lat.extend_from_slice(&g.geo_shape_lat[gs..ge]);
            geo_shape_lon.extend_from_slice(&g.geo_shape_lon[gs..ge]);
        }
    }
    geo_first_out.push(geo_shape_lat.len() as u32);

    for i in 1..=num_nodes as usize {
        first_out[i] += first_out[i - 1];
    }

    let mut node_lat = vec![0.0f64; num_nodes as usize];
    let mut node_lon = vec![0.0f64; num_nodes as usize];
    for (new_idx, &old_idx) in nodes.iter().enumerate() {
        node_lat[new_idx] = g.node_lat[old_idx as usize];
        node_lon[new_idx] = g.node_lon[old_idx as usize];
    }

    let num_edges = head.len() as u32;
    Graph {
        num_nodes,
        num_edges,
        first_out,
        head,
        weight,
        node_lat,
        node_lon,
        geo_first_out,
        geo_shape_lat,
        geo_shape_lon,
    }
}
