//! Static graph model: compact CSR representation of the road network and
//! the contracted overlay produced by preprocessing.

mod builder;
mod component;

pub use builder::{build, RawEdge, RoadNetwork};
pub use component::{filter_to_component, largest_component, UnionFind};

/// Directed road graph in CSR (compressed sparse row) form.
///
/// Edge weights are distances in millimeters. `first_out` has one entry per
/// node plus a terminator equal to `num_edges`, so the outgoing edges of
/// node `u` occupy `first_out[u]..first_out[u + 1]` in the parallel `head`
/// and `weight` arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub num_nodes: u32,
    pub num_edges: u32,
    pub first_out: Vec<u32>,
    pub head: Vec<u32>,
    pub weight: Vec<u32>,
    pub node_lat: Vec<f64>,
    pub node_lon: Vec<f64>,

    /// Interior shape points of edge `e` occupy
    /// `geo_first_out[e]..geo_first_out[e + 1]` in the shape arrays.
    /// Endpoint coordinates are not repeated here.
    pub geo_first_out: Vec<u32>,
    pub geo_shape_lat: Vec<f64>,
    pub geo_shape_lon: Vec<f64>,
}

impl Graph {
    /// Range of edge indices originating from node `u`.
    #[inline]
    pub fn edges_from(&self, u: u32) -> std::ops::Range<usize> {
        self.first_out[u as usize] as usize..self.first_out[u as usize + 1] as usize
    }
}

/// Output of contraction hierarchies preprocessing.
///
/// Holds the forward and backward upward overlays, the contraction ranks,
/// and a copy of the component-filtered original graph: shortcuts are not
/// snappable surfaces, so snapping and geometry assembly always run against
/// the original edges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChGraph {
    pub num_nodes: u32,
    pub node_lat: Vec<f64>,
    pub node_lon: Vec<f64>,

    /// Contraction order per node; lower rank = contracted earlier.
    pub rank: Vec<u32>,

    /// Forward upward overlay: edges u -> v with rank[u] < rank[v].
    /// `fwd_middle[e]` is -1 for original edges, otherwise the contracted
    /// node the shortcut bypasses.
    pub fwd_first_out: Vec<u32>,
    pub fwd_head: Vec<u32>,
    pub fwd_weight: Vec<u32>,
    pub fwd_middle: Vec<i32>,

    /// Backward upward overlay: for every edge v -> u with rank[u] < rank[v]
    /// the reversed entry u -> v, so the backward search also ascends ranks.
    pub bwd_first_out: Vec<u32>,
    pub bwd_head: Vec<u32>,
    pub bwd_weight: Vec<u32>,
    pub bwd_middle: Vec<i32>,

    /// Original component-filtered edges, for snapping and geometry.
    pub orig_first_out: Vec<u32>,
    pub orig_head: Vec<u32>,
    pub orig_weight: Vec<u32>,

    /// Per-original-edge interior shape points.
    pub geo_first_out: Vec<u32>,
    pub geo_shape_lat: Vec<f64>,
    pub geo_shape_lon: Vec<f64>,
}

impl ChGraph {
    /// A zero-node graph whose CSR arrays are still well-formed
    /// (`first_out = [0]`), so it serializes and validates cleanly.
    pub fn empty() -> Self {
        ChGraph {
            fwd_first_out: vec![0],
            bwd_first_out: vec![0],
            orig_first_out: vec![0],
            geo_first_out: vec![0],
            ..ChGraph::default()
        }
    }

    #[inline]
    pub fn fwd_edges_from(&self, u: u32) -> std::ops::Range<usize> {
        self.fwd_first_out[u as usize] as usize..self.fwd_first_out[u as usize + 1] as usize
    }

    #[inline]
    pub fn bwd_edges_from(&self, u: u32) -> std::ops::Range<usize> {
        self.bwd_first_out[u as usize] as usize..self.bwd_first_out[u as usize + 1] as usize
    }

    #[inline]
    pub fn orig_edges_from(&self, u: u32) -> std::ops::Range<usize> {
        self.orig_first_out[u as usize] as usize..self.orig_first_out[u as usize + 1] as usize
    }
}
