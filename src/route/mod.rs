//! Point-to-point route queries over the contracted overlay.
//!
//! A query moves through snapping, virtual-endpoint seeding, bidirectional
//! upward search, shortcut unpacking, and geometry assembly; a failure in
//! any stage short-circuits with a typed error. The loaded graph is
//! immutable and shared; every query owns its transient state, which the
//! engine pools and resets via the touched list.

pub mod search;
mod snap;
mod unpack;

pub use snap::{SnapResult, Snapper, MAX_SNAP_METERS};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::graph::ChGraph;
use search::{run_bidirectional, QueryState, NO_NODE};
use unpack::{find_edge, find_min_edge, unpack_path};

/// A geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A road segment of the route result.
#[derive(Debug, Clone)]
pub struct Segment {
    pub distance_meters: f64,
    pub geometry: Vec<LatLng>,
}

/// The output of a route query: total distance plus an ordered polyline
/// whose first vertex is the snapped start point and last vertex the
/// snapped end point.
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub total_distance_meters: f64,
    pub segments: Vec<Segment>,
}

/// Which query endpoint an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Start,
    End,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Start => write!(f, "start"),
            Endpoint::End => write!(f, "end"),
        }
    }
}

/// The exhaustive set of failures a query can surface.
#[derive(Debug)]
pub enum RouteError {
    /// The endpoint's nearest road edge is beyond [`MAX_SNAP_METERS`].
    PointTooFar(Endpoint),
    /// Both search frontiers drained without meeting.
    NoRoute,
    /// The cancellation signal was observed mid-search.
    Cancelled,
    /// Invariant violation; indicates a bug or a corrupt overlay.
    Internal(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::PointTooFar(which) => {
                write!(f, "{which} point too far from any road")
            }
            RouteError::NoRoute => write!(f, "no route found"),
            RouteError::Cancelled => write!(f, "query cancelled"),
            RouteError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for RouteError {}

/// Cooperative cancellation signal. The search tests it every 256
/// iterations and returns promptly once set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Route query surface. One method, so hosts can substitute a mock.
pub trait Router: Send + Sync {
    fn route(&self, cancel: &CancelToken, start: LatLng, end: LatLng)
        -> Result<RouteResult, RouteError>;
}

/// Routing engine over a loaded CH graph. Queries may run concurrently from
/// any number of threads; the graph is read-only and per-query state is
/// checked out of a pool.
pub struct Engine {
    graph: ChGraph,
    snapper: Snapper,
    state_pool: Mutex<Vec<QueryState>>,
}

impl Engine {
    pub fn new(graph: ChGraph) -> Self {
        let snapper = Snapper::new(&graph);
        Self {
            graph,
            snapper,
            state_pool: Mutex::new(Vec::new()),
        }
    }

    pub fn graph(&self) -> &ChGraph {
        &self.graph
    }

    fn take_state(&self) -> QueryState {
        if let Ok(mut pool) = self.state_pool.lock() {
            if let Some(qs) = pool.pop() {
                return qs;
            }
        }
        QueryState::new(self.graph.num_nodes)
    }

    fn put_state(&self, mut qs: QueryState) {
        qs.reset();
        if let Ok(mut pool) = self.state_pool.lock() {
            pool.push(qs);
        }
    }

    fn route_impl(
        &self,
        cancel: &CancelToken,
        start: LatLng,
        end: LatLng,
    ) -> Result<RouteResult, RouteError> {
        let g = &self.graph;
        if g.num_nodes == 0 {
            return Err(RouteError::NoRoute);
        }

        // Snap both endpoints onto original edges.
        let start_snap = self
            .snapper
            .snap(g, start.lat, start.lng)
            .ok_or(RouteError::PointTooFar(Endpoint::Start))?;
        let end_snap = self
            .snapper
            .snap(g, end.lat, end.lng)
            .ok_or(RouteError::PointTooFar(Endpoint::End))?;

        let start_point = start_snap.point(g);
        let end_point = end_snap.point(g);

        // Both points on the same edge: a direct sub-segment, no search.
        if let Some(dist_mm) = same_edge_distance(g, &start_snap, &end_snap) {
            let meters = dist_mm as f64 / 1000.0;
            return Ok(RouteResult {
                total_distance_meters: meters,
                segments: vec![Segment {
                    distance_meters: meters,
                    geometry: vec![start_point, end_point],
                }],
            });
        }

        // Seed virtual endpoints and run the bidirectional search.
        let mut qs = self.take_state();
        seed_forward(g, &mut qs, &start_snap);
        seed_backward(g, &mut qs, &end_snap);

        let (mu, meet) = run_bidirectional(g, &mut qs, cancel);

        if cancel.is_cancelled() {
            self.put_state(qs);
            return Err(RouteError::Cancelled);
        }
        if meet == NO_NODE || mu == u32::MAX {
            self.put_state(qs);
            return Err(RouteError::NoRoute);
        }

        let overlay_nodes = reconstruct_overlay_path(meet, &qs.pred_fwd, &qs.pred_bwd);
        self.put_state(qs);

        let orig_nodes = unpack_path(g, &overlay_nodes);
        let geometry = build_geometry(g, &orig_nodes, start_point, end_point);

        let meters = mu as f64 / 1000.0;
        Ok(RouteResult {
            total_distance_meters: meters,
            segments: vec![Segment {
                distance_meters: meters,
                geometry,
            }],
        })
    }
}

impl Router for Engine {
    fn route(
        &self,
        cancel: &CancelToken,
        start: LatLng,
        end: LatLng,
    ) -> Result<RouteResult, RouteError> {
        self.route_impl(cancel, start, end)
    }
}

/// Direct sub-segment distance when both snaps hit the same directed edge.
/// The forward orientation needs start ratio <= end ratio; the reverse
/// orientation is valid only when the twin edge exists.
fn same_edge_distance(g: &ChGraph, start: &SnapResult, end: &SnapResult) -> Option<u32> {
    if start.edge_idx != end.edge_idx {
        return None;
    }
    let weight = g.orig_weight[start.edge_idx as usize] as f64;
    if start.ratio <= end.ratio {
        return Some(((end.ratio - start.ratio) * weight).round() as u32);
    }
    if find_edge(&g.orig_first_out, &g.orig_head, start.node_v, start.node_u).is_some() {
        return Some(((start.ratio - end.ratio) * weight).round() as u32);
    }
    None
}

/// Seeds the forward queue from the start snap. Travelling to the edge
/// target is always possible; travelling back to the source only when the
/// reverse edge exists.
fn seed_forward(g: &ChGraph, qs: &mut QueryState, snap: &SnapResult) {
    let weight = g.orig_weight[snap.edge_idx as usize] as f64;

    let dv = (weight * (1.0 - snap.ratio)).round() as u32;
    qs.touch_fwd(snap.node_v, dv);
    qs.fwd_pq.push(snap.node_v, dv);

    if find_edge(&g.orig_first_out, &g.orig_head, snap.node_v, snap.node_u).is_some() {
        let du = (weight * snap.ratio).round() as u32;
        qs.touch_fwd(snap.node_u, du);
        qs.fwd_pq.push(snap.node_u, du);
    }
}

/// Seeds the backward queue from the end snap, symmetrically: the edge
/// source always reaches the snap point; the target only via the reverse
/// edge.
fn seed_backward(g: &ChGraph, qs: &mut QueryState, snap: &SnapResult) {
    let weight = g.orig_weight[snap.edge_idx as usize] as f64;

    let du = (weight * snap.ratio).round() as u32;
    qs.touch_bwd(snap.node_u, du);
    qs.bwd_pq.push(snap.node_u, du);

    if find_edge(&g.orig_first_out, &g.orig_head, snap.node_v, snap.node_u).is_some() {
        let dv = (weight * (1.0 - snap.ratio)).round() as u32;
        qs.touch_bwd(snap.node_v, dv);
        qs.bwd_pq.push(snap.node_v, dv);
    }
}

/// Overlay node path from the start seed through the meeting node to the
/// end seed: forward predecessors walked back and reversed, then backward
/// predecessors appended.
pub(crate) fn reconstruct_overlay_path(
    meet: u32,
    pred_fwd: &[u32],
    pred_bwd: &[u32],
) -> Vec<u32> {
    let mut path = Vec::with_capacity(16);

    let mut node = meet;
    loop {
        path.push(node);
        let pred = pred_fwd[node as usize];
        if pred == NO_NODE {
            break;
        }
        node = pred;
    }
    path.reverse();

    node = meet;
    loop {
        let pred = pred_bwd[node as usize];
        if pred == NO_NODE {
            break;
        }
        path.push(pred);
        node = pred;
    }

    path
}

/// Emits the full polyline: the snapped start point, every path node with
/// the interior shape points of each traversed edge, then the snapped end
/// point.
fn build_geometry(
    g: &ChGraph,
    nodes: &[u32],
    start_point: LatLng,
    end_point: LatLng,
) -> Vec<LatLng> {
    let mut geometry = Vec::with_capacity(nodes.len() * 2 + 2);
    geometry.push(start_point);

    for (i, &node) in nodes.iter().enumerate() {
        geometry.push(LatLng {
            lat: g.node_lat[node as usize],
            lng: g.node_lon[node as usize],
        });
        if i + 1 < nodes.len() {
            if let Some(e) = find_min_edge(g, node, nodes[i + 1]) {
                let gs = g.geo_first_out[e as usize] as usize;
                let ge = g.geo_first_out[e as usize + 1] as usize;
                for k in gs..ge {
                    geometry.push(LatLng {
                        lat: g.geo_shape_lat[k],
                        lng: g.geo_shape_lon[k],
                    });
                }
            }
        }
    }

    geometry.push(end_point);
    geometry
}
