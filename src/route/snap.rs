//! Nearest-road snapping over a flat sorted grid index.
//!
//! Every original directed edge is inserted into each grid cell its
//! bounding box intersects. The index is a single sorted array of
//! (cell key, edge, source) records with binary-search lookup; snapping
//! scans the 3x3 cell block around the query point.

use crate::geo;
use crate::graph::ChGraph;

use super::LatLng;

/// Snapping fails beyond this distance.
pub const MAX_SNAP_METERS: f64 = 500.0;

/// 0.01 degrees is roughly 1.1 km at the equator, so the 3x3 block around
/// the query cell always covers the full snap radius.
const GRID_CELL_SIZE: f64 = 0.01;

/// A point projected onto a directed road edge.
#[derive(Debug, Clone, Copy)]
pub struct SnapResult {
    /// Index into the original edge arrays.
    pub edge_idx: u32,
    /// Source node of the edge.
    pub node_u: u32,
    /// Target node of the edge.
    pub node_v: u32,
    /// 0.0 = at `node_u`, 1.0 = at `node_v`, linear in between.
    pub ratio: f64,
    /// Meters from the query point to the snapped point.
    pub dist_meters: f64,
}

impl SnapResult {
    /// Exact snapped coordinate, interpolated along the segment. End-of-
    /// segment ratios return the endpoint coordinates bit-for-bit.
    pub fn point(&self, g: &ChGraph) -> LatLng {
        let u = self.node_u as usize;
        let v = self.node_v as usize;
        if self.ratio == 0.0 {
            return LatLng {
                lat: g.node_lat[u],
                lng: g.node_lon[u],
            };
        }
        if self.ratio == 1.0 {
            return LatLng {
                lat: g.node_lat[v],
                lng: g.node_lon[v],
            };
        }
        LatLng {
            lat: g.node_lat[u] + self.ratio * (g.node_lat[v] - g.node_lat[u]),
            lng: g.node_lon[u] + self.ratio * (g.node_lon[v] - g.node_lon[u]),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CellEdge {
    key: u64,
    edge_idx: u32,
    source: u32,
}

fn grid_cell(lat: f64, lon: f64) -> (i32, i32) {
    (
        (lat / GRID_CELL_SIZE).floor() as i32,
        (lon / GRID_CELL_SIZE).floor() as i32,
    )
}

fn cell_key(lat_idx: i32, lon_idx: i32) -> u64 {
    ((lat_idx as u32 as u64) << 32) | (lon_idx as u32 as u64)
}

/// Flat spatial grid over the original edges. Build once, immutable after.
pub struct Snapper {
    cells: Vec<CellEdge>,
}

impl Snapper {
    pub fn new(g: &ChGraph) -> Self {
        // First pass counts entries so the flat array allocates once.
        let mut total = 0usize;
        for u in 0..g.num_nodes {
            for e in g.orig_edges_from(u) {
                let v = g.orig_head[e];
                let (lat_lo, lon_lo, lat_hi, lon_hi) = edge_cell_bounds(g, u, v);
                total += ((lat_hi - lat_lo + 1) as usize) * ((lon_hi - lon_lo + 1) as usize);
            }
        }

        let mut cells = Vec::with_capacity(total);
        for u in 0..g.num_nodes {
            for e in g.orig_edges_from(u) {
                let v = g.orig_head[e];
                let (lat_lo, lon_lo, lat_hi, lon_hi) = edge_cell_bounds(g, u, v);
                for la in lat_lo..=lat_hi {
                    for lo in lon_lo..=lon_hi {
                        cells.push(CellEdge {
                            key: cell_key(la, lo),
                            edge_idx: e as u32,
                            source: u,
                        });
                    }
                }
            }
        }

        cells.sort_unstable_by_key(|c| (c.key, c.edge_idx));

        Self { cells }
    }

    /// All entries for one cell, via binary search on the sorted array.
    fn cell_range(&self, key: u64) -> &[CellEdge] {
        let lo = self.cells.partition_point(|c| c.key < key);
        let hi = lo + self.cells[lo..].partition_point(|c| c.key == key);
        &self.cells[lo..hi]
    }

    /// Nearest road edge within [`MAX_SNAP_METERS`], or `None`.
    pub fn snap(&self, g: &ChGraph, lat: f64, lng: f64) -> Option<SnapResult> {
        let (center_lat, center_lon) = grid_cell(lat, lng);

        let mut best: Option<SnapResult> = None;
        let mut best_dist = f64::INFINITY;

        for d_lat in -1..=1 {
            for d_lon in -1..=1 {
                let key = cell_key(center_lat + d_lat, center_lon + d_lon);
                for ce in self.cell_range(key) {
                    let u = ce.source;
                    let v = g.orig_head[ce.edge_idx as usize];

                    let (dist, ratio) = geo::point_to_segment(
                        lat,
                        lng,
                        g.node_lat[u as usize],
                        g.node_lon[u as usize],
                        g.node_lat[v as usize],
                        g.node_lon[v as usize],
                    );

                    if dist < best_dist {
                        best_dist = dist;
                        best = Some(SnapResult {
                            edge_idx: ce.edge_idx,
                            node_u: u,
                            node_v: v,
                            ratio,
                            dist_meters: dist,
                        });
                    }
                }
            }
        }

        match best {
            Some(result) if result.dist_meters <= MAX_SNAP_METERS => Some(result),
            _ => None,
        }
    }
}

fn edge_cell_bounds(g: &ChGraph, u: u32, v: u32) -> (i32, i32, i32, i32) {
    let u_lat = g.node_lat[u as usize];
    let u_lon = g.node_lon[u as usize];
    let v_lat = g.node_lat[v as usize];
    let v_lon = g.node_lon[v as usize];

    let (lat_lo, lon_lo) = grid_cell(u_lat.min(v_lat), u_lon.min(v_lon));
    let (lat_hi, lon_hi) = grid_cell(u_lat.max(v_lat), u_lon.max(v_lon));
    (lat_lo, lon_lo, lat_hi, lon_hi)
}
