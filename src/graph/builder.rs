//! CSR construction from raw directed edges.

use std::collections::HashMap;

use log::warn;

use super::Graph;

/// A directed edge as produced by an ingest source, before index compaction.
/// Shape points are the interior polyline vertices, excluding both endpoints.
#[derive(Debug, Clone, Default)]
pub struct RawEdge {
    pub from_id: i64,
    pub to_id: i64,
    pub weight_mm: u32,
    pub shape_lat: Vec<f64>,
    pub shape_lon: Vec<f64>,
}

/// Raw-edge producer output: a finite edge list plus external-id coordinates.
#[derive(Debug, Default)]
pub struct RoadNetwork {
    pub edges: Vec<RawEdge>,
    pub node_lat: HashMap<i64, f64>,
    pub node_lon: HashMap<i64, f64>,
}

struct CompactEdge {
    from: u32,
    to: u32,
    weight: u32,
    shape_lat: Vec<f64>,
    shape_lon: Vec<f64>,
}

/// Builds a CSR graph from raw edges.
///
/// External node ids are remapped to dense indices in first-seen order.
/// Edges are sorted by (source, target); parallel edges are preserved.
/// Self-loops are dropped.
pub fn build(network: RoadNetwork) -> Graph {
    if network.edges.is_empty() {
        return Graph::default();
    }

    let mut node_index: HashMap<i64, u32> = HashMap::new();
    let mut node_ids: Vec<i64> = Vec::new();

    fn add_node(id: i64, node_index: &mut HashMap<i64, u32>, node_ids: &mut Vec<i64>) -> u32 {
        if let Some(&idx) = node_index.get(&id) {
            return idx;
        }
        let idx = node_ids.len() as u32;
        node_index.insert(id, idx);
        node_ids.push(id);
        idx
    }

    let mut compact: Vec<CompactEdge> = Vec::with_capacity(network.edges.len());
    let mut self_loops = 0usize;

    for edge in network.edges {
        if edge.from_id == edge.to_id {
            self_loops += 1;
            continue;
        }
        let from = add_node(edge.from_id, &mut node_index, &mut node_ids);
        let to = add_node(edge.to_id, &mut node_index, &mut node_ids);
        compact.push(CompactEdge {
            from,
            to,
            weight: edge.weight_mm.max(1),
            shape_lat: edge.shape_lat,
            shape_lon: edge.shape_lon,
        });
    }

    if self_loops > 0 {
        warn!("dropped {} self-loop edges", self_loops);
    }

    if compact.is_empty() {
        return Graph::default();
    }

    // Stable sort keeps parallel edges in producer order.
    compact.sort_by(|a, b| (a.from, a.to).cmp(&(b.from, b.to)));

    let num_nodes = node_ids.len() as u32;
    let num_edges = compact.len() as u32;

    let mut first_out = vec![0u32; num_nodes as usize + 1];
    let mut head = Vec::with_capacity(compact.len());
    let mut weight = Vec::with_capacity(compact.len());
    let mut geo_first_out = Vec::with_capacity(compact.len() + 1);
    let mut geo_shape_lat = Vec::new();
    let mut geo_shape_lon = Vec::new();

    for edge in &compact {
        first_out[edge.from as usize + 1] += 1;
        head.push(edge.to);
        weight.push(edge.weight);
        geo_first_out.push(geo_shape_lat.len() as u32);
        geo_shape_lat.extend_from_slice(&edge.shape_lat);
        geo_shape_lon.extend_from_slice(&edge.shape_lon);
    }
    geo_first_out.push(geo_shape_lat.len() as u32);

    for i in 1..=num_nodes as usize {
        first_out[i] += first_out[i - 1];
    }

    let mut node_lat = vec![0.0f64; num_nodes as usize];
    let mut node_lon = vec![0.0f64; num_nodes as usize];
    let mut missing_coords = 0usize;
    for (id, &idx) in &node_index {
        match (network.node_lat.get(id), network.node_lon.get(id)) {
            (Some(&lat), Some(&lon)) => {
                node_lat[idx as usize] = lat;
                node_lon[idx as usize] = lon;
            }
            _ => missing_coords += 1,
        }
    }
    if missing_coords > 0 {
        warn!("{} nodes have no coordinates", missing_coords);
    }

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
