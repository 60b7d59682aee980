//! OSM PBF ingest: produces raw directed edges for car routing.
//!
//! Ways are split at junction nodes; interior nodes become the per-edge
//! polyline and the edge weight is the haversine length along the chain in
//! millimeters.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use log::{info, warn};
use osmpbf::{Element, ElementReader};

use crate::geo;
use crate::graph::{RawEdge, RoadNetwork};

/// Highway values drivable by car.
const CAR_HIGHWAYS: [&str; 14] = [
    "motorway",
    "motorway_link",
    "trunk",
    "trunk_link",
    "primary",
    "primary_link",
    "secondary",
    "secondary_link",
    "tertiary",
    "tertiary_link",
    "unclassified",
    "residential",
    "living_street",
    "service",
];

/// Geographic bounding box filter. Edges with either endpoint outside the
/// box are dropped.
#[derive(Debug, Clone, Copy)]
pub struct BBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BBox {
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lng >= self.min_lng && lng <= self.max_lng
    }
}

struct WayInfo {
    nodes: Vec<i64>,
    forward: bool,
    backward: bool,
}

fn tag<'a>(tags: &'a [(&str, &str)], key: &str) -> Option<&'a str> {
    tags.iter().find(|(k, _)| *k == key).map(|&(_, v)| v)
}

fn car_accessible(tags: &[(&str, &str)]) -> bool {
    let highway = tag(tags, "highway").unwrap_or("");
    if !CAR_HIGHWAYS.contains(&highway) {
        return false;
    }

    // Pedestrian plazas are mapped as area highways.
    if tag(tags, "area") == Some("yes") {
        return false;
    }

    match tag(tags, "access") {
        Some("no") | Some("private") => return false,
        _ => {}
    }
    if tag(tags, "motor_vehicle") == Some("no") {
        return false;
    }

    true
}

/// (forward, backward) travel permissions from highway and oneway tags.
fn direction_flags(tags: &[(&str, &str)]) -> (bool, bool) {
    let mut forward = true;
    let mut backward = true;

    let highway = tag(tags, "highway").unwrap_or("");
    if highway == "motorway" || highway == "motorway_link" || tag(tags, "junction") == Some("roundabout")
    {
        backward = false;
    }

    match tag(tags, "oneway") {
        Some("yes") | Some("true") | Some("1") => {
            forward = true;
            backward = false;
        }
        Some("-1") | Some("reverse") => {
            forward = false;
            backward = true;
        }
        Some("no") => {
            forward = true;
            backward = true;
        }
        Some("reversible") => {
            // Time-dependent direction: skip entirely.
            forward = false;
            backward = false;
        }
        _ => {}
    }

    (forward, backward)
}

/// Reads an OSM PBF extract and returns directed car-routing edges plus the
/// external-id coordinate maps.
pub fn parse_pbf<P: AsRef<Path>>(path: P, bbox: Option<BBox>) -> Result<RoadNetwork> {
    let reader = ElementReader::from_path(&path).context("open PBF file")?;

    let mut node_lat: HashMap<i64, f64> = HashMap::new();
    let mut node_lon: HashMap<i64, f64> = HashMap::new();
    let mut ways: Vec<WayInfo> = Vec::new();

    reader
        .for_each(|element| match element {
            Element::Node(node) => {
                node_lat.insert(node.id(), node.lat());
                node_lon.insert(node.id(), node.lon());
            }
            Element::DenseNode(node) => {
                node_lat.insert(node.id(), node.lat());
                node_lon.insert(node.id(), node.lon());
            }
            Element::Way(way) => {
                let tags: Vec<(&str, &str)> = way.tags().collect();
                if !car_accessible(&tags) {
                    return;
                }
                let (forward, backward) = direction_flags(&tags);
                if !forward && !backward {
                    return;
                }
                let nodes: Vec<i64> = way.refs().collect();
                if nodes.len() < 2 {
                    return;
                }
                ways.push(WayInfo {
                    nodes,
                    forward,
                    backward,
                });
            }
            _ => {}
        })
        .context("parse PBF file")?;

    info!(
        "parsed {} car-accessible ways, {} node coordinates",
        ways.len(),
        node_lat.len()
    );

    let edges = split_ways(&ways, &node_lat, &node_lon, bbox);
    info!("built {} directed edges", edges.len());

    Ok(RoadNetwork {
        edges,
        node_lat,
        node_lon,
    })
}

/// Splits ways into edges at junction nodes. A node shared by more than one
/// way (or used twice by the same way) and every way endpoint is a
/// junction; interior nodes become shape points.
fn split_ways(
    ways: &[WayInfo],
    node_lat: &HashMap<i64, f64>,
    node_lon: &HashMap<i64, f64>,
    bbox: Option<BBox>,
) -> Vec<RawEdge> {
    let mut use_count: HashMap<i64, u32> = HashMap::new();
    for way in ways {
        for (i, &id) in way.nodes.iter().enumerate() {
            let count = use_count.entry(id).or_insert(0);
            *count += 1;
            if i == 0 || i + 1 == way.nodes.len() {
                *count += 1;
            }
        }
    }

    let mut edges = Vec::new();
    let mut skipped = 0usize;
    let mut bbox_filtered = 0usize;

    for way in ways {
        let mut chain: Vec<i64> = Vec::new();
        for (i, &id) in way.nodes.iter().enumerate() {
            chain.push(id);
            let is_junction = use_count.get(&id).copied().unwrap_or(0) > 1;
            let is_last = i + 1 == way.nodes.len();
            if chain.len() >= 2 && (is_junction || is_last) {
                emit_chain(
                    &chain,
                    way,
                    node_lat,
                    node_lon,
                    bbox,
                    &mut edges,
                    &mut skipped,
                    &mut bbox_filtered,
                );
                chain.clear();
                chain.push(id);
            }
        }
    }

    if skipped > 0 {
        warn!("skipped {} chains with missing node coordinates", skipped);
    }
    if bbox_filtered > 0 {
        info!("filtered {} chains outside the bounding box", bbox_filtered);
    }

    edges
}

#[allow(clippy::too_many_arguments)]
fn emit_chain(
    chain: &[i64],
    way: &WayInfo,
    node_lat: &HashMap<i64, f64>,
    node_lon: &HashMap<i64, f64>,
    bbox: Option<BBox>,
    edges: &mut Vec<RawEdge>,
    skipped: &mut usize,
    bbox_filtered: &mut usize,
) {
    let mut lats = Vec::with_capacity(chain.len());
    let mut lons = Vec::with_capacity(chain.len());
    for id in chain {
        match (node_lat.get(id), node_lon.get(id)) {
            (Some(&lat), Some(&lon)) => {
                lats.push(lat);
                lons.push(lon);
            }
            _ => {
                *skipped += 1;
                return;
            }
        }
    }

    if let Some(bbox) = bbox {
        let last = chain.len() - 1;
        if !bbox.contains(lats[0], lons[0]) || !bbox.contains(lats[last], lons[last]) {
            *bbox_filtered += 1;
            return;
        }
    }

    let mut meters = 0.0f64;
    for i in 0..chain.len() - 1 {
        meters += geo::haversine(lats[i], lons[i], lats[i + 1], lons[i + 1]);
    }
    let weight_mm = ((meters * 1000.0).round() as u32).max(1);

    let interior_lat: Vec<f64> = lats[1..lats.len() - 1].to_vec();
    let interior_lon: Vec<f64> = lons[1..lons.len() - 1].to_vec();

    if way.forward {
        edges.push(RawEdge {
            from_id: chain[0],
            to_id: chain[chain.len() - 1],
            weight_mm,
            shape_lat: interior_lat.clone(),
            shape_lon: interior_lon.clone(),
        });
    }
    if way.backward {
        let mut rev_lat = interior_lat;
        let mut rev_lon = interior_lon;
        rev_lat.reverse();
        rev_lon.reverse();
        edges.push(RawEdge {
            from_id: chain[chain.len() - 1],
            to_id: chain[0],
            weight_mm,
            shape_lat: rev_lat,
            shape_lon: rev_lon,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn car_access_filters() {
        assert!(car_accessible(&[("highway", "residential")]));
        assert!(!car_accessible(&[("highway", "footway")]));
        assert!(!car_accessible(&[("highway", "residential"), ("area", "yes")]));
        assert!(!car_accessible(&[("highway", "primary"), ("access", "private")]));
        assert!(!car_accessible(&[
            ("highway", "primary"),
            ("motor_vehicle", "no")
        ]));
    }

    #[test]
    fn oneway_handling() {
        assert_eq!(direction_flags(&[("highway", "residential")]), (true, true));
        assert_eq!(
            direction_flags(&[("highway", "residential"), ("oneway", "yes")]),
            (true, false)
        );
        assert_eq!(
            direction_flags(&[("highway", "residential"), ("oneway", "-1")]),
            (false, true)
        );
        assert_eq!(direction_flags(&[("highway", "motorway")]), (true, false));
        assert_eq!(
            direction_flags(&[("highway", "motorway"), ("oneway", "no")]),
            (true, true)
        );
        assert_eq!(
            direction_flags(&[("highway", "residential"), ("junction", "roundabout")]),
            (true, false)
        );
        assert_eq!(
            direction_flags(&[("highway", "residential"), ("oneway", "reversible")]),
            (false, false)
        );
    }

    fn coords(ids: &[i64]) -> (HashMap<i64, f64>, HashMap<i64, f64>) {
        let mut lat = HashMap::new();
        let mut lon = HashMap::new();
        for (i, &id) in ids.iter().enumerate() {
            lat.insert(id, 1.30);
            lon.insert(id, 103.80 + i as f64 * 0.001);
        }
        (lat, lon)
    }

    #[test]
    fn splits_at_shared_node_and_keeps_interior_shape() {
        // Way A runs 1-2-3-4-5; way B touches node 3, so A splits there.
        let ways = vec![
            WayInfo {
                nodes: vec![1, 2, 3, 4, 5],
                forward: true,
                backward: false,
            },
            WayInfo {
                nodes: vec![3, 6],
                forward: true,
                backward: false,
            },
        ];
        let (lat, lon) = coords(&[1, 2, 3, 4, 5, 6]);
        let edges = split_ways(&ways, &lat, &lon, None);

        assert_eq!(edges.len(), 3);
        assert_eq!((edges[0].from_id, edges[0].to_id), (1, 3));
        assert_eq!(edges[0].shape_lat.len(), 1); // node 2
        assert_eq!((edges[1].from_id, edges[1].to_id), (3, 5));
        assert_eq!(edges[1].shape_lat.len(), 1); // node 4
        assert_eq!((edges[2].from_id, edges[2].to_id), (3, 6));
        assert!(edges[0].weight_mm > 0);
    }

    #[test]
    fn bidirectional_way_emits_reversed_twin() {
        let ways = vec![WayInfo {
            nodes: vec![1, 2, 3],
            forward: true,
            backward: true,
        }];
        let (lat, lon) = coords(&[1, 2, 3]);
        let edges = split_ways(&ways, &lat, &lon, None);

        assert_eq!(edges.len(), 2);
        assert_eq!((edges[0].from_id, edges[0].to_id), (1, 3));
        assert_eq!((edges[1].from_id, edges[1].to_id), (3, 1));
        assert_eq!(edges[0].weight_mm, edges[1].weight_mm);
        // Interior shape is reversed on the twin.
        assert_eq!(edges[0].shape_lon[0], edges[1].shape_lon[0]);
    }

    #[test]
    fn bbox_drops_outside_chains() {
        let ways = vec![WayInfo {
            nodes: vec![1, 2],
            forward: true,
            backward: false,
        }];
        let (lat, lon) = coords(&[1, 2]);
        let bbox = BBox {
            min_lat: 10.0,
            max_lat: 11.0,
            min_lng: 10.0,
            max_lng: 11.0,
        };
        assert!(split_ways(&ways, &lat, &lon, Some(bbox)).is_empty());
    }

    #[test]
    fn missing_coordinates_skip_chain() {
        let ways = vec![WayInfo {
            nodes: vec![1, 99],
            forward: true,
            backward: false,
        }];
        let (lat, lon) = coords(&[1]);
        assert!(split_ways(&ways, &lat, &lon, None).is_empty());
    }
}
