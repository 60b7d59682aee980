//! citypath: a contraction-hierarchies road routing engine for a single
//! geographic region.
//!
//! Pipeline:
//! - `ingest`: OSM PBF extract -> raw directed edges (car profile)
//! - `graph`: raw edges -> compact CSR, largest weakly-connected component
//! - `ch`: priority-driven node contraction with witness search -> forward
//!   and backward upward overlays
//! - `formats`: validated binary serialization with a CRC-32 trailer
//! - `route`: snapping, bidirectional upward Dijkstra, shortcut unpacking,
//!   geometry assembly
//! - `server`: HTTP host with admission control and per-query deadlines
//!
//! The loaded graph is immutable and shared across threads; each query owns
//! its transient state, so the hot path takes no locks.

pub mod ch;
pub mod formats;
pub mod geo;
pub mod graph;
pub mod ingest;
pub mod route;
pub mod server;

pub use graph::{ChGraph, Graph};
pub use route::{
    CancelToken, Endpoint, Engine, LatLng, RouteError, RouteResult, Router, Segment,
};
