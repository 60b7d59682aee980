use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use citypath::ch::{self, validate::validate_overlay, ContractionParams};
use citypath::formats::OverlayFile;
use citypath::graph;
use citypath::ingest::{self, BBox};
use citypath::route::{CancelToken, Engine, LatLng, Router};
use citypath::server::{run_server, ServerConfig, StatsResponse};

#[derive(Parser)]
#[command(name = "citypath")]
#[command(about = "Contraction-hierarchies road routing for a single region", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Preprocess an OSM extract into a routable binary graph
    Preprocess {
        /// Input .osm.pbf file
        #[arg(short, long)]
        input: PathBuf,

        /// Output binary graph file
        #[arg(short, long, default_value = "graph.bin")]
        output: PathBuf,

        /// Bounding box filter: minLat,minLng,maxLat,maxLng
        #[arg(long)]
        bbox: Option<String>,

        /// Witness search hop limit
        #[arg(long, default_value_t = 5)]
        witness_hops: u32,
    },

    /// Compute a single route and print the result
    Route {
        /// Preprocessed graph file
        graph: PathBuf,

        /// Start coordinate: lat,lng
        #[arg(long)]
        from: String,

        /// End coordinate: lat,lng
        #[arg(long)]
        to: String,
    },

    /// Serve route queries over HTTP
    Serve {
        /// Preprocessed graph file
        graph: PathBuf,

        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Per-query timeout in milliseconds
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        /// Max concurrent queries (default: 2x available cores)
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Compare random overlay distances against plain Dijkstra
    Validate {
        /// Preprocessed graph file
        graph: PathBuf,

        /// Number of random queries
        #[arg(long, default_value_t = 1000)]
        queries: usize,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn parse_coord(s: &str) -> Result<LatLng> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        bail!("coordinate must be in 'lat,lng' format");
    }
    Ok(LatLng {
        lat: parts[0].trim().parse::<f64>().context("parse latitude")?,
        lng: parts[1].trim().parse::<f64>().context("parse longitude")?,
    })
}

fn parse_bbox(s: &str) -> Result<BBox> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        bail!("bbox must be 'minLat,minLng,maxLat,maxLng'");
    }
    let values: Vec<f64> = parts
        .iter()
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .context("parse bbox")?;
    Ok(BBox {
        min_lat: values[0],
        min_lng: values[1],
        max_lat: values[2],
        max_lng: values[3],
    })
}

fn run_preprocess(
    input: PathBuf,
    output: PathBuf,
    bbox: Option<String>,
    witness_hops: u32,
) -> Result<()> {
    let bbox = bbox.as_deref().map(parse_bbox).transpose()?;
    if let Some(b) = &bbox {
        info!(
            "bounding box filter: lat [{}, {}], lng [{}, {}]",
            b.min_lat, b.max_lat, b.min_lng, b.max_lng
        );
    }

    let start = Instant::now();

    info!("parsing {}...", input.display());
    let network = ingest::parse_pbf(&input, bbox)?;

    info!("building graph...");
    let g = graph::build(network);
    info!("graph: {} nodes, {} edges", g.num_nodes, g.num_edges);

    info!("extracting largest connected component...");
    let component = graph::largest_component(&g);
    info!(
        "largest component: {} nodes ({:.1}%)",
        component.len(),
        component.len() as f64 * 100.0 / g.num_nodes.max(1) as f64
    );
    let g = graph::filter_to_component(&g, &component);
    info!("filtered graph: {} nodes, {} edges", g.num_nodes, g.num_edges);

    info!("running contraction hierarchies...");
    let params = ContractionParams {
        hop_limit: witness_hops,
        ..ContractionParams::default()
    };
    let chg = ch::contract(&g, &params);
    info!(
        "overlay: {} forward edges, {} backward edges",
        chg.fwd_head.len(),
        chg.bwd_head.len()
    );

    info!("writing {}...", output.display());
    OverlayFile::write(&output, &chg)?;

    let size = std::fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
    info!(
        "done in {:.1}s, output {} ({:.1} MB)",
        start.elapsed().as_secs_f64(),
        output.display(),
        size as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn run_route(graph_path: PathBuf, from: String, to: String) -> Result<()> {
    let from = parse_coord(&from)?;
    let to = parse_coord(&to)?;

    info!("loading {}...", graph_path.display());
    let chg = OverlayFile::read(&graph_path)?;
    info!("building spatial index...");
    let engine = Engine::new(chg);

    let start = Instant::now();
    let result = engine.route(&CancelToken::new(), from, to)?;
    let elapsed = start.elapsed();

    println!(
        "distance: {:.1} m ({} polyline points, {:.2} ms)",
        result.total_distance_meters,
        result.segments.iter().map(|s| s.geometry.len()).sum::<usize>(),
        elapsed.as_secs_f64() * 1000.0
    );
    Ok(())
}

async fn run_serve(
    graph_path: PathBuf,
    port: u16,
    timeout_ms: u64,
    max_concurrent: Option<usize>,
) -> Result<()> {
    let start = Instant::now();

    info!("loading {}...", graph_path.display());
    let chg = OverlayFile::read(&graph_path)?;
    info!(
        "loaded: {} nodes, {} fwd edges, {} bwd edges",
        chg.num_nodes,
        chg.fwd_head.len(),
        chg.bwd_head.len()
    );

    let stats = StatsResponse {
        num_nodes: chg.num_nodes,
        num_fwd_edges: chg.fwd_head.len(),
        num_bwd_edges: chg.bwd_head.len(),
    };

    info!("building spatial index...");
    let engine: Arc<dyn Router> = Arc::new(Engine::new(chg));
    info!("ready in {:.0} ms", start.elapsed().as_secs_f64() * 1000.0);

    let mut cfg = ServerConfig {
        port,
        query_timeout: Duration::from_millis(timeout_ms),
        ..ServerConfig::default()
    };
    if let Some(cap) = max_concurrent {
        cfg.max_concurrent = cap;
    }

    run_server(engine, stats, cfg).await
}

fn run_validate(graph_path: PathBuf, queries: usize, seed: u64) -> Result<()> {
    info!("loading {}...", graph_path.display());
    let chg = OverlayFile::read(&graph_path)?;

    let report = validate_overlay(&chg, queries, seed);
    report.log();
    if !report.is_valid() {
        bail!("validation failed: {} mismatches", report.incorrect);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Preprocess {
            input,
            output,
            bbox,
            witness_hops,
        } => run_preprocess(input, output, bbox, witness_hops),
        Commands::Route { graph, from, to } => run_route(graph, from, to),
        Commands::Serve {
            graph,
            port,
            timeout_ms,
            max_concurrent,
        } => run_serve(graph, port, timeout_ms, max_concurrent).await,
        Commands::Validate {
            graph,
            queries,
            seed,
        } => run_validate(graph, queries, seed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinates() {
        let ll = parse_coord("1.2830, 103.8513").unwrap();
        assert_eq!(ll.lat, 1.2830);
        assert_eq!(ll.lng, 103.8513);
        assert!(parse_coord("1.0").is_err());
        assert!(parse_coord("a,b").is_err());
    }

    #[test]
    fn parses_bbox() {
        let b = parse_bbox("1.15,103.6,1.48,104.1").unwrap();
        assert_eq!(b.min_lat, 1.15);
        assert_eq!(b.min_lng, 103.6);
        assert_eq!(b.max_lat, 1.48);
        assert_eq!(b.max_lng, 104.1);
        assert!(parse_bbox("1,2,3").is_err());
    }
}
