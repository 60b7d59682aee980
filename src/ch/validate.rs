//! Randomised correctness validation: overlay distances against plain
//! Dijkstra on the original edges carried inside the same graph.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use log::{error, info};
use rand::prelude::*;
use rayon::prelude::*;

use crate::graph::ChGraph;
use crate::route::search::{ch_distance, QueryState};

/// Ground truth: plain Dijkstra over the original (component-filtered) CSR.
/// Returns `u32::MAX` when `target` is unreachable.
pub fn plain_dijkstra(chg: &ChGraph, source: u32, target: u32) -> u32 {
    let n = chg.num_nodes as usize;
    if n == 0 {
        return u32::MAX;
    }
    let mut dist = vec![u32::MAX; n];
    let mut heap: BinaryHeap<Reverse<(u32, u32)>> = BinaryHeap::new();

    dist[source as usize] = 0;
    heap.push(Reverse((0, source)));

    while let Some(Reverse((d, u))) = heap.pop() {
        if u == target {
            return d;
        }
        if d > dist[u as usize] {
            continue;
        }

        for e in chg.orig_edges_from(u) {
            let v = chg.orig_head[e];
            let new_dist = d.saturating_add(chg.orig_weight[e]);
            if new_dist < dist[v as usize] {
                dist[v as usize] = new_dist;
                heap.push(Reverse((new_dist, v)));
            }
        }
    }

    dist[target as usize]
}

/// Node-to-node distance over the upward overlays. Allocates its own search
/// state; the batch validator reuses state per worker thread instead.
pub fn overlay_distance(chg: &ChGraph, source: u32, target: u32) -> u32 {
    let mut qs = QueryState::new(chg.num_nodes);
    ch_distance(chg, &mut qs, source, target)
}

#[derive(Debug)]
pub struct ValidationMismatch {
    pub source: u32,
    pub target: u32,
    pub dijkstra_mm: u32,
    pub ch_mm: u32,
}

#[derive(Debug)]
pub struct ValidationReport {
    pub n_tests: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub unreachable_both: usize,
    pub mismatches: Vec<ValidationMismatch>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.incorrect == 0
    }

    pub fn log(&self) {
        info!(
            "validation: {} tests, {} correct, {} incorrect, {} unreachable pairs",
            self.n_tests, self.correct, self.incorrect, self.unreachable_both
        );
        for m in &self.mismatches {
            error!(
                "mismatch {} -> {}: dijkstra={} ch={}",
                m.source, m.target, m.dijkstra_mm, m.ch_mm
            );
        }
    }
}

/// Compares `n_tests` random node pairs. Pair selection is deterministic in
/// `seed`; the ground-truth Dijkstras run in parallel.
pub fn validate_overlay(chg: &ChGraph, n_tests: usize, seed: u64) -> ValidationReport {
    let n = chg.num_nodes;
    if n == 0 || n_tests == 0 {
        return ValidationReport {
            n_tests: 0,
            correct: 0,
            incorrect: 0,
            unreachable_both: 0,
            mismatches: Vec::new(),
        };
    }

    info!("validating {} random queries...", n_tests);

    let results: Vec<(u32, u32, u32, u32)> = (0..n_tests)
        .into_par_iter()
        .map_init(
            || QueryState::new(n),
            |qs, i| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
                let source = rng.random_range(0..n);
                let target = rng.random_range(0..n);
                let dijkstra_mm = plain_dijkstra(chg, source, target);
                let ch_mm = ch_distance(chg, qs, source, target);
                (source, target, dijkstra_mm, ch_mm)
            },
        )
        .collect();

    let mut correct = 0;
    let mut incorrect = 0;
    let mut unreachable_both = 0;
    let mut mismatches = Vec::new();

    for (source, target, dijkstra_mm, ch_mm) in results {
        if dijkstra_mm == u32::MAX && ch_mm == u32::MAX {
            unreachable_both += 1;
            correct += 1;
        } else if dijkstra_mm == ch_mm {
            correct += 1;
        } else {
            incorrect += 1;
            if mismatches.len() < 10 {
                mismatches.push(ValidationMismatch {
                    source,
                    target,
                    dijkstra_mm,
                    ch_mm,
                });
            }
        }
    }

    ValidationReport {
        n_tests,
        correct,
        incorrect,
        unreachable_both,
        mismatches,
    }
}
