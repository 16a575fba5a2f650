//! Server Selector
//!
//! Pure selection logic for picking an upstream server.
//! Takes a candidate list and a strategy; owns no state besides what the
//! caller passes in.

use crate::domain::entities::Server;
use crate::domain::value_objects::Strategy;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Strategy dispatch for server selection.
pub struct ServerSelector;

impl ServerSelector {
    /// Keep only servers that may receive traffic: healthy and below their
    /// connection cap. Registration order is preserved.
    pub fn eligible(servers: &[Arc<Server>]) -> Vec<Arc<Server>> {
        servers
            .iter()
            .filter(|s| s.is_healthy() && !s.is_saturated())
            .cloned()
            .collect()
    }

    /// Pick one server from `candidates` using `strategy`.
    ///
    /// # Arguments
    /// * `strategy` - Selection strategy
    /// * `candidates` - Eligible servers in registration order
    /// * `counter` - Round-robin counter shared across calls
    ///
    /// # Returns
    /// The selected server, or None if `candidates` is empty
    pub fn pick(
        strategy: Strategy,
        candidates: &[Arc<Server>],
        counter: &AtomicUsize,
    ) -> Option<Arc<Server>> {
        if candidates.is_empty() {
            return None;
        }

        match strategy {
            Strategy::RoundRobin => Self::round_robin(candidates, counter),
            Strategy::LeastConnections => Self::least_connections(candidates),
            Strategy::WeightedRoundRobin => Self::weighted(candidates),
            Strategy::Random => Self::random(candidates),
            Strategy::HealthBased => Self::health_based(candidates),
        }
    }

    fn round_robin(candidates: &[Arc<Server>], counter: &AtomicUsize) -> Option<Arc<Server>> {
        let index = counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.get(index).cloned()
    }

    /// Fewest in-flight requests; ties go to the first registered.
    fn least_connections(candidates: &[Arc<Server>]) -> Option<Arc<Server>> {
        let mut best: Option<(&Arc<Server>, usize)> = None;

        for server in candidates {
            let current = server.current_connections();
            match best {
                Some((_, best_count)) if current >= best_count => {}
                _ => best = Some((server, current)),
            }
        }

        best.map(|(server, _)| Arc::clone(server))
    }

    /// Weighted random sampling; converges to weight-proportional traffic.
    fn weighted(candidates: &[Arc<Server>]) -> Option<Arc<Server>> {
        let weights: Vec<u32> = candidates.iter().map(|s| s.weight()).collect();
        match WeightedIndex::new(&weights) {
            Ok(dist) => {
                let mut rng = rand::thread_rng();
                candidates.get(dist.sample(&mut rng)).cloned()
            }
            Err(e) => {
                tracing::warn!("invalid server weights ({}), falling back to random", e);
                Self::random(candidates)
            }
        }
    }

    fn random(candidates: &[Arc<Server>]) -> Option<Arc<Server>> {
        let mut rng = rand::thread_rng();
        candidates.choose(&mut rng).cloned()
    }

    /// Highest composite health score; ties go to the first registered.
    fn health_based(candidates: &[Arc<Server>]) -> Option<Arc<Server>> {
        let mut best: Option<(&Arc<Server>, f64)> = None;

        for server in candidates {
            let score = server.health_score();
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((server, score)),
            }
        }

        best.map(|(server, _)| Arc::clone(server))
    }

    /// Calculate health scores for all candidates (useful for debugging/metrics).
    pub fn scores(candidates: &[Arc<Server>]) -> Vec<(String, f64)> {
        candidates
            .iter()
            .map(|s| (s.address().to_string(), s.health_score()))
            .collect()
    }
}
