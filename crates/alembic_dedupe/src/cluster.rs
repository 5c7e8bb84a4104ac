//! Graph clustering of similar pairs.
//!
//! Small graphs use BFS connected components; large graphs use a
//! Louvain-style modularity pass on the similarity-weighted graph, falling
//! back to components if the pass fails.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Once;
use tracing::{debug, warn};

use crate::similarity::SimilarPair;

static LOUVAIN_FALLBACK: Once = Once::new();

/// Partition `{0..n_items-1}` into clusters.
///
/// Nodes untouched by any pair become singleton clusters. The strategy is
/// chosen by the number of distinct endpoints in the pair list.
pub fn cluster_pairs(
    pairs: &[SimilarPair],
    n_items: usize,
    louvain_threshold: usize,
) -> Vec<Vec<usize>> {
    if pairs.is_empty() {
        return (0..n_items).map(|i| vec![i]).collect();
    }

    let mut endpoint = vec![false; n_items];
    for &(i, j, _) in pairs {
        if i < n_items {
            endpoint[i] = true;
        }
        if j < n_items {
            endpoint[j] = true;
        }
    }
    let n_endpoints = endpoint.iter().filter(|&&e| e).count();

    if n_endpoints >= louvain_threshold {
        debug!(n_endpoints, "using Louvain community detection");
        match louvain_communities(pairs, n_items) {
            Ok(clusters) => return clusters,
            Err(err) => {
                LOUVAIN_FALLBACK.call_once(|| {
                    warn!(error = %err, "community detection failed, falling back to connected components");
                });
            }
        }
    } else {
        debug!(n_endpoints, "using BFS connected components");
    }

    bfs_components(pairs, n_items)
}

/// Undirected connected components via iterative BFS.
pub fn bfs_components(pairs: &[SimilarPair], n_items: usize) -> Vec<Vec<usize>> {
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n_items];
    for &(i, j, _) in pairs {
        if i < n_items && j < n_items && i != j {
            adjacency[i].push(j);
            adjacency[j].push(i);
        }
    }

    let mut visited = vec![false; n_items];
    let mut clusters = Vec::new();
    for start in 0..n_items {
        if visited[start] {
            continue;
        }
        visited[start] = true;
        let mut component = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            component.push(node);
            for &neighbor in &adjacency[node] {
                if !visited[neighbor] {
                    visited[neighbor] = true;
                    queue.push_back(neighbor);
                }
            }
        }
        component.sort_unstable();
        clusters.push(component);
    }
    clusters
}

struct LevelGraph {
    /// Per node: (neighbor, weight) excluding self loops.
    adjacency: Vec<Vec<(usize, f64)>>,
    /// Per node: accumulated internal weight from aggregation.
    self_loops: Vec<f64>,
}

impl LevelGraph {
    fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    fn weighted_degree(&self, node: usize) -> f64 {
        self.adjacency[node].iter().map(|&(_, w)| w).sum::<f64>() + 2.0 * self.self_loops[node]
    }
}

/// Louvain-style modularity communities on the similarity-weighted graph.
pub fn louvain_communities(pairs: &[SimilarPair], n_items: usize) -> Result<Vec<Vec<usize>>, String> {
    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_items];
    let mut total_weight = 0.0f64;
    for &(i, j, w) in pairs {
        if i >= n_items || j >= n_items || i == j {
            continue;
        }
        let w = w as f64;
        adjacency[i].push((j, w));
        adjacency[j].push((i, w));
        total_weight += w;
    }
    if total_weight <= 0.0 {
        return Err("graph has no positive edge weight".to_string());
    }

    let mut graph = LevelGraph {
        adjacency,
        self_loops: vec![0.0; n_items],
    };
    // Original node -> current meta-node.
    let mut partition: Vec<usize> = (0..n_items).collect();

    loop {
        let (community, n_communities, improved) = move_nodes(&graph, total_weight);
        if !improved || n_communities == graph.node_count() {
            for label in partition.iter_mut() {
                *label = community[*label];
            }
            break;
        }
        for label in partition.iter_mut() {
            *label = community[*label];
        }
        graph = aggregate(&graph, &community, n_communities);
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (node, &label) in partition.iter().enumerate() {
        groups.entry(label).or_default().push(node);
    }
    Ok(groups.into_values().collect())
}

/// One level of local moving. Returns (renumbered communities, count, moved?).
fn move_nodes(graph: &LevelGraph, total_weight: f64) -> (Vec<usize>, usize, bool) {
    let n = graph.node_count();
    let two_m = 2.0 * total_weight;
    let degree: Vec<f64> = (0..n).map(|i| graph.weighted_degree(i)).collect();
    let mut community: Vec<usize> = (0..n).collect();
    let mut sum_tot = degree.clone();
    let mut improved = false;

    loop {
        let mut moved = false;
        for node in 0..n {
            let current = community[node];
            // Weight from this node into each neighboring community;
            // BTreeMap keeps the scan order deterministic.
            let mut links: BTreeMap<usize, f64> = BTreeMap::new();
            for &(neighbor, weight) in &graph.adjacency[node] {
                *links.entry(community[neighbor]).or_insert(0.0) += weight;
            }

            sum_tot[current] -= degree[node];
            let mut best = current;
            let mut best_gain =
                links.get(&current).copied().unwrap_or(0.0) - sum_tot[current] * degree[node] / two_m;
            for (&candidate, &weight_in) in &links {
                if candidate == current {
                    continue;
                }
                let gain = weight_in - sum_tot[candidate] * degree[node] / two_m;
                if gain > best_gain + 1e-12 {
                    best_gain = gain;
                    best = candidate;
                }
            }
            sum_tot[best] += degree[node];

            if best != current {
                community[node] = best;
                moved = true;
                improved = true;
            }
        }
        if !moved {
            break;
        }
    }

    // Renumber community labels to 0..k in first-seen order.
    let mut relabel: BTreeMap<usize, usize> = BTreeMap::new();
    for &label in &community {
        let next = relabel.len();
        relabel.entry(label).or_insert(next);
    }
    let count = relabel.len();
    let renumbered = community.iter().map(|label| relabel[label]).collect();
    (renumbered, count, improved)
}

/// Collapse communities into meta-nodes, summing edge weights.
fn aggregate(graph: &LevelGraph, community: &[usize], n_communities: usize) -> LevelGraph {
    let mut between: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    let mut self_loops = vec![0.0f64; n_communities];

    for (node, &label) in community.iter().enumerate() {
        self_loops[label] += graph.self_loops[node];
        for &(neighbor, weight) in &graph.adjacency[node] {
            if neighbor < node {
                continue; // each undirected edge once
            }
            let other = community[neighbor];
            if label == other {
                self_loops[label] += weight;
            } else {
                let key = (label.min(other), label.max(other));
                *between.entry(key).or_insert(0.0) += weight;
            }
        }
    }

    let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n_communities];
    for (&(a, b), &weight) in &between {
        adjacency[a].push((b, weight));
        adjacency[b].push((a, weight));
    }
    LevelGraph {
        adjacency,
        self_loops,
    }
}
