//! Path computation engine - K-shortest loopless paths (Yen's method over Dijkstra)
//!
//! The engine is a pure function of its inputs. It performs no liveness
//! filtering: every node and edge in the snapshot is treated as usable, so
//! callers hand it a health-filtered snapshot.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use super::graph::{Node, TopologySnapshot};
use super::paths::{PathCandidate, PathSet, PathType, WeightConfig};

/// Default number of ranked paths per pair
pub const DEFAULT_MAX_PATHS: usize = 10;

/// Composite cost of the directed edge `source -> target`.
///
/// Built from the endpoint nodes' cpu and latency rather than any edge
/// attribute: `hop + cpu / avg(cpu) + latency * avg(latency) / 100`.
pub fn edge_weight(source: &Node, target: &Node, weights: &WeightConfig) -> f64 {
    let avg_cpu = (source.cpu_capacity as f64 + target.cpu_capacity as f64) / 2.0;
    let avg_latency = (source.base_latency as f64 + target.base_latency as f64) / 2.0;
    let cpu_component = if avg_cpu > 0.0 { 1.0 / avg_cpu } else { 0.0 };

    weights.hop * 1.0 + weights.cpu * cpu_component + weights.latency * (avg_latency / 100.0)
}

/// Snapshot re-indexed for traversal
struct WeightedGraph<'a> {
    ids: Vec<&'a str>,
    latency: Vec<i64>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl<'a> WeightedGraph<'a> {
    fn build(snapshot: &'a TopologySnapshot, weights: &WeightConfig) -> (Self, HashMap<&'a str, usize>) {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut ids = Vec::new();
        let mut nodes: Vec<&Node> = Vec::new();

        for node in &snapshot.nodes {
            if index.contains_key(node.id.as_str()) {
                continue;
            }
            index.insert(node.id.as_str(), ids.len());
            ids.push(node.id.as_str());
            nodes.push(node);
        }

        let mut adjacency: Vec<Vec<(usize, f64)>> = vec![Vec::new(); ids.len()];
        for edge in &snapshot.edges {
            let (Some(&from), Some(&to)) = (
                index.get(edge.source.as_str()),
                index.get(edge.target.as_str()),
            ) else {
                continue;
            };
            if adjacency[from].iter().any(|(t, _)| *t == to) {
                continue;
            }
            adjacency[from].push((to, edge_weight(nodes[from], nodes[to], weights)));
        }

        let latency = nodes.iter().map(|n| n.base_latency).collect();
        (
            Self {
                ids,
                latency,
                adjacency,
            },
            index,
        )
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn edge_cost(&self, from: usize, to: usize) -> Option<f64> {
        self.adjacency[from]
            .iter()
            .find(|(t, _)| *t == to)
            .map(|(_, w)| *w)
    }

    /// Weight of a full path measured on the unmodified graph
    fn path_weight(&self, path: &[usize]) -> Option<f64> {
        path.windows(2)
            .map(|hop| self.edge_cost(hop[0], hop[1]))
            .sum()
    }

    /// Sum of both endpoints' latency over every hop, divided by the hop count
    fn path_latency(&self, path: &[usize]) -> i64 {
        let hops = path.len().saturating_sub(1);
        if hops == 0 {
            return 0;
        }
        // Reported metrics are unbounded, so the sum saturates instead of overflowing
        let total = path.windows(2).fold(0i64, |acc, hop| {
            acc.saturating_add(self.latency[hop[0]])
                .saturating_add(self.latency[hop[1]])
        });
        total / hops as i64
    }
}

/// State for Dijkstra's algorithm
#[derive(Clone, PartialEq)]
struct DijkstraState {
    cost: f64,
    seq: u64,
    node: usize,
}

impl Eq for DijkstraState {}

impl Ord for DijkstraState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DijkstraState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A spliced path waiting in the candidate heap
#[derive(Clone, PartialEq)]
struct QueuedPath {
    weight: f64,
    seq: u64,
    path: Vec<usize>,
}

impl Eq for QueuedPath {}

impl Ord for QueuedPath {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lowest weight first, ties broken by discovery order
        other
            .weight
            .total_cmp(&self.weight)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn dijkstra(
    graph: &WeightedGraph<'_>,
    source: usize,
    target: usize,
    blocked_nodes: &[bool],
    blocked_edges: &HashSet<(usize, usize)>,
) -> Option<(Vec<usize>, f64)> {
    if source == target {
        return Some((vec![source], 0.0));
    }

    let mut dist = vec![f64::INFINITY; graph.len()];
    let mut prev: Vec<Option<usize>> = vec![None; graph.len()];
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;

    dist[source] = 0.0;
    heap.push(DijkstraState {
        cost: 0.0,
        seq,
        node: source,
    });

    while let Some(DijkstraState { cost, node, .. }) = heap.pop() {
        if node == target {
            let mut path = vec![target];
            let mut current = target;
            while let Some(p) = prev[current] {
                path.push(p);
                current = p;
            }
            path.reverse();
            return Some((path, cost));
        }

        if cost > dist[node] {
            continue;
        }

        for &(next, weight) in &graph.adjacency[node] {
            if blocked_nodes[next] || blocked_edges.contains(&(node, next)) {
                continue;
            }
            let next_cost = cost + weight;
            if next_cost < dist[next] {
                dist[next] = next_cost;
                prev[next] = Some(node);
                seq += 1;
                heap.push(DijkstraState {
                    cost: next_cost,
                    seq,
                    node: next,
                });
            }
        }
    }

    None
}

fn k_shortest_paths(
    graph: &WeightedGraph<'_>,
    source: usize,
    target: usize,
    k: usize,
) -> Vec<(Vec<usize>, f64)> {
    if k == 0 {
        return Vec::new();
    }

    let open_nodes = vec![false; graph.len()];
    let Some(shortest) = dijkstra(graph, source, target, &open_nodes, &HashSet::new()) else {
        return Vec::new();
    };

    let mut accepted: Vec<(Vec<usize>, f64)> = vec![shortest];
    let mut heap: BinaryHeap<QueuedPath> = BinaryHeap::new();
    let mut queued: HashSet<Vec<usize>> = HashSet::new();
    let mut seq = 0u64;

    while accepted.len() < k {
        let last = match accepted.last() {
            Some((path, _)) => path.clone(),
            None => break,
        };

        for spur_index in 0..last.len().saturating_sub(1) {
            let spur_node = last[spur_index];
            let root = &last[..=spur_index];

            // Edges leaving the root on any known path sharing it
            let blocked_edges: HashSet<(usize, usize)> = accepted
                .iter()
                .map(|(p, _)| p)
                .chain(queued.iter())
                .filter(|p| p.len() > spur_index + 1 && p[..=spur_index] == *root)
                .map(|p| (p[spur_index], p[spur_index + 1]))
                .collect();

            let mut blocked_nodes = vec![false; graph.len()];
            for &n in &root[..spur_index] {
                blocked_nodes[n] = true;
            }

            let Some((spur_path, _)) =
                dijkstra(graph, spur_node, target, &blocked_nodes, &blocked_edges)
            else {
                continue;
            };

            let mut total: Vec<usize> = root[..spur_index].to_vec();
            total.extend(spur_path);

            if queued.contains(&total) || accepted.iter().any(|(p, _)| *p == total) {
                continue;
            }
            let Some(weight) = graph.path_weight(&total) else {
                continue;
            };

            seq += 1;
            queued.insert(total.clone());
            heap.push(QueuedPath {
                weight,
                seq,
                path: total,
            });
        }

        match heap.pop() {
            Some(next) => {
                queued.remove(&next.path);
                accepted.push((next.path, next.weight));
            }
            None => break,
        }
    }

    accepted
}

/// Engine computing ranked path sets from topology snapshots
#[derive(Debug, Clone, Copy)]
pub struct PathEngine {
    max_paths: usize,
}

impl Default for PathEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PATHS)
    }
}

impl PathEngine {
    pub fn new(max_paths: usize) -> Self {
        Self { max_paths }
    }

    pub fn max_paths(&self) -> usize {
        self.max_paths
    }

    /// Rank up to K loopless paths from `source` to `destination`.
    ///
    /// Unknown endpoints or an unreachable destination yield an empty set.
    pub fn compute(
        &self,
        snapshot: &TopologySnapshot,
        weights: &WeightConfig,
        source: &str,
        destination: &str,
    ) -> PathSet {
        let weights = weights.normalized();
        let (graph, index) = WeightedGraph::build(snapshot, &weights);

        let (Some(&from), Some(&to)) = (index.get(source), index.get(destination)) else {
            tracing::debug!(
                "Source {} or destination {} not in snapshot",
                source,
                destination
            );
            return PathSet::empty(source, destination, weights);
        };

        let ranked = k_shortest_paths(&graph, from, to, self.max_paths);
        if ranked.is_empty() {
            tracing::debug!("No route from {} to {}", source, destination);
        }

        let candidates = ranked
            .iter()
            .enumerate()
            .map(|(rank, (path, weight))| PathCandidate {
                path: path.iter().map(|&n| graph.ids[n].to_string()).collect(),
                path_type: if rank == 0 {
                    PathType::Primary
                } else {
                    PathType::Backup
                },
                weight: *weight,
                hop_count: path.len() - 1,
                total_latency: graph.path_latency(path),
            })
            .collect();

        PathSet::new(source, destination, candidates, weights)
    }
}
