//! Shared-nearest-neighbour graph and modularity clustering of cells
//!
//! The graph is built on the leading principal components; communities
//! are found by multi-level local moving and aggregation (Louvain).

use crate::common::*;

use matrix_util::knn_graph::{DistanceMetric, KnnGraph, KnnGraphArgs, KnnSearch, SnnGraph};
use matrix_util::utils::seeded_rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

const MAX_LOCAL_SWEEPS: usize = 100;
const MAX_LEVELS: usize = 50;
const MIN_GAIN: f64 = 1e-10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphMetric {
    Euclidean,
    Cosine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighbourSearch {
    /// deterministic brute force
    Exact,
    /// approximate HNSW search for large inputs
    Hnsw,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterParams {
    /// number of leading principal components
    pub dims: usize,
    /// neighbourhood size, the cell itself included
    pub knn: usize,
    pub metric: GraphMetric,
    pub search: NeighbourSearch,
    /// drop shared-neighbour edges with Jaccard weight at or below this
    pub prune: f32,
    /// modularity resolution; larger values give more clusters
    pub resolution: f64,
    pub seed: Option<u64>,
    /// cluster the stored graph instead of rebuilding it
    pub reuse_graph: bool,
    /// number of random starts; the best modularity wins
    pub n_start: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            dims: 10,
            knn: 20,
            metric: GraphMetric::Euclidean,
            search: NeighbourSearch::Exact,
            prune: 0.0,
            resolution: 1.0,
            seed: Some(42),
            reuse_graph: false,
            n_start: 1,
        }
    }
}

/// Neighbour graph kept with the inputs it was built from
pub struct StoredGraph {
    pub snn: SnnGraph,
    pub dims: usize,
    /// raw indices of the cells, one per graph node
    pub cells: Vec<usize>,
    /// dataset version at which the PCA scores behind the graph were
    /// committed
    pub pca_version: u64,
}

/// Clustering result
#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// Cluster assignment for each cell, `0` being the largest cluster
    pub labels: Vec<usize>,
    /// Number of clusters
    pub n_clusters: usize,
    /// Modularity of the assignment at the requested resolution
    pub modularity: f64,
}

impl ClusterResult {
    /// Get cluster size distribution
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_clusters];
        for &label in &self.labels {
            if label < self.n_clusters {
                counts[label] += 1;
            }
        }
        counts
    }

    /// Get cluster assignment histogram as ASCII, showing up to
    /// `max_show` clusters (labels are already sorted by size)
    pub fn histogram_ascii(&self, max_width: usize, max_show: usize) -> String {
        let sizes = self.cluster_sizes();
        let n_total = sizes.len();
        let n_show = max_show.min(n_total);
        let max_size = sizes.first().copied().unwrap_or(1).max(1);
        let ncells = self.labels.len().max(1) as f64;

        let mut lines = Vec::new();
        lines.push(format!(
            "Cluster assignments ({} cells, {} clusters, modularity {:.4}):",
            self.labels.len(),
            n_total,
            self.modularity
        ));
        lines.push(String::new());

        for (cluster_id, &size) in sizes.iter().enumerate().take(n_show) {
            let pct = 100.0 * size as f64 / ncells;
            let bar_len = ((size as f64 / max_size as f64) * max_width as f64) as usize;
            let bar = "█".repeat(bar_len.max(1));

            lines.push(format!(
                "  Cluster {:3}  {:>6} cells ({:>5.1}%)  {}",
                cluster_id, size, pct, bar
            ));
        }

        if n_total > n_show {
            let hidden_cells: usize = sizes[n_show..].iter().sum();
            lines.push(format!(
                "  ... and {} more clusters ({} cells, {:.1}%)",
                n_total - n_show,
                hidden_cells,
                100.0 * hidden_cells as f64 / ncells
            ));
        }

        lines.join("\n")
    }
}

/// Build the shared-nearest-neighbour graph over the first `dims`
/// columns of the PCA scores (cells x K)
pub fn build_snn_graph(scores: &Mat, params: &ClusterParams) -> Result<SnnGraph> {
    let (nn, kk) = scores.shape();

    if params.dims < 1 || params.dims > kk {
        return Err(PipelineError::Dimension(format!(
            "{} dimensions requested, {} principal components available",
            params.dims, kk
        )));
    }
    if params.knn < 1 || params.knn > nn {
        return Err(PipelineError::Dimension(format!(
            "{} neighbours requested for {} cells",
            params.knn, nn
        )));
    }

    let args = KnnGraphArgs {
        knn: params.knn,
        metric: match params.metric {
            GraphMetric::Euclidean => DistanceMetric::Euclidean,
            GraphMetric::Cosine => DistanceMetric::Cosine,
        },
        search: match params.search {
            NeighbourSearch::Exact => KnnSearch::Exact,
            NeighbourSearch::Hnsw => KnnSearch::Hnsw,
        },
        seed: params.seed.unwrap_or(42),
        ..Default::default()
    };

    let pcs = scores.columns(0, params.dims).into_owned();

    info!(
        "Building KNN graph (k={}) for {} cells on {} PCs ...",
        params.knn, nn, params.dims
    );
    let knn = KnnGraph::from_rows(&pcs, &args)?;
    let snn = knn.shared_neighbour_graph(params.prune);

    let mean_degree = if nn > 0 {
        2.0 * snn.num_edges() as f64 / nn as f64
    } else {
        0.0
    };
    info!(
        "SNN graph: {} nodes, {} edges (mean degree {:.1})",
        snn.num_nodes(),
        snn.num_edges(),
        mean_degree
    );

    Ok(snn)
}

/// Modularity clustering of a shared-neighbour graph
///
/// * `resolution` - γ in `Q = 1/2m Σ_c [ in_c - γ tot_c² / 2m ]`
/// * `seed` - node visiting order; `None` draws from the OS
/// * `n_start` - independent random starts, the best modularity is kept
///
/// The same seed on the same graph always gives the same labels.
pub fn louvain_clustering(
    graph: &SnnGraph,
    resolution: f64,
    seed: Option<u64>,
    n_start: usize,
) -> Result<ClusterResult> {
    let nn = graph.num_nodes();

    if nn == 0 {
        return Err(PipelineError::Data("no cells to cluster".into()));
    }
    if !(resolution.is_finite() && resolution >= 0.0) {
        return Err(PipelineError::Data(format!(
            "invalid resolution {}",
            resolution
        )));
    }

    warn_if_unseeded("clustering", seed);
    let mut rng = seeded_rng(seed);
    let base = Network::from_snn(graph);

    info!(
        "Louvain: {} nodes, total weight {:.1}, resolution {}, {} start(s)",
        nn,
        base.total_weight / 2.0,
        resolution,
        n_start.max(1)
    );

    let mut best: Option<(Vec<usize>, f64)> = None;

    for start in 0..n_start.max(1) {
        let mut rng_s = seeded_rng(Some(rng.random()));
        let membership = multi_level(&base, resolution, &mut rng_s);
        let q = base.modularity(&membership, resolution);
        info!("  start {}: modularity {:.4}", start + 1, q);

        if best.as_ref().is_none_or(|(_, q_best)| q > *q_best) {
            best = Some((membership, q));
        }
    }

    let (membership, modularity) = best.ok_or_else(|| PipelineError::Data("no clustering".into()))?;
    let (labels, n_clusters) = relabel_by_size(&membership);

    let result = ClusterResult {
        labels,
        n_clusters,
        modularity,
    };

    let sizes = result.cluster_sizes();
    info!(
        "Louvain done: {} clusters, cluster sizes min={} max={}",
        n_clusters,
        sizes.iter().copied().min().unwrap_or(0),
        sizes.iter().copied().max().unwrap_or(0),
    );

    Ok(result)
}

/// Weighted undirected network with self-loops. `adj[i]` holds
/// `(j, A_ij)` for `j != i`; `self_loop[i]` is `A_ii`.
struct Network {
    adj: Vec<Vec<(usize, f64)>>,
    self_loop: Vec<f64>,
    /// `k_i = Σ_j A_ij`
    degree: Vec<f64>,
    /// `2m = Σ_i k_i`
    total_weight: f64,
}

impl Network {
    fn from_snn(graph: &SnnGraph) -> Self {
        let nn = graph.num_nodes();
        let adj: Vec<Vec<(usize, f64)>> = (0..nn)
            .map(|i| {
                graph
                    .neighbors(i)
                    .iter()
                    .zip(graph.neighbor_weights(i))
                    .filter(|&(&j, _)| j != i)
                    .map(|(&j, &w)| (j, w as f64))
                    .collect()
            })
            .collect();
        Self::new(adj, vec![0.0; nn])
    }

    fn new(adj: Vec<Vec<(usize, f64)>>, self_loop: Vec<f64>) -> Self {
        let degree: Vec<f64> = adj
            .iter()
            .zip(self_loop.iter())
            .map(|(a, &s)| s + a.iter().map(|&(_, w)| w).sum::<f64>())
            .collect();
        let total_weight = degree.iter().sum();
        Self {
            adj,
            self_loop,
            degree,
            total_weight,
        }
    }

    fn num_nodes(&self) -> usize {
        self.adj.len()
    }

    fn modularity(&self, membership: &[usize], resolution: f64) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let ncomm = membership.iter().max().map(|&c| c + 1).unwrap_or(0);
        let mut inner = vec![0.0; ncomm];
        let mut tot = vec![0.0; ncomm];

        for i in 0..self.num_nodes() {
            let c = membership[i];
            tot[c] += self.degree[i];
            inner[c] += self.self_loop[i];
            for &(j, w) in &self.adj[i] {
                if membership[j] == c {
                    inner[c] += w;
                }
            }
        }

        let m2 = self.total_weight;
        inner
            .iter()
            .zip(tot.iter())
            .map(|(&a, &t)| a / m2 - resolution * (t / m2).powi(2))
            .sum()
    }

    /// Move nodes between communities while modularity increases.
    /// Returns the community of each node and whether anything moved.
    fn local_moving(&self, resolution: f64, rng: &mut StdRng) -> (Vec<usize>, bool) {
        let nn = self.num_nodes();
        let m2 = self.total_weight;

        let mut community: Vec<usize> = (0..nn).collect();
        let mut tot: Vec<f64> = self.degree.clone();

        if m2 <= 0.0 {
            return (community, false);
        }

        let mut order: Vec<usize> = (0..nn).collect();
        order.shuffle(rng);

        let mut link_weight = vec![0.0f64; nn];
        let mut touched: Vec<usize> = Vec::new();
        let mut any_move = false;

        for _ in 0..MAX_LOCAL_SWEEPS {
            let mut moved = false;

            for &i in &order {
                let ci = community[i];
                let k_i = self.degree[i];

                touched.clear();
                touched.push(ci);
                for &(j, w) in &self.adj[i] {
                    let c = community[j];
                    if link_weight[c] == 0.0 && !touched.contains(&c) {
                        touched.push(c);
                    }
                    link_weight[c] += w;
                }

                tot[ci] -= k_i;

                let gain = |c: usize, tot: &[f64]| link_weight[c] - resolution * tot[c] * k_i / m2;

                let mut best = ci;
                let mut best_gain = gain(ci, &tot);
                for &c in touched.iter().skip(1) {
                    let g = gain(c, &tot);
                    if g > best_gain + MIN_GAIN {
                        best = c;
                        best_gain = g;
                    }
                }

                tot[best] += k_i;
                community[i] = best;
                if best != ci {
                    moved = true;
                }

                for &c in &touched {
                    link_weight[c] = 0.0;
                }
            }

            if !moved {
                break;
            }
            any_move = true;
        }

        (community, any_move)
    }

    /// Collapse communities (dense labels `0..ncomm`) into nodes
    fn aggregate(&self, community: &[usize], ncomm: usize) -> Self {
        let mut self_loop = vec![0.0; ncomm];
        let mut links: Vec<fnv::FnvHashMap<usize, f64>> = vec![Default::default(); ncomm];

        for i in 0..self.num_nodes() {
            let ci = community[i];
            self_loop[ci] += self.self_loop[i];
            for &(j, w) in &self.adj[i] {
                let cj = community[j];
                if ci == cj {
                    self_loop[ci] += w;
                } else {
                    *links[ci].entry(cj).or_default() += w;
                }
            }
        }

        let adj = links
            .into_iter()
            .map(|l| {
                let mut l: Vec<(usize, f64)> = l.into_iter().collect();
                l.sort_by_key(|&(j, _)| j);
                l
            })
            .collect();

        Self::new(adj, self_loop)
    }
}

fn multi_level(base: &Network, resolution: f64, rng: &mut StdRng) -> Vec<usize> {
    let mut membership: Vec<usize> = (0..base.num_nodes()).collect();
    let mut aggregated: Option<Network> = None;

    for level in 0..MAX_LEVELS {
        let net = aggregated.as_ref().unwrap_or(base);
        let (community, moved) = net.local_moving(resolution, rng);
        if !moved {
            break;
        }

        let (community, ncomm) = dense_labels(&community);
        membership.iter_mut().for_each(|c| *c = community[*c]);
        log::debug!("  level {}: {} communities", level + 1, ncomm);

        if ncomm == net.num_nodes() {
            break;
        }
        aggregated = Some(net.aggregate(&community, ncomm));
    }

    membership
}

/// Relabel to `0..k` in order of first appearance
fn dense_labels(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut map = fnv::FnvHashMap::<usize, usize>::default();
    let dense = labels
        .iter()
        .map(|&c| {
            let next = map.len();
            *map.entry(c).or_insert(next)
        })
        .collect();
    (dense, map.len())
}

/// Relabel so that cluster 0 is the largest; ties go to the cluster
/// holding the lowest-indexed cell
fn relabel_by_size(labels: &[usize]) -> (Vec<usize>, usize) {
    let (dense, k) = dense_labels(labels);
    let mut sizes = vec![0usize; k];
    dense.iter().for_each(|&c| sizes[c] += 1);

    // dense labels already follow first appearance
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));

    let mut rank = vec![0usize; k];
    for (r, &c) in order.iter().enumerate() {
        rank[c] = r;
    }
    (dense.iter().map(|&c| rank[c]).collect(), k)
}
