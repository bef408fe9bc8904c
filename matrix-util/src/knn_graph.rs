use crate::knn_match::ColumnDict;

use fnv::FnvHashMap as HashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;

const DEFAULT_BLOCK_SIZE: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistanceMetric {
    Euclidean,
    /// `1 - cos(x, y)`; a zero vector is at distance 1 from everything
    Cosine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnnSearch {
    /// brute force over all pairs, deterministic
    Exact,
    /// approximate search over an HNSW dictionary
    Hnsw,
}

#[derive(Clone, Debug)]
pub struct KnnGraphArgs {
    /// neighbourhood size, the node itself included
    pub knn: usize,
    pub block_size: usize,
    pub metric: DistanceMetric,
    pub search: KnnSearch,
    /// seed of the HNSW construction (ignored by exact search)
    pub seed: u64,
}

impl Default for KnnGraphArgs {
    fn default() -> Self {
        Self {
            knn: 20,
            block_size: DEFAULT_BLOCK_SIZE,
            metric: DistanceMetric::Euclidean,
            search: KnnSearch::Exact,
            seed: 42,
        }
    }
}

/// Directed k-nearest neighbour lists. Every node lists itself first,
/// followed by the other nodes in increasing distance.
pub struct KnnGraph {
    pub neighbours: Vec<Vec<usize>>,
    pub distances: Vec<Vec<f32>>,
    pub n_nodes: usize,
}

/// Undirected shared-nearest-neighbour graph with Jaccard weights
pub struct SnnGraph {
    /// Symmetric CSC adjacency matrix (n_nodes x n_nodes), no self-loops
    pub adjacency: CscMatrix<f32>,
    /// Sorted edge list (i < j)
    pub edges: Vec<(usize, usize)>,
    /// Jaccard weights, parallel to `edges`
    pub weights: Vec<f32>,
    pub n_nodes: usize,
}

impl KnnGraph {
    /// Find the nearest neighbours of every row of `data` (n x d)
    pub fn from_rows(data: &DMatrix<f32>, args: &KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let nn = data.nrows();

        if args.knn < 1 {
            return Err(anyhow::anyhow!("need at least one neighbour"));
        }
        if args.knn > nn {
            return Err(anyhow::anyhow!(
                "{} neighbours requested for {} points",
                args.knn,
                nn
            ));
        }

        let points = match args.metric {
            DistanceMetric::Euclidean => data.clone(),
            DistanceMetric::Cosine => unit_rows(data),
        };

        let jobs = create_jobs(nn, args.block_size);
        let njobs = jobs.len() as u64;
        let nothers = args.knn - 1;

        let blocks: Vec<Vec<(Vec<usize>, Vec<f32>)>> = match args.search {
            KnnSearch::Exact => jobs
                .into_par_iter()
                .progress_count(njobs)
                .map(|(lb, ub)| {
                    (lb..ub)
                        .map(|i| exact_search_others(&points, i, nothers, args.metric))
                        .collect()
                })
                .collect(),
            KnnSearch::Hnsw => {
                let dict = ColumnDict::from_rows(&points, (0..nn).collect(), args.seed)?;
                jobs.into_par_iter()
                    .progress_count(njobs)
                    .map(|(lb, ub)| -> anyhow::Result<Vec<_>> {
                        let mut ret = Vec::with_capacity(ub - lb);
                        for i in lb..ub {
                            let (others, dist) = dict.search_others(&i, nothers)?;
                            let dist: Vec<f32> = dist
                                .into_iter()
                                .map(|d| match args.metric {
                                    DistanceMetric::Euclidean => d,
                                    // |x - y|^2 = 2 (1 - cos) on the unit sphere
                                    DistanceMetric::Cosine => d * d / 2.0,
                                })
                                .collect();
                            ret.push((others, dist));
                        }
                        Ok(ret)
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?
            }
        };

        let mut neighbours = Vec::with_capacity(nn);
        let mut distances = Vec::with_capacity(nn);

        for (i, (others, dist)) in blocks.into_iter().flatten().enumerate() {
            let mut nbr = Vec::with_capacity(others.len() + 1);
            let mut d = Vec::with_capacity(others.len() + 1);
            nbr.push(i);
            d.push(0.0);
            nbr.extend(others);
            d.extend(dist);
            neighbours.push(nbr);
            distances.push(d);
        }

        info!(
            "{} x {} nearest neighbours ({:?}, {:?})",
            nn, args.knn, args.search, args.metric
        );

        Ok(KnnGraph {
            neighbours,
            distances,
            n_nodes: nn,
        })
    }

    /// Connect every pair of nodes that share at least one neighbour,
    /// weighted by `|N(i) ∩ N(j)| / |N(i) ∪ N(j)|`, and drop edges
    /// whose weight is not above `prune`
    pub fn shared_neighbour_graph(&self, prune: f32) -> SnnGraph {
        let nn = self.n_nodes;

        // node m -> nodes listing m as a neighbour
        let mut listed_by: Vec<Vec<usize>> = vec![vec![]; nn];
        for (i, nbr) in self.neighbours.iter().enumerate() {
            for &m in nbr {
                listed_by[m].push(i);
            }
        }

        let mut edges: Vec<((usize, usize), f32)> = (0..nn)
            .into_par_iter()
            .progress_count(nn as u64)
            .flat_map_iter(|i| {
                let mut shared: HashMap<usize, usize> = HashMap::default();
                for &m in &self.neighbours[i] {
                    for &j in &listed_by[m] {
                        if j > i {
                            *shared.entry(j).or_default() += 1;
                        }
                    }
                }
                let ni = self.neighbours[i].len();
                shared
                    .into_iter()
                    .filter_map(|(j, s)| {
                        let union = ni + self.neighbours[j].len() - s;
                        let w = s as f32 / union as f32;
                        (w > prune).then_some(((i, j), w))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        edges.par_sort_by_key(|&(ij, _)| ij);

        info!("{} shared-neighbour edges (prune at {})", edges.len(), prune);

        let mut coo = CooMatrix::new(nn, nn);
        for &((i, j), w) in edges.iter() {
            coo.push(i, j, w);
            coo.push(j, i, w);
        }

        let adjacency = CscMatrix::from(&coo);
        let (edge_pairs, weights): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        SnnGraph {
            adjacency,
            edges: edge_pairs,
            weights,
            n_nodes: nn,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }
}

impl SnnGraph {
    /// Get neighbors of a node from the CSC adjacency matrix
    pub fn neighbors(&self, node: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[node];
        let end = offsets[node + 1];
        &self.adjacency.row_indices()[start..end]
    }

    /// Edge weights parallel to [`SnnGraph::neighbors`]
    pub fn neighbor_weights(&self, node: usize) -> &[f32] {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[node];
        let end = offsets[node + 1];
        &self.adjacency.values()[start..end]
    }

    /// Weight of the edge `(i, j)`, zero if absent
    pub fn weight(&self, i: usize, j: usize) -> f32 {
        self.neighbors(i)
            .binary_search(&j)
            .map(|k| self.neighbor_weights(i)[k])
            .unwrap_or(0.0)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }
}

fn unit_rows(data: &DMatrix<f32>) -> DMatrix<f32> {
    let mut ret = data.clone();
    for mut row in ret.row_iter_mut() {
        let denom = row.norm();
        if denom > 0.0 {
            row /= denom;
        }
    }
    ret
}

/// `knn` closest other rows of `points`; ties broken by row index
fn exact_search_others(
    points: &DMatrix<f32>,
    i: usize,
    knn: usize,
    metric: DistanceMetric,
) -> (Vec<usize>, Vec<f32>) {
    let x_i = points.row(i);
    let mut cand: Vec<(f32, usize)> = (0..points.nrows())
        .filter(|&j| j != i)
        .map(|j| {
            let x_j = points.row(j);
            let d = match metric {
                DistanceMetric::Euclidean => x_i
                    .iter()
                    .zip(x_j.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt(),
                DistanceMetric::Cosine => 1.0 - x_i.dot(&x_j),
            };
            (d, j)
        })
        .collect();

    let by_distance = |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));

    if knn < cand.len() {
        cand.select_nth_unstable_by(knn, by_distance);
        cand.truncate(knn);
    }
    cand.sort_by(by_distance);

    cand.into_iter().map(|(d, j)| (j, d)).unzip()
}

pub fn create_jobs(ntot: usize, block_size: usize) -> Vec<(usize, usize)> {
    let block_size = if block_size == 0 {
        DEFAULT_BLOCK_SIZE
    } else {
        block_size
    };
    let nblock = ntot.div_ceil(block_size);
    (0..nblock)
        .map(|block| {
            let lb = block * block_size;
            let ub = ((block + 1) * block_size).min(ntot);
            (lb, ub)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight clusters of 5 points each in 2D, well separated
    fn two_cluster_matrix() -> DMatrix<f32> {
        DMatrix::from_row_slice(
            10,
            2,
            &[
                // Cluster A near origin
                0.0, 0.0, //
                0.1, 0.0, //
                0.0, 0.1, //
                0.1, 0.1, //
                0.05, 0.05, //
                // Cluster B far away
                10.0, 10.0, //
                10.1, 10.0, //
                10.0, 10.1, //
                10.1, 10.1, //
                10.05, 10.05, //
            ],
        )
    }

    fn args(knn: usize) -> KnnGraphArgs {
        KnnGraphArgs {
            knn,
            block_size: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_self_is_first_neighbour() {
        let data = two_cluster_matrix();
        let knn = KnnGraph::from_rows(&data, &args(3)).unwrap();

        assert_eq!(knn.num_nodes(), 10);
        for i in 0..10 {
            assert_eq!(knn.neighbours[i].len(), 3);
            assert_eq!(knn.neighbours[i][0], i);
            assert_eq!(knn.distances[i][0], 0.0);
            assert!(knn.distances[i].windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_too_many_neighbours() {
        let data = two_cluster_matrix();
        assert!(KnnGraph::from_rows(&data, &args(11)).is_err());
        assert!(KnnGraph::from_rows(&data, &args(0)).is_err());
    }

    #[test]
    fn test_snn_two_clusters_no_cross_edges() {
        let data = two_cluster_matrix();
        let snn = KnnGraph::from_rows(&data, &args(4))
            .unwrap()
            .shared_neighbour_graph(0.0);

        assert!(snn.num_edges() > 0);
        assert_eq!(snn.edges.len(), snn.weights.len());

        for (&(i, j), &w) in snn.edges.iter().zip(snn.weights.iter()) {
            assert!(i < j, "Edge ({}, {}) not canonical", i, j);
            assert!(w > 0.0 && w <= 1.0);
            let same_cluster = (i < 5 && j < 5) || (i >= 5 && j >= 5);
            assert!(same_cluster, "Cross-cluster edge ({}, {})", i, j);
        }
    }

    #[test]
    fn test_snn_weights_symmetric() {
        let data = two_cluster_matrix();
        let snn = KnnGraph::from_rows(&data, &args(3))
            .unwrap()
            .shared_neighbour_graph(0.0);

        assert_eq!(snn.adjacency.nrows(), 10);
        assert_eq!(snn.adjacency.ncols(), 10);

        for node in 0..snn.num_nodes() {
            assert!(!snn.neighbors(node).contains(&node));
            for &other in snn.neighbors(node) {
                assert_eq!(snn.weight(node, other), snn.weight(other, node));
            }
        }
    }

    #[test]
    fn test_jaccard_weight_by_hand() {
        // a line of points 0, 1, 2, 3 with two neighbours each
        let data = DMatrix::from_row_slice(4, 1, &[0.0, 1.0, 2.1, 3.3]);
        let knn = KnnGraph::from_rows(&data, &args(2)).unwrap();
        // N(0) = {0,1}, N(1) = {1,0}, N(2) = {2,1}, N(3) = {3,2}
        assert_eq!(knn.neighbours[2], vec![2, 1]);

        let snn = knn.shared_neighbour_graph(0.0);
        assert_eq!(snn.weight(0, 1), 1.0);
        assert!((snn.weight(1, 2) - 1.0 / 3.0).abs() < 1e-6);
        assert!((snn.weight(0, 2) - 1.0 / 3.0).abs() < 1e-6);
        assert!((snn.weight(2, 3) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(snn.weight(0, 3), 0.0);

        // prune keeps only weights strictly above the threshold
        let pruned = knn.shared_neighbour_graph(0.5);
        assert_eq!(pruned.edges, vec![(0, 1)]);
    }

    #[test]
    fn test_cosine_metric() {
        let data = DMatrix::from_row_slice(
            4,
            2,
            &[
                1.0, 0.0, //
                10.0, 0.5, //
                0.0, 1.0, //
                0.2, 7.0, //
            ],
        );
        let knn = KnnGraph::from_rows(
            &data,
            &KnnGraphArgs {
                knn: 2,
                metric: DistanceMetric::Cosine,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(knn.neighbours[0], vec![0, 1]);
        assert_eq!(knn.neighbours[3], vec![3, 2]);
        assert!(knn.distances[0][1] < 0.01);
    }

    #[test]
    fn test_hnsw_matches_exact_on_separated_clusters() {
        let data = two_cluster_matrix();
        let knn = KnnGraph::from_rows(
            &data,
            &KnnGraphArgs {
                knn: 3,
                search: KnnSearch::Hnsw,
                ..Default::default()
            },
        )
        .unwrap();

        for i in 0..10 {
            assert_eq!(knn.neighbours[i][0], i);
            assert_eq!(knn.neighbours[i].len(), 3);
            for &j in &knn.neighbours[i] {
                assert_eq!(i < 5, j < 5);
            }
        }
    }

    #[test]
    fn test_create_jobs_helper() {
        let jobs = create_jobs(10, 3);
        assert_eq!(jobs, vec![(0, 3), (3, 6), (6, 9), (9, 10)]);

        let jobs = create_jobs(6, 3);
        assert_eq!(jobs, vec![(0, 3), (3, 6)]);

        let jobs = create_jobs(1, 100);
        assert_eq!(jobs, vec![(0, 1)]);

        // block_size=0 should fall back to DEFAULT_BLOCK_SIZE
        let jobs = create_jobs(5, 0);
        assert_eq!(jobs, vec![(0, 5)]);
    }
}
