use fnv::FnvHashMap as HashMap;
use indicatif::ParallelProgressIterator;
use instant_distance::{Builder, HnswMap, Search};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::fmt::{Debug, Display};

/// A dictionary (HnswMap wrapper) for fast approximate row look-up
///
pub struct ColumnDict<T> {
    pub dict: HnswMap<VecPoint, T>,
    pub data_vec: Vec<VecPoint>,
    pub name2index: HashMap<T, usize>,
}

impl<T> ColumnDict<T>
where
    T: Clone + Eq + std::hash::Hash + Debug + Display + Send + Sync,
{
    pub fn names(&self) -> &Vec<T> {
        &self.dict.values
    }

    pub fn len(&self) -> usize {
        self.data_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vec.is_empty()
    }

    /// Index every row of `data` (n x d) under the matching name
    ///
    /// * `data` - each row is a point
    /// * `names` - one name per row
    /// * `seed` - seed for the HNSW level assignment
    ///
    pub fn from_rows(data: &DMatrix<f32>, names: Vec<T>, seed: u64) -> anyhow::Result<Self> {
        let nn = data.nrows();

        if nn != names.len() {
            return Err(anyhow::anyhow!(
                "{} rows but {} names",
                nn,
                names.len()
            ));
        }

        let data_vec: Vec<VecPoint> = (0..nn)
            .into_par_iter()
            .progress_count(nn as u64)
            .map(|i| VecPoint {
                data: data.row(i).iter().copied().collect(),
            })
            .collect();

        let name2index: HashMap<T, usize> = names
            .iter()
            .enumerate()
            .map(|(j, x)| (x.clone(), j))
            .collect();

        if name2index.len() != nn {
            return Err(anyhow::anyhow!("duplicate names in the dictionary"));
        }

        let dict = Builder::default()
            .seed(seed)
            .build(data_vec.clone(), names);

        Ok(ColumnDict {
            dict,
            data_vec,
            name2index,
        })
    }

    /// Approximate k-nearest neighbours of an arbitrary point
    ///
    /// Returns names and distances, closest first.
    pub fn search_by_point(&self, query: &VecPoint, knn: usize) -> (Vec<T>, Vec<f32>) {
        let mut search = Search::default();
        self.dict
            .search(query, &mut search)
            .take(knn.min(self.len()))
            .map(|item| (item.value.clone(), item.distance))
            .unzip()
    }

    /// k-nearest neighbours of an indexed point, excluding the point itself
    ///
    /// * `query_name` - the name of the point
    /// * `knn` - the number of other points to return
    ///
    pub fn search_others(&self, query_name: &T, knn: usize) -> anyhow::Result<(Vec<T>, Vec<f32>)> {
        let &self_idx = self
            .name2index
            .get(query_name)
            .ok_or(anyhow::anyhow!("name {} not found", query_name))?;

        let query = &self.data_vec[self_idx];
        let (names, distances) = self.search_by_point(query, knn + 1);

        Ok(names
            .into_iter()
            .zip(distances)
            .filter(|(name, _)| name != query_name)
            .take(knn)
            .unzip())
    }
}

#[derive(Clone, Debug)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_others_skips_self() -> anyhow::Result<()> {
        let data = DMatrix::from_row_slice(
            6,
            2,
            &[
                0.0, 0.0, //
                0.1, 0.0, //
                0.0, 0.1, //
                5.0, 5.0, //
                5.1, 5.0, //
                5.0, 5.1, //
            ],
        );
        let dict = ColumnDict::from_rows(&data, (0..6).collect(), 7)?;
        assert_eq!(dict.len(), 6);

        let (names, distances) = dict.search_others(&0, 2)?;
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&0));
        assert!(names.iter().all(|&j| j < 3));
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));

        assert!(dict.search_others(&10, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_duplicate_names() {
        let data = DMatrix::<f32>::zeros(2, 2);
        assert!(ColumnDict::from_rows(&data, vec!["a", "a"], 1).is_err());
    }
}
