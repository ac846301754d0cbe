//! Random forest regressor: bootstrap-bagged [`RegressionTree`]s averaged together.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::tree::RegressionTree;
use crate::error::{PlannerError, Result};

/// Hyperparameters for [`RandomForest`].
#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    /// Number of trees
    pub n_estimators: usize,
    /// Base seed; tree `i` is seeded with `seed + i`
    pub seed: u64,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features drawn per split; all of them when `None`
    pub max_features: Option<usize>,
    /// Bootstrap sampling
    pub bootstrap: bool,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 140,
            seed: 42,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
        }
    }
}

/// Random Forest model
#[derive(Debug, Clone)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<RegressionTree>,
    n_features: usize,
    feature_importances: Option<Array1<f64>>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            n_features: 0,
            feature_importances: None,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    /// Fit the forest to training data.
    ///
    /// Trees are grown in parallel. Each tree draws its bootstrap sample and
    /// feature subsets from its own seed, so the fitted forest does not depend
    /// on thread scheduling.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(PlannerError::Model(format!(
                "expected {} targets, got {}",
                n_samples,
                y.len()
            )));
        }
        if n_samples == 0 {
            return Err(PlannerError::Model("cannot fit a forest on zero samples".into()));
        }
        if self.params.n_estimators == 0 {
            return Err(PlannerError::InvalidInput("n_estimators must be at least 1".into()));
        }

        let params = &self.params;
        let trees: Result<Vec<RegressionTree>> = (0..params.n_estimators)
            .into_par_iter()
            .map(|tree_idx| -> Result<RegressionTree> {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(tree_idx as u64));

                let sample_indices: Vec<usize> = if params.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };

                let x_boot = x.select(Axis(0), &sample_indices);
                let y_boot: Array1<f64> = sample_indices.iter().map(|&i| y[i]).collect();

                let mut tree = RegressionTree::new()
                    .with_max_depth(params.max_depth)
                    .with_min_samples_split(params.min_samples_split)
                    .with_min_samples_leaf(params.min_samples_leaf)
                    .with_max_features(params.max_features)
                    .with_seed(rng.next_u64());
                tree.fit(&x_boot, &y_boot)?;
                Ok(tree)
            })
            .collect();

        self.trees = trees?;
        self.n_features = x.ncols();
        self.compute_feature_importances();

        Ok(self)
    }

    fn compute_feature_importances(&mut self) {
        let mut total = vec![0.0; self.n_features];
        for tree in &self.trees {
            if let Some(imp) = tree.feature_importances() {
                for (acc, v) in total.iter_mut().zip(imp.iter()) {
                    *acc += v;
                }
            }
        }

        let sum: f64 = total.iter().sum();
        if sum > 0.0 {
            for v in &mut total {
                *v /= sum;
            }
        }
        self.feature_importances = Some(Array1::from_vec(total));
    }

    /// Mean prediction over all trees for a single sample. Trees are summed
    /// in index order so repeated calls are bit-identical.
    pub fn predict_one(&self, sample: ArrayView1<f64>) -> Result<f64> {
        if self.trees.is_empty() {
            return Err(PlannerError::Model("forest is not fitted".into()));
        }
        let mut sum = 0.0;
        for tree in &self.trees {
            sum += tree.predict_one(sample)?;
        }
        Ok(sum / self.trees.len() as f64)
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        x.rows().into_iter().map(|row| self.predict_one(row)).collect()
    }

    /// Normalized mean decrease in squared error per feature.
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        self.feature_importances.as_ref()
    }

    /// Get number of trees
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        let n = 40;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y = (0..n).map(|i| 2.0 * i as f64).collect();
        (x, y)
    }

    #[test]
    fn test_regressor_tracks_trend() {
        let (x, y) = linear_data();
        let mut rf = RandomForest::new(ForestParams {
            n_estimators: 20,
            ..Default::default()
        });
        rf.fit(&x, &y).unwrap();

        assert_eq!(rf.n_trees(), 20);
        let preds = rf.predict(&array![[5.0, 2.0], [35.0, 2.0]]).unwrap();
        assert!(preds[0] < preds[1]);
        assert!((preds[1] - 70.0).abs() < 10.0);
    }

    #[test]
    fn test_same_seed_same_predictions() {
        let (x, y) = linear_data();
        let params = ForestParams {
            n_estimators: 15,
            max_features: Some(1),
            ..Default::default()
        };

        let mut a = RandomForest::new(params.clone());
        let mut b = RandomForest::new(params);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();

        let pa = a.predict(&x).unwrap();
        let pb = b.predict(&x).unwrap();
        assert_eq!(pa.to_vec(), pb.to_vec());
    }

    #[test]
    fn test_importances_normalized() {
        let (x, y) = linear_data();
        let mut rf = RandomForest::new(ForestParams {
            n_estimators: 10,
            ..Default::default()
        });
        rf.fit(&x, &y).unwrap();
        let imp = rf.feature_importances().unwrap();
        assert!((imp.sum() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1]);
    }

    #[test]
    fn test_fit_rejects_empty_and_predict_requires_fit() {
        let mut rf = RandomForest::new(ForestParams::default());
        let x = Array2::<f64>::zeros((0, 8));
        let y = Array1::<f64>::zeros(0);
        assert!(rf.fit(&x, &y).is_err());
        assert!(rf.predict_one(array![0.0, 0.0].view()).is_err());
    }

    #[test]
    fn test_constant_target() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![4.0, 4.0, 4.0];
        let mut rf = RandomForest::new(ForestParams {
            n_estimators: 5,
            ..Default::default()
        });
        rf.fit(&x, &y).unwrap();
        assert_eq!(rf.predict_one(array![100.0].view()).unwrap(), 4.0);
    }
}
