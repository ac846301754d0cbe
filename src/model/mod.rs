//! Bagged regression trees used by the delay forecaster.

mod forest;
mod tree;

pub use forest::{ForestParams, RandomForest};
pub use tree::{RegressionTree, TreeNode};
