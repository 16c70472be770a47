mod cost_function;
mod cost_matrix;
mod jaqaman_linker;
mod sparse_lapjv;
mod sparse_matrix;

pub use cost_function::{
    CostFunction, FeaturePenaltyCostFunction, Featured, Positioned, SpotCostFunction,
    SquareDistanceCostFunction, square_distance,
};
pub use cost_matrix::{CostMatrix, CostMatrixCreator, LinkingCostMatrixCreator, percentile};
pub use jaqaman_linker::{Assignment, JaqamanLinker, augmented_matrix};
pub use sparse_lapjv::lapjv;
pub use sparse_matrix::SparseCostMatrix;
