pub mod driver;
pub mod mock_data_generator;

pub use driver::SyntheticBoard;
pub use mock_data_generator::{BandWeights, EegGenerator};
