pub mod aggregation;
pub mod dispatcher;
pub mod error_handling;
pub mod types;

pub use aggregation::*;
pub use dispatcher::*;
pub use error_handling::{SampleError, ABORTED_DETAIL, PATH_SEQUENCE_MARKER};
pub use types::*;
