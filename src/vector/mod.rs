pub mod index;

pub use index::{DeleteSelector, Filter, QueryMatch, RestVectorIndex, VectorIndex};
