pub mod error;
pub mod limiters;
pub mod token_estimator;

pub use error::{CoreError, CoreResult};
