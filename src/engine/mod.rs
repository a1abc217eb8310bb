pub mod errors;
pub mod reduce;
pub mod types;

pub use errors::*;
