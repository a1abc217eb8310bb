pub mod span;
pub mod stage;

pub use span::{BinSpan, auto_numeric_span, auto_time_span};
pub use stage::{BinOptions, BinStage};
