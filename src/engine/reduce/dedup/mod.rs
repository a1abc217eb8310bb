pub mod stage;
pub mod table;

pub use stage::DedupStage;
pub use table::{CombinationTable, DedupDecision, DedupOptions, DedupPolicy};
