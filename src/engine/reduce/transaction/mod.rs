pub mod grouper;
pub mod stage;

pub use grouper::{
    TransactionEvent, TransactionGroup, TransactionGrouper, TransactionOptions, TransactionState,
};
pub use stage::TransactionStage;

#[cfg(test)]
mod stage_test;
