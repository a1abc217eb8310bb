pub mod head;
pub mod sort;
pub mod sort_key;
pub mod tail;

pub use head::{HeadMode, HeadStage};
pub use sort::SortStage;
pub use sort_key::{
    OrderedF64, SortElement, SortInterpretation, SortKey, compare_keys, extract_keys,
};
pub use tail::{TailOrder, TailStage};

#[cfg(test)]
mod head_test;
#[cfg(test)]
mod sort_test;
