pub mod stage;
pub mod window;

pub use stage::{StreamStatsOptions, StreamStatsStage};
pub use window::{MonotonicDeque, RunningState, StreamState, WindowState};
