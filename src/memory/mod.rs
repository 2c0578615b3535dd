pub mod optimizer;
pub mod store;

pub use optimizer::{compress_content, HistoryOptimizer, OptimizerConfig};
pub use store::{
    build_checkpointer, compute_history_hash, Checkpointer, InMemoryCheckpointer,
    PostgresCheckpointer,
};
