//! Execution of opportunities and triggered orders.

pub mod dispatcher;
pub mod executor;
pub mod types;

pub use dispatcher::ExecutionDispatcher;
pub use executor::{ExecutionRequest, ExecutionResponse, Executor, HttpExecutor, SimulatedExecutor};
pub use types::{ExecutionReceipt, ExecutionResult, ExecutionTarget, ExecutorStats, TargetKind};
