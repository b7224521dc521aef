pub mod partitioner;
pub mod planner;
pub mod stats;

pub use partitioner::PartitionPlan;
pub use partitioner::Partitioner;
pub use partitioner::SubtaskStats;
pub use planner::EvalPlan;
pub use planner::Planner;
pub use stats::CorrelationMethod;
pub use stats::TimeKind;
