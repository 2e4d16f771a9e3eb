//! Runtime statistics

pub mod metrics;

pub use metrics::{BrokerStats, PipelineStats, SubscriberMetrics};
pub(crate) use metrics::{BrokerCounters, PipelineCounters};
