pub mod parser;
pub mod store;
pub mod types;

pub use parser::{parse_event_line, parse_event_log, read_summary};
pub use store::{EventStore, PruneReport};
pub use types::{
    AdapterEvent, InterventionSignal, Outcome, ProjectStats, SessionSummary, SummaryFilter,
    SummaryStats,
};
