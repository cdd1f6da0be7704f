//! Form intake, action processing, and heartbeat analytics for the formgate
//! service.

pub mod actions;
pub mod analytics;
pub mod config;
pub mod db;
pub mod email;
pub mod models;
pub mod notify;
pub mod rate_limit;
pub mod schema;
pub mod security;
pub mod service;
pub mod sessions;
pub mod store;
pub mod tester;
pub mod ttl;
pub mod validation;

pub use config::AppConfig;
pub use models::{
    ActionOutcome, AnalyticsRecord, AnalyticsSummary, HeartbeatRequest, ProcessingResult,
    Submission,
};
pub use schema::{FormSchema, FormSummary, SchemaRegistry};
pub use service::{FormError, FormService};
