pub mod anomaly;
pub mod api;
pub mod config;
pub mod history;
pub mod ingest;
pub mod pipeline;
