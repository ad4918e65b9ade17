pub mod engine;
pub mod features;
pub mod model;
pub mod rules;
pub mod scoring;
pub mod types;
