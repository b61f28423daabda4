//! Governance intelligence engine: daily pillar scores, composite status,
//! forecasts with confidence bands, anomalies and bilingual insights.

pub mod anomaly;
pub mod anomaly_stage;
pub mod band;
pub mod clock;
pub mod collector;
pub mod composite;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod forecast;
pub mod forecast_stage;
pub mod insight;
pub mod insight_stage;
pub mod query;
pub mod recorder_stage;
pub mod rng;
pub mod stage;
pub mod store;
pub mod types;
