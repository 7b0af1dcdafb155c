pub mod airports;
pub mod cache;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod geo;
pub mod inference;
pub mod loader;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod scorecard;
