//! # SkinLens Backend
//!
//! HTTP prediction server for the skin-lesion classifier. Accepts a lesion
//! image plus patient metadata as a multipart form and answers with the
//! predicted class and the probability of every class.
//!
//! ## Features
//!
//! - Fail-fast artifact loading before the listener is bound
//! - Prediction work on Tokio's blocking pool
//! - Confidence threshold with an uncertain fallback label
//! - Health and metrics endpoints, optional CORS

pub mod cli_options;
pub mod config;
pub mod form;
pub mod server;
pub mod service;

pub use cli_options::BackendCliOptions;
pub use config::BackendConfig;
pub use server::{handle_request, PredictionServer, ServerContext};
pub use service::{
    PredictRequest, PredictionResult, PredictionService, DEFAULT_CONFIDENCE_THRESHOLD,
    UNCERTAIN_LABEL,
};
