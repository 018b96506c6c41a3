//! Plant disease analysis service
//!
//! Accepts plant photos over HTTP, analyzes each one in the background with an
//! external vision model, and lets clients poll for the outcome by job id.

pub mod app_state;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
