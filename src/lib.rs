//! Score engine library
//!
//! Feature aggregation from user events and score orchestration with
//! fallback, exposed over an axum HTTP API.

pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod handlers;
pub mod ingress;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod scoring;
pub mod state;
