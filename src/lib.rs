//! Tiered file storage service: chunked uploads, content-hash dedup, and
//! policy-driven placement across local, cold, and bulk storage tiers.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod hash;
pub mod models;
pub mod routes;
pub mod services;
