pub mod file_service;
pub mod metadata;
pub mod session_store;
pub mod tiering;
pub mod tiers;
pub mod transfer;
