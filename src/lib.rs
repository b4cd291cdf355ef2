pub mod cache;
pub mod clients;
pub mod config;
pub mod errors;
pub mod identity;
pub mod models;
pub mod server;
pub mod sync;
