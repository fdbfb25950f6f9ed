//! stratadb - multi-tenant application backend with runtime-defined
//! models, a document filter engine, and an observer-driven record
//! pipeline shared by every surface.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod core;
pub mod describe;
pub mod filter;
pub mod http_server;
pub mod pipeline;
pub mod schema;
pub mod tenancy;
