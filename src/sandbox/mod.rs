//! Sandbox module: configuration, environment caching, output capture,
//! limits and the executor that ties them to the runtime.

pub mod cache;
pub mod config;
pub mod executor;
pub mod io;
pub mod limits;
