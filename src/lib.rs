//! Request-state caching for async data views.
//!
//! - [`cache`]: keyed entries with in-flight dedupe, staleness, invalidation
//!   and garbage collection
//! - [`mutation`]: writes with optimistic updates and rollback
//! - [`pagination`]: page windows, pagers and list controllers
//! - [`http`]: JSON transport with normalized results
//! - [`query`]: the bindings views use on top of all of the above
//! - [`api`]: the data sources behind the bundled terminal front-end

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod mutation;
pub mod pagination;
pub mod query;

pub use cache::{QueryCache, QueryKey};
pub use error::QueryError;
