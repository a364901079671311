//! Data sources behind the views and the cache wiring for them.

pub mod client;
pub mod mock;
pub mod remote;
pub mod types;

pub use client::{keys, DataClient};
pub use mock::MockBackend;
pub use remote::RemoteApi;
