//! # docbackup-cosmos
//!
//! Document store provider speaking the account REST gateway over HTTPS.
//! [`CosmosClient`] implements both [`docbackup_core::store::DocumentStore`]
//! and [`docbackup_core::store::DocumentWriter`].
//!
//! Only gateway mode is supported.

pub mod auth;
pub mod client;
pub mod connection;
mod store;

pub use client::{CosmosClient, CosmosClientBuilder};
pub use connection::ConnectionString;
