//! Data Cloud query API interaction layer.
//!
//! This module covers everything between the exporter and the remote query
//! service:
//!
//! - **Credential lifecycle** with cached validation and single-flight
//!   refresh via [`auth::TokenCache`]
//! - **Wire envelope decoding** into typed batches in [`batch`]
//! - **The three remote operations** (submit, cursor fetch, offset fetch)
//!   behind [`transport::QueryTransport`]

pub mod auth;
pub mod batch;
pub mod transport;

pub use auth::{Credential, TokenCache};
pub use batch::{FieldDescriptor, QueryHandle, RowBatch, RowSet, SubmitResponse};
pub use transport::{build_http_client, QueryTransport};
