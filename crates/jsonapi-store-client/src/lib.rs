//! JSON:API Store Client - transport seam and service layer
//!
//! Connects the pure store core to an API through the [`Transport`] trait and
//! exposes live query handles over store snapshots.

pub mod error;
pub mod memory;
pub mod service;
pub mod transport;

pub use error::{ClientError, ClientResult, TransportError, TransportResult};
pub use memory::MemoryTransport;
pub use service::{JsonApiService, QueryHandle};
pub use transport::Transport;
