pub mod channel;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod registry;
pub mod router;
pub mod store;
pub mod transport;

pub use channel::{Frame, SecureChannel};
pub use error::RelayError;
pub use registry::{ConnectionPolicy, ConnectionRegistry};
pub use router::{MessageRouter, Routed};
pub use store::{OfflineRecord, OfflineStore};
