//! Audio Proxy
//!
//! Brokers real-time bidirectional audio between many client sessions and
//! a single AI backend socket.
//!
//! # Architecture
//!
//! Two independent endpoints share the same shape but disjoint state:
//! - `/proxy`: interactive browser-like clients, server-assigned sessions,
//!   downstream audio forwarded to the client untouched.
//! - `/call`: telephony clients, client-supplied or minted call ids,
//!   downstream audio merged across backend chunks and re-wrapped into a
//!   single container per emission.
//!
//! Both multiplex onto their endpoint's single backend socket by prefixing
//! every upstream binary frame with the session id; the backend's reader
//! task demultiplexes downstream frames the same way.

pub mod admin;
pub mod audio;
pub mod backend;
pub mod call;
pub mod config;
pub mod error;
pub mod handle;
pub mod protocol;
pub mod proxy;
pub mod registry;
pub mod routes;
pub mod state;
pub mod touch;

pub use config::Config;
pub use error::{AdminError, ProxyError};
pub use handle::Handle;
pub use routes::build_router;
pub use state::AppState;
