//! # ws-talker
//!
//! A WebSocket client session manager: connection lifecycle, discrete text
//! messages, and ordered delivery of inbound messages and status updates to
//! a UI consumer, independent of any UI framework.
//!
//! ## Architecture
//!
//! ```text
//! UI consumer (terminal front end, tests, ...)
//!     │  connect / send / disconnect        ▲ callbacks
//!     ▼                                     │
//! Session (session/) ── Dispatcher task ────┘
//!     │
//!     ├── validate_uri (uri)
//!     │
//!     └── Connector (transport/)
//!           ├── TungsteniteConnector (network)
//!           └── LoopbackConnector (in-memory echo)
//! ```

pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod uri;
