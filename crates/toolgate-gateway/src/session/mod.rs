//! Session routing and the streamable HTTP transport bridge.

pub mod engine;
pub mod http;
pub mod protocol;
pub mod router;

pub use engine::{EngineFactory, PingEngine, PingEngineFactory, ProtocolEngine};
pub use protocol::MCP_SESSION_ID_HEADER;
pub use router::{RouteOutcome, RouterError, Session, SessionEvent, SessionRoute, SessionRouter};
