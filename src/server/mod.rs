//! Transport edge: client WebSocket sessions, feed ingress/egress, and the
//! axum surface. The async edge hands work to the synchronous core at this
//! boundary; node work never runs on the tokio runtime.

pub mod feed;
pub mod session;
pub mod ws;

pub use session::{RequestRegistry, Session, SessionConfig};
