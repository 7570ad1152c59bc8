pub mod hub;
pub mod registry;
pub mod router;
pub mod session;

use bytes::Bytes;
use kindred_types::events::ServerFrame;

pub use hub::{Hub, HubConfig, HubStats};
pub use session::{JoinPolicy, run_session};

/// Identifies one live connection. A user may hold several.
pub type SessionId = uuid::Uuid;

/// Serialize a server frame into the bytes queued for delivery.
pub fn encode_frame(frame: &ServerFrame) -> serde_json::Result<Bytes> {
    Ok(Bytes::from(frame.to_json()?))
}
