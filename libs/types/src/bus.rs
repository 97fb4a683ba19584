//! The streaming bus wire envelope: JSON objects whose shapes match the
//! system's domain entities, plus an opaque ack token threaded through the
//! execution pipeline so acking after execution can be modeled without
//! committing to a specific bus implementation.

use serde::{Deserialize, Serialize};

/// Opaque handle identifying a bus message for acking. Implementations of
/// the bus trait (see `libs/bus`) mint these; the execution pipeline only
/// ever passes them back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckToken(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage<T> {
    pub topic: String,
    pub payload: T,
    pub ack_token: AckToken,
}
