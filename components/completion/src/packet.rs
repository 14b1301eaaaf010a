//! Completion packets

use serde::{Deserialize, Serialize};

/// One queued completion notification
///
/// The fields are opaque to the port; by convention `key` identifies the
/// file the port is associated with, `value` the user's overlapped pointer,
/// `status` the final IO status and `information` the byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompletionPacket {
    pub key: u64,
    pub value: u64,
    pub status: u32,
    pub information: u64,
}

impl CompletionPacket {
    pub fn new(key: u64, value: u64, status: u32, information: u64) -> Self {
        Self {
            key,
            value,
            status,
            information,
        }
    }
}
