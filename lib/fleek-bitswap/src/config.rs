use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const BITSWAP_PROTOCOL: &str = "/ipfs/bitswap/1.2.0";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Protocol id used for both outgoing and incoming streams.
    pub protocol: String,
    /// Number of wants that may be sent to the peer without having been answered yet.
    pub max_outstanding_wants: usize,
    /// Debounce window between the first queued want and the flush that sends it.
    #[serde(with = "humantime_serde")]
    pub send_wantlist_delay: Duration,
    /// Soft limit for one outgoing message, checked with a safety margin.
    pub max_message_size: usize,
    /// Hard limit for one length-prefixed frame, in both directions.
    pub max_frame_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: BITSWAP_PROTOCOL.to_string(),
            max_outstanding_wants: 256,
            send_wantlist_delay: Duration::from_millis(5),
            max_message_size: 16 * 1024,
            max_frame_size: 4 * 1024 * 1024,
        }
    }
}
