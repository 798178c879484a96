use serde::Serialize;

/// Lifecycle state of the SSH transport. A failed `Connecting` goes straight
/// to `Closed` carrying a terminal error — there is no automatic reconnect at
/// this layer (§7 of the design notes leaves that to the CLI/GUI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Idle,
    Connecting,
    Ready,
    Closing,
    Closed,
}

impl TransportState {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl Default for TransportState {
    fn default() -> Self {
        Self::Idle
    }
}
