pub mod counters;
pub mod credential;
pub mod endpoint;
pub mod session_config;
pub mod transport_state;

pub use counters::{Counters, CountersSnapshot};
pub use credential::Credential;
pub use endpoint::Endpoint;
pub use session_config::{JumpConfig, SessionConfig};
pub use transport_state::TransportState;
