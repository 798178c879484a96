pub mod http;
pub mod socks5;

/// Admission cap shared by both front-ends: connections beyond this count are
/// closed before they even reach the protocol handshake.
pub const MAX_CONCURRENT_RELAYS: usize = 256;
