//! Bridge topic-tagged serial and UDP links to a host publish/subscribe node.
//!
//! # Crate Structure
//!
//! - [`transport`]: ring buffer and the serial and UDP link backends
//! - [`frame`]: `px4` and `cobs` wire framing over a link
//! - [`bridge`]: topic tables, mapping negotiation and the bridge itself

/// Re-export transport types.
pub mod transport {
    pub use serialbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use serialbridge_frame::*;
}

/// Re-export bridge types.
pub mod bridge {
    pub use serialbridge_bridge::*;
}
