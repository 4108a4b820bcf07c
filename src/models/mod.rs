pub mod clock;
pub mod match_state;
pub mod messages;
pub mod registry;

// Re-export important types
pub use clock::*;
pub use match_state::*;
pub use messages::*;
pub use registry::*;
