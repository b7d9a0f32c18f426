//! Presentation: KMS output enumeration and modesetting, plus the PRIME
//! bridge that carries a buffer from a render session into a display
//! session.

pub mod bridge;
pub mod output;
