//! Common types, protocol definitions, and errors shared across `ojster` crates.

pub mod error;
pub mod protocol;
pub mod sealed;

pub use error::{ErrorKind, OjsterError};
pub use protocol::EnvMap;
