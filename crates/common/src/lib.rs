//! Common types shared by the session crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
