//! Session records, redacted secrets, and the machine identity that keys token encryption.

pub mod identity;
pub mod token;

pub use identity::*;
pub use token::{secret::*, set::*};
