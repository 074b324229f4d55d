//! Token set model and secret wrapper.

pub mod secret;
pub mod set;
