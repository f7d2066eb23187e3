//! Request, response and target value types.

pub mod request;
pub mod response;
pub mod target;

#[cfg(test)]
mod request_test;

// Re-export main types
pub use request::{Method, Request, TrailId};
pub use response::{Response, STATUS_NOT_SENT};
pub use target::{Protocol, Target};
