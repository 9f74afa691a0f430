//! Response-generation collaborator.

pub mod responder;

pub use responder::{ChatResponder, MockResponder, Responder};
