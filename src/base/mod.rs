//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): transport error taxonomy with stable numeric codes
//! - [`LoadState`](loadstate::LoadState): progress of a transport session
//! - [`Counters`](counters::Counters): instance-scoped request/response counters

pub mod context;
pub mod counters;
pub mod loadstate;
pub mod neterror;

#[cfg(test)]
mod tests;
