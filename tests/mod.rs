//! Shared test support, included from each test binary via `#[path]`.

#[path = "helpers.rs"]
mod helpers;

#[allow(unused_imports)]
pub use helpers::*;
