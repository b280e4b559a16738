//! Data models for the Eco Action app.
//!
//! Field names serialize in camelCase to match the mobile client's JSON shapes.

mod mission;
mod participation;
mod user;

pub use mission::*;
pub use participation::*;
pub use user::*;
