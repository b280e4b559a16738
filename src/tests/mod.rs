//! Integration tests: the HTTP backend end to end, and the sync layer over a scripted backend.

pub(crate) mod support;
