//! Integration tests: the public API end to end.

mod common;
mod pipeline;
mod scenarios;
