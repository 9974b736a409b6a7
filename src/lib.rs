//! facciata — a front filter for dynamic page renderers.
//!
//! Sits between clients and an origin renderer and does three things:
//! blocks direct requests for a denylist of file extensions, serves (and
//! regenerates on demand) disk-cached article pages, and strips redundant
//! whitespace from streamed HTML outside verbatim regions. Everything else
//! is proxied to the origin untouched.

pub mod cache;
pub mod config;
pub mod guard;
pub mod hooks;
pub mod infra;
pub mod trim;
