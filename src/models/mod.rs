//! Core data models of the publish pipeline.
//!
//! Requests and located assets flow in, resolved metadata is computed once
//! per run, and a `PublishResult` is accumulated leg by leg. All of them
//! serialise naturally as JSON via `serde` for the CLI and HTTP payloads.

pub mod asset;
pub mod metadata;
pub mod request;
pub mod result;
