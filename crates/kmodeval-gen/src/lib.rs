//! Hosted-model code generation for kmodeval.
//!
//! Implements [`CodeSource`] against an OpenAI-compatible chat completions
//! endpoint. One request per configured model; per-model failures are
//! captured in the returned candidates rather than aborting the batch.

mod client;

pub use client::{GenConfig, HostedModelClient};

pub use kmodeval_core::{CodeSource, GeneratedCandidate};
