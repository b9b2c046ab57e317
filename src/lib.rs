//! Whimsical word tools backed by a generative text model.
//!
//! The pipeline is: a [`tools::ToolKind`] builds a prompt, the
//! [`generation::GenerationClient`] wraps it in the structured-output envelope
//! and parses the reply, and [`align::align`] turns annotated replies into
//! display segments.

pub mod align;
pub mod debug_log;
pub mod gemini;
pub mod generation;
pub mod keystore;
pub mod prompt;
pub mod session;
pub mod tools;

#[cfg(feature = "web")]
pub mod web;

pub use align::{Annotation, Segment, align, reveal};
pub use generation::{GenerationClient, GenerationError, GenerationRequest, TextModel};
pub use keystore::{ApiKey, KeyStore, KeyStoreError};
pub use prompt::{Locale, PromptSpec, Tone};
pub use session::{History, SessionStore, ToolSession};
pub use tools::{Suggestion, TOOL_REGISTRY, ToolError, ToolInput, ToolKind};
