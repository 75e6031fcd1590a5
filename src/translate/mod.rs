//! API translation between `OpenAI` Chat Completions and Gemini formats.
//!
//! The core of the gateway: converts requests, single-shot responses, and
//! streaming frames between the two API formats. Nothing here does I/O.

pub mod gemini_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
