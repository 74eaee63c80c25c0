//! REST client for the Gemini generative image API.
//!
//! Only the single call the extraction stage needs is wrapped: send a
//! prompt plus one inline PNG to `generateContent` and read back the
//! first inline image part of the first candidate.

pub mod client;
pub mod prompt;
pub mod wire;

pub use client::{GeminiClient, GeminiConfig, GeminiError, InlineImage};
