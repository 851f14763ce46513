//! HTTP front door: an OpenAI-compatible chat completions endpoint that
//! answers from a document store or relays straight to the model.

pub mod config;
pub mod error;
pub mod routes;
pub mod schemas;
pub mod state;
pub mod writer;
