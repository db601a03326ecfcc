//! Langflow run-flow client and response answer extraction.

mod client;
mod extract;

pub use client::{FlowClient, FlowError, SenderIdentity};
pub use extract::extract_answer;
