//! Gateway: HTTP server hosting the Telegram webhook and a health endpoint,
//! plus the inbound pipeline that classifies and dispatches each message.

mod server;

pub use server::run_gateway;
