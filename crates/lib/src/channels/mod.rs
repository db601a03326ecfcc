//! Communication channels (Telegram).
//!
//! Channel trait and registry so the gateway can start/stop channel connectors
//! and route messages. Inbound messages are sent to the gateway for classification and dispatch.

mod message;
mod registry;
mod telegram;

pub use message::{InboundMessage, OutboundReply};
pub use registry::{ChannelHandle, ChannelRegistry};
pub use telegram::{TelegramChannel, TelegramUpdate};
