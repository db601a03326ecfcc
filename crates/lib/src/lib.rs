//! flowrelay core library — config, Telegram channel, trigger classification,
//! dispatch, and the Langflow client used by the CLI binary.

pub mod channels;
pub mod config;
pub mod dispatch;
pub mod flow;
pub mod gateway;
pub mod init;
pub mod trigger;
