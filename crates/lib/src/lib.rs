//! larkops core library — config, event model, router, Lark client,
//! executor glue, and the callback listener server used by the CLI.

pub mod bot;
pub mod config;
pub mod engine;
pub mod events;
pub mod init;
pub mod lark;
pub mod router;
pub mod server;
