//! gRPC surface: messages, the application service trait, server and client glue.

pub mod client;
pub mod pb;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ClientCommandsClient;
pub use server::{ClientCommands, ClientCommandsServer};
