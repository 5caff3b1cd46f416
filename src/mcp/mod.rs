//! MCP (Model Context Protocol) server over stdio.
//!
//! JSON-RPC 2.0 messages, newline-delimited. The server exposes the catalog
//! search tool to an LLM-hosting client and relays host cancellation into
//! in-flight searches.

pub mod protocol;
pub mod server;
pub mod transport;

pub use server::McpServer;
