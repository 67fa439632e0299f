//! MCP tool server over the Keboola Storage API.
//!
//! Sessions are opened with `initialize` on `POST /mcp`; each one owns a
//! configuration, a Storage API client and a [`kbc_workspace::WorkspaceHandle`].
//! Tool calls are dispatched through [`tools`].

pub mod config;
pub mod links;
pub mod rpc;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod tools;
