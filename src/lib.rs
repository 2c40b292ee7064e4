//! Google Search Console MCP tool library.
//! Request shaping, site identifier fallback, quick-wins detection, and the MCP and HTTP front ends.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod model;
pub mod quick_wins;
pub mod service;
pub mod shaper;
pub mod site_id;
pub mod store;
pub mod tools;
