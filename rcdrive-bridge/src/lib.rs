//! Bridge between a browser control page and an RC vehicle on a serial link.

pub mod config;
pub mod discovery;
pub mod http;
pub mod link;
pub mod serial;
pub mod state;
pub mod transport;
pub mod web_server;

#[cfg(test)]
mod test_utils;
