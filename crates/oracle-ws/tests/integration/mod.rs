//! Integration tests for oracle-ws.
//!
//! These tests run the bundled transport against a local WebSocket server:
//! - Connection establishment and teardown
//! - Server-initiated close
//! - End-to-end query sessions over a real socket

pub mod common;
