//! # CC Test Utilities
//!
//! Shared test utilities for the Call Controller (CC) service.
//!
//! This crate provides:
//! - Deterministic Ed25519 signing keys (`crypto_fixtures`)
//! - Access token builders (`token_builders`)
//! - Server test harness (`TestCcServer` for E2E tests)
//! - WebSocket signaling client (`TestWsClient`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestCcServer::spawn_in_memory(test_registry()).await?;
//!     let token = server.token_for(7, "attachee");
//!
//!     let mut client = TestWsClient::connect(&server, &token).await?;
//!     client.send_json(&serde_json::json!({"type": "join", "room_token": "r-1"})).await?;
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;
pub mod ws_client;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
pub use ws_client::*;
