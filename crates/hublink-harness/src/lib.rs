//! Test harness for Hublink clients.
//!
//! An in-process hub and a seeded environment, so end-to-end tests can drive
//! a real [`hublink_client::HubClient`] through handshake, activation,
//! message exchange and reconnection over loopback sockets.
//!
//! # Example
//!
//! ```rust,ignore
//! use hublink_client::ClientOptions;
//! use hublink_harness::MockHub;
//!
//! #[tokio::test]
//! async fn send_one_letter() {
//!     let hub = MockHub::start().await.unwrap();
//!     let client = hub.client(ClientOptions::default(), 1);
//!
//!     client.open("u1").await.unwrap();
//!     client.send_message("u1", b"hello", true).await.unwrap();
//!
//!     let received = hub.next_message().await.unwrap();
//!     assert_eq!(received.letter.data, b"hello");
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod hub_keys;
pub mod mock_hub;
pub mod seeded_env;

pub use mock_hub::{CLIENT_ID, CLIENT_TOKEN, MockHub, ReceivedLetter};
pub use seeded_env::SeededEnv;
