//! # RTC Test Utilities
//!
//! Shared test utilities for the RTC coordinator.
//!
//! This crate provides mock implementations and test fixtures for
//! isolated coordinator testing without a media worker process or Redis.
//!
//! ## Modules
//!
//! - `mock_store` - In-memory chat store with failure injection
//! - `mock_media` - Media engine with switchable faults
//! - `fixtures` - A wired coordinator core and scripted peers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rtc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let coordinator = TestCoordinator::builder()
//!         .store(MockChatStore::builder().with_group("general").build())
//!         .build();
//!
//!     let mut alice = coordinator.connect();
//!     let mut bob = coordinator.connect();
//!     alice.join_room("R1").await;
//!     bob.join_room("R1").await;
//!
//!     let joined = alice
//!         .wait_for(|e| matches!(e, ServerEvent::PeerJoined { .. }))
//!         .await;
//! }
//! ```
//!
//! ## Test Patterns
//!
//! ### Upstream Failures
//!
//! ```rust,ignore
//! let coordinator = TestCoordinator::builder()
//!     .engine(MockMediaEngine::builder().fail_create_router().build())
//!     .build();
//!
//! let mut peer = coordinator.connect();
//! let err = peer
//!     .request("join-room", json!({"roomId": "R1"}))
//!     .await
//!     .unwrap_err();
//! assert_eq!(err.code, 6); // UPSTREAM_FAILURE
//! ```

pub mod fixtures;
pub mod mock_media;
pub mod mock_store;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_media::*;
pub use mock_store::*;
