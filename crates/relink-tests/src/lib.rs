// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # relink Integration Tests
//!
//! Scenario tests for the connection resilience core, driven against an
//! in-process simulated server that injects faults through method calls.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p relink-tests
//!
//! cargo test -p relink-tests --test integration_reconnection
//! cargo test -p relink-tests --test integration_recovery
//! cargo test -p relink-tests --test integration_monitor
//! cargo test -p relink-tests --test integration_config
//!
//! RUST_LOG=relink_opcua=trace cargo test -p relink-tests -- --nocapture
//! ```
//!
//! ## Writing New Tests
//!
//! ```rust,ignore
//! use relink_tests::prelude::*;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::start().await;
//!     let (handle, mut rx) = harness.subscribe(&[CURRENT_TIME_NODE_ID], QUEUE_CAPACITY).await;
//!     recv_within(&mut rx, RECONNECTION_TIMEOUT).await.assert_data();
//!     harness.inject(methods::SESSION_FAILURE).await;
//!     // ...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod common;

/// Re-export commonly used items for convenience.
pub mod prelude {
    pub use crate::common::assertions::*;
    pub use crate::common::fixtures::*;
    pub use crate::common::harness::*;
    pub use crate::common::init_test_logging;
    pub use crate::common::mocks::*;
}
