//! # Lockstep Core
//!
//! Deterministic cooperative scheduling for multi-chip emulation.
//!
//! Every emulated chip runs as its own sequential loop in a clock domain.
//! The scheduler interleaves those loops on one logical flow of control so
//! that cross-chip accesses happen in the order real silicon would produce,
//! and the serializer turns the whole machine into a replayable snapshot.

// ============================================================================
// Execution
// ============================================================================
pub mod fiber;
pub mod thread;
pub mod scheduler;

// ============================================================================
// Deterministic State
// ============================================================================
pub mod serializer;
pub mod random;

// ============================================================================
// System Surface
// ============================================================================
pub mod component;
pub mod node;
pub mod system;
pub mod run_ahead;

// ============================================================================
// Host Integration
// ============================================================================
pub mod presentation;
pub mod frontend;
pub mod config;
pub mod error;

// ============================================================================
// Reference Machine
// ============================================================================
pub mod machine;

pub use component::{Component, PowerContext, SharedRandom};
pub use config::{CoreConfig, ConfigError};
pub use error::{CoreError, CoreResult};
pub use fiber::ContextError;
pub use random::{Entropy, Random};
pub use scheduler::{DomainId, Event, Mode, Scheduler, SchedulerSettings};
pub use serializer::{Serializable, Serializer, SnapshotError};
pub use system::System;
pub use thread::{ClockDomain, Frequency, Link, Thread};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
