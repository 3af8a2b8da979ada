//! # reporter-stream
//!
//! Streaming output scheduler and failure recovery for LLM-friendly test
//! reporters.
//!
//! ## Modules
//!
//! - `queue` - Bounded priority output queue with batching and per-operation timeouts
//! - `recovery` - Error classification and recovery strategies, including the fallback file
//! - `health` - Periodic health checks, circuit breaker and automatic recovery
//! - `diagnostics` - Operation tracking, performance samples and reports
//! - `integration` - Orchestrator used by the host reporter, with environment detection
//! - `config` - Aggregated configuration with TOML loading and a builder
//! - `output` - Output writer abstraction over stdout/stderr
//! - `platform` - Process memory and CPU introspection
//! - `error` - Unified error type with numeric codes
//! - `testing` - Test doubles for the collaborator traits

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod health;
pub mod integration;
pub mod output;
pub mod platform;
pub mod queue;
pub mod recovery;

pub mod testing;

pub use config::StreamConfig;
pub use error::{Result, StreamError};
pub use integration::{ReporterStreamIntegration, TestResult, TestStatus};
pub use queue::{OutputSource, Priority, PriorityOutputQueue, TestOutputQueue};
