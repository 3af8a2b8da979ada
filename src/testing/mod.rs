//! Test doubles for the collaborator traits
//!
//! These are public so integration tests and downstream reporters can drive
//! the stream without real terminal I/O or process introspection.

use crate::error::{ErrorCode, Result, StreamError};
use crate::integration::environment::EnvironmentProbe;
use crate::output::{OutputStream, OutputWriter};
use crate::platform::SystemProbe;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Records every line written; can be switched to fail
#[derive(Clone, Default)]
pub struct MockOutputWriter {
    writes: Arc<Mutex<Vec<(OutputStream, String)>>>,
    failing: Arc<AtomicBool>,
}

impl MockOutputWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer whose every write fails with a broken pipe
    pub fn failing() -> Self {
        let writer = Self::default();
        writer.set_failing(true);
        writer
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<(OutputStream, String)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lines written to one stream, in order
    pub fn lines(&self, stream: OutputStream) -> Vec<String> {
        self.writes()
            .into_iter()
            .filter(|(s, _)| *s == stream)
            .map(|(_, line)| line)
            .collect()
    }

    pub fn clear(&self) {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl OutputWriter for MockOutputWriter {
    async fn write_line(&self, stream: OutputStream, text: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StreamError::output_with_code(
                ErrorCode::OUTPUT_WRITE_FAILED,
                "write failed: broken pipe",
            ));
        }
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((stream, text.to_string()));
        Ok(())
    }
}

/// System probe with settable readings
#[derive(Clone, Default)]
pub struct MockSystemProbe {
    memory_bytes: Arc<AtomicU64>,
    cpu_percent_bits: Arc<AtomicU64>,
}

impl MockSystemProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_memory_mb(&self, mb: u64) {
        self.memory_bytes.store(mb * 1024 * 1024, Ordering::SeqCst);
    }

    pub fn set_cpu_percent(&self, percent: f32) {
        self.cpu_percent_bits
            .store(f64::from(percent).to_bits(), Ordering::SeqCst);
    }
}

impl SystemProbe for MockSystemProbe {
    fn memory_usage_bytes(&self) -> u64 {
        self.memory_bytes.load(Ordering::SeqCst)
    }

    fn cpu_usage_percent(&self) -> f32 {
        f64::from_bits(self.cpu_percent_bits.load(Ordering::SeqCst)) as f32
    }
}

/// Environment with explicit variables and terminal flag
#[derive(Clone, Default, Debug)]
pub struct MockEnvironment {
    vars: HashMap<String, String>,
    terminal: bool,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_terminal(mut self, terminal: bool) -> Self {
        self.terminal = terminal;
        self
    }

    /// An interactive, color-capable, wide terminal outside CI
    pub fn interactive() -> Self {
        Self::new()
            .with_terminal(true)
            .with_var("TERM", "xterm-256color")
            .with_var("COLUMNS", "120")
    }
}

impl EnvironmentProbe for MockEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    fn is_terminal(&self) -> bool {
        self.terminal
    }
}
