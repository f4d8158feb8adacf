use super::{
    buffer::BufferKind,
    error::{Error, Result},
};
use std::{env, str::FromStr};

pub const DEFAULT_BUFFER_BYTES: usize = 32 * 1024;
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 256 * 1024 * 1024;
pub const DEFAULT_MESSAGE_QUEUE_BOUND: usize = 8192;

/// Runtime configuration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RuntimeConfig {
    /// Buffer size used when the blocks do not require a larger one.
    pub default_buffer_bytes: usize,
    pub max_buffer_bytes: usize,
    pub buffer_kind: BufferKind,
    /// Capacity of each message input queue. Zero means unbounded.
    pub message_queue_bound: usize,
    /// Upper limit of `noutput_items` for every block.
    pub max_noutput_items: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> RuntimeConfig {
        RuntimeConfig {
            default_buffer_bytes: DEFAULT_BUFFER_BYTES,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            buffer_kind: BufferKind::Auto,
            message_queue_bound: DEFAULT_MESSAGE_QUEUE_BOUND,
            max_noutput_items: None,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> RuntimeConfig {
        RuntimeConfig::default()
    }

    /// Default configuration overridden by the `SDRFLOW_*` environment
    /// variables.
    pub fn from_env() -> Result<RuntimeConfig> {
        RuntimeConfig::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<RuntimeConfig> {
        let mut config = RuntimeConfig::default();
        if let Some(value) = parse(&lookup, "SDRFLOW_BUFFER_BYTES")? {
            config.default_buffer_bytes = value;
        }
        if let Some(value) = parse(&lookup, "SDRFLOW_MAX_BUFFER_BYTES")? {
            config.max_buffer_bytes = value;
        }
        if let Some(value) = parse(&lookup, "SDRFLOW_BUFFER_KIND")? {
            config.buffer_kind = value;
        }
        if let Some(value) = parse(&lookup, "SDRFLOW_MSG_QUEUE_BOUND")? {
            config.message_queue_bound = value;
        }
        if let Some(value) = parse(&lookup, "SDRFLOW_MAX_NOUTPUT_ITEMS")? {
            config.max_noutput_items = Some(value);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_default_buffer_bytes(mut self, bytes: usize) -> RuntimeConfig {
        self.default_buffer_bytes = bytes;
        self
    }

    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> RuntimeConfig {
        self.max_buffer_bytes = bytes;
        self
    }

    pub fn with_buffer_kind(mut self, kind: BufferKind) -> RuntimeConfig {
        self.buffer_kind = kind;
        self
    }

    pub fn with_message_queue_bound(mut self, bound: usize) -> RuntimeConfig {
        self.message_queue_bound = bound;
        self
    }

    pub fn with_max_noutput_items(mut self, items: usize) -> RuntimeConfig {
        self.max_noutput_items = Some(items);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_buffer_bytes == 0 {
            return Err(Error::Config("default buffer size is zero".to_string()));
        }
        if self.default_buffer_bytes > self.max_buffer_bytes {
            return Err(Error::Config(format!(
                "default buffer size {} exceeds the maximum {}",
                self.default_buffer_bytes, self.max_buffer_bytes
            )));
        }
        if self.max_noutput_items == Some(0) {
            return Err(Error::Config("max_noutput_items is zero".to_string()));
        }
        Ok(())
    }
}

fn parse<T>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|err| Error::Config(format!("{key}={value}: {err}")))
}
