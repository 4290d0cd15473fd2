//! Configuration consumed by [`FluentSender`](super::FluentSender).
//!
//! [`SenderBuilder`] validates user input before producing a
//! [`SenderConfig`]; [`SenderSettings`] is the declarative form of the same
//! options for callers that load configuration from a file.

use std::time::Duration;

use serde::Deserialize;

use crate::{error::SenderBuildError, packet::PackerOptions};

use super::{
    FluentSender,
    overflow::OverflowHandler,
    transport::{ConnectionFactory, DEFAULT_HOST, DEFAULT_PORT, ForwardAddress, TcpConnector},
};

/// Default backlog cap in bytes before the overflow handler fires.
pub const DEFAULT_BUFMAX: usize = 1 << 20; // 1 MiB
/// Default deadline applied to connecting and to each write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Default cooldown after a failure before reconnecting.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(30);
/// Default number of internal failures tolerated before closing the connection.
pub const DEFAULT_ERROR_COUNT_LIMIT: u32 = 10;
/// Default interval between "collector unreachable" warnings.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Validated sender configuration.
#[derive(Clone, Debug)]
pub struct SenderConfig {
    pub tag: String,
    pub address: ForwardAddress,
    pub bufmax: usize,
    pub timeout: Duration,
    pub retry_timeout: Duration,
    pub error_count_limit: u32,
    pub verbose: bool,
    pub log_unhandled_exceptions: bool,
    pub packer: PackerOptions,
    pub overflow_handler: Option<OverflowHandler>,
    pub warn_interval: Duration,
}

impl SenderConfig {
    /// Defaults for `tag`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            address: ForwardAddress::default(),
            bufmax: DEFAULT_BUFMAX,
            timeout: DEFAULT_TIMEOUT,
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            error_count_limit: DEFAULT_ERROR_COUNT_LIMIT,
            verbose: false,
            log_unhandled_exceptions: false,
            packer: PackerOptions::default(),
            overflow_handler: None,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for [`FluentSender`] instances.
#[derive(Clone, Debug, Default)]
pub struct SenderBuilder {
    tag: String,
    host: Option<String>,
    port: Option<u16>,
    bufmax: Option<usize>,
    timeout: Option<Duration>,
    retry_timeout: Option<Duration>,
    error_count_limit: Option<u32>,
    verbose: bool,
    log_unhandled_exceptions: bool,
    packer: PackerOptions,
    overflow_handler: Option<OverflowHandler>,
    warn_interval: Option<Duration>,
}

impl SenderBuilder {
    /// Start a builder for senders prefixing every event with `tag`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    option_setter!(
        #[doc = "Set the collector host."]
        with_host,
        host,
        String
    );
    option_setter!(
        #[doc = "Set the collector port."]
        with_port,
        port,
        u16
    );
    option_setter!(
        #[doc = "Set the backlog cap in bytes."]
        with_bufmax,
        bufmax,
        usize
    );
    option_setter!(
        #[doc = "Set the connect and write deadline."]
        with_timeout,
        timeout,
        Duration
    );
    option_setter!(
        #[doc = "Set the reconnect cooldown after a failure."]
        with_retry_timeout,
        retry_timeout,
        Duration
    );
    option_setter!(
        #[doc = "Set how many consecutive internal failures are tolerated."]
        with_error_count_limit,
        error_count_limit,
        u32
    );
    option_setter!(
        #[doc = "Set the minimum interval between warnings about undelivered payloads."]
        with_warn_interval,
        warn_interval,
        Duration
    );

    /// Echo outgoing packets at `info` level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Log full details of internal send failures.
    pub fn with_log_unhandled_exceptions(mut self, enabled: bool) -> Self {
        self.log_unhandled_exceptions = enabled;
        self
    }

    /// Options passed through to the MessagePack serialiser.
    pub fn with_packer_options(mut self, packer: PackerOptions) -> Self {
        self.packer = packer;
        self
    }

    /// Callback receiving the backlog whenever it is discarded.
    pub fn with_buffer_overflow_handler(mut self, handler: impl Into<OverflowHandler>) -> Self {
        self.overflow_handler = Some(handler.into());
        self
    }

    fn validate(&self) -> Result<(), SenderBuildError> {
        self.validate_tag()?;
        if matches!(&self.host, Some(host) if host.is_empty()) {
            return Err(SenderBuildError::InvalidConfig(
                "host must not be empty".into(),
            ));
        }
        if self.port == Some(0) {
            return Err(SenderBuildError::InvalidConfig(
                "port must be greater than zero".into(),
            ));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(SenderBuildError::InvalidConfig(
                "timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn validate_tag(&self) -> Result<(), SenderBuildError> {
        if self.tag.is_empty() || self.tag.split('.').any(str::is_empty) {
            return Err(SenderBuildError::InvalidConfig(format!(
                "invalid tag {:?}: expected non-empty dot-separated segments",
                self.tag
            )));
        }
        Ok(())
    }

    /// Validate and produce the configuration.
    pub fn build_config(&self) -> Result<SenderConfig, SenderBuildError> {
        self.validate()?;
        let defaults = SenderConfig::new(self.tag.clone());
        Ok(SenderConfig {
            address: ForwardAddress::new(
                self.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
                self.port.unwrap_or(DEFAULT_PORT),
            ),
            bufmax: self.bufmax.unwrap_or(defaults.bufmax),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retry_timeout: self.retry_timeout.unwrap_or(defaults.retry_timeout),
            error_count_limit: self.error_count_limit.unwrap_or(defaults.error_count_limit),
            verbose: self.verbose,
            log_unhandled_exceptions: self.log_unhandled_exceptions,
            packer: self.packer,
            overflow_handler: self.overflow_handler.clone(),
            warn_interval: self.warn_interval.unwrap_or(defaults.warn_interval),
            ..defaults
        })
    }

    /// Build a sender connecting over plain TCP.
    pub fn build(&self) -> Result<FluentSender, SenderBuildError> {
        self.build_with_factory(TcpConnector)
    }

    /// Build a sender opening connections through `factory`.
    pub fn build_with_factory<F: ConnectionFactory>(
        &self,
        factory: F,
    ) -> Result<FluentSender<F>, SenderBuildError> {
        Ok(FluentSender::from_config(self.build_config()?, factory))
    }
}

/// Declarative sender settings, e.g. loaded from JSON.
///
/// Durations are given in (fractional) seconds.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SenderSettings {
    pub tag: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub bufmax: Option<usize>,
    #[serde(default)]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub retry_timeout: Option<f64>,
    #[serde(default)]
    pub error_count_limit: Option<u32>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub log_unhandled_exceptions: bool,
    #[serde(default)]
    pub packer: PackerOptions,
    #[serde(default)]
    pub warn_interval: Option<f64>,
}

fn seconds(field: &str, value: f64) -> Result<Duration, SenderBuildError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        SenderBuildError::InvalidConfig(format!(
            "{field} must be a non-negative number of seconds, got {value}"
        ))
    })
}

impl SenderSettings {
    /// Parse settings from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, SenderBuildError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Convert into a builder; the overflow handler must be added in code.
    pub fn into_builder(self) -> Result<SenderBuilder, SenderBuildError> {
        let mut builder = SenderBuilder::new(self.tag)
            .with_verbose(self.verbose)
            .with_log_unhandled_exceptions(self.log_unhandled_exceptions)
            .with_packer_options(self.packer);
        builder.host = self.host;
        builder.port = self.port;
        builder.bufmax = self.bufmax;
        builder.error_count_limit = self.error_count_limit;
        if let Some(timeout) = self.timeout {
            builder.timeout = Some(seconds("timeout", timeout)?);
        }
        if let Some(retry_timeout) = self.retry_timeout {
            builder.retry_timeout = Some(seconds("retry_timeout", retry_timeout)?);
        }
        if let Some(warn_interval) = self.warn_interval {
            builder.warn_interval = Some(seconds("warn_interval", warn_interval)?);
        }
        Ok(builder)
    }
}
