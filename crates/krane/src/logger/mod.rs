//! Log-driver abstraction and per-container message enrichment.
//!
//! A [`LogDriver`] consumes the messages a container produces (and the
//! events the daemon synthesizes about it) and forwards them to a backing
//! sink. Drivers are instantiated by name through a [`DriverRegistry`]
//! constructed once at daemon startup; there is no process-global driver
//! table.

pub(crate) mod copier;
pub mod journald;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use krane_common::{ContainerId, KraneError, KraneResult};

/// Where a log message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The container's stdout.
    Stdout,
    /// The container's stderr.
    Stderr,
    /// A lifecycle notification synthesized by the daemon itself.
    Event,
}

impl Source {
    /// Stable string form used in tracing fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log line with its source tag.
#[derive(Debug, Clone)]
pub struct Message {
    /// The message body, without a trailing newline.
    pub line: Bytes,
    /// Where the line came from.
    pub source: Source,
}

impl Message {
    /// Create a message from a raw line.
    pub fn new(line: impl Into<Bytes>, source: Source) -> Self {
        Self {
            line: line.into(),
            source,
        }
    }

    /// Create a daemon-synthesized event message.
    #[must_use]
    pub fn event(line: String) -> Self {
        Self {
            line: Bytes::from(line.into_bytes()),
            source: Source::Event,
        }
    }
}

/// Forwards messages to a logging sink.
///
/// Implementations compute their enrichment state once at construction and
/// must be callable from multiple tasks.
pub trait LogDriver: Send + Sync {
    /// Forward one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing sink rejects the message. Callers on
    /// lifecycle paths log such errors rather than propagating them.
    fn log(&self, msg: &Message) -> KraneResult<()>;

    /// The driver's registered name.
    fn name(&self) -> &'static str;
}

/// Static per-container context handed to a driver factory.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// The container's ID.
    pub container_id: ContainerId,
    /// The container's name, possibly with a leading path separator.
    pub container_name: String,
    /// The container's labels.
    pub container_labels: HashMap<String, String>,
    /// The container's environment variables.
    pub container_env: HashMap<String, String>,
    /// Driver options from the container's configuration.
    pub options: HashMap<String, String>,
}

impl LogContext {
    /// Create a context for a container.
    pub fn new(container_id: ContainerId, container_name: impl Into<String>) -> Self {
        Self {
            container_id,
            container_name: container_name.into(),
            container_labels: HashMap::new(),
            container_env: HashMap::new(),
            options: HashMap::new(),
        }
    }

    /// Set the container labels.
    #[must_use]
    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.container_labels = labels;
        self
    }

    /// Set the container environment.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.container_env = env;
        self
    }

    /// Set the driver options.
    #[must_use]
    pub fn with_options(mut self, options: HashMap<String, String>) -> Self {
        self.options = options;
        self
    }

    /// The container name without any leading path separator.
    #[must_use]
    pub fn name(&self) -> &str {
        self.container_name
            .strip_prefix('/')
            .unwrap_or(&self.container_name)
    }

    /// Expand the `tag` option template, falling back to `default`.
    ///
    /// Supported placeholders: `{{.ID}}` (short ID), `{{.FullID}}`,
    /// `{{.Name}}`.
    #[must_use]
    pub fn tag(&self, default: &str) -> String {
        let template = self.options.get("tag").map_or(default, String::as_str);
        template
            .replace("{{.ID}}", self.container_id.short())
            .replace("{{.FullID}}", self.container_id.as_str())
            .replace("{{.Name}}", self.name())
    }

    /// Extra attributes selected by the `labels` and `env` options, with
    /// keys passed through `key_mod`.
    #[must_use]
    pub fn extra_attributes(&self, key_mod: fn(&str) -> String) -> HashMap<String, String> {
        let mut attributes = HashMap::new();
        if let Some(keys) = self.options.get("labels") {
            for key in keys.split(',').filter(|k| !k.is_empty()) {
                if let Some(value) = self.container_labels.get(key) {
                    attributes.insert(key_mod(key), value.clone());
                }
            }
        }
        if let Some(keys) = self.options.get("env") {
            for key in keys.split(',').filter(|k| !k.is_empty()) {
                if let Some(value) = self.container_env.get(key) {
                    attributes.insert(key_mod(key), value.clone());
                }
            }
        }
        attributes
    }
}

/// Creates a driver for a container.
pub type DriverFactory = fn(&LogContext) -> KraneResult<Arc<dyn LogDriver>>;

/// Validates driver options at setup time.
pub type OptionValidator = fn(&HashMap<String, String>) -> KraneResult<()>;

/// Name-keyed registry of log-driver factories.
///
/// Built once at daemon startup and passed by reference to whatever needs
/// to instantiate drivers by name.
#[derive(Debug, Default)]
pub struct DriverRegistry {
    factories: HashMap<&'static str, DriverFactory>,
    validators: HashMap<&'static str, OptionValidator>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in drivers registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            journald::DRIVER_NAME,
            journald::JournaldDriver::factory,
            Some(journald::JournaldDriver::validate_options),
        );
        registry
    }

    /// Register a driver factory under a name, replacing any previous
    /// registration.
    pub fn register(
        &mut self,
        name: &'static str,
        factory: DriverFactory,
        validator: Option<OptionValidator>,
    ) {
        self.factories.insert(name, factory);
        if let Some(validator) = validator {
            self.validators.insert(name, validator);
        }
    }

    /// Validate driver options without constructing a driver.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown driver name or rejected options.
    pub fn validate(&self, name: &str, options: &HashMap<String, String>) -> KraneResult<()> {
        if !self.factories.contains_key(name) {
            return Err(KraneError::Config {
                message: format!("unknown log driver '{name}'"),
            });
        }
        if let Some(validator) = self.validators.get(name) {
            validator(options)?;
        }
        Ok(())
    }

    /// Instantiate a driver by name for the given container context.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown driver name, rejected options, or a
    /// failed driver construction.
    pub fn create(&self, name: &str, ctx: &LogContext) -> KraneResult<Arc<dyn LogDriver>> {
        self.validate(name, &ctx.options)?;
        let factory = self.factories.get(name).ok_or_else(|| KraneError::Config {
            message: format!("unknown log driver '{name}'"),
        })?;
        factory(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> LogContext {
        LogContext::new(
            ContainerId::new("0123456789abcdef").unwrap(),
            "/web-frontend",
        )
    }

    #[test]
    fn name_strips_leading_separator() {
        assert_eq!(ctx().name(), "web-frontend");
    }

    #[test]
    fn tag_defaults_and_expands_templates() {
        let plain = ctx();
        assert_eq!(plain.tag("fallback"), "fallback");

        let templated = ctx().with_options(HashMap::from([(
            "tag".to_string(),
            "{{.Name}}/{{.ID}}".to_string(),
        )]));
        assert_eq!(templated.tag("unused"), "web-frontend/0123456789ab");
    }

    #[test]
    fn extra_attributes_select_configured_keys() {
        let ctx = ctx()
            .with_labels(HashMap::from([
                ("team".to_string(), "infra".to_string()),
                ("ignored".to_string(), "x".to_string()),
            ]))
            .with_env(HashMap::from([("region".to_string(), "eu".to_string())]))
            .with_options(HashMap::from([
                ("labels".to_string(), "team".to_string()),
                ("env".to_string(), "region,missing".to_string()),
            ]));

        let attributes = ctx.extra_attributes(str::to_uppercase);
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes["TEAM"], "infra");
        assert_eq!(attributes["REGION"], "eu");
    }

    #[test]
    fn registry_rejects_unknown_driver() {
        let registry = DriverRegistry::with_defaults();
        let err = registry.validate("syslog", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("unknown log driver"));
    }
}
