//! Loading and querying layered configuration.
#![deny(warnings)]
#![deny(missing_docs)]

use std::{borrow::Cow, collections::HashSet, path::Path, sync::Arc};

use figment::{error::Kind, providers::Env, Figment};
use serde::Deserialize;
use snafu::{ResultExt as _, Snafu};
use tally_error::GenericError;

mod provider;
use self::provider::FileProvider;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// `from_environment` was given an empty prefix.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// A configuration file could not be read or parsed.
    #[snafu(display("Failed to load configuration file '{}'.", path))]
    File {
        /// Path of the file.
        path: String,

        /// Underlying read or parse error.
        source: figment::Error,
    },

    /// A required key was not set by any source.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Lists every spelling of the key that would have been picked up, environment variables included.
        help_text: String,

        /// The missing key.
        field: Cow<'static, str>,
    },

    /// A key was set, but its value could not be deserialized into the requested type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Dotted path of the offending key.
        field: String,

        /// Type the value was deserialized as.
        expected_ty: String,

        /// Type the value actually had.
        actual_ty: String,
    },

    /// Any other figment failure.
    #[snafu(display("Failed to query configuration: {}", source))]
    Generic {
        /// Underlying error.
        source: GenericError,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        from_figment_error(&HashSet::new(), e)
    }
}

/// Normalized environment variable prefix, always uppercase and ending in `_`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct EnvironmentPrefix(String);

impl EnvironmentPrefix {
    fn new(prefix: &str) -> Self {
        let mut normalized = prefix.to_uppercase();
        if !normalized.ends_with('_') {
            normalized.push('_');
        }
        Self(normalized)
    }

    fn variable_for(&self, key: &str) -> String {
        format!("{}{}", self.0, key.replace('.', "_").to_uppercase())
    }
}

/// Builds a [`GenericConfiguration`] from a YAML file, the environment, and explicit overrides.
///
/// Each source is layered over the ones added before it, so the daemon adds them in increasing order of precedence:
/// file, then `TALLY_*` variables, then command-line flags.
pub struct ConfigurationLoader {
    figment: Figment,
    env_prefixes: HashSet<EnvironmentPrefix>,
}

impl Default for ConfigurationLoader {
    fn default() -> Self {
        Self {
            figment: Figment::new(),
            env_prefixes: HashSet::new(),
        }
    }
}

impl ConfigurationLoader {
    /// Layers the given YAML file over the current configuration.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or is not valid YAML, an error will be returned.
    pub fn from_yaml<P>(mut self, path: P) -> Result<Self, ConfigurationError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let provider = FileProvider::from_yaml(path).context(File {
            path: path.display().to_string(),
        })?;
        self.figment = self.figment.admerge(provider);
        Ok(self)
    }

    /// Layers environment variables starting with `prefix` over the current configuration.
    ///
    /// The prefix is matched case-insensitively and gets a trailing underscore if it lacks one: `tally` picks up
    /// `TALLY_FLUSH_INTERVAL` as `flush_interval`.
    ///
    /// # Errors
    ///
    /// If `prefix` is empty, an error will be returned.
    pub fn from_environment(mut self, prefix: &'static str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return EmptyPrefix.fail();
        }

        let prefix = EnvironmentPrefix::new(prefix);
        self.figment = self.figment.admerge(Env::prefixed(&prefix.0));
        self.env_prefixes.insert(prefix);
        Ok(self)
    }

    /// Sets `key` to `value`, taking precedence over everything loaded so far.
    pub fn with_override<V>(mut self, key: &str, value: V) -> Self
    where
        V: serde::Serialize,
    {
        self.figment = self.figment.admerge(figment::providers::Serialized::default(key, value));
        self
    }

    /// Finishes loading.
    pub fn into_generic(self) -> GenericConfiguration {
        GenericConfiguration {
            inner: Arc::new(Layers {
                figment: self.figment,
                env_prefixes: self.env_prefixes,
            }),
        }
    }
}

#[derive(Debug)]
struct Layers {
    figment: Figment,
    env_prefixes: HashSet<EnvironmentPrefix>,
}

/// Merged configuration, cheap to clone and share between components.
///
/// Components read their own settings out of it with [`as_typed`][Self::as_typed]; single keys, with periods marking
/// nesting, can be read with [`get_typed`][Self::get_typed].
#[derive(Clone, Debug)]
pub struct GenericConfiguration {
    inner: Arc<Layers>,
}

impl GenericConfiguration {
    /// Reads the value at `key` as `T`.
    ///
    /// A nested key such as `a.b` that is missing is retried as `a_b`, which is how it is spelled when only set through
    /// an environment variable.
    ///
    /// # Errors
    ///
    /// If the key is missing or its value is not a valid `T`, an error will be returned.
    pub fn get_typed<'a, T>(&self, key: &str) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        let figment = &self.inner.figment;
        let result = match figment.extract_inner(key) {
            Err(e) if matches!(e.kind, Kind::MissingField(_)) && key.contains('.') => {
                figment.extract_inner(&key.replace('.', "_"))
            }
            other => other,
        };
        result.map_err(|e| from_figment_error(&self.inner.env_prefixes, e))
    }

    /// Deserializes the whole configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration is not a valid `T`, an error will be returned.
    pub fn as_typed<'a, T>(&self) -> Result<T, ConfigurationError>
    where
        T: Deserialize<'a>,
    {
        self.inner
            .figment
            .extract()
            .map_err(|e| from_figment_error(&self.inner.env_prefixes, e))
    }
}

fn from_figment_error(env_prefixes: &HashSet<EnvironmentPrefix>, e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let spellings = std::iter::once(field.to_string())
                .chain(env_prefixes.iter().map(|prefix| prefix.variable_for(&field)))
                .collect::<Vec<_>>();
            ConfigurationError::MissingField {
                help_text: format!("Try setting `{}`.", spellings.join("` or `")),
                field,
            }
        }
        Kind::InvalidType(actual, expected) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty: expected,
            actual_ty: actual.to_string(),
        },
        _ => ConfigurationError::Generic { source: e.into() },
    }
}
