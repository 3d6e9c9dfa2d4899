//! Client configuration: the programmatic `ClientConfig` surface plus the
//! optional sectioned profile file that can supply defaults for it.
//!
//! Mirrors the raw/validated split the reference services use for their own
//! config loading: a `Raw*` struct with every field `Option`, deserialized
//! straight off TOML, validated field-by-field into a struct with no
//! `Option` noise beyond genuinely optional fields.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub data_endpoint: String,
    pub control_endpoint: String,
    pub use_tls: bool,
    pub client_id: Option<String>,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub enable_circuit_breaker: bool,
    pub cb_failure_threshold: u32,
    pub cb_break_duration: Duration,
    pub enable_auto_reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_endpoint: "localhost:9010".to_owned(),
            control_endpoint: "localhost:9003".to_owned(),
            use_tls: false,
            client_id: None,
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            enable_circuit_breaker: true,
            cb_failure_threshold: 5,
            cb_break_duration: Duration::from_secs(30),
            enable_auto_reconnect: true,
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_millis(200),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Validates this configuration per §6.3: non-empty `host:port` with a
    /// valid port, `connection_timeout < request_timeout`, all counts
    /// positive.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint("data_endpoint", &self.data_endpoint)?;
        validate_endpoint("control_endpoint", &self.control_endpoint)?;
        if self.connection_timeout >= self.request_timeout {
            return Err(Error::InvalidConfiguration(format!(
                "connection_timeout ({:?}) must be less than request_timeout ({:?})",
                self.connection_timeout, self.request_timeout
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfiguration(
                "max_retries must be positive".to_owned(),
            ));
        }
        if self.enable_circuit_breaker && self.cb_failure_threshold == 0 {
            return Err(Error::InvalidConfiguration(
                "cb_failure_threshold must be positive".to_owned(),
            ));
        }
        if self.enable_auto_reconnect && self.max_reconnect_attempts == 0 {
            return Err(Error::InvalidConfiguration(
                "max_reconnect_attempts must be positive".to_owned(),
            ));
        }
        Ok(())
    }
}

fn validate_endpoint(field: &str, endpoint: &str) -> Result<()> {
    if endpoint.is_empty() {
        return Err(Error::InvalidConfiguration(format!("{field} must not be empty")));
    }
    let Some((_host, port)) = endpoint.rsplit_once(':') else {
        return Err(Error::InvalidConfiguration(format!(
            "{field} must be in host:port form, got {endpoint:?}"
        )));
    };
    let port: u32 = port
        .parse()
        .map_err(|_| Error::InvalidConfiguration(format!("{field} has a non-numeric port: {endpoint:?}")))?;
    if port == 0 || port > 65535 {
        return Err(Error::InvalidConfiguration(format!(
            "{field} port {port} is out of range [1, 65535]"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: OptionalConfig,
}

#[derive(Debug, Default)]
struct OptionalConfig {
    data_endpoint: Option<String>,
    control_endpoint: Option<String>,
    use_tls: Option<bool>,
    client_id: Option<String>,
    connection_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry_base_delay: Option<Duration>,
    enable_circuit_breaker: Option<bool>,
    cb_failure_threshold: Option<u32>,
    cb_break_duration: Option<Duration>,
    enable_auto_reconnect: Option<bool>,
    max_reconnect_attempts: Option<u32>,
    reconnect_base_delay: Option<Duration>,
}

macro_rules! builder_setter {
    ($name:ident, $ty:ty) => {
        #[must_use]
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.$name = Some(value);
            self
        }
    };
}

impl ClientConfigBuilder {
    builder_setter!(data_endpoint, String);
    builder_setter!(control_endpoint, String);
    builder_setter!(use_tls, bool);
    builder_setter!(client_id, String);
    builder_setter!(connection_timeout, Duration);
    builder_setter!(request_timeout, Duration);
    builder_setter!(max_retries, u32);
    builder_setter!(retry_base_delay, Duration);
    builder_setter!(enable_circuit_breaker, bool);
    builder_setter!(cb_failure_threshold, u32);
    builder_setter!(cb_break_duration, Duration);
    builder_setter!(enable_auto_reconnect, bool);
    builder_setter!(max_reconnect_attempts, u32);
    builder_setter!(reconnect_base_delay, Duration);

    /// Applies defaults from a loaded profile, without overriding anything
    /// already set programmatically (programmatic options win, per §6.3).
    #[must_use]
    pub fn with_profile_defaults(mut self, profile: &ResolvedProfile) -> Self {
        if self.config.data_endpoint.is_none() {
            self.config.data_endpoint = Some(profile.endpoint.clone());
        }
        if self.config.control_endpoint.is_none() {
            self.config.control_endpoint = Some(profile.endpoint.clone());
        }
        if self.config.use_tls.is_none() {
            self.config.use_tls = Some(profile.tls_policy != "disabled");
        }
        self
    }

    pub fn build(self) -> Result<ClientConfig> {
        let defaults = ClientConfig::default();
        let cfg = ClientConfig {
            data_endpoint: self.config.data_endpoint.unwrap_or(defaults.data_endpoint),
            control_endpoint: self
                .config
                .control_endpoint
                .unwrap_or(defaults.control_endpoint),
            use_tls: self.config.use_tls.unwrap_or(defaults.use_tls),
            client_id: self.config.client_id,
            connection_timeout: self.config.connection_timeout.unwrap_or(defaults.connection_timeout),
            request_timeout: self.config.request_timeout.unwrap_or(defaults.request_timeout),
            max_retries: self.config.max_retries.unwrap_or(defaults.max_retries),
            retry_base_delay: self.config.retry_base_delay.unwrap_or(defaults.retry_base_delay),
            enable_circuit_breaker: self
                .config
                .enable_circuit_breaker
                .unwrap_or(defaults.enable_circuit_breaker),
            cb_failure_threshold: self
                .config
                .cb_failure_threshold
                .unwrap_or(defaults.cb_failure_threshold),
            cb_break_duration: self.config.cb_break_duration.unwrap_or(defaults.cb_break_duration),
            enable_auto_reconnect: self
                .config
                .enable_auto_reconnect
                .unwrap_or(defaults.enable_auto_reconnect),
            max_reconnect_attempts: self
                .config
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            reconnect_base_delay: self
                .config
                .reconnect_base_delay
                .unwrap_or(defaults.reconnect_base_delay),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

// ---------------------------------------------------------------------------
// Profile file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProfile {
    pub name: String,
    pub cluster: String,
    pub endpoint: String,
    pub tls_policy: String,
}

#[derive(Debug, Deserialize)]
struct RawProfileFile {
    current_profile: Option<String>,
    #[serde(default, rename = "profile")]
    profiles: HashMap<String, RawProfile>,
    #[serde(default, rename = "cluster")]
    clusters: HashMap<String, RawCluster>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    cluster: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    endpoint: Option<String>,
    tls_policy: Option<String>,
}

/// Loads and resolves `current_profile` from a profile file on disk. Missing
/// files are not an error at this layer — callers that want the profile file
/// to be optional should check existence first; this function assumes the
/// path exists and is readable.
pub fn load_profile_from_path(path: &Path) -> Result<ResolvedProfile> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidConfiguration(format!("reading profile file '{}': {e}", path.display())))?;
    load_profile_from_str(&contents)
}

pub fn load_profile_from_str(toml_str: &str) -> Result<ResolvedProfile> {
    let raw: RawProfileFile = toml::from_str(toml_str)
        .map_err(|e| Error::InvalidConfiguration(format!("parsing profile file: {e}")))?;
    let name = raw
        .current_profile
        .ok_or_else(|| Error::InvalidConfiguration("missing current_profile".to_owned()))?;
    let profile = raw
        .profiles
        .get(&name)
        .ok_or_else(|| Error::InvalidConfiguration(format!("no [profile.{name}] section")))?;
    let cluster_id = profile
        .cluster
        .clone()
        .ok_or_else(|| Error::InvalidConfiguration(format!("profile {name:?} is missing a cluster")))?;
    let cluster = raw
        .clusters
        .get(&cluster_id)
        .ok_or_else(|| Error::InvalidConfiguration(format!("no [cluster.{cluster_id}] section")))?;
    let endpoint = cluster
        .endpoint
        .clone()
        .ok_or_else(|| Error::InvalidConfiguration(format!("cluster {cluster_id:?} is missing an endpoint")))?;
    Ok(ResolvedProfile {
        name,
        cluster: cluster_id,
        endpoint,
        tls_policy: cluster.tls_policy.clone().unwrap_or_else(|| "disabled".to_owned()),
    })
}
