// src/config.rs

//! Server and client security configuration.
//!
//! Values are plain data bound once at startup, either through the builder
//! methods or from the flat property namespace of the host configuration
//! ([`ServerSecurityConfig::from_properties`]). Binding rejects unknown
//! schemes immediately; [`validate`](ServerSecurityConfig::validate) checks
//! the rest before any login is attempted.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error;
use crate::scheme::AuthScheme;

const SERVER_PREFIX: &str = "http-security.server.https.authentication.";
const CLIENT_PREFIX: &str = "http-security.client.authentication.";

pub const SERVER_ENABLED_SCHEMES: &str =
    "http-security.server.https.authentication.enabled-schemes";
pub const SERVER_KRB5_CONF: &str = "http-security.server.https.authentication.negotiate.krb5conf";
pub const SERVER_SERVICE_NAME: &str =
    "http-security.server.https.authentication.negotiate.service-name";

pub const CLIENT_SCHEME: &str = "http-security.client.authentication.scheme";
pub const CLIENT_KRB5_CONF: &str = "http-security.client.authentication.negotiate.krb5conf";
pub const CLIENT_SERVICE_NAME: &str = "http-security.client.authentication.negotiate.service-name";

/// Configuration of the accepting side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerSecurityConfig {
    auth_schemes: Vec<AuthScheme>,
    krb5_conf: Option<PathBuf>,
    service_name: Option<String>,
}

impl ServerSecurityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the `http-security.server.https.authentication.*` properties.
    ///
    /// # Errors
    ///
    /// An unknown key in that namespace is a configuration error and an
    /// unknown scheme name is an unsupported scheme error.
    pub fn from_properties(properties: &HashMap<String, String>) -> crate::Result<Self> {
        let mut config = ServerSecurityConfig::new();
        for (key, value) in properties {
            match key.as_str() {
                SERVER_ENABLED_SCHEMES => config = config.with_schemes(value)?,
                SERVER_KRB5_CONF => config = config.krb5_conf(value),
                SERVER_SERVICE_NAME => config = config.service_name(value.as_str()),
                other if other.starts_with(SERVER_PREFIX) => {
                    return Err(error::config(format!("unknown property {other}")));
                }
                _ => {}
            }
        }
        Ok(config)
    }

    /// Set the enabled schemes from a comma-delimited list.
    pub fn with_schemes(mut self, schemes: &str) -> crate::Result<Self> {
        self.auth_schemes = AuthScheme::parse_list(schemes)?;
        Ok(self)
    }

    /// Enable `scheme` in addition to the ones already enabled.
    pub fn auth_scheme(mut self, scheme: AuthScheme) -> Self {
        if !self.auth_schemes.contains(&scheme) {
            self.auth_schemes.push(scheme);
        }
        self
    }

    pub fn krb5_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.krb5_conf = Some(path.into());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Enabled schemes, in the order challenges are offered.
    pub fn auth_schemes(&self) -> &[AuthScheme] {
        &self.auth_schemes
    }

    /// The realm configuration file (`krb5.conf`).
    pub fn krb5_conf_path(&self) -> Option<&Path> {
        self.krb5_conf.as_deref()
    }

    /// The service part of the accepting principal, e.g. `HTTP`.
    pub fn service(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// True once any of the settings is present.
    pub fn enabled(&self) -> bool {
        !self.auth_schemes.is_empty() || self.krb5_conf.is_some() || self.service_name.is_some()
    }

    /// Check that an enabled configuration is complete.
    ///
    /// # Errors
    ///
    /// Fails when a setting is missing or empty, or when the realm file cannot
    /// be read.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        if self.auth_schemes.is_empty() {
            return Err(error::config(format!("{SERVER_ENABLED_SCHEMES} is empty")));
        }
        require_service_name(self.service(), SERVER_SERVICE_NAME)?;
        require_realm_file(self.krb5_conf_path(), SERVER_KRB5_CONF)?;
        Ok(())
    }
}

/// Configuration of the initiating side.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientSecurityConfig {
    auth_scheme: Option<AuthScheme>,
    krb5_conf: Option<PathBuf>,
    service_name: Option<String>,
}

impl ClientSecurityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the `http-security.client.authentication.*` properties.
    ///
    /// # Errors
    ///
    /// Same rules as [`ServerSecurityConfig::from_properties`].
    pub fn from_properties(properties: &HashMap<String, String>) -> crate::Result<Self> {
        let mut config = ClientSecurityConfig::new();
        for (key, value) in properties {
            match key.as_str() {
                CLIENT_SCHEME => config = config.auth_scheme(value.parse()?),
                CLIENT_KRB5_CONF => config = config.krb5_conf(value),
                CLIENT_SERVICE_NAME => config = config.service_name(value.as_str()),
                other if other.starts_with(CLIENT_PREFIX) => {
                    return Err(error::config(format!("unknown property {other}")));
                }
                _ => {}
            }
        }
        Ok(config)
    }

    pub fn auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = Some(scheme);
        self
    }

    pub fn krb5_conf(mut self, path: impl Into<PathBuf>) -> Self {
        self.krb5_conf = Some(path.into());
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// The scheme the client answers challenges with.
    pub fn scheme(&self) -> Option<AuthScheme> {
        self.auth_scheme
    }

    /// The realm configuration file (`krb5.conf`).
    pub fn krb5_conf_path(&self) -> Option<&Path> {
        self.krb5_conf.as_deref()
    }

    /// The service part of the target principal, e.g. `HTTP`.
    pub fn service(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    /// True once any of the settings is present.
    pub fn enabled(&self) -> bool {
        self.auth_scheme.is_some() || self.krb5_conf.is_some() || self.service_name.is_some()
    }

    /// Unlike the server side, a client provider is only built when
    /// authentication is wanted, so an empty configuration is an error too.
    ///
    /// # Errors
    ///
    /// Fails when any setting is missing or empty, or the realm file cannot be
    /// read.
    pub fn validate(&self) -> crate::Result<()> {
        if self.auth_scheme.is_none() {
            return Err(error::config(format!("{CLIENT_SCHEME} is not set")));
        }
        require_service_name(self.service(), CLIENT_SERVICE_NAME)?;
        require_realm_file(self.krb5_conf_path(), CLIENT_KRB5_CONF)?;
        Ok(())
    }
}

fn require_service_name(name: Option<&str>, key: &str) -> crate::Result<()> {
    match name {
        Some(name) if !name.trim().is_empty() => Ok(()),
        _ => Err(error::config(format!("{key} is null or empty"))),
    }
}

fn require_realm_file(path: Option<&Path>, key: &str) -> crate::Result<()> {
    let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
        return Err(error::config(format!("{key} is null or empty")));
    };
    fs::File::open(path)
        .map(drop)
        .map_err(|e| error::config(format!("{key} {}: {e}", path.display())))
}

/// The parts of a `krb5.conf` this crate cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RealmFile {
    path: PathBuf,
    default_realm: Option<String>,
}

impl RealmFile {
    /// Read and parse a realm configuration file.
    ///
    /// # Errors
    ///
    /// An unreadable file is a credential error: logins are the only reason
    /// to read it.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| error::credential(format!("{}: {e}", path.display())))?;
        Ok(RealmFile {
            path: path.to_owned(),
            default_realm: parse_default_realm(&contents),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `[libdefaults] default_realm`, if present.
    pub fn default_realm(&self) -> Option<&str> {
        self.default_realm.as_deref()
    }
}

fn parse_default_realm(contents: &str) -> Option<String> {
    let mut in_libdefaults = false;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_libdefaults = section.trim() == "libdefaults";
            continue;
        }
        if !in_libdefaults {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "default_realm" {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_owned());
                }
            }
        }
    }
    None
}
