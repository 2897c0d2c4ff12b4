// Configuration Management Module
// Handles pear.toml loading, defaults, and validation

use crate::context::ApplicationParameter;
use crate::error_page::ErrorPage;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Main Pear configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PearConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub container: ContainerConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub contexts: Vec<ContextEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    #[serde(default = "default_true")]
    pub so_reuseaddr: bool,

    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

/// Defaults applied to every context and wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Upper bound on how long unload waits for in-flight requests
    #[serde(default = "default_unload_delay")]
    pub unload_delay_ms: u64,

    /// Pool size for single-thread-model servlets
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    /// Zero disables the background processor
    #[serde(default = "default_background_delay")]
    pub background_processor_delay_secs: u64,

    #[serde(default)]
    pub load_all_on_startup: bool,

    /// Unavailability window for servlets that fail without naming one
    #[serde(default = "default_unavailable")]
    pub default_unavailable_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_host_name")]
    pub name: String,

    /// Status code (or "default") to a file served when the context has no page
    #[serde(default)]
    pub error_pages: BTreeMap<String, PathBuf>,
}

/// One deployed application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    /// "" for the root application
    pub path: String,

    #[serde(default)]
    pub doc_base: Option<PathBuf>,

    /// TOML deployment descriptor
    #[serde(default)]
    pub descriptor: Option<PathBuf>,

    #[serde(default)]
    pub reloadable: bool,

    #[serde(default)]
    pub use_naming: bool,

    #[serde(default)]
    pub required_extensions: Vec<String>,

    #[serde(default)]
    pub provided_extensions: Vec<String>,

    #[serde(default)]
    pub parameters: Vec<ApplicationParameter>,
}

// Default value functions
fn default_port() -> u16 { 8080 }
fn default_bind_addr() -> String { "0.0.0.0".to_string() }
fn default_backlog() -> i32 { 1024 }
fn default_unload_delay() -> u64 { 2000 }
fn default_max_instances() -> usize { 20 }
fn default_background_delay() -> u64 { 10 }
fn default_unavailable() -> u64 { 60 }
fn default_host_name() -> String { "localhost".to_string() }
fn default_true() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_addr: default_bind_addr(),
            tcp_nodelay: default_true(),
            so_reuseaddr: default_true(),
            backlog: default_backlog(),
        }
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            unload_delay_ms: default_unload_delay(),
            max_instances: default_max_instances(),
            background_processor_delay_secs: default_background_delay(),
            load_all_on_startup: false,
            default_unavailable_secs: default_unavailable(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: default_host_name(),
            error_pages: BTreeMap::new(),
        }
    }
}

impl HostConfig {
    /// Host error pages keyed by status code; the "default" key becomes the catch-all page
    pub fn pages(&self) -> Result<Vec<ErrorPage>> {
        self.error_pages
            .iter()
            .map(|(key, file)| {
                let location = file.to_string_lossy().into_owned();
                if key == "default" {
                    return Ok(ErrorPage::default_page(location));
                }
                let code: u16 = key
                    .parse()
                    .with_context(|| format!("host error page key '{}' is not a status code", key))?;
                Ok(ErrorPage::for_status(code, location))
            })
            .collect()
    }
}

impl PearConfig {
    /// Load configuration from file or use defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let contents = std::fs::read_to_string(path)
                .context("Failed to read configuration file")?;

            let config = Self::parse(&contents)?;
            Ok(config.resolve_relative_to(path.parent().unwrap_or(Path::new("."))))
        } else {
            warn!("Configuration file not found, using defaults");
            info!("Create pear.toml to customize configuration");
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: PearConfig = toml::from_str(contents)
            .context("Failed to parse configuration file")?;
        config.validate()?;
        Ok(config)
    }

    /// Make relative document roots and descriptor paths relative to the config file
    fn resolve_relative_to(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for entry in &mut self.contexts {
            if let Some(doc_base) = entry.doc_base.as_mut() {
                resolve(doc_base);
            }
            if let Some(descriptor) = entry.descriptor.as_mut() {
                resolve(descriptor);
            }
        }
        for file in self.host.error_pages.values_mut() {
            resolve(file);
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.server.backlog <= 0 {
            anyhow::bail!("Listen backlog must be positive");
        }

        if self.container.max_instances == 0 {
            anyhow::bail!("max_instances must be at least 1");
        }

        // Unload polls at a twentieth of the delay
        if self.container.unload_delay_ms < 20 {
            anyhow::bail!("unload_delay_ms must be at least 20");
        }

        self.host.pages()?;

        let mut seen = HashSet::new();
        for entry in &self.contexts {
            let path = entry.path.as_str();
            if !path.is_empty() && (!path.starts_with('/') || path.ends_with('/')) {
                anyhow::bail!(
                    "Context path '{}' must be empty or start with '/' and not end with '/'",
                    path
                );
            }
            if !seen.insert(path) {
                anyhow::bail!("Context path '{}' is configured twice", path);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PearConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.container.max_instances, 20);
        assert_eq!(config.container.unload_delay_ms, 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_contexts() {
        let config = PearConfig::parse(
            r#"
[server]
port = 9090

[host]
error_pages = { "404" = "errors/404.html", default = "errors/all.html" }

[[contexts]]
path = ""
doc_base = "webapps/ROOT"

[[contexts]]
path = "/shop"
descriptor = "webapps/shop/web.toml"
reloadable = true
parameters = [{ name = "mode", value = "live", override_allowed = false }]
"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.contexts.len(), 2);
        assert!(config.contexts[1].reloadable);
        assert!(!config.contexts[1].parameters[0].override_allowed);
        assert_eq!(config.host.pages().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_context_paths() {
        let mut config = PearConfig::default();
        config.contexts.push(ContextEntry {
            path: "shop/".to_string(),
            doc_base: None,
            descriptor: None,
            reloadable: false,
            use_naming: false,
            required_extensions: Vec::new(),
            provided_extensions: Vec::new(),
            parameters: Vec::new(),
        });
        assert!(config.validate().is_err());

        config.contexts[0].path = "/shop".to_string();
        assert!(config.validate().is_ok());
        config.contexts.push(config.contexts[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unload_delay_floor() {
        let mut config = PearConfig::default();
        config.container.unload_delay_ms = 5;
        assert!(config.validate().is_err());
    }
}
