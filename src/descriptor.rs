// Deployment descriptor
// TOML web application descriptor and the lifecycle listener that applies it at configure time

use crate::context::{display_path, Context};
use crate::error::{ContainerError, LifecycleError};
use crate::error_page::ErrorPage;
use crate::filter_chain::{FilterDef, FilterMap};
use crate::http::DispatcherType;
use crate::lifecycle::{LifecycleEvent, LifecycleListener};
use crate::loader::{DEFAULT_SERVLET_CLASS, JSP_SERVLET_CLASS};
use crate::servlet::MultipartConfig;
use crate::wrapper::{DEFAULT_SERVLET_NAME, JSP_SERVLET_NAME};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

/// Parsed deployment descriptor of one web application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDescriptor {
    pub display_name: Option<String>,
    pub distributable: bool,
    /// Minutes; zero or negative means sessions never time out
    pub session_timeout: Option<i64>,
    /// Servlet specification version the application targets
    pub version: Option<String>,
    pub context_params: BTreeMap<String, String>,
    pub servlets: Vec<ServletDecl>,
    pub filters: Vec<FilterDecl>,
    pub error_pages: Vec<ErrorPage>,
    pub listeners: Vec<String>,
    pub welcome_files: Vec<String>,
    pub security_roles: Vec<String>,
    pub mime_mappings: BTreeMap<String, String>,
    pub required_extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServletDecl {
    pub name: String,
    pub class: Option<String>,
    pub jsp_file: Option<String>,
    pub init_params: BTreeMap<String, String>,
    pub load_on_startup: Option<i32>,
    pub async_supported: bool,
    pub run_as: Option<String>,
    pub multipart: Option<MultipartConfig>,
    pub description: Option<String>,
    pub url_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterDecl {
    pub name: String,
    pub class: Option<String>,
    pub init_params: BTreeMap<String, String>,
    pub async_supported: bool,
    pub description: Option<String>,
    pub url_patterns: Vec<String>,
    pub servlet_names: Vec<String>,
    pub dispatchers: Vec<DispatcherType>,
    /// Append after existing mappings instead of inserting before them
    #[serde(default = "default_match_after")]
    pub match_after: bool,
}

fn default_match_after() -> bool {
    true
}

impl WebDescriptor {
    pub fn parse(contents: &str) -> Result<Self> {
        let descriptor: WebDescriptor = toml::from_str(contents).context("failed to parse deployment descriptor")?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read deployment descriptor {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid deployment descriptor {}", path.display()))
    }

    /// Structural checks that need no context
    pub fn validate(&self) -> Result<()> {
        let mut names = std::collections::HashSet::new();
        for servlet in &self.servlets {
            if servlet.name.is_empty() {
                anyhow::bail!("servlet declared without a name");
            }
            if !names.insert(servlet.name.as_str()) {
                anyhow::bail!("servlet '{}' is declared twice", servlet.name);
            }
            if servlet.class.is_some() && servlet.jsp_file.is_some() {
                anyhow::bail!("servlet '{}' declares both a class and a JSP file", servlet.name);
            }
        }
        let mut names = std::collections::HashSet::new();
        for filter in &self.filters {
            if filter.name.is_empty() {
                anyhow::bail!("filter declared without a name");
            }
            if !names.insert(filter.name.as_str()) {
                anyhow::bail!("filter '{}' is declared twice", filter.name);
            }
        }
        Ok(())
    }

    /// Register everything this descriptor declares with `context`
    pub fn apply(&self, context: &Context) -> Result<(), ContainerError> {
        if let Some(version) = &self.version {
            context.set_effective_version(version.clone());
        }
        if self.display_name.is_some() {
            context.set_display_name(self.display_name.clone());
        }
        context.set_distributable(self.distributable);
        if let Some(timeout) = self.session_timeout {
            context.set_session_timeout(timeout);
        }
        for (name, value) in &self.context_params {
            context.add_parameter(name.clone(), value.clone())?;
        }
        for (extension, mime) in &self.mime_mappings {
            context.add_mime_mapping(extension.clone(), mime.clone());
        }
        for file in &self.welcome_files {
            context.add_welcome_file(file.clone());
        }
        for role in &self.security_roles {
            context.add_security_role(role.clone());
        }
        for extension in &self.required_extensions {
            context.add_required_extension(extension.clone());
        }
        for class in &self.listeners {
            context.add_listener_class(class.clone())?;
        }

        for decl in &self.servlets {
            let wrapper = context.create_wrapper(decl.name.clone());
            if let Some(class) = &decl.class {
                wrapper.set_servlet_class_name(class.clone())?;
            }
            if let Some(jsp_file) = &decl.jsp_file {
                wrapper.set_jsp_file(jsp_file.clone());
            }
            for (name, value) in &decl.init_params {
                wrapper.add_init_parameter(name.clone(), value.clone());
            }
            if let Some(value) = decl.load_on_startup {
                wrapper.set_load_on_startup(value);
            }
            wrapper.set_async_supported(decl.async_supported);
            wrapper.set_run_as(decl.run_as.clone());
            wrapper.set_multipart_config(decl.multipart.clone());
            wrapper.set_description(decl.description.clone());
            context.add_child(wrapper)?;
            for pattern in &decl.url_patterns {
                context.add_servlet_mapping(pattern, &decl.name)?;
            }
        }

        for decl in &self.filters {
            let mut def = FilterDef::new(decl.name.clone());
            def.filter_class = decl.class.clone();
            def.init_params = decl.init_params.clone();
            def.async_supported = decl.async_supported;
            def.description = decl.description.clone();
            context.add_filter_def(def)?;

            for pattern in &decl.url_patterns {
                let map = FilterMap::for_url(decl.name.clone(), pattern.clone()).with_dispatchers(&decl.dispatchers);
                context.add_filter_map(map, decl.match_after)?;
            }
            for servlet in &decl.servlet_names {
                let map = FilterMap::for_servlet(decl.name.clone(), servlet.clone()).with_dispatchers(&decl.dispatchers);
                context.add_filter_map(map, decl.match_after)?;
            }
        }

        for page in &self.error_pages {
            context.add_error_page(page.clone())?;
        }
        Ok(())
    }
}

/// Where a [`ContextConfig`] gets its descriptor from
#[derive(Debug, Clone)]
pub enum DescriptorSource {
    /// No application descriptor; only the container servlets are registered
    None,
    File(PathBuf),
    Parsed(WebDescriptor),
}

/// Lifecycle listener that configures a context at `ConfigureStart`.
///
/// Registers the container's `default` and `jsp` servlets, applies the application
/// descriptor on top, and marks the context configured. Registrations survive a
/// reload, so the descriptor is applied only on the first start.
pub struct ContextConfig {
    source: DescriptorSource,
    applied: AtomicBool,
}

impl ContextConfig {
    pub fn new(source: DescriptorSource) -> Self {
        Self {
            source,
            applied: AtomicBool::new(false),
        }
    }

    fn descriptor(&self) -> Result<Option<WebDescriptor>> {
        match &self.source {
            DescriptorSource::None => Ok(None),
            DescriptorSource::File(path) => WebDescriptor::load(path).map(Some),
            DescriptorSource::Parsed(descriptor) => Ok(Some(descriptor.clone())),
        }
    }

    fn configure(&self, context: &Context) -> Result<()> {
        register_container_servlets(context)?;
        if let Some(descriptor) = self.descriptor()? {
            descriptor.apply(context)?;
        }
        Ok(())
    }
}

/// The container-wide defaults every application inherits: `default` on `/`
/// and `jsp` on the JSP extensions
fn register_container_servlets(context: &Context) -> Result<(), ContainerError> {
    let default = context.create_wrapper(DEFAULT_SERVLET_NAME);
    default.set_servlet_class_name(DEFAULT_SERVLET_CLASS)?;
    default.set_load_on_startup(1);
    context.add_child(default)?;
    context.add_servlet_mapping("/", DEFAULT_SERVLET_NAME)?;

    let jsp = context.create_wrapper(JSP_SERVLET_NAME);
    jsp.set_servlet_class_name(JSP_SERVLET_CLASS)?;
    jsp.add_init_parameter("fork", "false");
    jsp.set_load_on_startup(3);
    context.add_child(jsp)?;
    context.add_servlet_mapping("*.jsp", JSP_SERVLET_NAME)?;
    context.add_servlet_mapping("*.jspx", JSP_SERVLET_NAME)?;

    context.add_mime_mapping("html", "text/html");
    context.add_mime_mapping("txt", "text/plain");
    context.add_mime_mapping("css", "text/css");
    context.add_mime_mapping("js", "text/javascript");
    context.add_mime_mapping("json", "application/json");
    Ok(())
}

#[async_trait]
impl LifecycleListener for ContextConfig {
    fn name(&self) -> &str {
        "ContextConfig"
    }

    async fn lifecycle_event(&self, context: &Context, event: LifecycleEvent) -> Result<(), LifecycleError> {
        if event != LifecycleEvent::ConfigureStart {
            return Ok(());
        }
        if self.applied.load(Ordering::Acquire) {
            debug!(context = %display_path(context.path()), "Descriptor already applied");
            context.set_configured(true);
            return Ok(());
        }

        match self.configure(context) {
            Ok(()) => {
                self.applied.store(true, Ordering::Release);
                context.set_configured(true);
                info!(context = %display_path(context.path()), servlets = context.find_children().len(), "Context configured");
            }
            Err(e) => {
                // Leaving the context unconfigured aborts the start
                error!(context = %display_path(context.path()), error = %format!("{:#}", e), "Context configuration failed");
                context.set_configured(false);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const DESCRIPTOR: &str = r#"
display_name = "Shop"
session_timeout = 15
welcome_files = ["index.html"]

[context_params]
currency = "EUR"

[[servlets]]
name = "cart"
class = "shop.CartServlet"
load_on_startup = 2
url_patterns = ["/cart/*"]

[[servlets]]
name = "orphan"

[[filters]]
name = "dumper"
class = "pear.filters.RequestDumperFilter"
url_patterns = ["/*"]
dispatchers = ["REQUEST", "ERROR"]

[[error_pages]]
error_code = 404
location = "/missing.html"
"#;

    #[test]
    fn test_parse_descriptor() {
        let descriptor = WebDescriptor::parse(DESCRIPTOR).unwrap();
        assert_eq!(descriptor.display_name.as_deref(), Some("Shop"));
        assert_eq!(descriptor.servlets.len(), 2);
        assert_eq!(descriptor.filters[0].dispatchers, vec![DispatcherType::Request, DispatcherType::Error]);
        assert!(descriptor.filters[0].match_after);
        assert_eq!(descriptor.error_pages[0].error_code, Some(404));
    }

    #[test]
    fn test_duplicate_servlet_is_rejected() {
        let text = "[[servlets]]\nname = \"a\"\n[[servlets]]\nname = \"a\"\n";
        assert!(WebDescriptor::parse(text).is_err());
    }

    #[test]
    fn test_apply_registers_declarations() {
        let context = Context::new("/shop");
        register_container_servlets(&context).unwrap();
        WebDescriptor::parse(DESCRIPTOR).unwrap().apply(&context).unwrap();

        assert_eq!(context.find_servlet_mapping("/cart/*").as_deref(), Some("cart"));
        assert_eq!(context.find_servlet_mapping("/").as_deref(), Some(DEFAULT_SERVLET_NAME));
        assert_eq!(context.find_child("cart").unwrap().load_on_startup(), 2);
        // Declared without a class: only a preliminary registration
        assert!(context.find_child("orphan").is_none());
        assert!(context.servlet_registration("orphan").is_some());
        assert_eq!(context.find_filter_maps().len(), 1);
        assert_eq!(context.find_error_page_for_status(404).unwrap().location, "/missing.html");
        assert_eq!(context.init_parameter("currency").as_deref(), Some("EUR"));
    }

    #[tokio::test]
    async fn test_unreadable_descriptor_leaves_context_unconfigured() {
        let context = Context::new("/broken");
        let config = ContextConfig::new(DescriptorSource::File(PathBuf::from("/nonexistent/web.toml")));
        config.lifecycle_event(&context, LifecycleEvent::ConfigureStart).await.unwrap();
        assert!(!context.is_configured());
    }

    #[tokio::test]
    async fn test_descriptor_applied_once() {
        let context = Context::new("/shop");
        let descriptor = WebDescriptor::parse("[[servlets]]\nname = \"a\"\nclass = \"x.A\"\n").unwrap();
        let config = Arc::new(ContextConfig::new(DescriptorSource::Parsed(descriptor)));
        config.lifecycle_event(&context, LifecycleEvent::ConfigureStart).await.unwrap();
        context.set_configured(false);
        config.lifecycle_event(&context, LifecycleEvent::ConfigureStart).await.unwrap();
        assert!(context.is_configured());
        assert_eq!(context.find_children().len(), 3);
    }
}
