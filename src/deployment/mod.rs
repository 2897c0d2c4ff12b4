// Deployment Module
// Builds the host and its contexts from pear.toml

use crate::config::{ContainerConfig, ContextEntry, PearConfig};
use crate::context::{display_path, Context, WrapperDefaults};
use crate::descriptor::{ContextConfig, DescriptorSource, WebDescriptor};
use crate::host::Host;
use crate::loader::ContainerLoader;
use anyhow::{Context as _, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Build a host with every configured context added but not yet started
pub fn build_host(config: &PearConfig) -> Result<Arc<Host>> {
    let host = Arc::new(Host::new(config.host.name.clone()));
    for page in config.host.pages()? {
        host.add_error_page(page)?;
    }

    let container_loader = Arc::new(ContainerLoader::with_builtins());
    for entry in &config.contexts {
        let context = deploy_context(entry, &config.container, container_loader.clone());
        host.add_context(context)?;
    }

    info!(host = %host.name(), contexts = config.contexts.len(), "Host assembled");
    Ok(host)
}

/// Create a context for one `[[contexts]]` entry with its configuration listener attached
pub fn deploy_context(
    entry: &ContextEntry,
    container: &ContainerConfig,
    container_loader: Arc<ContainerLoader>,
) -> Arc<Context> {
    let context = Context::with_container_loader(entry.path.clone(), container_loader);

    if let Some(doc_base) = &entry.doc_base {
        context.set_doc_base(doc_base.clone());
    }
    context.set_reloadable(entry.reloadable);
    context.set_use_naming(entry.use_naming);
    context.set_load_all_on_startup(container.load_all_on_startup);
    context.set_wrapper_defaults(WrapperDefaults {
        unload_delay: Duration::from_millis(container.unload_delay_ms),
        max_instances: container.max_instances,
        default_unavailable_secs: container.default_unavailable_secs,
    });
    context.set_background_processor_delay(Duration::from_secs(container.background_processor_delay_secs));

    for name in &entry.required_extensions {
        context.add_required_extension(name.clone());
    }
    for name in &entry.provided_extensions {
        context.add_provided_extension(name.clone());
    }
    for parameter in &entry.parameters {
        context.add_application_parameter(parameter.clone());
    }

    context.add_lifecycle_listener(Arc::new(ContextConfig::new(descriptor_source(entry))));
    debug!(context = %display_path(context.path()), "Context deployed");
    context
}

pub fn descriptor_source(entry: &ContextEntry) -> DescriptorSource {
    match &entry.descriptor {
        Some(path) => DescriptorSource::File(path.clone()),
        None => DescriptorSource::None,
    }
}

/// Load and validate every descriptor the configuration names.
/// Returns the number of descriptors checked.
pub fn validate_descriptors(config: &PearConfig) -> Result<usize> {
    let mut checked = 0;
    for entry in &config.contexts {
        if let Some(path) = &entry.descriptor {
            WebDescriptor::load(path)
                .with_context(|| format!("context {}", display_path(&entry.path)))?;
            checked += 1;
        }
    }
    Ok(checked)
}
