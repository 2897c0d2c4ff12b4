// CLI Command Implementations
// Handles execution of each CLI command with colored output

use super::{info, print_banner, success, warning, Commands};
use crate::config::PearConfig;
use crate::context::{display_path, ContextSummary};
use crate::deployment::{self, descriptor_source};
use crate::descriptor::ContextConfig;
use crate::lifecycle::{LifecycleEvent, LifecycleListener};
use crate::loader::ContainerLoader;
use crate::network::{self, NetworkConfig};
use crate::{observability, signals};
use colored::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Execute a CLI command
pub async fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Start { config, verbose } => start_command(config, verbose).await,
        Commands::Validate { file } => validate_command(file).await,
        Commands::Routes { config, format } => routes_command(config, format).await,
    }
}

/// Run the container until SIGTERM or SIGINT
async fn start_command(config_path: String, verbose: bool) -> anyhow::Result<()> {
    observability::init(verbose)?;
    print_banner();

    tracing::info!("Loading configuration from {}", config_path);
    let config = PearConfig::load(&config_path)?;
    let host = deployment::build_host(&config)?;

    let shutdown = CancellationToken::new();
    let signal_listener = signals::cancel_on_shutdown(shutdown.clone())?;
    tracing::info!("✓ Signal handlers installed (SIGTERM, SIGINT)");

    host.start().await?;
    let failed = host.start_contexts().await;
    if failed > 0 {
        warning(&format!("{} context(s) failed to start and will answer 404", failed));
    }
    success(&format!(
        "{} of {} context(s) available on host {}",
        config.contexts.len() - failed,
        config.contexts.len(),
        host.name().bright_white()
    ));

    let network_config = NetworkConfig::from(&config.server);
    info(&format!("Listening on {}:{}", network_config.bind_addr, network_config.port));
    let mut server = tokio::spawn(network::serve(network_config, host.clone(), shutdown.clone()));

    let finished_early = tokio::select! {
        _ = shutdown.cancelled() => None,
        joined = &mut server => Some(joined),
    };
    let joined = match finished_early {
        Some(joined) => {
            shutdown.cancel();
            joined
        }
        None => {
            tracing::info!("Draining connections");
            server.await
        }
    };
    let outcome = match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.context("HTTP server failed")),
        Err(e) => Err(anyhow::anyhow!("server task failed: {}", e)),
    };

    host.stop().await;
    let _ = signal_listener.await;

    if outcome.is_ok() {
        success("Pear Container stopped");
    }
    outcome
}

/// Validate configuration and descriptors
async fn validate_command(file: String) -> anyhow::Result<()> {
    info(&format!("Validating {}", file.bright_white()));

    if !std::path::Path::new(&file).exists() {
        anyhow::bail!("configuration file {} not found", file);
    }
    let config = PearConfig::load(&file)?;
    success("Configuration syntax valid");
    info(&format!(
        "Server: {}:{} | Contexts: {} | Host error pages: {}",
        config.server.bind_addr,
        config.server.port,
        config.contexts.len(),
        config.host.error_pages.len()
    ));

    let descriptors = deployment::validate_descriptors(&config)?;
    success(&format!("{} deployment descriptor(s) valid", descriptors));

    for entry in &config.contexts {
        if let Some(doc_base) = &entry.doc_base {
            if !doc_base.is_dir() {
                warning(&format!(
                    "Document base {} of context {} does not exist",
                    doc_base.display(),
                    display_path(&entry.path)
                ));
            }
        }
    }

    Ok(())
}

/// Print the mappings every context ends up with once configured
async fn routes_command(config_path: String, format: String) -> anyhow::Result<()> {
    let config = PearConfig::load(&config_path)?;
    let summaries = configured_summaries(&config).await?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summaries)?),
        _ => {
            for summary in &summaries {
                print_summary(summary);
            }
        }
    }
    Ok(())
}

/// Configure each context the way a start would, without starting it
pub async fn configured_summaries(config: &PearConfig) -> anyhow::Result<Vec<ContextSummary>> {
    let container_loader = Arc::new(ContainerLoader::with_builtins());
    let mut summaries = Vec::with_capacity(config.contexts.len());

    for entry in &config.contexts {
        let context = deployment::deploy_context(entry, &config.container, container_loader.clone());
        ContextConfig::new(descriptor_source(entry))
            .lifecycle_event(&context, LifecycleEvent::ConfigureStart)
            .await?;
        if !context.is_configured() {
            anyhow::bail!("context {} could not be configured", display_path(&entry.path));
        }
        summaries.push(context.summary());
    }
    Ok(summaries)
}

fn print_summary(summary: &ContextSummary) {
    let title = summary
        .display_name
        .as_deref()
        .map(|name| format!(" ({})", name))
        .unwrap_or_default();
    println!();
    println!("{}{}", display_path(&summary.path).bright_cyan().bold(), title);

    println!("  {}", "Servlets".bright_white());
    for (pattern, name) in &summary.servlet_mappings {
        println!("    {:<24} {} {}", pattern.yellow(), "→".bright_black(), name);
    }

    if !summary.filter_maps.is_empty() {
        println!("  {}", "Filters (in chain order)".bright_white());
        for map in &summary.filter_maps {
            println!("    {}", map);
        }
    }

    if !summary.welcome_files.is_empty() {
        println!("  {} {}", "Welcome files:".bright_white(), summary.welcome_files.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_configured_summaries_include_descriptor_mappings() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = dir.path().join("web.toml");
        std::fs::write(
            &descriptor,
            r#"
[[servlets]]
name = "status"
class = "app.StatusServlet"
url_patterns = ["/status"]
"#,
        )
        .unwrap();

        let config = PearConfig::parse(&format!(
            r#"
[[contexts]]
path = "/app"
descriptor = "{}"
"#,
            descriptor.display()
        ))
        .unwrap();

        let summaries = configured_summaries(&config).await.unwrap();
        assert_eq!(summaries.len(), 1);
        let mappings = &summaries[0].servlet_mappings;
        assert_eq!(mappings.get("/").map(String::as_str), Some("default"));
        assert_eq!(mappings.get("*.jsp").map(String::as_str), Some("jsp"));
        assert_eq!(mappings.get("/status").map(String::as_str), Some("status"));
        assert!(summaries[0].servlets.contains(&"status".to_string()));
    }

    #[tokio::test]
    async fn test_unconfigurable_context_is_an_error() {
        let config = PearConfig::parse(
            r#"
[[contexts]]
path = "/broken"
descriptor = "/nonexistent/web.toml"
"#,
        )
        .unwrap();
        assert!(configured_summaries(&config).await.is_err());
    }
}
