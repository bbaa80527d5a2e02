//! Command execution handlers

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use testdroid_core::{ProxyType, TestdroidError};

use crate::client::TestdroidClient;
use crate::config::CliConfig;
use crate::format::{self, format_success};
use crate::poll::PollPolicy;

use super::commands::*;

/// Handle devices command
pub async fn handle_devices(
    client: &TestdroidClient,
    filter: &CapabilityArgs,
    limit: Option<u32>,
    format: &OutputFormat,
) -> Result<()> {
    let capabilities = filter.to_capabilities();
    let devices = client.get_devices(capabilities.as_ref(), limit).await?;

    println!("{}", format::format_devices(&devices, &format.into())?);
    Ok(())
}

/// Handle device command
pub async fn handle_device(
    client: &TestdroidClient,
    name: &str,
    with_properties: bool,
    format: &OutputFormat,
) -> Result<()> {
    let device = client
        .get_device_by_name(name)
        .await?
        .ok_or_else(|| TestdroidError::not_found("Device", name))?;

    let properties = if with_properties {
        Some(client.get_device_properties(&device).await?)
    } else {
        None
    };

    println!(
        "{}",
        format::format_device(&device, properties.as_deref(), &format.into())?
    );
    Ok(())
}

/// Handle label-groups command
pub async fn handle_label_groups(client: &TestdroidClient, format: &OutputFormat) -> Result<()> {
    let groups = client.get_label_groups().await?;

    println!("{}", format::format_label_groups(&groups, &format.into())?);
    Ok(())
}

/// Handle labels command
pub async fn handle_labels(
    client: &TestdroidClient,
    group_name: &str,
    format: &OutputFormat,
) -> Result<()> {
    let group = client
        .get_label_group(group_name)
        .await?
        .ok_or_else(|| TestdroidError::not_found("Label group", group_name))?;
    let labels = client.get_labels_in_group(&group).await?;

    println!("{}", format::format_labels(&group, &labels, &format.into())?);
    Ok(())
}

/// Handle projects command
pub async fn handle_projects(client: &TestdroidClient, format: &OutputFormat) -> Result<()> {
    let projects = client.get_projects().await?;

    println!("{}", format::format_projects(&projects, &format.into())?);
    Ok(())
}

/// Handle project command
pub async fn handle_project(
    client: &TestdroidClient,
    name: &str,
    format: &OutputFormat,
) -> Result<()> {
    let project = client
        .get_project(name)
        .await?
        .ok_or_else(|| TestdroidError::not_found("Project", name))?;

    println!("{}", format::format_project(&project, &format.into())?);
    Ok(())
}

/// Options of the run command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub devices: Vec<i64>,
    pub wait: Option<PollPolicy>,
}

/// Handle run command: create a run, then start and optionally await it
pub async fn handle_run(
    client: &TestdroidClient,
    project_name: &str,
    options: RunOptions,
    format: &OutputFormat,
) -> Result<()> {
    let project = client
        .get_project(project_name)
        .await?
        .ok_or_else(|| TestdroidError::not_found("Project", project_name))?;

    let mut run = client.create_test_run(&project).await?;

    if !options.devices.is_empty() {
        client.start_test_run(&run, &options.devices).await?;
        if let Some(policy) = options.wait {
            run = client.wait_for_test_run(&project, &run, policy).await?;
        } else {
            run = client.get_test_run(&project, &run).await?;
        }
    }

    println!("{}", format::format_test_run(&run, &format.into())?);
    Ok(())
}

/// Handle session commands
pub async fn handle_session(
    client: &TestdroidClient,
    command: SessionCommands,
    format: &OutputFormat,
) -> Result<()> {
    match command {
        SessionCommands::Start { device_id } => {
            let session = client.start_device_session(device_id).await?;
            println!("{}", format::format_session(&session, &format.into())?);
        }
        SessionCommands::Stop { session_id } => {
            client.stop_device_session(session_id).await?;
            match format {
                OutputFormat::Json => {
                    let response = serde_json::json!({
                        "session_id": session_id,
                        "released": true
                    });
                    println!("{}", serde_json::to_string_pretty(&response)?);
                }
                OutputFormat::Table => {
                    println!(
                        "{}",
                        format_success(&format!("Released device session {}", session_id))
                    );
                }
            }
        }
    }

    Ok(())
}

/// Handle proxy command
pub async fn handle_proxy(
    client: &TestdroidClient,
    proxy_type: ProxyType,
    session_id: i64,
    format: &OutputFormat,
) -> Result<()> {
    let proxy = client.get_proxy(proxy_type, session_id).await?;

    println!("{}", format::format_proxy(&proxy, &format.into())?);
    Ok(())
}

/// Handle config commands
pub async fn handle_config(
    command: ConfigCommands,
    current_config: &CliConfig,
    path: Option<&Path>,
    format: &OutputFormat,
) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("{}", format::format_config(current_config, &format.into())?);
        }
        ConfigCommands::Init => {
            let written = current_config
                .save(path)
                .context("Failed to write configuration")?;
            println!(
                "{}",
                format_success(&format!("Wrote configuration to {}", written.display()))
            );
        }
    }

    Ok(())
}

/// Poll policy of `run --wait`.
pub fn wait_policy(attempts: u32, delay_secs: u64) -> PollPolicy {
    PollPolicy::new(attempts, Duration::from_secs(delay_secs))
}

/// Generate shell completion script
pub fn generate_completion(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
