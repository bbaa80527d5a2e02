//! Output formatting utilities for the CLI
//!
//! Provides table and JSON formatting with colors.

use anyhow::Result;
use colored::*;
use serde::Serialize;
use testdroid_core::{
    Device, DeviceProperty, DeviceSession, Label, LabelGroup, Project, ProxySession, TestRun,
};

use tabled::{settings::Style, Table, Tabled};

use crate::config::CliConfig;

/// Output format options
#[derive(Debug, Clone)]
pub enum OutputFormat {
    Table,
    Json,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Format a device list
pub fn format_devices(devices: &[Device], format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(devices),
        OutputFormat::Table => {
            if devices.is_empty() {
                return Ok("No matching devices".yellow().to_string());
            }

            #[derive(Tabled)]
            struct DeviceRow {
                #[tabled(rename = "ID")]
                id: i64,
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "Online")]
                online: String,
            }

            let rows: Vec<DeviceRow> = devices
                .iter()
                .map(|d| DeviceRow {
                    id: d.id,
                    name: d.display_name.clone(),
                    online: if d.online {
                        "yes".green().to_string()
                    } else {
                        "no".red().to_string()
                    },
                })
                .collect();

            let table = Table::new(rows).with(Style::rounded()).to_string();
            Ok(format!("{}\n{}", "Devices:".bold(), table))
        }
    }
}

/// Format a single device with optional properties
pub fn format_device(
    device: &Device,
    properties: Option<&[DeviceProperty]>,
    format: &OutputFormat,
) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(device)?;
            if let (Some(properties), Some(object)) = (properties, value.as_object_mut()) {
                object.insert("properties".to_string(), serde_json::to_value(properties)?);
            }
            to_json(&value)
        }
        OutputFormat::Table => {
            let mut output = String::new();
            output.push_str(&device.display_name.bold().to_string());
            output.push('\n');
            output.push_str(&format!("ID: {}", device.id.to_string().cyan()));
            output.push('\n');
            output.push_str(&format!(
                "Online: {}",
                if device.online {
                    "Yes".green()
                } else {
                    "No".red()
                }
            ));

            if let Some(properties) = properties {
                #[derive(Tabled)]
                struct PropertyRow {
                    #[tabled(rename = "ID")]
                    id: i64,
                    #[tabled(rename = "Group")]
                    group: String,
                    #[tabled(rename = "Value")]
                    value: String,
                }

                let rows: Vec<PropertyRow> = properties
                    .iter()
                    .map(|p| PropertyRow {
                        id: p.id,
                        group: or_dash(p.property_group_name.as_deref()),
                        value: p.display_name.clone(),
                    })
                    .collect();

                output.push('\n');
                output.push_str(&"Properties:".bold().to_string());
                output.push('\n');
                output.push_str(&Table::new(rows).with(Style::rounded()).to_string());
            }

            Ok(output)
        }
    }
}

/// Format label groups
pub fn format_label_groups(groups: &[LabelGroup], format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(groups),
        OutputFormat::Table => {
            #[derive(Tabled)]
            struct GroupRow {
                #[tabled(rename = "ID")]
                id: i64,
                #[tabled(rename = "Display Name")]
                display_name: String,
                #[tabled(rename = "Name")]
                name: String,
            }

            let rows: Vec<GroupRow> = groups
                .iter()
                .map(|g| GroupRow {
                    id: g.id,
                    display_name: g.display_name.cyan().to_string(),
                    name: or_dash(g.name.as_deref()),
                })
                .collect();

            let table = Table::new(rows).with(Style::rounded()).to_string();
            Ok(format!("{}\n{}", "Label Groups:".bold(), table))
        }
    }
}

/// Format the labels of one group
pub fn format_labels(group: &LabelGroup, labels: &[Label], format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(labels),
        OutputFormat::Table => {
            if labels.is_empty() {
                return Ok(format!("No labels in '{}'", group.display_name)
                    .yellow()
                    .to_string());
            }

            #[derive(Tabled)]
            struct LabelRow {
                #[tabled(rename = "ID")]
                id: i64,
                #[tabled(rename = "Value")]
                value: String,
            }

            let rows: Vec<LabelRow> = labels
                .iter()
                .map(|l| LabelRow {
                    id: l.id,
                    value: l.display_name.clone(),
                })
                .collect();

            let table = Table::new(rows).with(Style::rounded()).to_string();
            Ok(format!(
                "{}\n{}",
                format!("Labels in '{}':", group.display_name).bold(),
                table
            ))
        }
    }
}

/// Format a project list
pub fn format_projects(projects: &[Project], format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(projects),
        OutputFormat::Table => {
            #[derive(Tabled)]
            struct ProjectRow {
                #[tabled(rename = "ID")]
                id: i64,
                #[tabled(rename = "Name")]
                name: String,
                #[tabled(rename = "Type")]
                project_type: String,
            }

            let rows: Vec<ProjectRow> = projects
                .iter()
                .map(|p| ProjectRow {
                    id: p.id,
                    name: p.name.cyan().to_string(),
                    project_type: or_dash(p.project_type.as_deref()),
                })
                .collect();

            let table = Table::new(rows).with(Style::rounded()).to_string();
            Ok(format!("{}\n{}", "Projects:".bold(), table))
        }
    }
}

/// Format a single project
pub fn format_project(project: &Project, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(project),
        OutputFormat::Table => Ok(format!(
            "{}\nID: {}\nType: {}",
            project.name.bold(),
            project.id.to_string().cyan(),
            or_dash(project.project_type.as_deref())
        )),
    }
}

/// Format a test run
pub fn format_test_run(run: &TestRun, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(run),
        OutputFormat::Table => {
            let state = match run.state.as_deref() {
                Some(TestRun::STATE_FINISHED) => TestRun::STATE_FINISHED.green(),
                Some(state) => state.yellow(),
                None => "unknown".dimmed(),
            };
            Ok(format!(
                "{} {}\nName: {}\nState: {}",
                "Test run".bold(),
                run.id.to_string().cyan(),
                or_dash(run.display_name.as_deref()),
                state
            ))
        }
    }
}

/// Format a device session
pub fn format_session(session: &DeviceSession, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(session),
        OutputFormat::Table => Ok(format_success(&format!(
            "Started device session {}",
            session.id
        ))),
    }
}

/// Format a provisioned proxy
pub fn format_proxy(proxy: &ProxySession, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(proxy),
        OutputFormat::Table => {
            let mut output = String::new();
            output.push_str(
                &format!("{} proxy for session {}", proxy.proxy_type, proxy.session_id)
                    .bold()
                    .to_string(),
            );
            output.push('\n');
            output.push_str(&format!(
                "Address: {}",
                proxy
                    .address()
                    .map(|a| a.green().to_string())
                    .unwrap_or_else(|| "-".dimmed().to_string())
            ));
            if let Some(serial) = &proxy.serial {
                output.push('\n');
                output.push_str(&format!("Serial: {}", serial.cyan()));
            }
            Ok(output)
        }
    }
}

/// Format CLI configuration. The password is shown only as set or unset.
pub fn format_config(config: &CliConfig, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(config),
        OutputFormat::Table => {
            let mut output = String::new();
            output.push_str(&"CLI Configuration:".bold().to_string());
            output.push('\n');
            output.push_str(&format!("{:<20} Value\n", "Setting"));
            output.push_str(&"-".repeat(40));
            output.push('\n');
            output.push_str(&format!("{:<20} {}\n", "Cloud URL", config.cloud_url));
            output.push_str(&format!(
                "{:<20} {}\n",
                "Username",
                or_dash(config.username.as_deref())
            ));
            output.push_str(&format!(
                "{:<20} {}\n",
                "Password",
                if config.password.is_some() {
                    "(set)"
                } else {
                    "(unset)"
                }
            ));
            output.push_str(&format!("{:<20} {}\n", "Output Format", config.output_format));
            output.push_str(&format!("{:<20} {}\n", "Verbose", config.verbose));
            output.push_str(&format!("{:<20} {}s\n", "Timeout", config.timeout));
            output.push_str(&format!(
                "{:<20} {} x {}ms",
                "Proxy Poll", config.proxy_attempts, config.proxy_delay_ms
            ));
            Ok(output)
        }
    }
}

/// Format a success message
pub fn format_success(message: &str) -> String {
    format!("✓ {}", message.green())
}
