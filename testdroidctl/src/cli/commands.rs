//! CLI command and subcommand definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use testdroid_core::{Capabilities, ProxyType};

/// Testdroid Cloud CLI
#[derive(Parser, Debug)]
#[command(name = "testdroidctl")]
#[command(version, about = "Testdroid Cloud device farm CLI", long_about = None)]
pub struct Cli {
    /// Cloud URL (overrides config file)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Account user name (overrides config file)
    #[arg(long)]
    pub username: Option<String>,

    /// Account password (prefer TESTDROID_PASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// Output format (overrides config file)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose logging (overrides config file)
    #[arg(short, long)]
    pub verbose: Option<bool>,

    /// Request timeout in seconds (overrides config file)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Attempts when waiting for a proxy (overrides config file)
    #[arg(long)]
    pub proxy_attempts: Option<u32>,

    /// Delay between proxy attempts in milliseconds (overrides config file)
    #[arg(long)]
    pub proxy_delay_ms: Option<u64>,

    /// Don't load config file
    #[arg(long)]
    pub no_config: bool,

    /// Config file path (default: ~/.config/testdroid/cli.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty table output
    Table,
    /// JSON output
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
        }
    }
}

impl From<&OutputFormat> for crate::format::OutputFormat {
    fn from(format: &OutputFormat) -> Self {
        match format {
            OutputFormat::Table => crate::format::OutputFormat::Table,
            OutputFormat::Json => crate::format::OutputFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ProxyKind {
    /// Android Debug Bridge
    Adb,
    /// Firefox OS Marionette
    Marionette,
}

impl From<ProxyKind> for ProxyType {
    fn from(kind: ProxyKind) -> Self {
        match kind {
            ProxyKind::Adb => ProxyType::Adb,
            ProxyKind::Marionette => ProxyType::Marionette,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List devices, optionally filtered by capabilities
    Devices {
        #[command(flatten)]
        filter: CapabilityArgs,

        /// Maximum number of devices (0 = no limit)
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Show a device by display name
    Device {
        /// Display name (case-insensitive)
        name: String,

        /// Also list the device's properties
        #[arg(long)]
        properties: bool,
    },

    /// List label groups
    LabelGroups,

    /// List labels of a label group
    Labels {
        /// Label group name (case-insensitive)
        group: String,
    },

    /// List projects of the current user
    Projects,

    /// Show a project by name
    Project {
        /// Project name
        name: String,
    },

    /// Create a test run in a project, optionally starting it
    Run {
        /// Project name
        project: String,

        /// Device ids to start the run on
        #[arg(short, long, value_delimiter = ',')]
        devices: Vec<i64>,

        /// Wait for the started run to finish
        #[arg(long, requires = "devices")]
        wait: bool,

        /// Poll attempts when waiting
        #[arg(long, default_value_t = 120)]
        wait_attempts: u32,

        /// Seconds between polls when waiting
        #[arg(long, default_value_t = 5)]
        wait_delay: u64,
    },

    /// Device session management
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Wait for and show a proxy of a device session
    Proxy {
        /// Proxy protocol
        #[arg(value_enum)]
        proxy_type: ProxyKind,

        /// Device session id
        session_id: i64,
    },

    /// Show or manage CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Capability flags shared by device queries.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct CapabilityArgs {
    /// Device type, e.g. "flame"
    #[arg(long = "type")]
    pub device_type: Option<String>,

    /// Build identifier
    #[arg(long)]
    pub build: Option<String>,

    /// Memory size
    #[arg(long)]
    pub memory: Option<String>,

    /// Number of SIM cards
    #[arg(long)]
    pub sims: Option<String>,
}

impl CapabilityArgs {
    /// The flags given, keyed by capability name. `None` if no flag was set.
    pub fn to_capabilities(&self) -> Option<Capabilities> {
        let capabilities: Capabilities = [
            ("type", &self.device_type),
            ("build", &self.build),
            ("memory", &self.memory),
            ("sims", &self.sims),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone())))
        .collect();

        if capabilities.is_empty() {
            None
        } else {
            Some(capabilities)
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SessionCommands {
    /// Allocate a device to the current user
    Start {
        /// Device id
        device_id: i64,
    },

    /// Release a device session
    Stop {
        /// Device session id
        session_id: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Write the current configuration to the config file
    Init,
}
