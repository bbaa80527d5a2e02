//! Testdroid Cloud CLI
//!
//! Command-line interface for browsing and driving the Testdroid Cloud
//! device farm.

use anyhow::Result;
use clap::Parser;
use testdroidctl::cli::{
    generate_completion, handle_config, handle_device, handle_devices, handle_label_groups,
    handle_labels, handle_project, handle_projects, handle_proxy, handle_run, handle_session,
    wait_policy, Cli, Commands, OutputFormat, RunOptions,
};
use testdroidctl::client::TestdroidClient;
use testdroidctl::config::{CliConfig, ConfigBuilder};
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging to stderr. `RUST_LOG` wins over `verbose`.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("testdroidctl=debug,warn")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Apply CLI arguments, then environment, then the config file.
fn build_config(cli: &Cli) -> Result<CliConfig> {
    let mut builder = ConfigBuilder::new();

    // CLI arguments (highest priority)
    if let Some(ref url) = cli.url {
        builder = builder.with_cloud_url(url)?;
    }
    if let Some(ref username) = cli.username {
        builder = builder.with_username(username);
    }
    if let Some(ref password) = cli.password {
        builder = builder.with_password(password);
    }
    if let Some(ref format) = cli.format {
        builder = builder.with_output_format(format.as_str())?;
    }
    if let Some(verbose) = cli.verbose {
        builder = builder.with_verbose(verbose);
    }
    if let Some(timeout) = cli.timeout {
        builder = builder.with_timeout(timeout)?;
    }
    if let Some(attempts) = cli.proxy_attempts {
        builder = builder.with_proxy_attempts(attempts)?;
    }
    if let Some(delay_ms) = cli.proxy_delay_ms {
        builder = builder.with_proxy_delay_ms(delay_ms)?;
    }

    builder
        .with_env_overrides()
        .with_config_file(cli.config.as_deref(), !cli.no_config)?
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            if cli.verbose.unwrap_or(false) {
                eprintln!("Error details: {:?}", e);
            }
            std::process::exit(1);
        }
    };

    let verbose = config.verbose;
    init_tracing(verbose);

    let output_format = match config.output_format.as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Table,
    };
    debug!("Cloud URL: {}", config.cloud_url);
    debug!("Output format: {:?}", output_format);

    // Commands that don't talk to the cloud
    let command = match cli.command {
        Commands::Config { command } => {
            return report(
                handle_config(command, &config, cli.config.as_deref(), &output_format).await,
                verbose,
            );
        }
        Commands::Completion { shell } => {
            generate_completion(shell);
            return Ok(());
        }
        command => command,
    };

    let client = match config
        .credentials()
        .and_then(|creds| Ok(TestdroidClient::with_options(creds, config.client_options())?))
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error: Cannot create a client for {}", config.cloud_url);
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let result = match command {
        Commands::Devices { filter, limit } => {
            handle_devices(&client, &filter, limit, &output_format).await
        }
        Commands::Device { name, properties } => {
            handle_device(&client, &name, properties, &output_format).await
        }
        Commands::LabelGroups => handle_label_groups(&client, &output_format).await,
        Commands::Labels { group } => handle_labels(&client, &group, &output_format).await,
        Commands::Projects => handle_projects(&client, &output_format).await,
        Commands::Project { name } => handle_project(&client, &name, &output_format).await,
        Commands::Run {
            project,
            devices,
            wait,
            wait_attempts,
            wait_delay,
        } => {
            let options = RunOptions {
                devices,
                wait: wait.then(|| wait_policy(wait_attempts, wait_delay)),
            };
            handle_run(&client, &project, options, &output_format).await
        }
        Commands::Session { command } => handle_session(&client, command, &output_format).await,
        Commands::Proxy {
            proxy_type,
            session_id,
        } => handle_proxy(&client, proxy_type.into(), session_id, &output_format).await,
        Commands::Config { .. } | Commands::Completion { .. } => Ok(()),
    };

    report(result, verbose)
}

fn report(result: Result<()>, verbose: bool) -> Result<()> {
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if verbose {
            eprintln!("Error details: {:?}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}
