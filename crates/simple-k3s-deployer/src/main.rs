//! simple-k3s: single-instance k3s cluster on EC2
//!
//! Renders the stack to a CloudFormation template and deploys it. The
//! instance installs k3s through cfn-init and signals the stack when done.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use simple_k3s_common::defaults::{
    DEFAULT_DEPLOY_TIMEOUT_SECS, DEFAULT_DESTROY_TIMEOUT_SECS, DEFAULT_REGION,
};
use simple_k3s_deployer::aws::error::classify_anyhow_error;
use simple_k3s_deployer::aws::{AwsContext, CloudFormationClient};
use simple_k3s_deployer::config::{AwsConfig, StackConfig};
use simple_k3s_deployer::deploy::{self, DeployAction, DeployOptions};
use simple_k3s_deployer::wait::WaitConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "simple-k3s")]
#[command(about = "Single-instance k3s cluster on EC2 via CloudFormation")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Arguments shared by every stack command
#[derive(clap::Args, Debug)]
struct StackArgs {
    /// CloudFormation stack name (default: SimpleK3SEc2Stack, or the config file's)
    #[arg(long)]
    stack_name: Option<String>,

    /// AWS region
    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// AWS profile to use (overrides AWS_PROFILE env var)
    #[arg(long)]
    aws_profile: Option<String>,

    /// JSON deployment config; stock values when omitted
    #[arg(long)]
    config: Option<PathBuf>,
}

impl StackArgs {
    fn resolve(&self) -> Result<StackConfig> {
        StackConfig::resolve(
            AwsConfig {
                region: self.region.clone(),
                aws_profile: self.aws_profile.clone(),
            },
            self.config.as_deref(),
            self.stack_name.as_deref(),
        )
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the CloudFormation template
    Synth {
        #[command(flatten)]
        stack: StackArgs,

        /// Write the template to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the resources in creation order
    Plan {
        #[command(flatten)]
        stack: StackArgs,
    },

    /// Create or update the stack
    Deploy {
        #[command(flatten)]
        stack: StackArgs,

        /// Return once CloudFormation accepts the request
        #[arg(long)]
        no_wait: bool,

        /// Seconds to wait for the stack to settle
        #[arg(long, default_value_t = DEFAULT_DEPLOY_TIMEOUT_SECS)]
        timeout: u64,
    },

    /// Print the outputs of the deployed stack
    Outputs {
        #[command(flatten)]
        stack: StackArgs,
    },

    /// Delete the stack and everything in it
    Destroy {
        #[command(flatten)]
        stack: StackArgs,

        /// Return once CloudFormation accepts the request
        #[arg(long)]
        no_wait: bool,

        /// Seconds to wait for the deletion to finish
        #[arg(long, default_value_t = DEFAULT_DESTROY_TIMEOUT_SECS)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if let Some(suggestion) = classify_anyhow_error(e).suggestion() {
        let _ = writeln!(stderr, "\n\x1b[36mHint:\x1b[0m {suggestion}");
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // The SDK is chatty at info
        EnvFilter::new(format!(
            "{level},aws_config=warn,aws_smithy_runtime=warn,aws_sdk_cloudformation=warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Synth { stack, output } => handle_synth(stack.resolve()?, output)?,
        Command::Plan { stack } => handle_plan(stack.resolve()?)?,
        Command::Deploy {
            stack,
            no_wait,
            timeout,
        } => handle_deploy(stack.resolve()?, no_wait, timeout).await?,
        Command::Outputs { stack } => handle_outputs(stack.resolve()?).await?,
        Command::Destroy {
            stack,
            no_wait,
            timeout,
        } => handle_destroy(stack.resolve()?, no_wait, timeout).await?,
    }

    Ok(())
}

/// Cancelled on Ctrl-C. Only local waiting stops; the stack operation
/// keeps running in CloudFormation.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; the stack operation continues in CloudFormation");
            token.cancel();
        }
    });
    cancel
}

async fn cloudformation(config: &StackConfig) -> CloudFormationClient {
    if let Some(profile) = &config.aws.aws_profile {
        info!(profile = %profile, "Using AWS profile");
    }
    let aws = AwsContext::with_profile(&config.aws.region, config.aws.aws_profile.as_deref()).await;
    CloudFormationClient::from_context(&aws)
}

/// Handle the synth command
fn handle_synth(config: StackConfig, output: Option<PathBuf>) -> Result<()> {
    let body = config
        .template()?
        .to_json_pretty()
        .context("Failed to serialize template")?;

    match output {
        Some(path) => {
            std::fs::write(&path, format!("{body}\n"))
                .with_context(|| format!("Failed to write template to {}", path.display()))?;
            info!(path = %path.display(), stack = %config.stack_name(), "Template written");
        }
        None => println!("{body}"),
    }
    Ok(())
}

/// Handle the plan command
fn handle_plan(config: StackConfig) -> Result<()> {
    let template = config.template()?;
    let order = template.creation_order()?;

    println!("Stack: {}", config.stack_name());
    println!();
    println!("{:<4} {:<45} {}", "#", "LOGICAL_ID", "TYPE");
    println!("{}", "-".repeat(85));
    for (i, id) in order.iter().enumerate() {
        let resource_type = template
            .resources
            .get(id)
            .map(|r| r.resource_type.as_str())
            .unwrap_or("?");
        println!("{:<4} {:<45} {}", i + 1, id, resource_type);
    }
    println!("\nTotal: {} resources", order.len());
    for name in template.outputs.keys() {
        println!("Output: {name}");
    }
    Ok(())
}

/// Handle the deploy command
async fn handle_deploy(config: StackConfig, no_wait: bool, timeout: u64) -> Result<()> {
    let body = config
        .template()?
        .to_json_pretty()
        .context("Failed to serialize template")?;
    let cfn = cloudformation(&config).await;
    let cancel = interrupt_token();

    info!(
        stack = %config.stack_name(),
        region = %config.aws.region,
        wait = !no_wait,
        timeout_secs = timeout,
        "Deploying stack"
    );

    let options = DeployOptions {
        wait: (!no_wait).then(|| WaitConfig::for_stack(Duration::from_secs(timeout))),
        tags: config.tags(Utc::now()),
    };
    let outcome =
        deploy::deploy(&cfn, config.stack_name(), &body, &options, Some(&cancel)).await?;

    let verb = match outcome.action {
        DeployAction::Created => "created",
        DeployAction::Updated => "updated",
        DeployAction::Unchanged => "already up to date",
        DeployAction::Submitted => "submitted",
    };
    println!("Stack {} {}", config.stack_name(), verb);
    if outcome.action != DeployAction::Submitted {
        print_outputs(&outcome.outputs);
    }
    Ok(())
}

/// Handle the outputs command
async fn handle_outputs(config: StackConfig) -> Result<()> {
    let cfn = cloudformation(&config).await;
    let outputs = deploy::stack_outputs(&cfn, config.stack_name()).await?;
    print_outputs(&outputs);
    Ok(())
}

/// Handle the destroy command
async fn handle_destroy(config: StackConfig, no_wait: bool, timeout: u64) -> Result<()> {
    let cfn = cloudformation(&config).await;
    let cancel = interrupt_token();

    info!(stack = %config.stack_name(), region = %config.aws.region, "Destroying stack");
    let wait = (!no_wait).then(|| WaitConfig::for_stack(Duration::from_secs(timeout)));
    deploy::destroy(&cfn, config.stack_name(), wait, Some(&cancel)).await?;

    if no_wait {
        println!("Deletion of stack {} submitted", config.stack_name());
    } else {
        println!("Stack {} deleted", config.stack_name());
    }
    Ok(())
}

fn print_outputs(outputs: &BTreeMap<String, String>) {
    if outputs.is_empty() {
        println!("No outputs.");
        return;
    }
    println!();
    println!("{:<25} {}", "OUTPUT", "VALUE");
    println!("{}", "-".repeat(60));
    for (key, value) in outputs {
        println!("{:<25} {}", key, value);
    }
}
