mod config;
mod lifecycle;
mod logging;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::{config::NcatbotConfig, lifecycle::Lifecycle};

#[derive(Parser)]
#[command(name = "ncatbot", about = "ncatbot — QQ chat-bot runtime kernel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Directory to search for `ncatbot.{toml,yaml,yml,json}`, in addition to `.`.
    #[arg(long, global = true, env = "NCATBOT_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot in the foreground until Ctrl-C (default when no subcommand is given).
    Run,
    /// List discovered plugins and their current lifecycle state.
    Plugins,
    /// Inspect the effective permission set for a user.
    Rbac {
        #[command(subcommand)]
        action: RbacAction,
    },
    /// Print the resolved configuration and the path it was loaded from, then exit.
    Config,
}

#[derive(Subcommand)]
enum RbacAction {
    /// Check whether `user` currently has `permission`.
    Check { user: String, permission: String },
    /// List every role assigned to `user`.
    Roles { user: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_telemetry(&cli.log_level, cli.json_logs);

    let config = config::discover_and_load(cli.config_dir.as_deref());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Plugins => plugins(config).await,
        Commands::Rbac { action } => rbac(config, action).await,
        Commands::Config => print_config(&config),
    }
}

async fn run(config: NcatbotConfig) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new(config);
    lifecycle.run().await?;
    Ok(())
}

/// Load plugins, print their states, unload, and exit — a dry run useful
/// after editing a manifest or adding a new plugin directory.
async fn plugins(config: NcatbotConfig) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new(config);
    if let Err(e) = lifecycle.plugin_loader().load_all().await {
        info!(error = %e, "one or more plugins failed to load");
    }

    let states = lifecycle.plugin_loader().states().await;
    if states.is_empty() {
        println!("no plugins discovered");
    } else {
        let mut names: Vec<_> = states.keys().cloned().collect();
        names.sort();
        for name in names {
            println!("{name}: {}", states[&name]);
        }
    }

    lifecycle.plugin_loader().unload_all().await;
    Ok(())
}

async fn rbac(config: NcatbotConfig, action: RbacAction) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new(config);
    lifecycle.restore_rbac();

    match action {
        RbacAction::Check { user, permission } => {
            let allowed = lifecycle.rbac().check(&user, &permission);
            println!("{user} {} {permission}", if allowed { "may" } else { "may not" });
        },
        RbacAction::Roles { user } => {
            let state = lifecycle.rbac().save();
            match state.user_roles.get(&user) {
                Some(roles) if !roles.is_empty() => println!("{}", roles.join(", ")),
                _ => println!("(no roles assigned)"),
            }
        },
    }
    Ok(())
}

fn print_config(config: &NcatbotConfig) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
