mod bootstrap;
mod cli;
mod commands;
mod config;
mod runtime;
mod session_store;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::ProtimeConfig;
use session_store::Credentials;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Login { user, token } => {
            session_store::save_session(&Credentials {
                user_id: user.as_str().into(),
                token,
            })?;
            println!("Logged in as {}", user);
        }
        Commands::Logout => {
            session_store::clear_session()?;
            println!("Logged out. Local timer state is kept.");
        }
        Commands::ConfigPath => {
            let path = ProtimeConfig::config_path()?;
            if !path.exists() {
                ProtimeConfig::default().save_to(&path)?;
                println!("Created default config at: {}", path.display());
            } else {
                println!("{}", path.display());
            }
        }
        command => {
            let config = ProtimeConfig::load()?;
            let engine = bootstrap::build_engine(&config, session_store::load_session()?)?;
            match command {
                Commands::Start(args) => commands::start(&engine, &args).await?,
                Commands::Pause => commands::pause(&engine).await?,
                Commands::Flush => commands::flush(&engine).await?,
                Commands::Status(args) => commands::status(&engine, &args).await?,
                Commands::Submit(args) => commands::submit(&engine, &args).await?,
                Commands::Decide(args) => commands::decide(&engine, &args).await?,
                Commands::Plan { task, minutes } => commands::plan(&engine, &task, minutes).await?,
                Commands::Reset(args) => commands::reset(&engine, &args).await?,
                Commands::Pending => commands::pending(&engine).await?,
                Commands::Prefill(args) => commands::prefill(&engine, &args).await?,
                Commands::Run => runtime::run_foreground(engine).await?,
                Commands::Login { .. } | Commands::Logout | Commands::ConfigPath => {}
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "protime=debug,protime_core=debug"
    } else {
        "protime=info,protime_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
