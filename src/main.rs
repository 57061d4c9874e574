use anyhow::Result;
use clap::Parser;
use leadmachine::cli::{self, Cli, Commands};
use leadmachine::error::{ClassifierError, LeadMachineError};
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        if let Some(hint) = error_hint(&e) {
            eprintln!("Hint: {}", hint);
        }
        eprintln!("\nFor help, run: leadmachine --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("leadmachine=debug,info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("leadmachine=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    cli::load_env_file(&cli.env_file);

    match &cli.command {
        Commands::Process { dry_run, limit } => {
            cli::run_process(&cli, *dry_run, *limit).await?;
        }
        Commands::Daemon { interval } => {
            cli::run_daemon_command(&cli, *interval).await?;
        }
        Commands::Restore { all, count } => {
            cli::run_restore(&cli, *count, *all).await?;
        }
        Commands::Setup => {
            cli::run_setup(&cli).await?;
        }
        Commands::Status => {
            cli::run_status(&cli).await?;
        }
        Commands::InitConfig { output, force } => {
            cli::run_init_config(output, *force).await?;
        }
    }

    Ok(())
}

/// Suggest a next step for the errors an operator can fix
fn error_hint(error: &anyhow::Error) -> Option<&'static str> {
    let error = error.downcast_ref::<LeadMachineError>()?;
    match error {
        LeadMachineError::Auth(_) => Some(
            "check GRAPH_CLIENT_ID, GRAPH_CLIENT_SECRET and GRAPH_TENANT_ID, and that the app has Mail.ReadWrite and Mail.Send permissions",
        ),
        LeadMachineError::ConfigError(_) => {
            Some("run `leadmachine init-config` and fill in the missing values or your .env file")
        }
        LeadMachineError::Folder(_) => {
            Some("run `leadmachine setup` to create the missing folders")
        }
        LeadMachineError::Classifier(ClassifierError::Unavailable(_)) => {
            Some("make sure the classifier backend is reachable and the model is installed")
        }
        LeadMachineError::Api(_) => match error.status_code() {
            Some(403) => Some(
                "grant the app Mail.ReadWrite and Mail.Send application permissions with admin consent",
            ),
            Some(404) => Some("check mailbox.user_email, the mailbox was not found"),
            _ => None,
        },
        _ => None,
    }
}
