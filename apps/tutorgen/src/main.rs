use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tutorgen_client::{ClientConfig, DEFAULT_BASE_URL, DEFAULT_STATE_ROOT, TutorgenClient};
use tutorgen_jobs::{JobPhase, JobSnapshot};
use tutorgen_protocol::{Difficulty, GenerationOptions, Navigator};

#[derive(Debug, Parser)]
#[command(name = "tutorgen")]
#[command(about = "Generate tutorials from GitHub repositories")]
struct Cli {
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,
    /// Directory holding the saved session and armed job.
    #[arg(long, default_value = DEFAULT_STATE_ROOT)]
    state_root: PathBuf,
    #[arg(long, default_value_t = 10)]
    poll_interval_secs: u64,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    Whoami,
    /// Submit a repository and follow the generation until it finishes.
    Generate {
        github_url: String,
        #[arg(long, default_value = "beginner")]
        difficulty: Difficulty,
        #[arg(long = "focus")]
        focus_areas: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        /// Return right after submitting; `watch` picks the job up later.
        #[arg(long)]
        detach: bool,
    },
    /// Follow the armed generation job, if any.
    Watch,
    /// Print the backend's raw generation status for a repository.
    Status { repo_url: String },
}

/// Redirect target for a terminal: tell the user to sign in again.
struct LoginPrompt;

impl Navigator for LoginPrompt {
    fn redirect_to_login(&self) {
        eprintln!("session expired; run `tutorgen login` to sign in again");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::new(cli.base_url, cli.state_root)
        .poll_interval(Duration::from_secs(cli.poll_interval_secs.max(1)));
    let client = TutorgenClient::builder(config)
        .navigator(Arc::new(LoginPrompt))
        .build()?;
    let startup = client.start().await;

    let outcome = match cli.command {
        Command::Login { email, password } => {
            let session = client.login(&email, &password).await?;
            if let Some(user) = &session.user {
                println!("signed in as {}", user.label());
            }
            if client.poller().current_state().is_polling() {
                println!("an earlier generation is still running; use `tutorgen watch`");
            }
            Ok(())
        }
        Command::Logout => {
            client.logout().await;
            println!("signed out");
            Ok(())
        }
        Command::Whoami => {
            match (&startup.session.user, startup.session.token_expiry) {
                (Some(user), Some(expiry)) => {
                    println!("{} <{}> (token expires {expiry})", user.label(), user.email)
                }
                (Some(user), None) => println!("{} <{}>", user.label(), user.email),
                (None, _) => println!("not signed in"),
            }
            Ok(())
        }
        Command::Generate {
            github_url,
            difficulty,
            focus_areas,
            description,
            detach,
        } => {
            require_login(&client)?;
            let options = GenerationOptions {
                difficulty,
                focus_areas,
                description,
            };
            let job = client.submit(&github_url, options).await?;
            info!(generation_id = ?job.generation_id, "generation accepted");
            if detach {
                println!("submitted {github_url}; run `tutorgen watch` to follow it");
                Ok(())
            } else {
                follow(&client).await
            }
        }
        Command::Watch => {
            require_login(&client)?;
            if startup.resumed {
                follow(&client).await
            } else {
                println!("no generation in progress");
                Ok(())
            }
        }
        Command::Status { repo_url } => {
            require_login(&client)?;
            let status = client.api().generation_status(&repo_url).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    };

    client.shutdown().await;
    outcome
}

fn require_login(client: &TutorgenClient) -> Result<()> {
    if !client.session().is_authenticated() {
        bail!("not signed in; run `tutorgen login` first");
    }
    Ok(())
}

/// Print job updates until the job finishes, polling stops, or the user
/// interrupts. An interrupted job stays armed for the next `watch`.
async fn follow(client: &TutorgenClient) -> Result<()> {
    let mut updates = client.poller().subscribe_stream();
    loop {
        let snapshot = tokio::select! {
            next = updates.next() => match next {
                Some(snapshot) => snapshot,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                client.poller().detach().await;
                println!("stopped watching; the generation keeps running server-side");
                return Ok(());
            }
        };

        render(&snapshot);
        match snapshot.phase {
            JobPhase::Succeeded => {
                println!("tutorial ready");
                return Ok(());
            }
            JobPhase::Failed => {
                let message = snapshot
                    .job
                    .and_then(|job| job.error_message)
                    .unwrap_or_else(|| "generation failed".to_owned());
                client.poller().acknowledge().await;
                bail!(message);
            }
            JobPhase::Detached => {
                let reason = snapshot.last_error.unwrap_or_default();
                warn!(%reason, "stopped polling");
                bail!("stopped following the generation: {reason}");
            }
            JobPhase::Idle => return Ok(()),
            JobPhase::Submitting | JobPhase::Polling => {}
        }
    }
}

fn render(snapshot: &JobSnapshot) {
    let Some(job) = &snapshot.job else {
        return;
    };
    let mut line = format!(
        "[{:?}] {:>3}% step {} {}",
        snapshot.phase, job.progress_percent, job.step, job.target_repository_url
    );
    if let Some(error) = &snapshot.last_error {
        line.push_str(&format!(" (last poll failed: {error})"));
    }
    println!("{line}");
}
