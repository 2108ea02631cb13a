//! gitsync CLI

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gitsync::{Config, CurrentBranch, Credentials, Identity, PullOutcome, Repository, TransportOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gitsync")]
#[command(about = "Commit, branch and pull/merge workflows with conflict rollback", long_about = None)]
struct Cli {
    /// Repository directory (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    /// YAML config file
    #[arg(long, env = gitsync::config::CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct AuthArgs {
    /// Username offered to the remote
    #[arg(long, env = "GITSYNC_USER", default_value = "")]
    user: String,

    /// Secret offered to the remote (offered once per operation)
    #[arg(long, env = "GITSYNC_SECRET", hide_env_values = true, default_value = "")]
    secret: String,
}

impl AuthArgs {
    fn credentials(&self) -> Credentials {
        Credentials::new(&self.user, &self.secret)
    }
}

#[derive(Args, Clone)]
struct IdentityArgs {
    /// Author/committer name (falls back to config)
    #[arg(long)]
    name: Option<String>,

    /// Author/committer email (falls back to config)
    #[arg(long)]
    email: Option<String>,
}

impl IdentityArgs {
    fn resolve(&self, config: &Config) -> anyhow::Result<Identity> {
        let fallback = config.identity.as_ref();
        let name = self
            .name
            .clone()
            .or_else(|| fallback.map(|i| i.name.clone()))
            .context("no author name: pass --name or set identity.name in the config")?;
        let email = self
            .email
            .clone()
            .or_else(|| fallback.map(|i| i.email.clone()))
            .context("no author email: pass --email or set identity.email in the config")?;
        Ok(Identity::new(name, email))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an empty repository
    Init,

    /// Clone a remote repository
    Clone {
        url: String,
        path: PathBuf,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Stage all changes
    Add,

    /// Commit staged changes
    Commit {
        #[arg(short, long)]
        message: String,
        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// List local branches
    Branches {
        /// Show each branch's tip commit
        #[arg(long)]
        oids: bool,
    },

    /// Create or delete a branch
    Branch {
        #[command(subcommand)]
        action: BranchAction,
    },

    /// Check out a local branch
    Checkout { name: String },

    /// Show the current branch
    Current,

    /// Push a branch to a remote
    Push {
        branch: String,
        /// Remote name (default from config, else origin)
        #[arg(long)]
        remote: Option<String>,
        #[command(flatten)]
        auth: AuthArgs,
    },

    /// Fetch a branch and merge it into HEAD
    Pull {
        branch: String,
        /// Remote name (default from config, else origin)
        #[arg(long)]
        remote: Option<String>,
        /// Always create a merge commit
        #[arg(long)]
        no_ff: bool,
        /// Record a merge commit even when already up to date
        #[arg(long)]
        empty_merge: bool,
        #[command(flatten)]
        auth: AuthArgs,
        #[command(flatten)]
        identity: IdentityArgs,
    },
}

#[derive(Subcommand)]
enum BranchAction {
    /// Create TO at the tip of FROM
    Create { from: String, to: String },
    /// Delete a local branch
    Delete { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = run(cli).await;
    if let Err(err) = &result {
        if let Some(hint) = err.downcast_ref::<gitsync::Error>().and_then(|e| e.suggestion()) {
            eprintln!("hint: {}", hint);
        }
    }
    result
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "gitsync=info",
        _ => "gitsync=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let repo = cli.repo.clone();

    match cli.command {
        Commands::Init => init_repository(&repo).await,
        Commands::Clone { url, path, auth } => clone_repository(&config, url, path, auth).await,
        Commands::Add => add_all(&repo).await,
        Commands::Commit { message, identity } => commit(&config, &repo, message, identity).await,
        Commands::Branches { oids } => list_branches(&repo, oids, cli.json).await,
        Commands::Branch { action } => branch(&repo, action).await,
        Commands::Checkout { name } => checkout(&repo, name).await,
        Commands::Current => current_branch(&repo, cli.json).await,
        Commands::Push { branch, remote, auth } => {
            let remote = remote.unwrap_or_else(|| config.remote.clone());
            push(&config, &repo, remote, branch, auth).await
        }
        Commands::Pull {
            branch,
            remote,
            no_ff,
            empty_merge,
            auth,
            identity,
        } => {
            let remote = remote.unwrap_or_else(|| config.remote.clone());
            let identity = identity.resolve(&config)?;
            let mut options = config.pull_options();
            options.allow_fast_forward &= !no_ff;
            options.commit_when_up_to_date |= empty_merge;
            pull(&config, &repo, remote, branch, auth, identity, options, cli.json).await
        }
    }
}

/// Run a blocking repository operation off the async runtime
async fn blocking<T, F>(op: F) -> anyhow::Result<T>
where
    F: FnOnce() -> gitsync::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(op).await??)
}

/// Run a network operation, cancelling the transfer after `timeout`
async fn network<T, F>(timeout: Option<Duration>, op: F) -> anyhow::Result<T>
where
    F: FnOnce(TransportOptions) -> gitsync::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let transport = TransportOptions {
        cancel: Some(cancel.clone()),
    };
    let mut task = tokio::task::spawn_blocking(move || op(transport));

    let joined = match timeout {
        None => task.await,
        Some(limit) => tokio::select! {
            joined = &mut task => joined,
            _ = tokio::time::sleep(limit) => {
                tracing::warn!(?limit, "network timeout, cancelling transfer");
                cancel.store(true, Ordering::SeqCst);
                task.await
            }
        },
    };

    Ok(joined??)
}

async fn init_repository(path: &Path) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    println!("Initializing repository at {:?}...", path);
    blocking(move || gitsync::init(&path)).await?;
    println!("Done!");
    Ok(())
}

async fn clone_repository(config: &Config, url: String, path: PathBuf, auth: AuthArgs) -> anyhow::Result<()> {
    println!("Cloning {} into {:?}...", url, path);
    network(config.timeout(), move |transport| {
        Repository::clone_remote(&url, &path, &auth.credentials(), &transport).map(|_| ())
    })
    .await?;
    println!("Done!");
    Ok(())
}

async fn add_all(path: &Path) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    blocking(move || gitsync::add_all(&path)).await
}

async fn commit(config: &Config, path: &Path, message: String, identity: IdentityArgs) -> anyhow::Result<()> {
    let identity = identity.resolve(config)?;
    let path = path.to_path_buf();
    let oid = blocking(move || Repository::open(&path)?.commit(&message, &identity)).await?;
    println!("[{}] committed", oid);
    Ok(())
}

async fn list_branches(path: &Path, oids: bool, json: bool) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    let (mut branches, head) = blocking(move || {
        let repo = Repository::open(&path)?;
        let branches = repo
            .list_branches()?
            .into_iter()
            .map(|name| {
                let tip = if oids { Some(repo.branch_target(&name)?) } else { None };
                Ok((name, tip))
            })
            .collect::<gitsync::Result<Vec<_>>>()?;
        Ok((branches, repo.current_branch()?))
    })
    .await?;
    branches.sort();

    if json {
        let value: Vec<_> = branches
            .iter()
            .map(|(name, tip)| match tip {
                Some(tip) => serde_json::json!({ "name": name, "oid": tip.to_string() }),
                None => serde_json::json!(name),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if branches.is_empty() {
        println!("No branches.");
    }
    for (name, tip) in &branches {
        let marker = if head.name() == Some(name.as_str()) { "*" } else { " " };
        match tip {
            Some(tip) => println!("{} {} {}", marker, name, tip),
            None => println!("{} {}", marker, name),
        }
    }
    Ok(())
}

async fn branch(path: &Path, action: BranchAction) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    match action {
        BranchAction::Create { from, to } => {
            let name = to.clone();
            blocking(move || gitsync::create_branch(&path, &from, &to)).await?;
            println!("Branch '{}' created.", name);
        }
        BranchAction::Delete { name } => {
            let deleted = name.clone();
            blocking(move || gitsync::delete_branch(&path, &name)).await?;
            println!("Branch '{}' deleted.", deleted);
        }
    }
    Ok(())
}

async fn checkout(path: &Path, name: String) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    let target = name.clone();
    blocking(move || gitsync::checkout_branch(&path, &target)).await?;
    println!("Switched to branch '{}'", name);
    Ok(())
}

async fn current_branch(path: &Path, json: bool) -> anyhow::Result<()> {
    let path = path.to_path_buf();
    let head = blocking(move || gitsync::current_branch(&path)).await?;

    if json {
        let value = match &head {
            CurrentBranch::Branch(name) => serde_json::json!({ "state": "branch", "name": name }),
            CurrentBranch::Unborn(name) => serde_json::json!({ "state": "unborn", "name": name }),
            CurrentBranch::Detached(oid) => serde_json::json!({ "state": "detached", "commit": oid.to_string() }),
        };
        println!("{}", value);
    } else {
        println!("{}", head);
    }
    Ok(())
}

async fn push(config: &Config, path: &Path, remote: String, branch: String, auth: AuthArgs) -> anyhow::Result<()> {
    println!("Pushing {} to {}...", branch, remote);
    let path = path.to_path_buf();
    network(config.timeout(), move |transport| {
        Repository::open(&path)?.push(&remote, &branch, &auth.credentials(), &transport)
    })
    .await?;
    println!("Done!");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn pull(
    config: &Config,
    path: &Path,
    remote: String,
    branch: String,
    auth: AuthArgs,
    identity: Identity,
    mut options: gitsync::PullOptions,
    json: bool,
) -> anyhow::Result<()> {
    if !json {
        println!("Pulling {} from {}...", branch, remote);
    }
    let path = path.to_path_buf();
    let outcome = network(config.timeout(), move |transport| {
        options.transport = transport;
        Repository::open(&path)?.pull(&remote, &branch, &auth.credentials(), &identity, &options)
    })
    .await?;

    if json {
        let value = match &outcome {
            PullOutcome::UpToDate => serde_json::json!({ "outcome": "up_to_date" }),
            PullOutcome::FastForward { from, to } => serde_json::json!({
                "outcome": "fast_forward",
                "from": from.map(|oid| oid.to_string()),
                "to": to.to_string(),
            }),
            PullOutcome::Merged { commit } => serde_json::json!({ "outcome": "merged", "commit": commit.to_string() }),
            PullOutcome::EmptyMerge { commit } => {
                serde_json::json!({ "outcome": "empty_merge", "commit": commit.to_string() })
            }
        };
        println!("{}", value);
        return Ok(());
    }

    match outcome {
        PullOutcome::UpToDate => println!("Already up to date."),
        PullOutcome::FastForward { to, .. } => println!("Fast-forwarded to {}", to),
        PullOutcome::Merged { commit } => println!("Merged as {}", commit),
        PullOutcome::EmptyMerge { commit } => println!("Recorded merge {} (no changes)", commit),
    }
    Ok(())
}
