//! arbor CLI — the development and testing face of the arbor core.
//!
//! Plays the role of the platform's request-handling layer: every
//! subcommand maps onto one core operation against a hub root.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process;

use arbor_core::diff::{self, FileDiff, LineOp};
use arbor_core::hash::is_address;
use arbor_core::{
    FileEdit, NewPullRequest, RepoHub, RepoId, Repository, Visibility, DEFAULT_BRANCH,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor", about = "arbor — version control and code review", version)]
struct Cli {
    /// Hub root directory (defaults to $ARBOR_ROOT, then the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage repositories.
    Repo {
        #[command(subcommand)]
        action: RepoCommands,
    },

    /// Record a commit from a batch of file edits.
    Commit {
        /// Repository id (owner/name).
        repo: String,

        /// Branch to commit to.
        #[arg(long, short, default_value = DEFAULT_BRANCH)]
        branch: String,

        /// Author user id.
        #[arg(long)]
        author: String,

        /// Commit message.
        #[arg(long, short)]
        message: String,

        /// Write a file: path=content (repeatable).
        #[arg(long = "set", value_name = "PATH=CONTENT")]
        set: Vec<String>,

        /// Write a file with content read from a local file: path=file (repeatable).
        #[arg(long = "set-from", value_name = "PATH=FILE")]
        set_from: Vec<String>,

        /// Delete the file at path (repeatable).
        #[arg(long = "delete", value_name = "PATH")]
        delete: Vec<String>,
    },

    /// Fork a repository into another owner's namespace.
    Fork {
        /// Source repository id (owner/name).
        repo: String,

        /// Owner of the new fork.
        #[arg(long)]
        owner: String,
    },

    /// Show commit history of a branch.
    Log {
        /// Repository id (owner/name).
        repo: String,

        #[arg(long, short, default_value = DEFAULT_BRANCH)]
        branch: String,

        /// Maximum number of commits to show.
        #[arg(long, short, default_value = "20")]
        limit: usize,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// List the files in a commit's snapshot.
    Ls {
        /// Repository id (owner/name).
        repo: String,

        /// Branch name or commit address.
        #[arg(long, default_value = DEFAULT_BRANCH)]
        at: String,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// Print one file's content from a commit's snapshot.
    Cat {
        /// Repository id (owner/name).
        repo: String,

        /// File path within the snapshot.
        path: String,

        /// Branch name or commit address.
        #[arg(long, default_value = DEFAULT_BRANCH)]
        at: String,
    },

    /// Manage branches.
    Branch {
        #[command(subcommand)]
        action: BranchCommands,
    },

    /// Diff two points of a repository's history.
    Diff {
        /// Repository id (owner/name).
        repo: String,

        /// Old side: branch name or commit address.
        from: String,

        /// New side: branch name or commit address.
        to: String,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// Manage pull requests.
    Pr {
        #[command(subcommand)]
        action: PrCommands,
    },
}

#[derive(Subcommand)]
enum RepoCommands {
    /// Create a new, empty repository.
    Create {
        /// Repository name.
        name: String,

        /// Owning user id.
        #[arg(long)]
        owner: String,

        /// Visibility: public or private.
        #[arg(long, default_value = "private")]
        visibility: String,
    },

    /// List an owner's repositories.
    List {
        /// Owning user id.
        #[arg(long)]
        owner: String,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// Show a repository's metadata.
    Show {
        /// Repository id (owner/name).
        repo: String,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },
}

#[derive(Subcommand)]
enum BranchCommands {
    /// Create a branch pointing at an existing commit.
    Create {
        /// Repository id (owner/name).
        repo: String,

        /// New branch name.
        name: String,

        /// Branch name or commit address the new branch points at.
        #[arg(long)]
        at: String,
    },

    /// List branches with their tips.
    List {
        /// Repository id (owner/name).
        repo: String,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },
}

#[derive(Subcommand)]
enum PrCommands {
    /// Open a pull request.
    Create {
        /// Source repository id (owner/name).
        #[arg(long)]
        source: String,

        /// Source branch.
        #[arg(long, default_value = DEFAULT_BRANCH)]
        source_branch: String,

        /// Target repository id (owner/name).
        #[arg(long)]
        target: String,

        /// Target branch.
        #[arg(long, default_value = DEFAULT_BRANCH)]
        target_branch: String,

        /// Pull request title.
        #[arg(long)]
        title: String,

        /// Optional description.
        #[arg(long)]
        description: Option<String>,

        /// Proposing user id.
        #[arg(long)]
        author: String,
    },

    /// List pull requests targeting a repository.
    List {
        /// Target repository id (owner/name).
        repo: String,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// Show one pull request.
    Show {
        /// Pull request id.
        id: u64,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// Show a pull request's current diff.
    Diff {
        /// Pull request id.
        id: u64,

        /// Output format: "human" (default) or "json".
        #[arg(long, default_value = "human")]
        format: String,
    },

    /// Close a pull request without merging.
    Close {
        /// Pull request id.
        id: u64,
    },

    /// Mark a pull request merged (records the decision only).
    Merge {
        /// Pull request id.
        id: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli
        .root
        .or_else(|| std::env::var_os("ARBOR_ROOT").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    let hub = RepoHub::new(root);

    let result = match cli.command {
        Commands::Repo { action } => match action {
            RepoCommands::Create {
                name,
                owner,
                visibility,
            } => cmd_repo_create(&hub, &name, &owner, &visibility),
            RepoCommands::List { owner, format } => cmd_repo_list(&hub, &owner, &format),
            RepoCommands::Show { repo, format } => cmd_repo_show(&hub, &repo, &format),
        },
        Commands::Commit {
            repo,
            branch,
            author,
            message,
            set,
            set_from,
            delete,
        } => cmd_commit(&hub, &repo, &branch, &author, &message, &set, &set_from, &delete),
        Commands::Fork { repo, owner } => cmd_fork(&hub, &repo, &owner),
        Commands::Log {
            repo,
            branch,
            limit,
            format,
        } => cmd_log(&hub, &repo, &branch, limit, &format),
        Commands::Ls { repo, at, format } => cmd_ls(&hub, &repo, &at, &format),
        Commands::Cat { repo, path, at } => cmd_cat(&hub, &repo, &path, &at),
        Commands::Branch { action } => match action {
            BranchCommands::Create { repo, name, at } => {
                cmd_branch_create(&hub, &repo, &name, &at)
            }
            BranchCommands::List { repo, format } => cmd_branch_list(&hub, &repo, &format),
        },
        Commands::Diff {
            repo,
            from,
            to,
            format,
        } => cmd_diff(&hub, &repo, &from, &to, &format),
        Commands::Pr { action } => match action {
            PrCommands::Create {
                source,
                source_branch,
                target,
                target_branch,
                title,
                description,
                author,
            } => cmd_pr_create(
                &hub,
                &source,
                &source_branch,
                &target,
                &target_branch,
                &title,
                description,
                &author,
            ),
            PrCommands::List { repo, format } => cmd_pr_list(&hub, &repo, &format),
            PrCommands::Show { id, format } => cmd_pr_show(&hub, id, &format),
            PrCommands::Diff { id, format } => cmd_pr_diff(&hub, id, &format),
            PrCommands::Close { id } => cmd_pr_close(&hub, id),
            PrCommands::Merge { id } => cmd_pr_merge(&hub, id),
        },
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn cmd_repo_create(
    hub: &RepoHub,
    name: &str,
    owner: &str,
    visibility: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let visibility = parse_visibility(visibility)?;
    let repo = hub.create_repository_with(name, owner, visibility)?;
    println!("created {} ({visibility})", repo.id());
    Ok(())
}

fn cmd_repo_list(
    hub: &RepoHub,
    owner: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    // The metadata listing skips half-initialized allocations, so one
    // crashed create never takes down the whole listing.
    let metas = hub.list_repository_metas(owner)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&metas)?);
        }
        _ => {
            if metas.is_empty() {
                println!("no repositories for {owner}");
                return Ok(());
            }
            for meta in &metas {
                let fork_note = meta
                    .parent
                    .as_ref()
                    .map(|p| format!(", fork of {p}"))
                    .unwrap_or_default();
                println!("{} ({}{fork_note})", meta.id, meta.visibility);
            }
        }
    }

    Ok(())
}

fn cmd_repo_show(
    hub: &RepoHub,
    repo: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let meta = hub.repo_meta(&id)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        _ => {
            println!("repository {}", meta.id);
            println!("  visibility: {}", meta.visibility);
            println!(
                "  created:    {}",
                meta.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(ref parent) = meta.parent {
                println!("  fork of:    {parent}");
            }
            if !meta.forks.is_empty() {
                let forks: Vec<String> = meta.forks.iter().map(|f| f.to_string()).collect();
                println!("  forks:      {}", forks.join(", "));
            }
            let branches = hub.open(&id)?.branches()?;
            if !branches.is_empty() {
                println!("  branches:   {}", branches.join(", "));
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_commit(
    hub: &RepoHub,
    repo: &str,
    branch: &str,
    author: &str,
    message: &str,
    set: &[String],
    set_from: &[String],
    delete: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;

    let mut edits = Vec::new();
    for raw in set {
        let (path, content) = parse_assignment(raw)?;
        edits.push(FileEdit::set(path, content));
    }
    for raw in set_from {
        let (path, file) = parse_assignment(raw)?;
        let content = fs::read_to_string(&file).map_err(|e| format!("cannot read {file}: {e}"))?;
        edits.push(FileEdit::set(path, content));
    }
    for path in delete {
        edits.push(FileEdit::delete(path.clone()));
    }

    let entry = hub.commit(&id, branch, author, message, &edits)?;

    println!("committed {} on {branch}", &entry.address[..12]);
    println!("  author:  {}", entry.commit.author);
    println!("  message: {}", entry.commit.message);
    println!("  edits:   {} file(s)", edits.len());
    Ok(())
}

fn cmd_fork(hub: &RepoHub, repo: &str, owner: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let fork = hub.fork(&id, owner)?;
    println!("forked {id} -> {}", fork.id());
    Ok(())
}

fn cmd_log(
    hub: &RepoHub,
    repo: &str,
    branch: &str,
    limit: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let repo = hub.open(&id)?;
    let entries = repo.log(branch, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            if entries.is_empty() {
                println!("no commits on {branch}");
                return Ok(());
            }
            for (i, entry) in entries.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                println!("commit {}", &entry.address[..12]);
                println!("  author:  {}", entry.commit.author);
                println!(
                    "  time:    {}",
                    entry.commit.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!("  message: {}", entry.commit.message);
            }
        }
    }

    Ok(())
}

fn cmd_ls(
    hub: &RepoHub,
    repo: &str,
    at: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let repo = hub.open(&id)?;
    let commit = resolve_commit(&repo, at)?;
    let files = repo.list_files(&commit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&files)?);
        }
        _ => {
            for (path, address) in &files {
                println!("{}  {path}", &address[..12]);
            }
        }
    }

    Ok(())
}

fn cmd_cat(
    hub: &RepoHub,
    repo: &str,
    path: &str,
    at: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let repo = hub.open(&id)?;
    let commit = resolve_commit(&repo, at)?;
    let bytes = repo.read_file(&commit, path)?;
    std::io::stdout().write_all(&bytes)?;
    Ok(())
}

fn cmd_branch_create(
    hub: &RepoHub,
    repo: &str,
    name: &str,
    at: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let repo = hub.open(&id)?;
    let commit = resolve_commit(&repo, at)?;
    repo.create_branch(name, &commit)?;
    println!("branch {name} -> {}", &commit[..12]);
    Ok(())
}

fn cmd_branch_list(
    hub: &RepoHub,
    repo: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let repo = hub.open(&id)?;
    let branches = repo.branches()?;

    match format {
        "json" => {
            let mut tips = BTreeMap::new();
            for branch in &branches {
                tips.insert(branch.clone(), repo.branch_tip(branch)?);
            }
            println!("{}", serde_json::to_string_pretty(&tips)?);
        }
        _ => {
            if branches.is_empty() {
                println!("no branches yet");
                return Ok(());
            }
            for branch in &branches {
                if let Some(tip) = repo.branch_tip(branch)? {
                    println!("{branch}  {}", &tip[..12]);
                }
            }
        }
    }

    Ok(())
}

fn cmd_diff(
    hub: &RepoHub,
    repo: &str,
    from: &str,
    to: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let repo = hub.open(&id)?;
    let old = resolve_commit(&repo, from)?;
    let new = resolve_commit(&repo, to)?;
    let files = diff::diff_commits(repo.objects(), &old, repo.objects(), &new)?;
    print_file_diffs(&files, format)
}

#[allow(clippy::too_many_arguments)]
fn cmd_pr_create(
    hub: &RepoHub,
    source: &str,
    source_branch: &str,
    target: &str,
    target_branch: &str,
    title: &str,
    description: Option<String>,
    author: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let pr = hub.pulls().create(NewPullRequest {
        source_repo: source.parse()?,
        source_branch: source_branch.to_string(),
        target_repo: target.parse()?,
        target_branch: target_branch.to_string(),
        title: title.to_string(),
        description,
        author: author.to_string(),
    })?;

    println!("opened pull request #{}", pr.id);
    println!(
        "  {}:{} -> {}:{}",
        pr.source_repo, pr.source_branch, pr.target_repo, pr.target_branch
    );
    Ok(())
}

fn cmd_pr_list(
    hub: &RepoHub,
    repo: &str,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id: RepoId = repo.parse()?;
    let prs = hub.pulls().list_for_target(&id)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&prs)?);
        }
        _ => {
            if prs.is_empty() {
                println!("no pull requests targeting {id}");
                return Ok(());
            }
            for pr in &prs {
                println!(
                    "#{} [{}] {} ({}:{} -> {}:{})",
                    pr.id,
                    pr.status,
                    pr.title,
                    pr.source_repo,
                    pr.source_branch,
                    pr.target_repo,
                    pr.target_branch
                );
            }
        }
    }

    Ok(())
}

fn cmd_pr_show(hub: &RepoHub, id: u64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let pr = hub.pulls().get(id)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&pr)?);
        }
        _ => {
            println!("pull request #{}", pr.id);
            println!("  title:   {}", pr.title);
            println!("  status:  {}", pr.status);
            println!("  author:  {}", pr.author);
            println!("  source:  {} [{}]", pr.source_repo, pr.source_branch);
            println!("  target:  {} [{}]", pr.target_repo, pr.target_branch);
            println!(
                "  created: {}",
                pr.created_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if let Some(ref description) = pr.description {
                println!("  description: {description}");
            }
        }
    }

    Ok(())
}

fn cmd_pr_diff(hub: &RepoHub, id: u64, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let files = hub.pulls().diff(id)?;
    print_file_diffs(&files, format)
}

fn cmd_pr_close(hub: &RepoHub, id: u64) -> Result<(), Box<dyn std::error::Error>> {
    let pr = hub.pulls().close(id)?;
    println!("pull request #{} closed", pr.id);
    Ok(())
}

fn cmd_pr_merge(hub: &RepoHub, id: u64) -> Result<(), Box<dyn std::error::Error>> {
    let pr = hub.pulls().mark_merged(id)?;
    println!("pull request #{} marked merged", pr.id);
    Ok(())
}

/// Resolve a branch name or commit address to a commit address. An
/// existing branch wins when the argument could be either.
fn resolve_commit(repo: &Repository, at: &str) -> Result<String, Box<dyn std::error::Error>> {
    match repo.branch_tip(at) {
        Ok(Some(tip)) => return Ok(tip),
        Ok(None) if !is_address(at) => {
            return Err(format!("branch {at} has no commits yet").into());
        }
        _ => {}
    }
    if is_address(at) {
        return Ok(at.to_string());
    }
    Err(format!("no branch or commit named: {at}").into())
}

fn parse_visibility(raw: &str) -> Result<Visibility, Box<dyn std::error::Error>> {
    match raw {
        "public" => Ok(Visibility::Public),
        "private" => Ok(Visibility::Private),
        other => Err(format!("unknown visibility: {other} (use public or private)").into()),
    }
}

fn parse_assignment(raw: &str) -> Result<(String, String), Box<dyn std::error::Error>> {
    match raw.split_once('=') {
        Some((path, value)) if !path.is_empty() => Ok((path.to_string(), value.to_string())),
        _ => Err(format!("expected PATH=VALUE, got: {raw}").into()),
    }
}

fn print_file_diffs(files: &[FileDiff], format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(files)?);
        }
        _ => {
            if files.is_empty() {
                println!("no changes");
                return Ok(());
            }
            for file_diff in files {
                if file_diff.is_binary {
                    println!("Binary file {} differs", file_diff.path);
                    continue;
                }

                println!("--- a/{}", file_diff.path);
                println!("+++ b/{}", file_diff.path);

                for hunk in &file_diff.hunks {
                    println!(
                        "@@ -{},{} +{},{} @@",
                        hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
                    );
                    for line in &hunk.lines {
                        let prefix = match line.op {
                            LineOp::Add => "+",
                            LineOp::Remove => "-",
                            LineOp::Context => " ",
                        };
                        println!("{prefix}{}", line.content);
                    }
                }
            }
        }
    }

    Ok(())
}
