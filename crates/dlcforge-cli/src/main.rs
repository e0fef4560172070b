//! dlcforge - change-aware build-and-test orchestration for DLC images
//!
//! The `dlcforge` command decides which test suites to run from the set of
//! changed files, builds and pushes a transient test image per processor
//! track, and always deletes the pushed tag when the track ends.
//!
//! ## Commands
//!
//! - `run`: Execute processor tracks against the current change set
//! - `changed`: Show the change set and whether patterns match it
//! - `context`: Resolve and print the build context
//! - `cleanup`: Delete one tag from the registry

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use dlcforge_core::{
    capture_head_sha, is_git_repo, BuildContext, ChangeSet, EnvSnapshot, ImageSpec, ImageTag,
    PathPattern, Processor, StsCliIdentity,
};
use dlcforge_pipeline::{
    BuildOptions, DockerCliBuilder, EcrCliRegistry, FailurePolicy, ImageRegistry, Orchestrator,
    TrackPlan, TrackResult,
};

#[derive(Parser)]
#[command(name = "dlcforge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Change-aware container build-and-test orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute processor tracks against the current change set
    Run {
        /// Workspace path (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Baseline revision the change set is computed against
        #[arg(short, long, default_value = "origin/master")]
        baseline: String,

        /// Processor tracks to run (comma-separated: cpu,gpu)
        #[arg(short, long, default_value = "cpu")]
        processors: String,

        /// JSON plan file replacing the builtin suites
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Failure policy: continue or fail-fast
        #[arg(long, default_value = "continue")]
        policy: String,

        /// Dockerfile flavor used for the image build
        #[arg(long, default_value = "dlc")]
        dockerfile_type: String,

        /// Base name of the image being assembled
        #[arg(long, default_value = "sagemaker-tensorflow-training")]
        docker_base_name: String,

        /// Run tests against an existing image instead of building one
        #[arg(long)]
        skip_build: bool,

        /// Per-track deadline in seconds; cleanup still runs on expiry
        #[arg(long)]
        track_timeout_secs: Option<u64>,
    },

    /// Show the change set and whether patterns match it
    Changed {
        /// Workspace path (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Baseline revision the change set is computed against
        #[arg(short, long, default_value = "origin/master")]
        baseline: String,

        /// OR-combined path patterns to evaluate
        #[arg(required = true)]
        patterns: Vec<String>,
    },

    /// Resolve and print the build context
    Context {
        /// Workspace path (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Delete one tag from the registry
    Cleanup {
        /// Tag to delete
        tag: String,

        /// Registry repository name
        #[arg(long, env = "ECR_REPO", default_value = "sagemaker-test")]
        repo: String,

        /// AWS region
        #[arg(long, env = "AWS_DEFAULT_REGION")]
        region: String,

        /// Account id (auto-resolved via STS when omitted)
        #[arg(long)]
        account: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dlcforge_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            workspace,
            baseline,
            processors,
            plan,
            policy,
            dockerfile_type,
            docker_base_name,
            skip_build,
            track_timeout_secs,
        } => {
            cmd_run(
                &workspace,
                &baseline,
                &processors,
                plan.as_deref(),
                &policy,
                &dockerfile_type,
                &docker_base_name,
                skip_build,
                track_timeout_secs,
            )
            .await
        }
        Commands::Changed {
            workspace,
            baseline,
            patterns,
        } => cmd_changed(&workspace, &baseline, &patterns),
        Commands::Context { workspace } => cmd_context(&workspace).await,
        Commands::Cleanup {
            tag,
            repo,
            region,
            account,
        } => cmd_cleanup(&tag, &repo, &region, account.as_deref()).await,
    }
}

/// Execute processor tracks against the current change set.
#[allow(clippy::too_many_arguments)]
async fn cmd_run(
    workspace: &std::path::Path,
    baseline: &str,
    processors: &str,
    plan_path: Option<&std::path::Path>,
    policy: &str,
    dockerfile_type: &str,
    docker_base_name: &str,
    skip_build: bool,
    track_timeout_secs: Option<u64>,
) -> Result<()> {
    let env = EnvSnapshot::from_process();
    let identity = StsCliIdentity;
    let ctx = BuildContext::resolve(&env, &identity, workspace)
        .await
        .context("failed to resolve build context")?;

    let git_sha = capture_head_sha(workspace).unwrap_or_else(|_| "unknown".to_string());
    info!(git_sha = %git_sha, build_id = %ctx.build_id, "resolved build context");

    let changes =
        ChangeSet::from_git(workspace, baseline).context("failed to compute change set")?;

    println!("Baseline:  {baseline}");
    println!("Changed:   {} file(s)", changes.len());
    println!("Build ID:  {}", ctx.build_id);
    if let Some(pr) = ctx.pr_number {
        println!("PR:        #{pr}");
    }
    println!();

    let plans = match plan_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read plan file: {path:?}"))?;
            serde_json::from_str::<Vec<TrackPlan>>(&content)
                .with_context(|| format!("invalid plan file: {path:?}"))?
        }
        None => parse_processors(processors)?
            .into_iter()
            .map(|processor| {
                let build = (!skip_build).then(|| {
                    BuildOptions::new(
                        dockerfile_type,
                        docker_base_name,
                        processor,
                        ctx.framework_version.clone(),
                    )
                });
                TrackPlan::builtin(processor, build)
            })
            .collect(),
    };

    let policy = FailurePolicy::from_str(policy)?;
    let mut orchestrator =
        Orchestrator::new(ctx, Arc::new(EcrCliRegistry)).with_policy(policy);
    if !skip_build {
        orchestrator = orchestrator.with_builder(Arc::new(DockerCliBuilder::new(workspace)));
    }
    if let Some(secs) = track_timeout_secs {
        orchestrator = orchestrator.with_track_deadline(Duration::from_secs(secs));
    }

    let results = orchestrator
        .run_tracks(plans, &changes)
        .await
        .context("track execution failed")?;

    for track in &results {
        println!(
            "[{}] {} ({}ms)",
            track.processor,
            if track.success() {
                "✓ PASSED"
            } else {
                "✗ FAILED"
            },
            track.duration_ms
        );
        for invocation in &track.invocations {
            let status = if invocation.skipped() {
                "- skipped"
            } else if invocation.passed() {
                "✓ passed"
            } else {
                "✗ failed"
            };
            println!(
                "  {} {} ({}ms, exit code: {})",
                status,
                invocation.name,
                invocation.duration_ms,
                invocation
                    .exit_code
                    .map_or_else(|| "-".to_string(), |c| c.to_string()),
            );
        }
        println!();
    }

    let exit_code = overall_exit_code(&results);
    if exit_code == 0 {
        println!("✓ All invocations passed or were skipped");
        Ok(())
    } else {
        println!("✗ Build failed (exit code {exit_code})");
        std::process::exit(exit_code);
    }
}

/// Show the change set and whether patterns match it.
fn cmd_changed(workspace: &std::path::Path, baseline: &str, patterns: &[String]) -> Result<()> {
    if !is_git_repo(workspace) {
        anyhow::bail!("not a git repository: {workspace:?}");
    }

    let changes = ChangeSet::from_git(workspace, baseline)?;
    let parsed = PathPattern::parse_all(patterns)?;

    println!("Changed since {baseline}:");
    if changes.is_empty() {
        println!("  (none)");
    }
    for path in changes.iter() {
        println!("  {path}");
    }

    let matched = changes.matches_any(&parsed);
    println!();
    println!("Patterns: {}", patterns.join(", "));
    println!("Match:    {matched}");

    Ok(())
}

/// Resolve and print the build context.
async fn cmd_context(workspace: &std::path::Path) -> Result<()> {
    let env = EnvSnapshot::from_process();
    let ctx = BuildContext::resolve(&env, &StsCliIdentity, workspace)
        .await
        .context("failed to resolve build context")?;

    println!("Account:            {}", ctx.account_id);
    println!("Region:             {}", ctx.region);
    println!("Build ID:           {}", ctx.build_id);
    println!(
        "PR:                 {}",
        ctx.pr_number
            .map_or_else(|| "(none)".to_string(), |pr| format!("#{pr}"))
    );
    println!("Framework version:  {}", ctx.framework_version);
    println!("ECR repo:           {}", ctx.ecr_repo);

    Ok(())
}

/// Delete one tag from the registry.
async fn cmd_cleanup(tag: &str, repo: &str, region: &str, account: Option<&str>) -> Result<()> {
    let account_id = match account {
        Some(account) => account.to_string(),
        None => {
            use dlcforge_core::CallerIdentity;
            StsCliIdentity
                .account_id()
                .await
                .context("failed to resolve account id")?
        }
    };

    let image = ImageSpec {
        account_id,
        region: region.to_string(),
        repository: repo.to_string(),
        tag: ImageTag::parse(tag)?,
    };

    EcrCliRegistry
        .delete_image(&image)
        .await
        .with_context(|| format!("failed to delete {}", image.uri()))?;

    println!("Deleted {}", image.uri());
    Ok(())
}

/// Parse a comma-separated processor list, preserving order, dropping dups.
fn parse_processors(raw: &str) -> Result<Vec<Processor>> {
    let mut processors = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let processor: Processor = part.parse()?;
        if !processors.contains(&processor) {
            processors.push(processor);
        }
    }
    if processors.is_empty() {
        anyhow::bail!("no processors given (expected cpu, gpu, or both)");
    }
    Ok(processors)
}

/// 0 when every track passed; otherwise the first failing track's code.
fn overall_exit_code(results: &[TrackResult]) -> i32 {
    results
        .iter()
        .map(TrackResult::exit_code)
        .find(|&code| code != 0)
        .unwrap_or(0)
}
