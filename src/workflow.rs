use crate::agents::{Outcome, ProviderReport, Reconciler, RunSummary};
use crate::config::Config;
use crate::error::{Result, TfdepError};
use crate::gitlab::{GitLabClient, ManifestStore};
use crate::manifest::{ProviderEntry, parse_required_providers};
use crate::registry::TerraformRegistry;
use colored::Colorize;
use tracing::info;

/// Manifest text from the base branch together with the providers it declares.
struct Manifest {
    text: String,
    providers: Vec<ProviderEntry>,
}

fn load_manifest(store: &dyn ManifestStore, config: &Config) -> Result<Manifest> {
    let bytes = store.fetch_file(&config.manifest_path, &config.base_branch)?;
    let text = String::from_utf8(bytes).map_err(|e| {
        TfdepError::ManifestParsing(format!("{} is not valid UTF-8: {e}", config.manifest_path))
    })?;
    let providers = parse_required_providers(&text)?;

    info!(
        path = %config.manifest_path,
        branch = %config.base_branch,
        providers = providers.len(),
        "Loaded manifest"
    );

    Ok(Manifest { text, providers })
}

fn gitlab_client(config: &Config) -> Result<GitLabClient> {
    GitLabClient::new(
        &config.gitlab_url,
        &config.project,
        config.token.as_deref(),
        config.timeout,
    )
}

/// Per-outcome counts for the end-of-run log line.
#[derive(Debug, Default, PartialEq, Eq)]
struct RunTotals {
    evaluated: usize,
    bumped: usize,
    skipped: usize,
    closed: usize,
    not_applied: usize,
    failed: usize,
}

impl RunTotals {
    fn of(summary: &RunSummary) -> Self {
        Self {
            evaluated: summary.reports.len(),
            bumped: summary.count(|o| matches!(o, Outcome::Bumped { .. } | Outcome::WouldBump { .. })),
            skipped: summary.count(|o| matches!(o, Outcome::Skipped { .. })),
            closed: summary
                .count(|o| matches!(o, Outcome::ClosedObsolete { .. } | Outcome::WouldClose { .. })),
            not_applied: summary.count(|o| matches!(o, Outcome::PatchNotApplied)),
            failed: summary.count(|o| matches!(o, Outcome::Failed(_))),
        }
    }
}

/// Reconcile every provider and return the per-provider outcomes.
pub fn execute_run(config: &Config, dry_run: bool) -> Result<RunSummary> {
    let gitlab = gitlab_client(config)?;
    let registry = TerraformRegistry::new(&config.registry_url, config.timeout)?;
    let manifest = load_manifest(&gitlab, config)?;

    let summary = Reconciler::new(&registry, &gitlab, &gitlab, config)
        .with_dry_run(dry_run)
        .reconcile_all(&manifest.text, &manifest.providers);

    let totals = RunTotals::of(&summary);
    info!(
        evaluated = totals.evaluated,
        bumped = totals.bumped,
        skipped = totals.skipped,
        closed = totals.closed,
        not_applied = totals.not_applied,
        failed = totals.failed,
        "Run complete"
    );

    print_summary(&summary, dry_run);
    Ok(summary)
}

fn describe(report: &ProviderReport) -> String {
    let latest = report.latest_version.as_deref().unwrap_or("?");
    match &report.outcome {
        Outcome::UpToDate => format!("{} {}", "up to date".green(), report.current_version.dimmed()),
        Outcome::ClosedObsolete { iid } => {
            format!("{} !{iid}", "closed obsolete merge request".yellow())
        }
        Outcome::WouldClose { iid } => format!("{} !{iid}", "would close".yellow()),
        Outcome::Skipped { branch } => format!("{} {}", "already requested on".dimmed(), branch),
        Outcome::Bumped { branch, iid } => format!(
            "{} -> {} {}",
            report.current_version.red(),
            latest.green().bold(),
            format!("(!{iid} from {branch})").dimmed()
        ),
        Outcome::WouldBump { branch } => format!(
            "{} -> {} {}",
            report.current_version.red(),
            latest.green().bold(),
            format!("(dry run, {branch})").dimmed()
        ),
        Outcome::PatchNotApplied => format!(
            "{} {} -> {}",
            "pin not found in manifest".red(),
            report.current_version,
            latest
        ),
        Outcome::Failed(message) => format!("{} {}", "failed:".red().bold(), message),
    }
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    let heading = if dry_run {
        "Provider report (dry run)"
    } else {
        "Provider report"
    };
    println!("\n{}", heading.cyan().bold());

    if summary.reports.is_empty() {
        println!("  {}", "No providers declared.".dimmed());
        return;
    }

    for report in &summary.reports {
        println!(
            "  {} ({}): {}",
            report.key.bright_white(),
            report.source,
            describe(report)
        );
    }
}

/// Compare every pinned version against the registry without touching GitLab state.
pub fn execute_check(config: &Config) -> Result<()> {
    let gitlab = gitlab_client(config)?;
    let registry = TerraformRegistry::new(&config.registry_url, config.timeout)?;
    let manifest = load_manifest(&gitlab, config)?;
    let reconciler = Reconciler::new(&registry, &gitlab, &gitlab, config);

    println!("{}", "Checking provider versions...".cyan().bold());

    let mut outdated = 0;
    for entry in &manifest.providers {
        match reconciler.evaluate(entry) {
            Ok(provider) if provider.is_latest() => {
                println!(
                    "  {} {} {}",
                    "✓".green(),
                    entry.source.bright_white(),
                    entry.version.dimmed()
                );
            }
            Ok(provider) => {
                outdated += 1;
                println!(
                    "  {} {} {} -> {}",
                    "↑".yellow(),
                    entry.source.bright_white(),
                    provider.current_version.red(),
                    provider.latest_version.green().bold()
                );
            }
            Err(e) => {
                println!("  {} {} {}", "✗".red(), entry.source.bright_white(), e);
            }
        }
    }

    if outdated == 0 {
        println!("\n{}", "All providers are up to date.".green());
    } else {
        println!(
            "\n{}",
            format!("{outdated} provider(s) can be updated.").yellow()
        );
    }

    Ok(())
}

/// Print the providers declared in the manifest on the base branch.
pub fn execute_list(config: &Config) -> Result<()> {
    let gitlab = gitlab_client(config)?;
    let manifest = load_manifest(&gitlab, config)?;

    println!(
        "{} {}@{}",
        "Providers in".cyan().bold(),
        config.manifest_path,
        config.base_branch
    );

    if manifest.providers.is_empty() {
        println!("  {}", "(none declared)".dimmed());
        return Ok(());
    }

    for entry in &manifest.providers {
        println!(
            "  {} = {} {}",
            entry.key.bright_cyan(),
            entry.source,
            entry.version.dimmed()
        );
    }

    Ok(())
}
