use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use profswitch_core::{
    ActivateOptions, Layout, NamedProcess, ProfileRegistry, SwitchConfig, SyncPlan, VolatilePath,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod open;
mod prompt;

/// profswitch - switch between saved states of a desktop app without signing in again
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: <config dir>/profswitch/config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List saved profiles
    List {
        /// Output as JSON for integrations
        #[arg(long)]
        json: bool,
    },

    /// Save the current app state as a profile
    #[command(alias = "init")]
    Save {
        /// Profile name (letters, digits, '-' and '_')
        name: String,

        /// Answer yes to every confirmation
        #[arg(short, long)]
        yes: bool,

        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Quit the app, restore a profile, clear caches and relaunch
    #[command(alias = "activate")]
    Switch {
        /// Profile name
        name: String,

        /// Do not start the app afterwards
        #[arg(long)]
        no_launch: bool,

        /// Show what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete a profile
    #[command(alias = "rm")]
    Remove {
        /// Profile name
        name: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Reveal the profiles folder in the file browser
    Open,

    /// Print the resolved locations
    Paths,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", "error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = SwitchConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let layout = Layout::resolve(&config).context("Failed to resolve application paths")?;
    tracing::debug!(?layout, "resolved layout");
    let process = NamedProcess::from_layout(&layout);
    let registry = ProfileRegistry::new(&layout, &process);

    match cli.command {
        Commands::List { json } => {
            let names = registry.list();
            let active = registry.active().ok().flatten().map(|m| m.name);
            if json {
                let payload = serde_json::json!({ "profiles": names, "active": active });
                println!("{}", serde_json::to_string(&payload)?);
            } else if names.is_empty() {
                println!("No profiles yet. Run 'profswitch save <name>' to create one.");
            } else {
                for name in names {
                    if active.as_deref() == Some(name.as_str()) {
                        println!("{} {}", "*".green().bold(), name.green());
                    } else {
                        println!("  {name}");
                    }
                }
            }
        }
        Commands::Save { name, yes, dry_run } => {
            if dry_run {
                print_plan(&registry.plan_save(&name)?);
                return Ok(());
            }
            let confirm = prompt::Prompter::new(yes);
            let report = registry
                .save(&name, &confirm)
                .with_context(|| format!("Failed to save profile '{name}'"))?;
            println!(
                "{} Saved profile {} ({} copied, {} removed, {} unchanged)",
                "✓".green(),
                name.bold(),
                report.files_copied,
                report.removed,
                report.unchanged
            );
        }
        Commands::Switch {
            name,
            no_launch,
            dry_run,
        } => {
            if dry_run {
                print_plan(&registry.plan_activate(&name)?);
                return Ok(());
            }
            let report = registry
                .activate(&name, ActivateOptions { launch: !no_launch })
                .with_context(|| format!("Failed to switch to profile '{name}'"))?;
            println!(
                "{} Switched to {} ({} copied, {} removed, {} caches cleared)",
                "✓".green(),
                name.bold(),
                report.sync.files_copied,
                report.sync.removed,
                report.purge.removed.len()
            );
            if report.launched {
                println!("  {} launched", layout.app_name);
            }
        }
        Commands::Remove { name, yes } => {
            let confirm = prompt::Prompter::new(yes);
            registry
                .remove(&name, &confirm)
                .with_context(|| format!("Failed to remove profile '{name}'"))?;
            println!("{} Removed profile {}", "✓".green(), name.bold());
        }
        Commands::Open => {
            std::fs::create_dir_all(&layout.profiles_root).with_context(|| {
                format!("Failed to create {}", layout.profiles_root.display())
            })?;
            open::reveal(&layout.profiles_root)?;
        }
        Commands::Paths => print_layout(&layout),
    }

    Ok(())
}

fn print_plan(plan: &SyncPlan) {
    if plan.is_empty() {
        println!("Nothing to do ({} entries already in sync)", plan.unchanged());
        return;
    }
    for op in plan.ops() {
        println!("  {op}");
    }
    println!(
        "{} operations, {} entries unchanged",
        plan.ops().len(),
        plan.unchanged()
    );
}

fn print_layout(layout: &Layout) {
    println!("{}{}", format!("{:<15}", "live dir:").bold(), layout.live_dir.display());
    println!("{}{}", format!("{:<15}", "profiles:").bold(), layout.profiles_root.display());
    println!("{}{}", format!("{:<15}", "app bundle:").bold(), layout.bundle_path.display());
    println!("{}{}", format!("{:<15}", "process:").bold(), layout.process_name);
    println!("{}", "volatile:".bold());
    for entry in &layout.volatile {
        match entry {
            VolatilePath::Live(rel) => println!("  live    {}", rel.display()),
            VolatilePath::System(path) => println!("  system  {}", path.display()),
        }
    }
}
