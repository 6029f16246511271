mod telemetry;

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use packmd_core::config::{Preferences, default_config_path, load_config, save_preferences};
use packmd_core::resolve::to_posix;
use packmd_core::{
    AssetsScope, NamingMode, PackOptions, Progress, RunReport, export_log, run_pack_async,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "packmd",
    version,
    about = "Copy images referenced by Markdown files into a local assets folder"
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Config file (default .packmd/config.toml)"
    )]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pack the images of every Markdown document under the given targets.
    Pack(PackArgs),
    /// Print the options a run would use.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct PackArgs {
    #[arg(required = true, value_name = "PATH", help = "Markdown files or directories")]
    targets: Vec<PathBuf>,
    #[arg(long, value_name = "NAME", help = "Assets folder name")]
    assets_dir: Option<String>,
    #[arg(
        long,
        value_name = "MODE",
        help = "original, sequence, prefix, hash, date, uuid or fixed"
    )]
    naming: Option<NamingMode>,
    #[arg(long, value_name = "TEXT", help = "Prefix (prefix mode) or fixed name (fixed mode)")]
    prefix: Option<String>,
    #[arg(long, value_name = "N", help = "First sequence number")]
    start: Option<u32>,
    #[arg(long, value_name = "SCOPE", help = "per-document or per-target")]
    scope: Option<AssetsScope>,
    #[arg(long, overrides_with = "no_backup", help = "Write <file>.copy before rewriting")]
    backup: bool,
    #[arg(long, overrides_with = "backup")]
    no_backup: bool,
    #[arg(long, overrides_with = "keep_old", help = "Delete originals that were copied")]
    delete_old: bool,
    #[arg(long, overrides_with = "delete_old")]
    keep_old: bool,
    #[arg(long, help = "Save naming mode, backup and delete choices to the config file")]
    remember: bool,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
    #[arg(long, value_name = "PATH", help = "Write errors and totals to a text file")]
    export_log: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    #[arg(long, help = "Print as JSON")]
    json: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    telemetry::init_tracing(cli.verbose);

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let config_path = match &cli.config {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => cwd.join(path),
        None => default_config_path(&cwd, |key| env::var(key).ok()),
    };

    match cli.command {
        Commands::Pack(args) => run_pack_command(&config_path, args),
        Commands::Config(args) => run_config(&config_path, args),
    }
}

fn base_options(config_path: &Path) -> Result<PackOptions> {
    let config = load_config(config_path)?;
    config.to_options_with_lookup(|key| env::var(key).ok())
}

fn apply_overrides(options: &mut PackOptions, args: &PackArgs) {
    if let Some(assets_dir) = &args.assets_dir {
        options.assets_dir_name = assets_dir.clone();
    }
    if let Some(naming) = args.naming {
        options.naming_mode = naming;
    }
    if let Some(prefix) = &args.prefix {
        options.naming_prefix = prefix.clone();
    }
    if let Some(start) = args.start {
        options.naming_start = start;
    }
    if let Some(scope) = args.scope {
        options.assets_scope = scope;
    }
    if let Some(backup) = flag_override(args.backup, args.no_backup) {
        options.backup_enabled = backup;
    }
    if let Some(delete_old) = flag_override(args.delete_old, args.keep_old) {
        options.delete_old = delete_old;
    }
}

fn run_pack_command(config_path: &Path, args: PackArgs) -> Result<ExitCode> {
    let mut options = base_options(config_path)?;
    apply_overrides(&mut options, &args);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let cancel = CancellationToken::new();
    let show_progress = !args.json;

    let report = runtime.block_on(async {
        let watcher = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                watcher.cancel();
            }
        });
        run_pack_async(
            &args.targets,
            &options,
            |progress: Progress| {
                if show_progress {
                    eprintln!("[{}/{}]", progress.done, progress.total);
                }
            },
            &cancel,
        )
        .await
    })?;

    if args.remember {
        match save_preferences(config_path, &Preferences::from_options(&options)) {
            Ok(true) => info!(path = %config_path.display(), "saved preferences"),
            Ok(false) => {}
            Err(error) => warn!("could not save preferences: {error:#}"),
        }
    }

    if let Some(log_path) = &args.export_log
        && export_log(&report.log_lines(), log_path)?
    {
        info!(path = %log_path.display(), "exported run log");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&options, &report);
    }

    if report.summary.total_errors > 0 || report.cancelled {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_report(options: &PackOptions, report: &RunReport) {
    let summary = &report.summary;
    println!("pack");
    println!("assets_dir: {}", options.assets_dir_name.trim());
    println!("assets_scope: {}", options.assets_scope.as_str());
    println!("naming_mode: {}", options.naming_mode);
    println!("files: {}", summary.total_files);
    println!("images_found: {}", summary.total_images_found);
    println!("copied: {}", summary.total_copied);
    println!("reused: {}", summary.total_reused);
    println!("skipped_external: {}", summary.total_skipped_external);
    println!("skipped_missing: {}", summary.total_skipped_missing);
    println!("name_conflicts: {}", summary.total_name_conflicts);
    println!("errors: {}", summary.total_errors);
    println!("cancelled: {}", format_flag(report.cancelled));

    let failed: Vec<_> = report.failed_files().collect();
    if !failed.is_empty() {
        println!("needs_attention:");
        for file in failed {
            let path = to_posix(&file.file_path);
            if file.skipped_missing > 0 {
                println!("  - {path}: {} missing", file.skipped_missing);
            }
            for error in &file.errors {
                println!("  - {path}: {error}");
            }
        }
    }
}

fn run_config(config_path: &Path, args: ConfigArgs) -> Result<ExitCode> {
    let options = base_options(config_path)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&options)?);
        return Ok(ExitCode::SUCCESS);
    }

    println!("config");
    println!("config_path: {}", to_posix(config_path));
    println!("config_exists: {}", format_flag(config_path.exists()));
    println!("assets_dir: {}", options.assets_dir_name);
    println!("assets_scope: {}", options.assets_scope.as_str());
    println!("naming_mode: {}", options.naming_mode);
    println!(
        "naming_prefix: {}",
        if options.naming_prefix.is_empty() {
            "<none>"
        } else {
            options.naming_prefix.as_str()
        }
    );
    println!("backup: {}", format_flag(options.backup_enabled));
    println!("delete_old: {}", format_flag(options.delete_old));
    Ok(ExitCode::SUCCESS)
}

fn flag_override(on: bool, off: bool) -> Option<bool> {
    if on {
        Some(true)
    } else if off {
        Some(false)
    } else {
        None
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
