use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use miz_translator_core::{
    default_global_cache_path, CancelFlag, DictionaryTranslator, KeysFile, LlmClient,
    MissionMode, MissionPlan, MissionReport, MissionRunner, OutputLayout, TranslatorConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Translator configuration (YAML, or JSON by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Provider credentials and endpoint defaults
    #[arg(long, global = true)]
    keys: Option<PathBuf>,

    /// Entry of the keys file to use
    #[arg(long, global = true)]
    engine: Option<String>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate and/or repack mission archives.
    Missions {
        /// Mission file names inside the source directory
        #[arg(required = true)]
        missions: Vec<String>,

        #[arg(long)]
        source_dir: PathBuf,

        /// Defaults to the source directory (originals are backed up)
        #[arg(long)]
        dest_dir: Option<PathBuf>,

        /// translate | traducir, miz | reempaquetar, all
        #[arg(long, default_value = "all")]
        mode: String,

        /// Shared cache the mission caches are merged into
        #[arg(long)]
        global_cache: Option<PathBuf>,

        #[arg(long, conflicts_with = "global_cache")]
        no_global_cache: bool,

        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },

    /// Translate one extracted dictionary file.
    Dictionary {
        /// The dictionary file to translate
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving the translated file, cache and exports
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn load_config(args: &Args) -> Result<TranslatorConfig> {
    let mut config = match &args.config {
        Some(path) => TranslatorConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => TranslatorConfig::default(),
    };

    if let Some(engine) = &args.engine {
        let Some(keys_path) = &args.keys else {
            bail!("--engine requires --keys");
        };
        let keys = KeysFile::from_file(keys_path)
            .with_context(|| format!("loading {}", keys_path.display()))?;
        if !keys.apply_engine(engine, &mut config.llm) {
            bail!("engine {engine:?} is not listed in {}", keys_path.display());
        }
    }
    Ok(config)
}

fn print_summary(reports: &[MissionReport]) {
    let width = reports
        .iter()
        .map(|r| r.mission.len())
        .max()
        .unwrap_or(0)
        .max("mission".len());
    println!("{:<width$}  status", "mission");
    for report in reports {
        println!("{:<width$}  {}", report.mission, report.status);
    }
}

fn spawn_ctrl_c(cancel: CancelFlag) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current batch");
            cancel.cancel();
        }
    });
}

async fn translate_dictionary(
    client: &LlmClient,
    config: &TranslatorConfig,
    input: &Path,
    output: &Path,
    cancel: CancelFlag,
) -> Result<()> {
    let report = DictionaryTranslator::new(client, config.prepare())
        .with_cancel(cancel)
        .translate_file(input, &OutputLayout::in_dir(output))
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns false when any mission failed.
async fn run(args: Args) -> Result<bool> {
    let config = load_config(&args)?;
    let client = LlmClient::new(config.llm.clone(), Duration::from_secs(config.timeout))?;
    let cancel = CancelFlag::new();
    spawn_ctrl_c(cancel.clone());

    match args.commands {
        Commands::Dictionary { input, output } => {
            translate_dictionary(&client, &config, &input, &output, cancel).await?;
            Ok(true)
        }
        Commands::Missions {
            missions,
            source_dir,
            dest_dir,
            mode,
            global_cache,
            no_global_cache,
            json,
        } => {
            let mode: MissionMode = mode.parse()?;
            let global_cache = if no_global_cache {
                None
            } else {
                global_cache.or_else(default_global_cache_path)
            };
            let plan = MissionPlan {
                dest_dir: dest_dir.unwrap_or_else(|| source_dir.clone()),
                source_dir,
                missions,
                mode,
            };
            info!(
                "{} missions, model {:?} at {}",
                plan.missions.len(),
                config.llm.model,
                config.llm.base_url
            );

            let runner = MissionRunner::new(&client, config.prepare(), cancel)
                .with_global_cache(global_cache);
            let reports = runner.run(&plan).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                print_summary(&reports);
            }
            Ok(!reports.iter().any(MissionReport::is_failure))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_mission_arguments() {
        let args = Args::parse_from([
            "miz-translator",
            "--verbose",
            "missions",
            "a.miz",
            "b.miz",
            "--source-dir",
            "/missions",
            "--mode",
            "traducir",
            "--no-global-cache",
        ]);
        assert!(args.verbose);
        match args.commands {
            Commands::Missions {
                missions,
                mode,
                no_global_cache,
                dest_dir,
                ..
            } => {
                assert_eq!(missions, vec!["a.miz", "b.miz"]);
                assert_eq!(mode, "traducir");
                assert!(no_global_cache);
                assert!(dest_dir.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn engine_overrides_llm_section() {
        let dir = tempfile::tempdir().unwrap();
        let keys = dir.path().join("keys.yaml");
        fs::write(
            &keys,
            "providers:\n  local:\n    base_url: http://127.0.0.1:8080/v1\n    model: qwen2.5\n",
        )
        .unwrap();
        let keys_arg = keys.to_string_lossy().to_string();

        let args = Args::parse_from([
            "miz-translator",
            "--keys",
            keys_arg.as_str(),
            "--engine",
            "local",
            "dictionary",
            "-i",
            "in.lua",
            "-o",
            "out",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.llm.base_url, "http://127.0.0.1:8080/v1");
        assert_eq!(config.llm.model, "qwen2.5");

        let args = Args::parse_from([
            "miz-translator",
            "--keys",
            keys_arg.as_str(),
            "--engine",
            "missing",
            "dictionary",
            "-i",
            "in.lua",
            "-o",
            "out",
        ]);
        assert!(load_config(&args).is_err());
    }
}
