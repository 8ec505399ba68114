use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use portray_contracts::events::EventWriter;
use portray_contracts::history::{FileStore, HistoryAdapter, HistoryStore};
use portray_contracts::options::{
    Effect, Intensity, ProcessingOptions, Style, StyleCategory, StyleCatalog,
};
use portray_engine::{
    parse_data_uri, Credentials, DryrunBackend, GeminiBackend, GenerationBackend, Phase, Session,
};

#[derive(Debug, Parser)]
#[command(name = "portray", version, about = "AI portrait stylizer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stylize a portrait photo and record it in the history.
    Generate(GenerateArgs),
    /// Inspect or prune past generations.
    History(HistoryArgs),
    /// List the available styles, grouped by category.
    Styles,
    /// Write a stored result back out as a PNG file.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value = "corporate")]
    style: String,
    #[arg(long, default_value = "medium")]
    intensity: String,
    #[arg(long)]
    effect: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Re-issue the identical request once if the provider reports quota
    /// exhaustion.
    #[arg(long)]
    retry_on_quota: bool,
    /// Offline transport producing a deterministic placeholder image.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct HistoryArgs {
    #[command(subcommand)]
    command: HistoryCommand,
}

#[derive(Debug, Subcommand)]
enum HistoryCommand {
    List,
    Delete(DeleteArgs),
    Clear(ClearArgs),
}

#[derive(Debug, Parser)]
struct DeleteArgs {
    #[arg(long)]
    id: String,
}

#[derive(Debug, Parser)]
struct ClearArgs {
    /// Destructive and not undoable; required instead of a prompt.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    out: PathBuf,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("portray error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::History(args) => run_history(args),
        Command::Styles => run_styles(),
        Command::Export(args) => run_export(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let options = parse_options(&args.style, &args.intensity, args.effect.as_deref())?;
    let root = data_root();
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| root.join("events.jsonl"));
    let session_id = format!("session-{}", Utc::now().timestamp_millis());
    let events = EventWriter::new(events_path, session_id);
    let backend: Box<dyn GenerationBackend> = if args.dryrun {
        Box::new(DryrunBackend)
    } else {
        Box::new(GeminiBackend::new(Credentials::from_env()))
    };

    let mut session = Session::new(backend, Box::new(FileStore::new(root.join("store"))), events);
    session.set_options(options);
    session.set_model_override(args.model.clone());

    let bytes =
        fs::read(&args.input).with_context(|| format!("failed reading {}", args.input.display()))?;
    session.load_image(&bytes)?;

    let progress = session.progress();
    let worker = thread::spawn(move || {
        let result = session.submit();
        (session, result)
    });

    let mut printed = usize::MAX;
    while !worker.is_finished() {
        let step = progress.current_step();
        if step != printed {
            println!("{}", progress.current_label());
            printed = step;
        }
        thread::sleep(Duration::from_millis(100));
    }
    let (mut session, mut result) = worker
        .join()
        .map_err(|_| anyhow::anyhow!("generation worker panicked"))?;

    if let Err(err) = &result {
        if err.is_retryable() && args.retry_on_quota {
            println!("quota exhausted; retrying the same request once...");
            result = session.retry_last();
        }
    }

    match result {
        Ok(record) => {
            fs::create_dir_all(&args.out)
                .with_context(|| format!("failed creating {}", args.out.display()))?;
            let processed = parse_data_uri(&record.processed_url)?;
            let original = parse_data_uri(&record.original_url)?;
            let image_path = args.out.join(format!("portray-{}.png", record.timestamp));
            let original_path = args
                .out
                .join(format!("portray-{}-original.jpg", record.timestamp));
            fs::write(&image_path, &processed.bytes)
                .with_context(|| format!("failed writing {}", image_path.display()))?;
            fs::write(&original_path, &original.bytes)
                .with_context(|| format!("failed writing {}", original_path.display()))?;
            println!("done: {}", image_path.display());
            println!("record {} added to history", record.id);
            session.finish();
            Ok(0)
        }
        Err(err) => {
            session.finish();
            if matches!(session.phase(), Phase::Failed(_)) && err.is_retryable() {
                eprintln!("{err}");
                eprintln!("run again with --retry-on-quota to re-issue the same request");
                return Ok(2);
            }
            Err(err.into())
        }
    }
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let mut adapter = history_adapter()?;
    match args.command {
        HistoryCommand::List => {
            let history = adapter.load();
            if history.is_empty() {
                println!("history is empty");
                return Ok(0);
            }
            print_history(&history);
            Ok(0)
        }
        HistoryCommand::Delete(delete) => {
            let mut history = adapter.load();
            if !history.delete(&delete.id) {
                println!("no record with id {}", delete.id);
                return Ok(0);
            }
            adapter.save(&history);
            println!("deleted {}", delete.id);
            Ok(0)
        }
        HistoryCommand::Clear(clear) => {
            if !clear.yes {
                bail!("clearing history cannot be undone; pass --yes to confirm");
            }
            let mut history = adapter.load();
            history.clear();
            adapter.save(&history);
            println!("history cleared");
            Ok(0)
        }
    }
}

fn run_styles() -> Result<i32> {
    let catalog = StyleCatalog::default();
    for category in StyleCategory::ALL {
        let styles = catalog.by_category(category);
        if styles.is_empty() {
            continue;
        }
        println!("{}:", category.as_str());
        for info in styles {
            println!("  {:<20} {}", info.style.as_str(), info.description);
        }
    }
    Ok(0)
}

fn run_export(args: ExportArgs) -> Result<i32> {
    let adapter = history_adapter()?;
    let history = adapter.load();
    let Some(record) = history.get(&args.id) else {
        bail!("no record with id {}", args.id);
    };
    let processed = parse_data_uri(&record.processed_url)?;
    let out_path = if args.out.is_dir() {
        args.out.join(format!("portray-{}.png", record.timestamp))
    } else {
        args.out.clone()
    };
    fs::write(&out_path, &processed.bytes)
        .with_context(|| format!("failed writing {}", out_path.display()))?;
    println!("exported {} to {}", record.id, out_path.display());
    Ok(0)
}

fn history_adapter() -> Result<HistoryAdapter> {
    let root = data_root();
    let session_id = format!("cli-{}", Utc::now().timestamp_millis());
    let events = EventWriter::new(root.join("events.jsonl"), session_id);
    Ok(HistoryAdapter::new(
        Box::new(FileStore::new(root.join("store"))),
        events,
    ))
}

fn print_history(history: &HistoryStore) {
    for record in history.records() {
        let when = DateTime::<Utc>::from_timestamp_millis(record.timestamp)
            .map(|stamp| stamp.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| record.timestamp.to_string());
        let effect = record
            .effect
            .map(|value| value.as_str())
            .unwrap_or("-");
        println!(
            "{}  {}  style={} mode={} effect={}",
            record.id,
            when,
            record.style.as_str(),
            record.mode.as_str(),
            effect
        );
    }
}

fn parse_options(style: &str, intensity: &str, effect: Option<&str>) -> Result<ProcessingOptions> {
    let style = Style::parse(style).with_context(|| {
        format!(
            "unknown style '{style}'; known styles: {}",
            joined(Style::ALL.iter().map(Style::as_str))
        )
    })?;
    let intensity = Intensity::parse(intensity).with_context(|| {
        format!(
            "unknown intensity '{intensity}'; known intensities: {}",
            joined(Intensity::ALL.iter().map(Intensity::as_str))
        )
    })?;
    let effect = effect
        .map(|raw| {
            Effect::parse(raw).with_context(|| {
                format!(
                    "unknown effect '{raw}'; known effects: {}",
                    joined(Effect::ALL.iter().map(Effect::as_str))
                )
            })
        })
        .transpose()?;
    Ok(ProcessingOptions {
        intensity,
        style,
        effect,
    })
}

fn joined<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<&str>>().join(", ")
}

fn data_root() -> PathBuf {
    if let Some(root) = env::var("PORTRAY_HOME").ok().filter(|value| !value.trim().is_empty()) {
        return PathBuf::from(root);
    }
    env::var("HOME")
        .ok()
        .map(|home| Path::new(&home).join(".portray"))
        .unwrap_or_else(|| PathBuf::from(".portray"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_accepts_known_tuple() -> Result<()> {
        let options = parse_options("cyber_glitch", "premium", Some("noir"))?;
        assert_eq!(options.style, Style::CyberGlitch);
        assert_eq!(options.intensity, Intensity::Premium);
        assert_eq!(options.effect, Some(Effect::Noir));
        Ok(())
    }

    #[test]
    fn parse_options_rejects_unknown_identifiers() {
        assert!(parse_options("vaporwave", "medium", None).is_err());
        assert!(parse_options("corporate", "ultra", None).is_err());
        assert!(parse_options("corporate", "medium", Some("rainbow")).is_err());
    }

    #[test]
    fn data_root_honors_portray_home() {
        env::set_var("PORTRAY_HOME", "/tmp/portray-test-root");
        assert_eq!(data_root(), PathBuf::from("/tmp/portray-test-root"));
        env::remove_var("PORTRAY_HOME");
    }
}
