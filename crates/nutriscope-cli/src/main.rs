use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use nutriscope_contracts::analysis::{
    effective_notes, AnalysisResult, Goal, InstructionTemplate, SAMPLE_ANALYSIS,
};
use nutriscope_contracts::chat::{parse_intent, SESSION_HELP_COMMANDS};
use nutriscope_contracts::events::{EventKind, EventPayload, EventWriter};
use nutriscope_contracts::models::{ModelRegistry, VISION_CAPABILITY};
use nutriscope_contracts::runs::export::{export_analysis, write_analysis_text, EXPORT_FILE_NAME};
use nutriscope_contracts::runs::receipts::{write_receipt, RECEIPT_FILE_NAME};
use nutriscope_engine::{AnalysisSession, Analyzer, AnalyzerConfig};
use serde_json::{json, Value};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "nutriscope=info,nutriscope_engine=info";
const VERBOSE_LOG_FILTER: &str = "nutriscope=debug,nutriscope_engine=debug";
const DEFAULT_ENV_FILE: &str = ".env";
const FAILURE_HINT: &str = "Please try again or check your API key.";

#[derive(Debug, Parser)]
#[command(name = "nutriscope", version, about = "Nutrition estimates from food photos")]
struct Cli {
    /// Debug logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Dotenv file merged beneath the process environment.
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze one food photo and print the breakdown.
    Analyze(AnalyzeArgs),
    /// Print the instruction that would be sent.
    Prompt(NotesArgs),
    /// List vision models.
    Models,
    /// Print a sample analysis.
    Example,
    /// Interactive session with slash commands.
    Session(SessionArgs),
}

#[derive(Debug, Args)]
struct NotesArgs {
    #[arg(long)]
    notes: Option<String>,
    #[arg(long, default_value = "general", value_parser = parse_goal)]
    goal: Goal,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[command(flatten)]
    notes: NotesArgs,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn parse_goal(raw: &str) -> Result<Goal, String> {
    raw.parse()
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("nutriscope error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Command::Analyze(args) => run_analyze(args, load_config(cli.env_file.as_deref())?),
        Command::Prompt(args) => {
            println!("{}", prompt_text(args.notes.as_deref(), args.goal));
            Ok(0)
        }
        Command::Models => {
            let config = load_config(cli.env_file.as_deref())?;
            for line in model_lines(&ModelRegistry::default(), &config.model) {
                println!("{line}");
            }
            Ok(0)
        }
        Command::Example => {
            println!("{SAMPLE_ANALYSIS}");
            Ok(0)
        }
        Command::Session(args) => {
            run_session(args, load_config(cli.env_file.as_deref())?)?;
            Ok(0)
        }
    }
}

/// The instruction `analyze` would send for these notes and goal.
fn prompt_text(notes: Option<&str>, goal: Goal) -> String {
    let notes = effective_notes(notes, goal);
    InstructionTemplate::nutrition_v1().render(notes.as_deref())
}

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new(VERBOSE_LOG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
    };
    // stdout carries analysis text only.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

fn load_config(env_file: Option<&Path>) -> Result<AnalyzerConfig> {
    let config = match env_file {
        Some(path) if !path.is_file() => bail!("env file not found: {}", path.display()),
        Some(path) => AnalyzerConfig::from_env_with_dotenv(path),
        None if Path::new(DEFAULT_ENV_FILE).is_file() => {
            AnalyzerConfig::from_env_with_dotenv(Path::new(DEFAULT_ENV_FILE))
        }
        None => AnalyzerConfig::from_env(),
    };
    debug!(?config, "configuration loaded");
    Ok(config)
}

fn resolve_events_path(events: Option<PathBuf>, out: Option<&Path>) -> Option<PathBuf> {
    events.or_else(|| out.map(|dir| dir.join("events.jsonl")))
}

fn build_analyzer(
    config: AnalyzerConfig,
    events_path: Option<PathBuf>,
    session_id: &str,
) -> Result<Analyzer> {
    let analyzer = Analyzer::from_config(config)?;
    Ok(match events_path {
        Some(path) => {
            let events = EventWriter::new(path, session_id);
            info!(events = %events.path().display(), "appending session events");
            analyzer.with_events(events)
        }
        None => analyzer,
    })
}

fn emit_event(analyzer: &Analyzer, kind: EventKind, payload: Value) -> Result<()> {
    let Some(events) = analyzer.events() else {
        return Ok(());
    };
    let payload: EventPayload = match payload {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    };
    events.emit(kind, payload)?;
    Ok(())
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn run_analyze(args: AnalyzeArgs, config: AnalyzerConfig) -> Result<i32> {
    let session_id = new_session_id();
    let events_path = resolve_events_path(args.events.clone(), args.out.as_deref());
    let analyzer = build_analyzer(config, events_path, &session_id)?;
    emit_event(
        &analyzer,
        EventKind::SessionStarted,
        json!({ "mode": "analyze", "image_path": args.image.to_string_lossy() }),
    )?;

    let mut session = AnalysisSession::new(&session_id);
    session.set_notes(args.notes.notes.unwrap_or_default());
    session.set_goal(args.notes.goal);
    session.set_model(args.model);

    let loaded = session.load_image(&args.image).map(|_| ());
    let code = match loaded {
        Err(err) => {
            print_result(&AnalysisResult::failure(err.to_string()));
            1
        }
        Ok(_) => {
            let succeeded = match session.submit(&analyzer) {
                Some(report) => {
                    print_result(&report.result);
                    report.result.is_success()
                }
                None => false,
            };
            if let Some(out_dir) = args.out.as_deref() {
                let analysis_path = session
                    .current_result()
                    .map(|result| export_analysis(out_dir, result))
                    .transpose()?
                    .flatten();
                write_session_receipt(&analyzer, &session, analysis_path, out_dir)?;
            }
            if succeeded {
                0
            } else {
                1
            }
        }
    };

    emit_event(
        &analyzer,
        EventKind::SessionFinished,
        json!({ "exit_code": code }),
    )?;
    Ok(code)
}

fn write_session_receipt(
    analyzer: &Analyzer,
    session: &AnalysisSession,
    analysis_path: Option<PathBuf>,
    dir: &Path,
) -> Result<Option<PathBuf>> {
    let receipt_path = dir.join(RECEIPT_FILE_NAME);
    let Some(receipt) = session.receipt(
        analyzer.template().version(),
        analysis_path.as_deref(),
        &receipt_path,
    ) else {
        return Ok(None);
    };
    write_receipt(&receipt_path, &receipt)?;
    info!(receipt = %receipt_path.display(), "receipt written");
    emit_event(
        analyzer,
        EventKind::AnalysisExported,
        json!({
            "analysis_path": analysis_path.map(|path| path.to_string_lossy().to_string()),
            "receipt_path": receipt_path.to_string_lossy(),
        }),
    )?;
    Ok(Some(receipt_path))
}

fn print_result(result: &AnalysisResult) {
    match result {
        AnalysisResult::Success { text } => println!("{text}"),
        AnalysisResult::Failure { message } => {
            eprintln!("Analysis failed: {message}");
            eprintln!("{FAILURE_HINT}");
        }
    }
}

fn model_lines(registry: &ModelRegistry, default_model: &str) -> Vec<String> {
    registry
        .by_capability(VISION_CAPABILITY)
        .into_iter()
        .map(|model| {
            let marker = if model.name == default_model { "*" } else { " " };
            match model.input_token_limit {
                Some(limit) => format!(
                    "{marker} {} ({}, {limit} input tokens)",
                    model.name, model.provider
                ),
                None => format!("{marker} {} ({})", model.name, model.provider),
            }
        })
        .collect()
}

fn save_target(requested: Option<&str>, out_dir: Option<&Path>) -> PathBuf {
    match requested.filter(|path| !path.is_empty()) {
        Some(path) => PathBuf::from(path),
        None => out_dir
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .join(EXPORT_FILE_NAME),
    }
}

fn run_session(args: SessionArgs, config: AnalyzerConfig) -> Result<()> {
    let session_id = new_session_id();
    let events_path = resolve_events_path(args.events.clone(), args.out.as_deref());
    let analyzer = build_analyzer(config, events_path, &session_id)?;
    emit_event(
        &analyzer,
        EventKind::SessionStarted,
        json!({ "mode": "session" }),
    )?;

    let mut session = AnalysisSession::new(&session_id);
    session.set_model(args.model.clone());

    let stdin = io::stdin();
    let mut line = String::new();
    println!("Nutriscope session started. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => println!("Commands: {}", SESSION_HELP_COMMANDS.join(" ")),
            "set_image" => {
                let path = intent.arg("path").unwrap_or_default();
                if path.is_empty() {
                    println!("/image requires a path");
                    continue;
                }
                match session.load_image(Path::new(path)) {
                    Ok(image) => {
                        let size = image
                            .dimensions()
                            .map(|(width, height)| format!(", {width}x{height}"))
                            .unwrap_or_default();
                        println!(
                            "Image loaded: {path} ({}, {} bytes{size})",
                            image.mime_type(),
                            image.byte_len()
                        );
                    }
                    Err(err) => println!("Image not loaded: {err}"),
                }
            }
            "set_notes" => {
                session.set_notes(intent.arg("notes").unwrap_or_default());
                if session.notes().is_empty() {
                    println!("Notes cleared.");
                } else {
                    println!("Notes: {}", session.notes());
                }
            }
            "set_goal" => match intent.arg("goal").unwrap_or_default().parse::<Goal>() {
                Ok(goal) => {
                    session.set_goal(goal);
                    println!("Goal set to {goal}");
                }
                Err(err) => println!("{err}"),
            },
            "set_model" => {
                session.set_model(intent.arg("model").map(str::to_string));
                let model = session
                    .model()
                    .unwrap_or(&analyzer.config().model)
                    .to_string();
                if analyzer.model_registry().get(&model).is_none() {
                    println!("Model '{model}' is not registered; analysis will use the default.");
                } else {
                    println!("Model set to {model}");
                }
            }
            "analyze" => match session.submit(&analyzer) {
                Some(report) => print_result(&report.result),
                None => println!("No image loaded. Use /image <path> first."),
            },
            "show" => match session.current_result() {
                Some(result) => print_result(result),
                None => println!("No analysis yet."),
            },
            "show_prompt" => println!("{}", session.instruction_preview(&analyzer)),
            "save" => {
                let Some(text) = session.export_text() else {
                    println!("Nothing to save: no successful analysis.");
                    continue;
                };
                let target = save_target(intent.arg("path"), args.out.as_deref());
                write_analysis_text(&target, text)?;
                let dir = target
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                write_session_receipt(&analyzer, &session, Some(target.clone()), &dir)?;
                println!("Saved analysis to {}", target.display());
            }
            "clear" => {
                session.clear();
                session.set_model(args.model.clone());
                println!("Session cleared.");
            }
            "quit" => break,
            _ => {
                let command = intent.arg("command").unwrap_or_default();
                println!("Unknown command: /{command}. Type /help for commands.");
            }
        }
    }

    emit_event(&analyzer, EventKind::SessionFinished, json!({}))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;
    use std::path::{Path, PathBuf};

    use clap::Parser;
    use nutriscope_contracts::analysis::{Goal, SAMPLE_ANALYSIS};
    use nutriscope_contracts::models::ModelRegistry;
    use nutriscope_contracts::runs::export::EXPORT_FILE_NAME;
    use nutriscope_contracts::runs::receipts::RECEIPT_FILE_NAME;
    use nutriscope_engine::{AnalysisSession, AnalyzerConfig};
    use serde_json::Value;

    use super::{
        build_analyzer, model_lines, prompt_text, resolve_events_path, run_analyze, save_target,
        write_session_receipt, AnalyzeArgs, Cli, Command,
    };

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn dryrun_config() -> AnalyzerConfig {
        AnalyzerConfig {
            model: "dryrun-vision-1".to_string(),
            ..AnalyzerConfig::default()
        }
    }

    fn analyze_args(image: &Path, out_dir: &Path) -> anyhow::Result<AnalyzeArgs> {
        let cli = Cli::try_parse_from([
            OsStr::new("nutriscope"),
            OsStr::new("analyze"),
            OsStr::new("--image"),
            image.as_os_str(),
            OsStr::new("--out"),
            out_dir.as_os_str(),
        ])?;
        match cli.command {
            Command::Analyze(args) => Ok(args),
            _ => anyhow::bail!("expected analyze command"),
        }
    }

    fn event_types(path: &Path) -> anyhow::Result<Vec<String>> {
        Ok(std::fs::read_to_string(path)?
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect())
    }

    #[test]
    fn prompt_matches_what_analyze_sends() -> anyhow::Result<()> {
        let analyzer = build_analyzer(dryrun_config(), None, "session-1")?;
        let mut session = AnalysisSession::new("session-1");
        session.set_notes("  pizza ");
        session.set_goal(Goal::WeightLoss);

        let printed = prompt_text(Some("  pizza "), Goal::WeightLoss);
        assert_eq!(printed, session.instruction_preview(&analyzer));
        assert!(printed.ends_with("\n\nUser notes:   pizza  | Goal: Weight Loss"));
        Ok(())
    }

    #[test]
    fn analyze_success_writes_text_and_receipt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("plate.png");
        std::fs::write(&image_path, PNG_MAGIC)?;
        let out_dir = temp.path().join("run");

        let code = run_analyze(analyze_args(&image_path, &out_dir)?, dryrun_config())?;
        assert_eq!(code, 0);
        assert_eq!(
            std::fs::read_to_string(out_dir.join(EXPORT_FILE_NAME))?,
            SAMPLE_ANALYSIS
        );
        let receipt: Value =
            serde_json::from_str(&std::fs::read_to_string(out_dir.join(RECEIPT_FILE_NAME))?)?;
        assert_eq!(receipt["outcome"]["status"], "success");
        assert_eq!(
            event_types(&out_dir.join("events.jsonl"))?,
            vec![
                "session_started",
                "analysis_started",
                "analysis_succeeded",
                "analysis_exported",
                "session_finished"
            ]
        );
        Ok(())
    }

    #[test]
    fn analyze_failure_exits_one_and_keeps_only_the_receipt() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("plate.png");
        std::fs::write(&image_path, PNG_MAGIC)?;
        let out_dir = temp.path().join("run");

        // Gemini without an API key fails at call time.
        let code = run_analyze(analyze_args(&image_path, &out_dir)?, AnalyzerConfig::default())?;
        assert_eq!(code, 1);
        assert!(!out_dir.join(EXPORT_FILE_NAME).exists());
        let receipt: Value =
            serde_json::from_str(&std::fs::read_to_string(out_dir.join(RECEIPT_FILE_NAME))?)?;
        assert_eq!(receipt["outcome"]["status"], "failure");
        assert_eq!(
            receipt["outcome"]["message"],
            "GEMINI_API_KEY or GOOGLE_API_KEY not set"
        );
        assert_eq!(receipt["artifacts"]["analysis_path"], Value::Null);
        Ok(())
    }

    #[test]
    fn analyze_unreadable_image_exits_one_without_outputs() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("notes.txt");
        std::fs::write(&image_path, "not a photo")?;
        let out_dir = temp.path().join("run");

        let code = run_analyze(analyze_args(&image_path, &out_dir)?, dryrun_config())?;
        assert_eq!(code, 1);
        assert!(!out_dir.join(EXPORT_FILE_NAME).exists());
        assert!(!out_dir.join(RECEIPT_FILE_NAME).exists());
        assert_eq!(
            event_types(&out_dir.join("events.jsonl"))?,
            vec!["session_started", "session_finished"]
        );
        Ok(())
    }

    #[test]
    fn analyze_args_parse_goal_aliases() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "nutriscope",
            "analyze",
            "--image",
            "lunch.jpg",
            "--notes",
            "leftover pizza",
            "--goal",
            "Weight Loss",
        ])?;
        let Command::Analyze(args) = cli.command else {
            anyhow::bail!("expected analyze command");
        };
        assert_eq!(args.image, PathBuf::from("lunch.jpg"));
        assert_eq!(args.notes.notes.as_deref(), Some("leftover pizza"));
        assert_eq!(args.notes.goal, Goal::WeightLoss);
        Ok(())
    }

    #[test]
    fn unknown_goal_is_rejected() {
        let parsed = Cli::try_parse_from(["nutriscope", "prompt", "--goal", "bulking"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn events_default_to_out_dir() {
        assert_eq!(resolve_events_path(None, None), None);
        assert_eq!(
            resolve_events_path(None, Some(Path::new("runs/a"))),
            Some(PathBuf::from("runs/a/events.jsonl"))
        );
        assert_eq!(
            resolve_events_path(Some(PathBuf::from("e.jsonl")), Some(Path::new("runs/a"))),
            Some(PathBuf::from("e.jsonl"))
        );
    }

    #[test]
    fn save_target_prefers_explicit_path() {
        assert_eq!(
            save_target(Some("mine.txt"), Some(Path::new("out"))),
            PathBuf::from("mine.txt")
        );
        assert_eq!(
            save_target(Some(""), Some(Path::new("out"))),
            Path::new("out").join(EXPORT_FILE_NAME)
        );
        assert_eq!(save_target(None, None), PathBuf::from(EXPORT_FILE_NAME));
    }

    #[test]
    fn model_listing_marks_default() {
        let lines = model_lines(&ModelRegistry::default(), "gemini-2.5-flash");
        assert!(lines.contains(&"* gemini-2.5-flash (gemini, 1048576 input tokens)".to_string()));
        assert!(lines.contains(&"  gemini-2.5-pro (gemini, 1048576 input tokens)".to_string()));
        assert!(lines.contains(&"  dryrun-vision-1 (dryrun)".to_string()));
        assert!(lines.iter().filter(|line| line.starts_with('*')).count() == 1);
    }

    #[test]
    fn receipt_and_events_are_written_for_dryrun_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let image_path = temp.path().join("plate.png");
        std::fs::write(&image_path, PNG_MAGIC)?;
        let out_dir = temp.path().join("run");
        let config = AnalyzerConfig {
            model: "dryrun-vision-1".to_string(),
            ..AnalyzerConfig::default()
        };
        let analyzer = build_analyzer(config, Some(out_dir.join("events.jsonl")), "session-1")?;

        let mut session = AnalysisSession::new("session-1");
        session.load_image(&image_path)?;
        session.set_goal(Goal::Maintenance);
        session.submit(&analyzer);

        let receipt_path = write_session_receipt(&analyzer, &session, None, &out_dir)?;
        assert_eq!(receipt_path, Some(out_dir.join(RECEIPT_FILE_NAME)));
        let receipt: Value =
            serde_json::from_str(&std::fs::read_to_string(out_dir.join(RECEIPT_FILE_NAME))?)?;
        assert_eq!(receipt["request"]["goal"], "maintenance");
        assert_eq!(receipt["request"]["effective_notes"], "Goal: Maintenance");
        assert_eq!(receipt["artifacts"]["analysis_path"], Value::Null);

        let events = std::fs::read_to_string(out_dir.join("events.jsonl"))?;
        let types: Vec<String> = events
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row["type"].as_str().map(str::to_string))
            .collect();
        assert_eq!(
            types,
            vec!["analysis_started", "analysis_succeeded", "analysis_exported"]
        );
        Ok(())
    }
}
