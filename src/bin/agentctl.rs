// src/bin/agentctl.rs
// bin: agentctl | role: CLI surface (A5)
// summary: the crate's own smoke-test harness and local operator tool
// (SPEC_FULL.md §6 CLI surface), analogous to the teacher's Tauri command
// layer but headless. Grounded on the example pack's `evaluate_agent` CLI
// shape (clap::Parser + subcommands, plain eprintln diagnostics, process
// exit code carrying pass/fail).

use std::process::ExitCode;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};

use auto_head_unit_agent::config::AgentConfig;
use auto_head_unit_agent::controller::ExecutionController;
use auto_head_unit_agent::device::transport::AdbShellTransport;
use auto_head_unit_agent::device::DeviceDriver;
use auto_head_unit_agent::domain::action::ActionKind;
use auto_head_unit_agent::error::AgentResult;
use auto_head_unit_agent::history::HistoryRecorder;
use auto_head_unit_agent::knowledge::{EmbeddingProvider, KnowledgeStore};
use auto_head_unit_agent::verify::{ModelDiagnostic, Verifier};
use auto_head_unit_agent::vision::model::{ModelClient, OpenAiCompatibleModelClient};
use auto_head_unit_agent::vision::ocr::TesseractOcrEngine;
use auto_head_unit_agent::vision::VisionResolver;
use auto_head_unit_agent::Orchestrator;

#[derive(Parser)]
#[command(name = "agentctl")]
#[command(about = "Local operator tool for the UI-testing agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a previously authored test case end to end.
    RunTest {
        id: String,
        #[arg(long)]
        no_learned: bool,
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
    },
    /// Run a free-text instruction in standalone mode.
    RunCommand { text: String },
    /// Print the status of the retained run, if any.
    Status,
    /// Request the active run stop at its next suspension point.
    Stop,
    /// Request the active run pause at its next suspension point.
    Pause,
    /// Resume a paused run.
    Resume,
    /// Supply human guidance to a run suspended on `wait_human`.
    Guide {
        text: String,
        #[arg(long)]
        x: Option<i32>,
        #[arg(long)]
        y: Option<i32>,
        #[arg(long)]
        action: Option<String>,
    },
}

/// Stand-in embedding backend for local smoke testing: a deterministic
/// bag-of-trigrams hash into a fixed-width vector. SPEC_FULL.md §4.4 treats
/// the real embedding/vector-index backend as an external collaborator
/// behind `EmbeddingProvider`; this is the CLI's own default, not the crate's.
struct HashingEmbeddingProvider {
    dims: usize,
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> AgentResult<Vec<f32>> {
        let mut vector = vec![0f32; self.dims];
        let normalized: String = text.to_lowercase();
        let bytes = normalized.as_bytes();
        if bytes.len() < 3 {
            return Ok(vector);
        }
        for window in bytes.windows(3) {
            let hash = window.iter().fold(2166136261u32, |acc, b| (acc ^ *b as u32).wrapping_mul(16777619));
            vector[(hash as usize) % self.dims] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

fn build_orchestrator(config: &AgentConfig) -> AgentResult<Orchestrator> {
    let controller = ExecutionController::new();

    let transport = Arc::new(AdbShellTransport::new());
    let device_serial = config.device_serial.clone().unwrap_or_default();
    let device = Arc::new(DeviceDriver::new(
        transport,
        controller.clone(),
        device_serial,
        config.retry_count,
        config.device_timeout_ms,
    ));

    let model: Arc<dyn ModelClient> = Arc::new(OpenAiCompatibleModelClient::new(
        config.model_endpoint.clone(),
        config.model_api_key.clone(),
        config.model_name.clone(),
        config.model_temperature,
    ));

    let ocr = Arc::new(TesseractOcrEngine::default());
    let vision = Arc::new(VisionResolver::new(controller.clone(), ocr, model.clone()));

    let verifier = Verifier::new(controller.clone(), config.ssim_threshold, config.change_threshold_pct)
        .with_diagnostic_model(Arc::new(ModelDiagnostic::new(model.clone())));
    let verifier = Arc::new(verifier);

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashingEmbeddingProvider { dims: 256 });
    let knowledge = Arc::new(KnowledgeStore::open(config, embedder)?);
    let history = Arc::new(HistoryRecorder::new(config.test_history_dir()));

    Ok(Orchestrator::new(
        device, vision, verifier, knowledge, history, model, controller, config.clone(),
    ))
}

fn parse_action_kind(s: &str) -> Option<ActionKind> {
    match s.to_lowercase().as_str() {
        "tap" => Some(ActionKind::Tap),
        "double_tap" | "double-tap" => Some(ActionKind::DoubleTap),
        "long_press" | "long-press" => Some(ActionKind::LongPress),
        "swipe" => Some(ActionKind::Swipe),
        "input_text" | "type" => Some(ActionKind::InputText),
        "press_home" | "home" => Some(ActionKind::PressHome),
        "press_back" | "back" => Some(ActionKind::PressBack),
        "press_enter" | "enter" => Some(ActionKind::PressEnter),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::default().merge_env();

    let orchestrator = match build_orchestrator(&config) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("failed to initialize agent: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::RunTest { id, no_learned, max_retries } => {
            let result = orchestrator.run_test(&id, !no_learned, max_retries).await;
            print_result(&result);
            exit_for(result.success)
        }
        Command::RunCommand { text } => {
            let result = orchestrator.execute_command(&text, config.max_retries).await;
            print_result(&result);
            exit_for(result.success)
        }
        Command::Status => {
            match orchestrator.get_status().await {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot).unwrap_or_default()),
                None => println!("no run has been started"),
            }
            ExitCode::SUCCESS
        }
        Command::Stop => {
            orchestrator.stop();
            println!("stop requested");
            ExitCode::SUCCESS
        }
        Command::Pause => {
            orchestrator.pause();
            println!("pause requested");
            ExitCode::SUCCESS
        }
        Command::Resume => {
            orchestrator.resume();
            println!("resume requested");
            ExitCode::SUCCESS
        }
        Command::Guide { text, x, y, action } => {
            let coordinate = match (x, y) {
                (Some(x), Some(y)) => Some((x, y)),
                _ => None,
            };
            let action_kind = action.as_deref().and_then(parse_action_kind);
            let result = orchestrator.send_guidance(Some(text), coordinate, action_kind).await;
            print_result(&result);
            exit_for(result.success)
        }
    }
}

fn print_result(result: &auto_head_unit_agent::RunResult) {
    println!("{}", serde_json::to_string_pretty(result).unwrap_or_default());
}

fn exit_for(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
