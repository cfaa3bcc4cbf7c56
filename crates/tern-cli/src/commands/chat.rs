use base64::Engine;
use console::style;
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::info;

use tern_autonomy::{ApprovalGate, ApprovalReceiver, ApprovalRequest, ApprovalResponse, ExecutionMode};
use tern_config::TernConfig;
use tern_core::{Content, ContentBlock, TernError, image_media_type};
use tern_runtime::{
    BuiltinTools, DEFAULT_SYSTEM_PROMPT, GitWorkTree, InterruptController, Orchestrator,
    ToolDispatcher, TurnEvent, TurnOutcome, UndoJournal, UsageLedger,
};

use crate::provider::build_provider;

pub(super) async fn cmd_chat(
    config: TernConfig,
    initial_prompt: Option<String>,
) -> tern_core::Result<()> {
    if let Some(dir) = &config.agent.work_dir {
        std::env::set_current_dir(dir)?;
    }

    let provider = build_provider(&config)?;
    let mode: ExecutionMode = config.agent.mode.parse().map_err(TernError::Config)?;

    let undo = Arc::new(Mutex::new(UndoJournal::new()));
    let tools = Arc::new(
        BuiltinTools::new(
            Duration::from_secs(config.tools.shell_timeout_secs),
            config.tools.read_file_max_lines,
        )
        .with_max_output_bytes(config.tools.max_output_bytes)
        .with_llm(provider.clone())
        .with_undo(undo.clone()),
    );

    let mut gate = ApprovalGate::with_timeout_secs(config.approval.timeout_secs);
    let mut approvals = gate
        .take_receiver()
        .ok_or_else(|| TernError::Config("approval receiver already taken".into()))?;
    let dispatcher = ToolDispatcher::new(tools, mode, config.tools.output_limit_tokens)
        .with_approver(Arc::new(gate));

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let system_prompt = config
        .agent
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    let mut orch = Orchestrator::new(system_prompt, provider, dispatcher)
        .with_ledger(UsageLedger::new(
            config.cache.ttl_minutes_for(&config.agent.provider),
        ))
        .with_undo(undo)
        .with_events(event_tx)
        .with_max_round_trips(config.agent.max_round_trips as usize);
    if config.tools.git_undo
        && let Some(git) = GitWorkTree::detect(&std::env::current_dir()?).await
    {
        info!(root = %git.root().display(), "undo snapshots the git work tree");
        orch = orch.with_git(git);
    }

    let interrupts = Arc::new(InterruptController::new());
    let _listener = interrupts.listen_for_ctrl_c();

    print_banner(&config, mode, &orch);

    let mut session = Session {
        orch: &mut orch,
        interrupts: &interrupts,
        approvals: &mut approvals,
        events: &mut events,
    };

    if let Some(prompt) = initial_prompt.filter(|p| !p.trim().is_empty()) {
        println!("{} {}", style("you>").cyan(), prompt);
        session.turn(Content::from(prompt)).await;
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut pending_images: Vec<ContentBlock> = Vec::new();

    loop {
        eprint!("{} ", style("you>").cyan());
        std::io::stderr().flush().ok();

        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break, // EOF
            },
            _ = session.interrupts.forced() => {
                eprintln!();
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed {
            "exit" | "quit" => break,
            "/undo" => {
                if session.orch.undo_last_turn().await {
                    println!("{}", style("Reverted the last turn.").yellow());
                } else {
                    println!("{}", style("Nothing to undo.").dim());
                }
                continue;
            }
            "/cost" => {
                println!("{}", style(session.orch.ledger().summary()).dim());
                continue;
            }
            _ => {}
        }
        if let Some(path) = trimmed.strip_prefix("/image") {
            match load_image(path.trim()).await {
                Ok(block) => {
                    pending_images.push(block);
                    println!(
                        "{}",
                        style(format!(
                            "Image attached ({} pending); it will be sent with your next message.",
                            pending_images.len()
                        ))
                        .dim()
                    );
                }
                Err(e) => eprintln!("{}", style(format!("Error: {e}")).red()),
            }
            continue;
        }

        let content = if pending_images.is_empty() {
            Content::from(trimmed)
        } else {
            let mut blocks = vec![ContentBlock::text(trimmed)];
            blocks.append(&mut pending_images);
            Content::Blocks(blocks)
        };
        session.turn(content).await;
    }

    println!("{}", style(format!("Session cost: {}", orch.ledger().summary())).dim());
    Ok(())
}

/// Borrowed pieces the turn loop needs while a turn is running.
struct Session<'a> {
    orch: &'a mut Orchestrator,
    interrupts: &'a Arc<InterruptController>,
    approvals: &'a mut ApprovalReceiver,
    events: &'a mut mpsc::UnboundedReceiver<TurnEvent>,
}

impl Session<'_> {
    /// Run one turn, answering approval prompts and rendering progress.
    async fn turn(&mut self, content: Content) {
        let token = self.interrupts.arm();
        let outcome = {
            let turn = self.orch.run_turn(content, &token);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    outcome = &mut turn => break Some(outcome),
                    Some((request, reply)) = self.approvals.recv() => {
                        let answer = ask_approval(request).await;
                        let _ = reply.send(answer);
                    }
                    Some(event) = self.events.recv() => render_event(event),
                    _ = self.interrupts.forced() => break None,
                }
            }
        };
        self.interrupts.disarm();
        if outcome.is_none() {
            self.orch.abandon_turn();
        }

        while let Ok(event) = self.events.try_recv() {
            render_event(event);
        }
        match outcome {
            Some(TurnOutcome::FinalAnswer(_)) => {}
            // Already reported through the event stream.
            Some(TurnOutcome::Interrupted)
            | Some(TurnOutcome::Failed(_))
            | Some(TurnOutcome::RoundTripLimit) => {}
            None => eprintln!("{}", style("Turn abandoned.").yellow()),
        }
        println!();
    }
}

fn print_banner(config: &TernConfig, mode: ExecutionMode, orch: &Orchestrator) {
    println!("{}", style("Tern").bold());
    println!(
        "   mode: {}  provider: {}  model: {}  cache: {}",
        style(mode).yellow(),
        config.agent.provider,
        style(orch.provider().model()).green(),
        orch.cache_strategy().name()
    );
    println!("   Type 'exit' or Ctrl+C to quit, Ctrl+C during a turn to stop it");
    println!("   Commands: /undo  /image PATH  /cost");
    println!();
}

async fn ask_approval(request: ApprovalRequest) -> ApprovalResponse {
    let args = serde_json::to_string_pretty(&request.tool_args)
        .unwrap_or_else(|_| request.tool_args.to_string());
    eprintln!();
    eprintln!("{} {}", style("⚠ Approval required:").yellow().bold(), style(&request.tool_name).bold());
    eprintln!("{}", style(args).dim());

    let question = request.question.clone();
    let answer = tokio::task::spawn_blocking(move || {
        dialoguer::Confirm::with_theme(&dialoguer::theme::ColorfulTheme::default())
            .with_prompt(question)
            .default(true)
            .interact()
    })
    .await;

    match answer {
        Ok(Ok(true)) => ApprovalResponse::Approved,
        _ => {
            eprintln!("{}", style("Tool execution cancelled.").yellow());
            ApprovalResponse::Denied
        }
    }
}

fn render_event(event: TurnEvent) {
    match event {
        TurnEvent::AssistantText(text) => {
            println!("{} {}", style("tern>").green().bold(), text.trim());
        }
        TurnEvent::Reasoning(text) => {
            eprintln!("{}", style(format!("💭 {}", text.trim())).dim());
        }
        TurnEvent::ToolCall { name, arguments } => {
            eprintln!(
                "{} {} {}",
                style("🔧").yellow(),
                style(name).bold(),
                style(one_line(&arguments.to_string(), 160)).dim()
            );
        }
        TurnEvent::ToolResult { preview, .. } => {
            eprintln!("   {}", style(one_line(&preview, 200)).dim());
        }
        TurnEvent::Usage { usage, total_cost } => {
            eprintln!(
                "{}",
                style(format!(
                    "   [{} in ({} cached) / {} out, ${:.4}; session ${:.4}]",
                    usage.prompt_tokens,
                    usage.cached_tokens,
                    usage.output_tokens,
                    usage.cost_usd,
                    total_cost
                ))
                .dim()
            );
        }
        TurnEvent::CacheRegression(regression) => {
            eprintln!("{}", style(format!("   ⚠ {regression}")).yellow());
        }
        TurnEvent::Error(message) => {
            eprintln!("{}", style(format!("Error: {message}")).red());
        }
        TurnEvent::Interrupted => {
            eprintln!("{}", style("Interrupted.").yellow());
        }
    }
}

fn one_line(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", flat.chars().take(max).collect::<String>())
    }
}

async fn load_image(path: &str) -> tern_core::Result<ContentBlock> {
    if path.is_empty() {
        return Err(TernError::Config("usage: /image PATH".into()));
    }
    let path = Path::new(path);
    let media_type = image_media_type(path).ok_or_else(|| {
        TernError::Config(format!("unsupported image type: {}", path.display()))
    })?;
    let bytes = tokio::fs::read(path).await?;
    let data = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(ContentBlock::image(media_type, data))
}
