//! codemate - local code assistant CLI

mod commands;
mod config;
mod manage;
mod render;
mod utils;

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use mate_agent::{
    ConversationStore, Error as AgentError, RuleStore, Session, SessionEvent, SessionHandle,
    TomlSettingsFile, TurnOutcome,
};
use mate_ai::{CodeTask, ContextTokens, InferenceProvider, OllamaProvider, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use commands::{CommandResult, ModelCommand};
use render::Renderer;

/// codemate - chat with a local model about code
#[derive(Parser, Debug)]
#[command(name = "codemate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: mistral)
    #[arg(short, long)]
    model: Option<String>,

    /// Inference server URL (default: http://localhost:11434)
    #[arg(long)]
    url: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Context window requested from the server
    #[arg(long)]
    context_size: Option<u32>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Resume a saved conversation by ID
    #[arg(long)]
    resume: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Interactive chat (default)
    Chat,
    /// Manage post-processing rules
    Rules {
        #[command(subcommand)]
        action: manage::RuleAction,
    },
    /// Manage post-processing profiles
    Profiles {
        #[command(subcommand)]
        action: manage::ProfileAction,
    },
    /// Manage saved conversations
    Conversations {
        #[command(subcommand)]
        action: manage::ConversationAction,
    },
    /// Complete the code in a file
    Complete { file: PathBuf },
    /// Explain the code in a file
    Explain { file: PathBuf },
    /// Suggest a refactoring of the code in a file
    Refactor { file: PathBuf },
    /// List models installed on the server
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("codemate=debug,mate_agent=debug,mate_ai=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let mut client = cfg.client_config();
    if let Some(url) = args.url {
        client.base_url = url;
    }
    if let Some(model) = args.model {
        client.model = model;
    }
    if let Some(temperature) = args.temperature {
        client.temperature = temperature;
    }
    if let Some(context_size) = args.context_size {
        client.context_size = context_size;
    }

    let provider: Arc<dyn InferenceProvider> = Arc::new(OllamaProvider::from_config(&client)?);
    let conversations = ConversationStore::new(cfg.chats_dir());

    let task = match args.action.unwrap_or(Action::Chat) {
        Action::Chat => None,
        Action::Rules { action } => return manage::rules(&cfg.rules_path(), action),
        Action::Profiles { action } => return manage::profiles(&cfg.rules_path(), action),
        Action::Conversations { action } => {
            return manage::conversations(&conversations, action, provider.as_ref(), &client)
                .await;
        }
        Action::Models => return manage::list_models(provider.as_ref(), &client.model).await,
        Action::Complete { file } => Some((CodeTask::Complete, file)),
        Action::Explain { file } => Some((CodeTask::Explain, file)),
        Action::Refactor { file } => Some((CodeTask::Refactor, file)),
    };
    if let Some((task, file)) = task {
        return manage::run_task(task, &file, provider.as_ref(), &client).await;
    }

    if !provider.check_connection().await {
        eprintln!(
            "Warning: cannot reach {} (is Ollama running?)",
            client.base_url
        );
    }

    let rules = RuleStore::open(TomlSettingsFile::new(cfg.rules_path()))
        .context("Failed to load post-processing rules")?
        .into_shared();
    let session = Session::new(client, provider.clone(), rules);
    let mut chat = Chat::new(session, provider, conversations);

    // Resume conversation if specified
    if let Some(ref id) = args.resume {
        chat.load(id)?;
    }

    // Non-interactive mode
    if let Some(command) = args.command {
        return chat.run_command(&command).await;
    }

    chat.run_interactive().await
}

/// Run `fut` to completion while printing session events.
///
/// Ctrl-C stops the in-flight turn instead of killing the process.
async fn drive<F: Future>(
    fut: F,
    events: &mut broadcast::Receiver<SessionEvent>,
    handle: &SessionHandle,
    renderer: &mut Renderer,
) -> F::Output {
    tokio::pin!(fut);
    let mut open = true;
    let output = loop {
        tokio::select! {
            output = &mut fut => break output,
            event = events.recv(), if open => match event {
                Ok(event) => renderer.print(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} session events", n);
                }
                Err(broadcast::error::RecvError::Closed) => open = false,
            },
            _ = tokio::signal::ctrl_c() => handle.stop(),
        }
    };

    // Events sent just before the future resolved
    while let Ok(event) = events.try_recv() {
        renderer.print(&event);
    }
    output
}

/// Interactive chat state around a [`Session`]
struct Chat {
    session: Session,
    provider: Arc<dyn InferenceProvider>,
    conversations: ConversationStore,
    events: broadcast::Receiver<SessionEvent>,
    renderer: Renderer,
    /// Context after each completed turn, keyed by the history index of its reply
    snapshots: BTreeMap<usize, ContextTokens>,
}

impl Chat {
    fn new(
        session: Session,
        provider: Arc<dyn InferenceProvider>,
        conversations: ConversationStore,
    ) -> Self {
        let events = session.subscribe();
        Self {
            session,
            provider,
            conversations,
            events,
            renderer: Renderer::new(),
            snapshots: BTreeMap::new(),
        }
    }

    async fn run_command(&mut self, command: &str) -> anyhow::Result<()> {
        println!("codemate> {}", command);
        println!();

        let report = self.send(command).await?;
        if report.outcome == TurnOutcome::Aborted {
            tracing::debug!("One-shot turn stopped after {} chunks", report.chunk_count);
        }
        Ok(())
    }

    async fn run_interactive(&mut self) -> anyhow::Result<()> {
        // Show minimal startup info (only if TTY)
        if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
            let model = &self.session.config().model;
            match self.session.current_conversation_id() {
                Some(id) => eprintln!("codemate ({}) conversation: {}", model, id),
                None => eprintln!("codemate ({})", model),
            }
            eprintln!("Type /help for commands.");
            eprintln!();
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    break;
                }
            };
            // EOF
            let Some(line) = line else { break };

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            // Handle slash commands
            if let Some(result) =
                commands::execute_command(input, &self.session, &self.conversations)
            {
                if !self.handle_command(result).await {
                    break;
                }
                println!();
                continue;
            }

            println!();
            if let Err(e) = self.send(input).await {
                match e.downcast_ref::<AgentError>() {
                    Some(AgentError::Ai(ai)) if ai.is_context_overflow() => {
                        println!("The context window is full. Try /compress or /clear.");
                    }
                    Some(AgentError::Ai(ai)) if ai.is_connection_error() => {
                        println!("Cannot reach {}.", self.session.config().base_url);
                    }
                    // Already shown inline with the reply
                    Some(AgentError::Ai(_)) => {}
                    _ => eprintln!("Error: {}", e),
                }
            }
            println!();
        }

        Ok(())
    }

    /// Stream one turn, recording its context snapshot for /fork
    async fn send(&mut self, text: &str) -> anyhow::Result<mate_agent::TurnReport> {
        let handle = self.session.handle();
        let report = drive(
            self.session.submit(text),
            &mut self.events,
            &handle,
            &mut self.renderer,
        )
        .await?;

        if let Some(snapshot) = &report.context_snapshot {
            let reply_index = self.session.history().len().saturating_sub(1);
            self.snapshots.insert(reply_index, snapshot.clone());
        }
        Ok(report)
    }

    /// Returns `false` when the REPL should exit
    async fn handle_command(&mut self, result: CommandResult) -> bool {
        match result {
            CommandResult::Message(msg) => println!("{}", msg),
            CommandResult::Exit => return false,
            CommandResult::Unknown(cmd) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
            CommandResult::Clear => match self.session.clear() {
                Ok(()) => {
                    self.snapshots.clear();
                    println!("Cleared conversation.");
                }
                Err(e) => println!("Failed to clear: {}", e),
            },
            CommandResult::Compress => {
                let handle = self.session.handle();
                let result = drive(
                    self.session.compress(),
                    &mut self.events,
                    &handle,
                    &mut self.renderer,
                )
                .await;
                match result {
                    Ok(_) => self.reseed_snapshots(),
                    // Failures are reported by the compression notice itself
                    Err(AgentError::Ai(_)) => {}
                    Err(e) => println!("Cannot compress: {}", e),
                }
            }
            CommandResult::Save(name) => match self.save(name) {
                Ok(id) => println!("Saved as {}", id),
                Err(e) => println!("Failed to save: {}", e),
            },
            CommandResult::Load(id) => {
                if let Err(e) = self.load(&id) {
                    println!("{}", e);
                }
            }
            CommandResult::ForkFrom(index) => self.fork(index),
            CommandResult::ListModels => match self.provider.list_models().await {
                Ok(models) => println!(
                    "{}",
                    ModelCommand::list_models_text(&self.session.config().model, &models)
                ),
                Err(e) => println!("Failed to list models: {}", e),
            },
            CommandResult::ChangeModel(query) => self.change_model(&query).await,
        }
        true
    }

    fn save(&mut self, name: Option<String>) -> anyhow::Result<String> {
        let existing = match self.session.current_conversation_id() {
            Some(id) => self.conversations.load(id)?,
            None => None,
        };

        let id = existing
            .as_ref()
            .map(|c| c.id.clone())
            .unwrap_or_else(ConversationStore::generate_id);
        let name = name
            .or_else(|| existing.as_ref().map(|c| c.name.clone()))
            .unwrap_or_else(|| self.default_name());
        let created_at = existing.map(|c| c.created_at).unwrap_or_else(Utc::now);

        let conversation = self.session.to_conversation(id.clone(), name, created_at);
        self.conversations.save(&conversation)?;
        self.session.set_current_conversation_id(Some(id.clone()));
        Ok(id)
    }

    /// First user message, shortened
    fn default_name(&self) -> String {
        self.session
            .history()
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| utils::truncate_chars(m.content.lines().next().unwrap_or_default(), 40))
            .unwrap_or_else(|| "Untitled conversation".to_string())
    }

    fn load(&mut self, id: &str) -> anyhow::Result<()> {
        let conversation = self
            .conversations
            .load(id)?
            .with_context(|| format!("No conversation with id {}", id))?;
        self.session.restore(&conversation)?;
        self.reseed_snapshots();

        self.skip_replay();
        println!(
            "Loaded '{}' ({} messages)",
            conversation.name,
            conversation.messages.len()
        );
        Ok(())
    }

    fn fork(&mut self, index: usize) {
        let history = self.session.history();
        let Some(messages) = history.get(..=index).map(|m| m.to_vec()) else {
            println!("Invalid index {}", index);
            return;
        };
        let context = self
            .snapshots
            .range(..=index)
            .next_back()
            .map(|(_, context)| context.clone())
            .unwrap_or_default();

        match self.session.fork(context, &messages) {
            Ok(()) => {
                self.snapshots.retain(|&i, _| i <= index);
                self.skip_replay();
                println!(
                    "Forked at message {} ({} messages kept). Continue from this point.",
                    index,
                    messages.len()
                );
            }
            Err(e) => println!("Failed to fork: {}", e),
        }
    }

    /// Track replayed history without printing it
    fn skip_replay(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.renderer.render(&event);
        }
    }

    /// After a restore or compress the whole context belongs to the last message
    fn reseed_snapshots(&mut self) {
        self.snapshots.clear();
        let context = self.session.context();
        if let Some(last) = self.session.history().len().checked_sub(1) {
            if !context.is_empty() {
                self.snapshots.insert(last, context.to_vec());
            }
        }
    }

    async fn change_model(&mut self, query: &str) {
        let name = match self.provider.list_models().await {
            Ok(models) => match ModelCommand::find(query, &models) {
                Some(model) => model.name.clone(),
                None => {
                    println!(
                        "No model found matching '{}'\nUse /models to list available models",
                        query
                    );
                    return;
                }
            },
            Err(e) => {
                tracing::warn!("Could not list models, using '{}' as given: {}", query, e);
                query.to_string()
            }
        };

        println!("Switched to: {}", name);
        if let Ok(info) = self.provider.model_info(&name).await {
            if let Some(length) = info.context_length() {
                let requested = self.session.config().context_size;
                println!("Model context length: {} (requesting {})", length, requested);
            }
        }
        self.session.set_model(name);
    }
}
