mod cli;
mod repl;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use banter_capture::{ProcessDevice, Recorder};
use banter_common::{ChatId, ChatSeed, HistoryStore, StoredMessage};
use banter_config::BanterConfig;
use banter_engine::{
    AttachmentUploader, ChatOrchestrator, GeminiClient, GeminiConfig, PollPolicy, SessionManager,
    ToolRegistry,
};
use banter_store::StoreClient;

/// Load environment variables from a .env file (KEY=VALUE lines).
fn load_dotenv() {
    let manifest_dir = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let candidates = [
        // Workspace root, two levels up from crates/banter-app/
        manifest_dir.join("..").join("..").join(".env"),
        // Current directory
        std::path::PathBuf::from(".env"),
    ];

    for path in &candidates {
        if let Ok(contents) = std::fs::read_to_string(path) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().trim_matches('"').trim_matches('\'');
                    if std::env::var(key).is_err() {
                        std::env::set_var(key, value);
                    }
                }
            }
            return;
        }
    }
}

fn default_recording_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("banter").join("recordings"))
        .unwrap_or_else(|| std::env::temp_dir().join("banter"))
}

#[tokio::main]
async fn main() {
    // Load .env file before anything else
    load_dotenv();

    // Parse CLI arguments
    let args = cli::parse();

    // Load config first: its logging filter seeds the subscriber. Any
    // load error is stashed and reported once logging is up.
    let loaded = match &args.config {
        Some(path) => banter_config::load_from_path(std::path::Path::new(path)),
        None => banter_config::load_config(),
    };
    let (config, config_err) = match loaded {
        Ok(config) => (config, None),
        Err(e) => (BanterConfig::default(), Some(e.to_string())),
    };

    // Initialize logging
    let log_directive = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.filter)
        .to_string();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                log_directive
                    .parse()
                    .unwrap_or_else(|_| "banter=info".parse().unwrap()),
            ),
        )
        .init();

    tracing::info!("Banter v{} starting", env!("CARGO_PKG_VERSION"));
    if let Some(e) = config_err {
        tracing::warn!("Config load failed, using defaults: {e}");
    }

    // History service client, unless disabled
    let store = (config.store.enabled && !args.no_store)
        .then(|| Arc::new(StoreClient::new(config.store.base_url.clone())));

    if let Some(cli::Command::Chats { page }) = args.command {
        list_chats(store.as_deref(), page).await;
        return;
    }

    let api_key = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => {
            eprintln!("GEMINI_API_KEY is not set; export it or add it to .env");
            std::process::exit(1);
        }
    };

    let client = Arc::new(GeminiClient::new(
        GeminiConfig::new(api_key)
            .with_model(config.model.name.clone())
            .with_api_base(config.model.api_base.clone())
            .with_temperature(config.model.temperature)
            .with_max_output_tokens(config.model.max_output_tokens),
    ));

    // Resolve the chat this run writes to: resume an existing one or
    // create a fresh record.
    let mut binding: Option<ChatId> = None;
    let mut restored: Vec<StoredMessage> = Vec::new();
    if let Some(store) = &store {
        if let Some(resume) = &args.resume {
            let chat = ChatId::from(resume.as_str());
            match store.messages(&chat).await {
                Ok(stored) => {
                    tracing::info!("Resuming chat {chat} ({} messages)", stored.len());
                    restored = stored;
                    binding = Some(chat);
                }
                Err(e) => {
                    eprintln!("could not resume chat {resume}: {e}");
                    std::process::exit(1);
                }
            }
        } else {
            let name = format!("Chat {}", chrono::Local::now().format("%Y-%m-%d %H:%M"));
            let mut seed = ChatSeed::new(name);
            if let Some(persona) = args.persona.clone().or_else(|| config.store.persona_id.clone())
            {
                seed = seed.with_persona(persona);
            }
            match store.create_chat(&seed).await {
                Ok(chat) => binding = Some(chat),
                Err(e) => {
                    tracing::warn!("Chat creation failed, history is off for this run: {e}");
                }
            }
        }
    }

    // Tool registry with the builtin handlers
    let mut registry = ToolRegistry::new();
    tools::register_builtin_tools(&mut registry);
    tracing::info!("Tool registry loaded ({} tools)", registry.len());

    let mut manager =
        SessionManager::new(client.clone()).with_tools_enabled(config.chat.tools_enabled);
    if let Some(instruction) = &config.chat.system_instruction {
        manager = manager.with_system_instruction(instruction.clone());
    }

    let mut orchestrator = ChatOrchestrator::new(manager, registry)
        .with_flush_interval(Duration::from_millis(config.chat.flush_interval_ms))
        .with_max_tool_rounds(config.chat.max_tool_rounds);
    if let (Some(store), Some(chat)) = (&store, &binding) {
        orchestrator = orchestrator.with_store(store.clone(), chat.clone());
    }
    let orchestrator = Arc::new(orchestrator);
    if !restored.is_empty() {
        orchestrator.restore(&restored).await;
        println!("restored {} messages", restored.len());
    }

    let mut uploader = AttachmentUploader::new(client.clone(), config.upload.max_file_bytes)
        .with_policy(PollPolicy {
            max_attempts: config.upload.poll_max_attempts,
            interval: Duration::from_millis(config.upload.poll_interval_ms),
        });
    if let (Some(store), Some(chat)) = (&store, &binding) {
        uploader = uploader.with_bridge(store.clone(), chat.clone());
    }

    let device = Arc::new(ProcessDevice::new(
        config.recording.command.clone(),
        config.recording.args.clone(),
    ));
    let output_dir = config
        .recording
        .output_dir
        .clone()
        .unwrap_or_else(default_recording_dir);
    let recorder = Recorder::new(device, output_dir);

    println!(
        "banter v{} ({}), history {}",
        env!("CARGO_PKG_VERSION"),
        config.model.name,
        if binding.is_some() { "on" } else { "off" }
    );

    if let Err(e) = repl::Repl::new(orchestrator, uploader, recorder).run().await {
        tracing::error!("Terminal loop failed: {e}");
    }
    tracing::info!("Shutdown complete");
}

async fn list_chats(store: Option<&StoreClient>, page: u32) {
    let Some(store) = store else {
        eprintln!("history service is disabled; enable [store] in the config");
        std::process::exit(1);
    };
    match store.chats(page).await {
        Ok(listing) => {
            for chat in &listing.items {
                println!("{}  {}  {}", chat.id, chat.created_at, chat.name);
            }
            println!("page {} of {}", listing.page + 1, listing.total_pages.max(1));
        }
        Err(e) => {
            eprintln!("could not list chats: {e}");
            std::process::exit(1);
        }
    }
}
