use clap::{Parser, Subcommand};

/// A streaming Gemini chat for the terminal, with voice notes and
/// persistent history.
#[derive(Parser, Debug)]
#[command(name = "banter", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long)]
    pub config: Option<String>,

    /// Log filter override (e.g. "banter=debug").
    #[arg(long)]
    pub log_level: Option<String>,

    /// Run without the history service even if one is configured.
    #[arg(long)]
    pub no_store: bool,

    /// Persona id to record on a newly created chat.
    #[arg(long)]
    pub persona: Option<String>,

    /// Resume a stored chat by id instead of starting a new one.
    #[arg(long)]
    pub resume: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an interactive chat (the default when no command is given).
    Chat,
    /// List stored chats.
    Chats {
        /// Page to fetch.
        #[arg(long, default_value_t = 0)]
        page: u32,
    },
}

pub fn parse() -> Args {
    Args::parse()
}
