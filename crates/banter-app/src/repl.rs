//! Interactive terminal loop.
//!
//! Reads lines from stdin, routes slash commands, and prints streamed
//! answers as they flush. Ctrl-C during an answer cancels that turn
//! instead of quitting.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::debug;

use banter_capture::{format_elapsed, Recorder};
use banter_common::SessionEvent;
use banter_engine::{
    Attachment, AttachmentUploader, ChatOrchestrator, OutgoingMessage, SendOutcome,
    FAILURE_NOTICE,
};

pub struct Repl {
    orchestrator: Arc<ChatOrchestrator>,
    uploader: AttachmentUploader,
    recorder: Recorder,
    pending: Option<Attachment>,
    ticker: Option<JoinHandle<()>>,
}

impl Repl {
    pub fn new(
        orchestrator: Arc<ChatOrchestrator>,
        uploader: AttachmentUploader,
        recorder: Recorder,
    ) -> Self {
        Self {
            orchestrator,
            uploader,
            recorder,
            pending: None,
            ticker: None,
        }
    }

    pub async fn run(mut self) -> std::io::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut stdout = tokio::io::stdout();
        let mut lines = stdin.lines();

        println!("type a message, or /help for commands");

        loop {
            stdout.write_all(self.prompt().as_bytes()).await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                println!();
                break;
            };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            match input {
                "/quit" | "/exit" => break,
                "/help" => print_help(),
                "/reset" => {
                    self.orchestrator.reset().await;
                    self.pending = None;
                    println!("conversation cleared");
                }
                "/record" => self.start_recording().await,
                "/stop" => self.stop_recording().await,
                _ if input.starts_with("/attach") => {
                    let path = input.trim_start_matches("/attach").trim();
                    if path.is_empty() {
                        println!("usage: /attach <path>");
                    } else {
                        self.attach(Path::new(path)).await;
                    }
                }
                _ if input.starts_with('/') => {
                    println!("unknown command: {input} (try /help)");
                }
                _ => self.send_message(input).await,
            }
        }

        Ok(())
    }

    fn prompt(&self) -> String {
        if self.recorder.is_recording() {
            return "(recording) > ".to_string();
        }
        match &self.pending {
            Some(attachment) => format!("[{}] > ", attachment.display_name),
            None => "> ".to_string(),
        }
    }

    async fn start_recording(&mut self) {
        if self.recorder.is_recording() {
            println!("already recording, /stop to finish");
            return;
        }
        match self.recorder.start().await {
            Ok(mut elapsed) => {
                println!("recording, /stop to finish");
                self.ticker = Some(tokio::spawn(async move {
                    while elapsed.changed().await.is_ok() {
                        let display = elapsed.borrow_and_update().clone();
                        eprint!("\r\u{25cf} {display} ");
                        let _ = std::io::stderr().flush();
                    }
                }));
            }
            Err(e) => eprintln!("{e}"),
        }
    }

    async fn stop_recording(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
            eprint!("\r");
        }
        match self.recorder.stop().await {
            Ok(Some(clip)) => {
                println!(
                    "clip recorded ({}), uploading",
                    format_elapsed(clip.duration.as_secs())
                );
                self.attach(&clip.path).await;
            }
            Ok(None) => {}
            Err(e) => eprintln!("{e}"),
        }
    }

    async fn attach(&mut self, path: &Path) {
        match self.uploader.upload(path).await {
            Ok(attachment) => {
                println!(
                    "attached {} ({}), it will ride along with your next message",
                    attachment.display_name, attachment.mime_type
                );
                self.pending = Some(attachment);
            }
            Err(e) => eprintln!("{e}"),
        }
    }

    async fn send_message(&mut self, text: &str) {
        let mut message = OutgoingMessage::text(text);
        if let Some(attachment) = self.pending.take() {
            message = message.with_attachment(attachment);
        }

        let mut events = self.orchestrator.subscribe();
        let cancel = self.orchestrator.cancel_handle();
        let send = self.orchestrator.send(message);
        tokio::pin!(send);

        let mut printed = 0usize;
        let outcome = loop {
            tokio::select! {
                outcome = &mut send => break outcome,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                }
                event = events.recv() => {
                    if let Ok(SessionEvent::TextFlush { content }) = event {
                        print_delta(&mut printed, &content);
                    }
                }
            }
        };

        match outcome {
            Ok(SendOutcome::Completed(turn)) => {
                print_delta(&mut printed, &turn.text_content());
                println!();
            }
            Ok(SendOutcome::Cancelled) => {
                println!("\n[cancelled]");
            }
            Ok(SendOutcome::Failed(e)) => {
                debug!(error = %e, "turn failed");
                println!("\n{FAILURE_NOTICE}");
            }
            Err(e) => eprintln!("{e}"),
        }
    }
}

/// Print only what changed since the last snapshot. A snapshot that
/// shrank (the answer was replaced after a tool round) restarts on a
/// fresh line.
fn print_delta(printed: &mut usize, content: &str) {
    if content.len() < *printed || !content.is_char_boundary(*printed) {
        println!();
        print!("{content}");
    } else {
        print!("{}", &content[*printed..]);
    }
    *printed = content.len();
    let _ = std::io::stdout().flush();
}

fn print_help() {
    println!("  /record        start recording a voice note");
    println!("  /stop          stop recording and attach the clip");
    println!("  /attach <path> attach a file to your next message");
    println!("  /reset         forget the conversation");
    println!("  /quit          leave");
    println!("  Ctrl-C         cancel the answer being streamed");
}
