//! Command-line entry point for the telepty bridge.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use telepty_core::BridgeOptions;
use telepty_core::config;
use tracing_subscriber::EnvFilter;

/// Drive a local command-line program from Telegram, through a PTY.
#[derive(Debug, Parser)]
#[command(name = "telepty", version, about)]
struct Cli {
    /// Authorized peer chat id. Falls back to TELEPTY_CHAT_ID.
    #[arg(long = "chat-id", value_name = "ID")]
    chat_id: Option<i64>,

    /// Discover-my-id mode: echo the sender id of the first inbound
    /// message and exit.
    #[arg(long)]
    register: bool,

    /// Bridge appends to this file instead of the program's stdout.
    #[arg(short = 'o', long = "output-stream", value_name = "PATH")]
    output_stream: Option<PathBuf>,

    /// Suppress mirroring of program output to this terminal.
    #[arg(long = "no-mirror")]
    no_mirror: bool,

    /// Append a trailing Enter after each forwarded message (default).
    #[arg(short = 'e', long = "enter", overrides_with = "no_enter")]
    enter: bool,

    /// Do not append the trailing Enter.
    #[arg(long = "no-enter")]
    no_enter: bool,

    /// Debug-level logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Write bridge diagnostics to this file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Program to run, with its arguments.
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

impl Cli {
    fn append_enter(&self) -> bool {
        !self.no_enter
    }
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        // Diagnostics go to stderr; stdout belongs to the mirror.
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn run(cli: Cli) -> telepty_core::Result<()> {
    config::load_dotfile()?;
    let token = config::telegram_token()?;
    tracing::debug!(register = cli.register, "configuration resolved");

    if cli.register {
        return telepty_core::run_register(&token).await;
    }

    let chat_id = match cli.chat_id {
        Some(id) => id,
        None => config::chat_id_override()?.ok_or_else(|| {
            telepty_core::BridgeError::config(format!(
                "no authorized peer: pass --chat-id or set {}",
                config::CHAT_ID_ENV
            ))
        })?,
    };

    if cli.command.is_empty() {
        return Err(telepty_core::BridgeError::config(
            "no command given; usage: telepty [flags] -- program [args...]",
        ));
    }

    let mirror = !cli.no_mirror;
    let append_enter = cli.append_enter();
    telepty_core::run(BridgeOptions {
        command: cli.command,
        token,
        chat_id,
        mirror,
        append_enter,
        output_stream: cli.output_stream,
    })
    .await
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(&cli) {
        eprintln!("telepty: {err}");
        return ExitCode::from(2);
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("telepty: {err}");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied()).expect("parse")
    }

    #[test]
    fn enter_is_on_by_default() {
        let cli = parse(&["telepty", "--chat-id", "123", "ls"]);
        assert!(cli.append_enter());
    }

    #[test]
    fn no_enter_disables_the_trailing_return() {
        let cli = parse(&["telepty", "--no-enter", "--chat-id", "123", "ls"]);
        assert!(!cli.append_enter());
    }

    #[test]
    fn enter_after_no_enter_wins() {
        let cli = parse(&["telepty", "--no-enter", "-e", "--chat-id", "123", "ls"]);
        assert!(cli.append_enter());
    }

    #[test]
    fn trailing_command_keeps_its_own_flags() {
        let cli = parse(&["telepty", "--chat-id", "7", "top", "-d", "1"]);
        assert_eq!(cli.command, vec!["top", "-d", "1"]);
    }

    #[test]
    fn output_stream_accepts_short_and_long() {
        let short = parse(&["telepty", "-o", "side.log", "--chat-id", "1", "ls"]);
        let long = parse(&[
            "telepty",
            "--output-stream",
            "side.log",
            "--chat-id",
            "1",
            "ls",
        ]);
        assert_eq!(short.output_stream, long.output_stream);
        assert_eq!(short.output_stream, Some(PathBuf::from("side.log")));
    }

    #[test]
    fn register_needs_no_chat_id_or_command() {
        let cli = parse(&["telepty", "--register"]);
        assert!(cli.register);
        assert!(cli.command.is_empty());
    }
}
