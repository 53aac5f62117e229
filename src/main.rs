//! ws-talker entry point.
//!
//! A line-oriented WebSocket talker. Each stdin line is either a command or
//! a message to send:
//!
//! - `/connect [uri]` connects (defaults to `TALKER_URI`)
//! - `/disconnect [reason]` disconnects (defaults to `TALKER_CLOSE_REASON`)
//! - `/status` prints the session state
//! - `/quit` disconnects and exits
//!
//! Anything else is sent as a text message.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use ws_talker::config::{OutputFormat, TalkerConfig};
use ws_talker::session::{Session, SessionEvent, Severity};

/// One parsed stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Connect(Option<&'a str>),
    Disconnect(Option<&'a str>),
    Status,
    Quit,
    Send(&'a str),
}

fn parse_line(line: &str) -> Command<'_> {
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line);
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (rest, None),
    };
    match name {
        "connect" => Command::Connect(arg),
        "disconnect" => Command::Disconnect(arg),
        "status" => Command::Status,
        "quit" | "exit" => Command::Quit,
        _ => Command::Send(line),
    }
}

fn render(format: OutputFormat, event: &SessionEvent) {
    tracing::trace!(event_type = event.event_type_str(), "rendering session event");
    match format {
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(json) => println!("{json}"),
            Err(err) => tracing::error!(error = %err, "failed to serialize event"),
        },
        OutputFormat::Text => match event {
            SessionEvent::Notice(note) => match note.severity {
                Severity::Status => println!("[status] {}", note.text),
                Severity::Error => println!("[error] {}", note.text),
            },
            SessionEvent::Message { text } => println!("< {text}"),
            SessionEvent::Closed(info) => println!("[closed] {info}"),
        },
    }
}

fn observe(session: &Session, format: OutputFormat) {
    session.on_notification(move |note| render(format, &SessionEvent::Notice(note)));
    session.on_message_received(move |text| render(format, &SessionEvent::Message { text }));
    session.on_closed(move |info| render(format, &SessionEvent::Closed(info)));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = TalkerConfig::from_env()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let session = Session::with_network(config.session.clone());
    observe(&session, config.output);
    tracing::info!(session_id = %session.id(), output = %config.output, "ws-talker ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        // Operation errors are already reported through the observer.
        match parse_line(line) {
            Command::Connect(uri) => match uri.or(config.default_uri.as_deref()) {
                Some(uri) => {
                    if let Err(err) = session.connect_str(uri).await {
                        tracing::debug!(error = %err, "connect command failed");
                    }
                }
                None => println!("[error] no URI given and TALKER_URI is not set"),
            },
            Command::Disconnect(reason) => {
                let reason = reason.unwrap_or(&config.close_reason);
                if let Err(err) = session.disconnect(reason).await {
                    tracing::debug!(error = %err, "disconnect command failed");
                }
            }
            Command::Status => match session.target_uri() {
                Some(uri) => println!("[status] {} to {uri}", session.state()),
                None => println!("[status] {}", session.state()),
            },
            Command::Quit => break,
            Command::Send(text) => {
                if let Err(err) = session.send(text).await {
                    tracing::debug!(error = %err, "send command failed");
                }
            }
        }
    }

    if let Err(err) = session.disconnect(&config.close_reason).await {
        tracing::debug!(error = %err, "disconnect on exit failed");
    }
    tracing::info!("ws-talker exiting");
    Ok(())
}
