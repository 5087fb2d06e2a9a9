// CLI binary: exiting on unrecoverable errors is standard for CLI tools.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::process;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::Value;

use bridgekit::error::ErrorBody;
use bridgekit::events;
use bridgekit::registry::CommandSummary;

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "bridgekit-cli", about = "Call a running bridge from the terminal", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the bridge server
    #[arg(long, global = true, env = "BRIDGEKIT_URL", default_value = "http://127.0.0.1:8000")]
    url: String,

    /// Output raw JSON instead of formatted text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered commands
    List,
    /// Invoke a request/response command
    Call {
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Open a streaming command and print its frames until it ends
    Stream {
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Print the JSON Schema of a command's arguments, or of every command
    /// when no name is given
    Schema { name: Option<String> },
}

// ── HTTP helpers ─────────────────────────────────────────────────

fn parse_args(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("arguments are not valid JSON: {raw}"))
}

async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => bail!("{} ({status}): {}", body.code, body.message),
        Err(_) => bail!("request failed ({status}): {text}"),
    }
}

fn print_value(value: &Value, raw_json: bool) {
    if raw_json {
        println!("{value}");
    } else if let Some(text) = value.as_str() {
        println!("{text}");
    } else {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}

// ── Subcommands ──────────────────────────────────────────────────

async fn list(client: &reqwest::Client, base: &str, raw_json: bool) -> anyhow::Result<()> {
    let response = check(client.get(format!("{base}/commands")).send().await?).await?;
    let commands: Vec<CommandSummary> = response.json().await?;
    if raw_json {
        println!("{}", serde_json::to_string(&commands)?);
        return Ok(());
    }
    for cmd in &commands {
        let marker = if cmd.is_stream { " [channel]" } else { "" };
        println!(
            "{}({}){marker}  [{}]",
            cmd.name,
            cmd.param_names.join(", "),
            cmd.module
        );
    }
    Ok(())
}

async fn call(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    args: Value,
    raw_json: bool,
) -> anyhow::Result<()> {
    let response = client
        .post(format!("{base}/command/{name}"))
        .json(&args)
        .send()
        .await?;
    let body: Value = check(response).await?.json().await?;
    print_value(body.get("result").unwrap_or(&Value::Null), raw_json);
    Ok(())
}

/// Returns whether the stream ended with an error frame.
fn print_frame(event: &str, data: &str, raw_json: bool) -> bool {
    let value: Value = serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.into()));
    match event {
        events::MESSAGE => {
            print_value(&value, raw_json);
            false
        }
        events::ERROR => {
            match serde_json::from_value::<ErrorBody>(value.clone()) {
                Ok(body) => eprintln!("stream error {}: {}", body.code, body.message),
                Err(_) => eprintln!("stream error: {value}"),
            }
            true
        }
        _ => false,
    }
}

async fn stream(
    client: &reqwest::Client,
    base: &str,
    name: &str,
    args: Value,
    raw_json: bool,
) -> anyhow::Result<()> {
    let response = client
        .post(format!("{base}/channel/{name}"))
        .json(&args)
        .send()
        .await?;
    let opened: Value = check(response).await?.json().await?;
    let Some(channel_id) = opened.get("channelId").and_then(Value::as_str) else {
        bail!("server did not return a channelId: {opened}");
    };

    let response = check(
        client
            .get(format!("{base}/channel/stream/{channel_id}"))
            .send()
            .await?,
    )
    .await?;
    let mut body = response.bytes_stream();

    let mut event_name = String::new();
    let mut data_buf = String::new();
    let mut leftover = String::new();
    let mut failed = false;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("error reading stream")?;
        leftover.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline_pos) = leftover.find('\n') {
            let line: String = leftover.drain(..=newline_pos).collect();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                // Empty line ends an event
                if !event_name.is_empty() {
                    if event_name == events::CLOSE {
                        return Ok(());
                    }
                    failed |= print_frame(&event_name, &data_buf, raw_json);
                }
                event_name.clear();
                data_buf.clear();
                continue;
            }

            if let Some(name) = line.strip_prefix("event:") {
                event_name = name.trim_start().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                if !data_buf.is_empty() {
                    data_buf.push('\n');
                }
                data_buf.push_str(data.strip_prefix(' ').unwrap_or(data));
            }
        }
    }

    if failed {
        process::exit(1);
    }
    Ok(())
}

async fn schema(client: &reqwest::Client, base: &str, name: Option<&str>) -> anyhow::Result<()> {
    let url = match name {
        Some(name) => format!("{base}/commands/{name}/schema"),
        None => format!("{base}/commands/schema"),
    };
    let response = check(client.get(url).send().await?).await?;
    let schema: Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    let result = match cli.command {
        Commands::List => list(&client, &base, cli.json).await,
        Commands::Call { name, args } => match parse_args(&args) {
            Ok(args) => call(&client, &base, &name, args, cli.json).await,
            Err(e) => Err(e),
        },
        Commands::Stream { name, args } => match parse_args(&args) {
            Ok(args) => stream(&client, &base, &name, args, cli.json).await,
            Err(e) => Err(e),
        },
        Commands::Schema { name } => schema(&client, &base, name.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
