use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[zbus::proxy(
    interface = "org.freedesktop.Rollcall1",
    default_service = "org.freedesktop.Rollcall1",
    default_path = "/org/freedesktop/Rollcall1"
)]
trait Rollcall {
    async fn enroll(&self, identity: &str, live: bool, image: Vec<u8>) -> zbus::Result<bool>;
    async fn verify(&self, identity: &str, live: bool, image: Vec<u8>) -> zbus::Result<String>;
    async fn mark(&self, identity: &str, live: bool, image: Vec<u8>) -> zbus::Result<String>;
    async fn last_event(&self, identity: &str) -> zbus::Result<String>;
    async fn history(&self, identity: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-verified attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Probe {
    /// Identity to act on
    identity: String,
    /// Image file to use instead of the camera
    #[arg(short, long)]
    image: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll (or replace) the face reference for an identity
    Enroll(Probe),
    /// Check a face against an identity without recording attendance
    Verify(Probe),
    /// Verify and record the next TIME_IN / TIME_OUT
    Mark(Probe),
    /// Show the most recent attendance event
    Last { identity: String },
    /// Show all attendance events, newest first
    History { identity: String },
    /// Show daemon status
    Status,
    /// List local V4L2 capture devices
    Devices,
}

/// The image to send: `(live, bytes)`. No path means capture from the camera.
fn read_image(path: Option<&PathBuf>) -> Result<(bool, Vec<u8>)> {
    let Some(path) = path else {
        return Ok((true, Vec::new()));
    };
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.is_empty() {
        bail!("image file is empty: {}", path.display());
    }
    Ok((false, bytes))
}

async fn connect(session: bool) -> Result<RollcallProxy<'static>> {
    let builder = if session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let conn = builder
        .method_timeout(Duration::from_secs(30))
        .build()
        .await
        .context("failed to connect to D-Bus")?;
    RollcallProxy::new(&conn).await.context("rollcalld is not reachable")
}

fn describe_decision(decision: &Value) -> String {
    let similarity = decision["similarity"].as_f64().unwrap_or(-1.0);
    let verdict = if decision["accepted"].as_bool().unwrap_or(false) { "match" } else { "no match" };
    format!("{verdict} (similarity {similarity:.4})")
}

fn describe_event(event: &Value) -> String {
    format!(
        "#{} {} {} at {}",
        event["id"],
        event["identity"].as_str().unwrap_or("?"),
        event["status"].as_str().unwrap_or("?"),
        event["timestamp"].as_str().unwrap_or("?"),
    )
}

fn describe_mark(outcome: &Value) -> String {
    let decision = describe_decision(&outcome["decision"]);
    match outcome["outcome"].as_str() {
        Some("recorded") => format!("{decision}: recorded {}", describe_event(&outcome["event"])),
        Some("not_enrolled") => "no face enrolled for this identity; run `rollcall enroll` first".to_string(),
        Some("mismatch") => format!("{decision}: face did not match, nothing recorded"),
        _ => outcome.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        command => {
            let proxy = connect(cli.session).await?;
            run(&proxy, command).await?;
        }
    }

    Ok(())
}

fn list_devices() {
    let devices = rollcall_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

async fn run(proxy: &RollcallProxy<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Enroll(probe) => {
            let (live, image) = read_image(probe.image.as_ref())?;
            if live {
                println!("Look at the camera...");
            }
            proxy.enroll(&probe.identity, live, image).await?;
            println!("Enrolled {}", probe.identity);
        }
        Commands::Verify(probe) => {
            let (live, image) = read_image(probe.image.as_ref())?;
            let reply: Value = serde_json::from_str(&proxy.verify(&probe.identity, live, image).await?)?;
            if reply["enrolled"].as_bool() == Some(false) {
                println!("No face enrolled for {}", probe.identity);
            } else {
                println!("{}", describe_decision(&reply["decision"]));
            }
        }
        Commands::Mark(probe) => {
            let (live, image) = read_image(probe.image.as_ref())?;
            let reply: Value = serde_json::from_str(&proxy.mark(&probe.identity, live, image).await?)?;
            println!("{}", describe_mark(&reply));
        }
        Commands::Last { identity } => {
            let reply: Value = serde_json::from_str(&proxy.last_event(&identity).await?)?;
            if reply.is_null() {
                println!("No attendance recorded for {identity}");
            } else {
                println!("{}", describe_event(&reply));
            }
        }
        Commands::History { identity } => {
            let reply: Value = serde_json::from_str(&proxy.history(&identity).await?)?;
            let events = reply.as_array().cloned().unwrap_or_default();
            if events.is_empty() {
                println!("No attendance recorded for {identity}");
            }
            for event in &events {
                println!("{}", describe_event(event));
            }
        }
        Commands::Status => {
            let reply: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Commands::Devices => list_devices(),
    }

    Ok(())
}
