use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facegate", about = "FaceGate attendance CLI")]
struct Cli {
    /// Base URL of the facegated server.
    #[arg(long, env = "FACEGATE_SERVER", default_value = "http://localhost:8000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face image under a name
    Enroll {
        /// Person's display name
        #[arg(short, long)]
        name: String,
        /// Path to a JPEG/PNG image
        image: PathBuf,
        /// Send as base64 JSON (the webcam endpoint) instead of multipart
        #[arg(long)]
        webcam: bool,
    },
    /// Run one recognition attempt against an image
    Approve {
        /// Path to a JPEG/PNG image
        image: PathBuf,
    },
    /// Show today's attendance summary
    Stats,
    /// List all attendance records
    Attendance,
    /// List enrolled users
    Users,
    /// Check daemon health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let server = cli.server.trim_end_matches('/').to_string();

    let body = match cli.command {
        Commands::Enroll { name, image, webcam } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;

            if webcam {
                let payload = serde_json::json!({
                    "name": name,
                    "image": BASE64.encode(&bytes),
                });
                request_json(
                    client.post(format!("{server}/api/enroll/webcam")).json(&payload),
                )
                .await?
            } else {
                let file_name = image
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".to_string());
                let form = reqwest::multipart::Form::new()
                    .text("name", name)
                    .part(
                        "file",
                        reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                    );
                request_json(
                    client.post(format!("{server}/api/enroll/file")).multipart(form),
                )
                .await?
            }
        }
        Commands::Approve { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let payload = serde_json::json!({ "image": BASE64.encode(&bytes) });
            request_json(client.post(format!("{server}/api/approve")).json(&payload)).await?
        }
        Commands::Stats => {
            request_json(client.get(format!("{server}/api/dashboard/stats"))).await?
        }
        Commands::Attendance => {
            request_json(client.get(format!("{server}/api/dashboard/attendance"))).await?
        }
        Commands::Users => request_json(client.get(format!("{server}/api/users"))).await?,
        Commands::Health => request_json(client.get(format!("{server}/health"))).await?,
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Send the request and parse the JSON body, surfacing the server's
/// `detail` field on error statuses.
async fn request_json(req: reqwest::RequestBuilder) -> Result<serde_json::Value> {
    let response = req.send().await.context("request failed")?;
    let status = response.status();
    let body: serde_json::Value = response.json().await.context("invalid JSON response")?;

    if !status.is_success() {
        let detail = body["detail"].as_str().unwrap_or("unknown error");
        anyhow::bail!("server returned {status}: {detail}");
    }

    Ok(body)
}
