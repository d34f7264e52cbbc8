use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "events-cli")]
#[command(about = "Inspect events recorded by a running request-instrumentation service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List recently recorded events
    Recent {
        /// Only show events with this name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show every event of one request, children before parents
    Request {
        /// The request's instrumenter id
        instrumenter_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let (path, name) = match cli.command {
        Commands::Recent { name } => ("/metrics/events".to_string(), name),
        Commands::Request { instrumenter_id } => {
            (format!("/metrics/events/{}", instrumenter_id), None)
        }
    };

    let res = client.get(format!("{}{}", cli.url, path)).send().await?;
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let mut events: Vec<Value> = res.json().await?;
    if let Some(name) = name {
        events.retain(|e| e["name"] == name.as_str());
    }
    println!("{}", serde_json::to_string_pretty(&events)?);
    Ok(())
}
