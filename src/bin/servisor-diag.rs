use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "servisor-diag")]
#[command(about = "Query the diagnostic listener of a running servisor", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:6060")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Version, pid and uptime
    Status,
    /// Async runtime worker and task counts
    Runtime,
    /// Main listener request counters
    Requests,
    /// Prometheus exposition text
    Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let path = match cli.command {
        Commands::Status => "status",
        Commands::Runtime => "runtime",
        Commands::Requests => "requests",
        Commands::Metrics => "metrics",
    };
    let res = client.get(format!("{base}/debug/{path}")).send().await?;

    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: diagnostic listener returned status {status}");
        if let Ok(text) = res.text().await {
            eprint!("Response: {text}");
        }
        std::process::exit(1);
    }

    if matches!(cli.command, Commands::Metrics) {
        print!("{}", res.text().await?);
    } else {
        let json: Value = res.json().await?;
        println!("{}", serde_json::to_string_pretty(&json)?);
    }
    Ok(())
}
