use finance_assistant_graph::{agent::build_from_config, config::AppConfig, models::Turn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_COMMANDS: [&str; 3] = ["exit", "quit", "q"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;

    if config.openai_api_key.is_empty() {
        eprintln!("⚠️  OPENAI_API_KEY not set in .env");
    }

    info!("Finance assistant starting");
    let graph = build_from_config(&config).await?;

    let thread_id = uuid::Uuid::new_v4().to_string();
    info!(thread_id = %thread_id, "Session started");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"Finance assistant ready. Type a question or a statement path (exit to leave).\n")
        .await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&text.to_lowercase().as_str()) {
            break;
        }

        let reply = match graph.invoke(&thread_id, Turn::user(text)).await {
            Ok(state) => state.final_reply().unwrap_or("(no reply)").to_string(),
            Err(e) => {
                error!(error = %e, "Run failed");
                // The explanatory turn was stored with the thread
                graph
                    .get_state(&thread_id)
                    .await
                    .ok()
                    .flatten()
                    .and_then(|s| s.final_reply().map(str::to_string))
                    .unwrap_or_else(|| format!("Error: {}", e))
            }
        };

        stdout.write_all(format!("\n{}\n\n", reply).as_bytes()).await?;
    }

    info!(thread_id = %thread_id, "Session closed");
    Ok(())
}
