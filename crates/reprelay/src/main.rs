use clap::{Parser, Subcommand};
use reprelay_engine::config::{ConfigLoader, RelayConfig};
use reprelay_panel::client::panel_url;
use reprelay_panel::{ConsoleRenderer, CrossSessionMerge, MemoryLog, PanelClient, PanelControl};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reprelay", version, about = "Cross-tab network request relay")]
struct Args {
    /// Config file (defaults to ./reprelay.yaml, then ~/.reprelay/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the relay server for a browser shim and panels
    Serve {
        /// WebSocket port (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect as a panel and print requests captured in other tabs
    Watch {
        /// Relay panel URL (defaults to the configured server)
        #[arg(long)]
        url: Option<String>,
        /// Relay port, used when no URL is given
        #[arg(long)]
        port: Option<u16>,
        /// Tab the panel inspects; its own requests are not merged
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        tab: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries rendered requests.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref()).await?;

    match args.mode {
        Mode::Serve { port } => serve(config, port).await,
        Mode::Watch { url, port, tab } => watch(config, url, port, tab).await,
    }
}

async fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<RelayConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from(path).await?,
        None => ConfigLoader::load_default().await?,
    };
    Ok(config)
}

async fn serve(mut config: RelayConfig, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }

    let running = reprelay_r::launch(&config).await?;
    info!(
        host = %format!("ws://{}/host", running.server.local_addr),
        panel = %format!("ws://{}/rep-panel", running.server.local_addr),
        "relay ready"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    running.shutdown().await;
    Ok(())
}

async fn watch(
    config: RelayConfig,
    url: Option<String>,
    port: Option<u16>,
    tab: i64,
) -> anyhow::Result<()> {
    let url = url.unwrap_or_else(|| {
        panel_url(&config.server.host, port.unwrap_or(config.server.port))
    });
    let client = PanelClient::connect(&url).await?;

    let mut merge = CrossSessionMerge::new(
        tab,
        &config.panel,
        MemoryLog::new(),
        ConsoleRenderer::stdout(),
    );

    let (controls, rx) = mpsc::unbounded_channel();
    tokio::spawn(read_controls(controls));
    eprintln!("Watching {}. Type 'toggle' to switch multi-tab capture, 'exit' to quit.", url);

    client.run(&mut merge, rx).await?;
    info!(captured = merge.log().len(), "panel closed");
    Ok(())
}

async fn read_controls(controls: mpsc::UnboundedSender<PanelControl>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let control = match line.trim() {
            "t" | "toggle" => PanelControl::Toggle,
            "q" | "exit" | "quit" => PanelControl::Exit,
            "" => continue,
            other => {
                eprintln!("Unknown command: {}", other);
                continue;
            }
        };
        if controls.send(control).is_err() || control == PanelControl::Exit {
            break;
        }
    }
}
