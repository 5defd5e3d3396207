use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::{Color, Colorize};
use events::{Event, EventPayload, NodeId};
use monitor::{ClusterConfig, ClusterStats, GridSize, LifecycleController};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG_FILE: &str = "dsm-monitor.toml";
const DEFAULT_POLL_MS: u64 = 100;

/// One color per node, cycling past the fourth.
const NODE_COLORS: [Color; 4] = [Color::Blue, Color::Green, Color::Yellow, Color::Red];

#[derive(Parser)]
#[command(name = "dsm-monitor")]
#[command(about = "Launch a distributed Game of Life run and follow its nodes", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file; missing is fine
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Game of Life node executable
    #[arg(short, long)]
    executable: Option<PathBuf>,

    #[arg(short, long)]
    nodes: Option<u32>,

    /// Grid size as WxH
    #[arg(long)]
    grid: Option<GridSize>,

    #[arg(short, long)]
    generations: Option<u64>,

    /// Initial pattern (random, glider, rpentomino)
    #[arg(short, long)]
    pattern: Option<String>,

    /// Host collaborators use to reach the coordinator
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// How long to wait for each event before checking the nodes
    #[arg(long, default_value_t = DEFAULT_POLL_MS)]
    poll_ms: u64,
}

impl Cli {
    fn apply(&self, config: &mut ClusterConfig) {
        if let Some(executable) = &self.executable {
            config.executable = executable.clone();
        }
        if let Some(nodes) = self.nodes {
            config.nodes = nodes;
        }
        if let Some(grid) = self.grid {
            config.grid = grid;
        }
        if let Some(generations) = self.generations {
            config.generations = generations;
        }
        if let Some(pattern) = &self.pattern {
            config.pattern = pattern.clone();
        }
        if let Some(host) = &self.host {
            config.coordinator_host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = ClusterConfig::read(&cli.config)
        .await
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    cli.apply(&mut config);

    if config.executable.as_os_str().is_empty() {
        anyhow::bail!(
            "No executable given; pass --executable or set it in {}",
            cli.config.display()
        );
    }

    tracing::info!(
        "Launching {} nodes on a {} grid for {} generations",
        config.nodes,
        config.grid,
        config.generations
    );

    let controller = LifecycleController::new(config);
    controller
        .start()
        .await
        .context("Failed to start Game of Life nodes")?;

    let followed = follow(&controller, Duration::from_millis(cli.poll_ms), cli.json).await;
    controller.stop().await;
    let stats = followed?;

    if !cli.json {
        print_summary(&controller, &stats);
    }

    Ok(())
}

/// Print events until the nodes exit or Ctrl+C is pressed
async fn follow(controller: &LifecycleController, poll: Duration, json: bool) -> Result<ClusterStats> {
    let mut stats = ClusterStats::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, stopping nodes");
                break;
            }
            next = controller.bus().receive(poll) => match next {
                Some(event) => show(&event, &mut stats, json)?,
                None => {
                    if !controller.is_running().await && controller.drains_finished().await {
                        while let Some(event) = controller.bus().try_receive() {
                            show(&event, &mut stats, json)?;
                        }
                        tracing::info!("All nodes have exited");
                        break;
                    }
                }
            }
        }
    }

    Ok(stats)
}

fn show(event: &Event, stats: &mut ClusterStats, json: bool) -> Result<()> {
    stats.apply(event);
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        println!("{}", render(event));
    }
    Ok(())
}

fn node_color(node: NodeId) -> Color {
    NODE_COLORS[node as usize % NODE_COLORS.len()]
}

fn render(event: &Event) -> String {
    let tag = format!("[Node {}]", event.node()).color(node_color(event.node()));

    let text = match event.payload() {
        EventPayload::Generation {
            generation,
            live_cells,
        } => format!("generation {:>5}  {} live cells", generation, live_cells),
        EventPayload::PageFaults { total, read, write } => {
            format!("page faults {} (read {}, write {})", total, read, write)
        }
        EventPayload::Network {
            kb_sent,
            kb_received,
        } => format!("network {:.2} KB sent, {:.2} KB received", kb_sent, kb_received),
        EventPayload::Barrier { name, .. } => format!("passed {}", name),
        EventPayload::Init { start_row, end_row } => {
            format!("owns rows [{}, {})", start_row, end_row)
        }
        EventPayload::Complete {
            final_live_cells: Some(cells),
        } => format!("{} {} final live cells", "done".bold(), cells),
        EventPayload::Complete {
            final_live_cells: None,
        } => "done".bold().to_string(),
        EventPayload::Error { message } => format!("{} {}", "error".red().bold(), message),
    };

    format!("{} {}", tag, text)
}

fn print_summary(controller: &LifecycleController, stats: &ClusterStats) {
    let tracker = controller.tracker();

    println!();
    println!("Summary");
    println!("════════════════════════════════════════");
    for (node, node_stats) in stats.nodes() {
        let rows = tracker
            .partition(node)
            .map(|p| format!("[{}, {})", p.start_row, p.end_row))
            .unwrap_or_else(|| "?".to_string());
        let status = if node_stats.last_error.is_some() {
            "error"
        } else if node_stats.completed {
            "complete"
        } else {
            "stopped"
        };

        println!(
            "  {} rows {:<12} gen {:<6} faults {:<6} sent {:>8.2} KB  recv {:>8.2} KB  {}",
            format!("Node {}", node).color(node_color(node)),
            rows,
            node_stats.generation,
            node_stats.page_faults,
            node_stats.kb_sent,
            node_stats.kb_received,
            status
        );
    }
    println!();
    println!(
        "  Generation reached by all nodes: {}",
        tracker.minimum_generation()
    );
    println!("  Total page faults:               {}", stats.total_page_faults());
    println!("  Total live cells:                {}", stats.total_live_cells());
    println!(
        "  Completed nodes:                 {}/{}",
        stats.completed_nodes(),
        controller.config().nodes
    );
    println!();
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dsm_monitor=info,monitor=info".into()),
        )
        .init();
}
