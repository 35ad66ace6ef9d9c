use clap::Parser;
use hub_admission::{AdmissionController, SystemClock};
use hub_mcp::clients::Clients;
use hub_mcp::config::HubConfig;
use hub_mcp::server::McpServer;
use hub_mcp::tools::all_tools;
use hub_mcp::transport::serve_stdio;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "hub_mcp=info,hub_admission=info";

#[derive(Parser)]
#[command(
    name = "integration-hub",
    about = "MCP server exposing Notion, Slack, GitHub and Amplitude as rate-limited tools"
)]
struct Args {
    /// Emit logs as JSON lines (always on stderr)
    #[arg(long, default_value_t = false)]
    log_json: bool,

    /// Idle-state sweep interval in seconds (0 = disabled); overrides HUB_IDLE_SWEEP_SECS
    #[arg(long, env = "HUB_IDLE_SWEEP_SECS")]
    idle_sweep_secs: Option<u64>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = HubConfig::from_env();
    if let Some(secs) = args.idle_sweep_secs {
        config.idle_sweep_secs = (secs > 0).then_some(secs);
    }
    config.validate()?;

    let admission = Arc::new(AdmissionController::new(
        config.admission.clone(),
        Arc::new(SystemClock),
    )?);
    let clients = Clients::from_config(&config)?;

    for (name, configured) in [
        ("notion", clients.notion.has_credentials()),
        ("slack", clients.slack.has_credentials()),
        ("amplitude", clients.amplitude.has_credentials()),
    ] {
        if !configured {
            tracing::warn!("No {} credentials configured; its tools will return errors", name);
        }
    }

    let server = McpServer::hub().with_default_user(config.default_user.clone());
    server.register_tools(all_tools(admission.clone(), &clients)).await;

    if let Some(every) = config.idle_sweep_interval() {
        let admission = admission.clone();
        tracing::info!(interval_secs = every.as_secs(), "Idle admission sweep enabled");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                admission.sweep_idle(every);
            }
        });
    }

    tracing::info!(
        server = %server.info().name,
        version = %server.info().version,
        tools = server.list_tools().await.len(),
        timeout_secs = config.timeout().as_secs(),
        "Integration hub starting on stdio"
    );

    serve_stdio(Arc::new(server)).await?;

    tracing::info!("Integration hub stopped");
    Ok(())
}
