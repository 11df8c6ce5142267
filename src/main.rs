use cronctl::agent;
use cronctl::auth;
use cronctl::cli;
use cronctl::comm;
use cronctl::config;
use cronctl::discord;
use cronctl::models;
use cronctl::scheduler;
use cronctl::tools;

mod cron_cli;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cronctl", version, about = "Lightweight Rust agent platform")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon (gateway, scheduler, Discord bot)
    Start,
    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Debug utilities
    Debug {
        #[command(subcommand)]
        action: DebugAction,
    },
    /// GitHub Copilot authentication
    Copilot {
        #[command(subcommand)]
        command: CopilotCmd,
    },
    /// Run the app-level onboarding wizard
    Onboard,
    /// Check if the cronctl daemon is running
    Status,
    /// Manage secrets
    Secrets {
        #[command(subcommand)]
        command: SecretsCmd,
    },
    /// Manage jobs in the durable scheduling store
    Cron {
        #[command(subcommand)]
        action: CronAction,
    },
}

#[derive(Subcommand, Debug)]
enum CronAction {
    /// Create or replace a job by id
    Add {
        /// Stable job id; re-using one replaces that job
        id: String,
        /// Calendar expression (6-field cron, or @hourly/@daily/@weekly/@monthly/@yearly)
        #[arg(long)]
        schedule: Option<String>,
        /// RFC3339 timestamp; set instead of --schedule for a one-shot job
        #[arg(long)]
        execute_at: Option<String>,
        /// Downstream consumer: "send_message" or "agent"
        #[arg(long)]
        tool: Option<String>,
        /// "<channel>:<chat>" destination, required with --tool
        #[arg(long)]
        session_id: Option<String>,
        /// Message payload dispatched on fire, required with --tool
        #[arg(long)]
        message: Option<String>,
    },
    /// Remove a job by id
    Rm {
        id: String,
    },
    /// List every job in the store
    Ls,
    /// Mark a one-shot job due immediately (fires on the next sweep, or
    /// right away if the daemon is already running)
    Run {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum SecretsCmd {
    /// Store a secret value (prompted securely)
    Set {
        /// Secret key name (e.g. DISCORD_TOKEN)
        key: String,
    },
}

#[derive(Subcommand, Debug)]
enum CopilotCmd {
    /// Authenticate via GitHub device flow
    Login {
        /// GitHub OAuth App client ID (defaults to OpenClaw's ID)
        #[arg(long)]
        client_id: Option<String>,
    },
    /// Remove stored Copilot token
    Logout,
}

#[derive(Subcommand, Debug)]
enum AgentAction {
    /// Scaffold a new agent workspace
    New {
        /// Unique identifier for the agent
        id: String,
    },
    /// Set the model for an existing agent
    SetModel {
        /// Agent identifier
        id: String,
        /// Model provider id to assign
        model: String,
    },
    /// Display agent configuration and key workspace files
    Show {
        /// Agent identifier
        id: String,
    },
    /// Edit an agent workspace file (interactive or from file/stdin)
    Edit {
        /// Agent identifier
        id: String,
        /// Which section to edit
        #[arg(value_enum)]
        section: AgentSection,
        /// Read contents from a file instead of opening an editor. Use "-" for stdin.
        #[arg(long)]
        file: Option<String>,
    },
    /// Apply a YAML manifest to an agent workspace
    Apply {
        /// Agent identifier
        id: String,
        /// Path to YAML manifest file
        manifest: String,
    },
    /// Interactively configure an agent (provider, model, skills)
    Configure {
        /// Agent identifier
        id: String,
    },
    /// List all configured agents
    List,
}

// AgentSection re-exported from cli module
use cli::AgentSection;

#[derive(Subcommand, Debug)]
enum DebugAction {
    /// Run a single agent turn and print the reply
    Run {
        /// Agent identifier
        #[arg(long)]
        agent: String,
        /// User message to send
        #[arg(long)]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with layered subscriber (fmt + log broadcast)
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer();

        let logs_tx = cronctl::logs::init_broadcast();
        let broadcast_layer = cronctl::logs::BroadcastLayer::new(logs_tx);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(broadcast_layer)
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| cronctl::cronctl_home().join("config.yaml"));

    // Handle non-daemon subcommands
    match cli.command {
        Some(Command::Start) | None => { /* fall through to daemon startup */ }
        Some(command) => {
            return match command {
                Command::Agent { action } => match action {
                    AgentAction::New { id } => cli::scaffold_agent(&id).await,
                    AgentAction::SetModel { id, model } => {
                        cli::set_agent_model(&config_path, &id, &model).await
                    }
                    AgentAction::Show { id } => cli::show_agent(&config_path, &id).await,
                    AgentAction::Edit { id, section, file } => {
                        cli::edit_agent_section(&config_path, &id, section, file.as_deref()).await
                    }
                    AgentAction::Apply { id, manifest } => {
                        cli::apply_manifest(&config_path, &id, &manifest).await
                    }
                    AgentAction::Configure { id } => cli::configure_agent(&config_path, &id).await,
                    AgentAction::List => cli::list_agents(&config_path).await,
                },
                Command::Debug { action } => match action {
                    DebugAction::Run {
                        agent: agent_id,
                        message,
                    } => cli::debug_run_turn(&config_path, &agent_id, &message).await,
                },
                Command::Copilot { command } => match command {
                    CopilotCmd::Login { client_id } => {
                        let cid = client_id
                            .as_deref()
                            .unwrap_or(auth::github_device::DEFAULT_CLIENT_ID);
                        let github_token = auth::github_device::device_flow_get_token(cid).await?;
                        auth::github_device::store_token(&github_token)?;

                        // Exchange the GitHub token for a Copilot session token.
                        println!("Exchanging GitHub token for Copilot session tokenâ€¦");
                        match auth::copilot_token::exchange_github_for_copilot_token(&github_token)
                            .await
                        {
                            Ok(ct) => {
                                auth::copilot_token::cache_copilot_token(&ct)?;
                                println!("Copilot token obtained and cached.");
                            }
                            Err(e) => {
                                // Non-fatal: the GitHub token is still stored.
                                eprintln!("Warning: Copilot token exchange failed: {e}");
                                eprintln!(
                                    "GitHub token was stored; you can retry with `copilot login`."
                                );
                            }
                        }
                        Ok(())
                    }
                    CopilotCmd::Logout => {
                        auth::github_device::remove_token()?;
                        println!("Token removed.");
                        Ok(())
                    }
                },
                Command::Status => cli::check_status().await,
                Command::Onboard => cli::app_onboard(&config_path).await,
                Command::Cron { action } => cron_cli::run(&config_path, action).await,
                Command::Secrets { command } => match command {
                    SecretsCmd::Set { key } => {
                        let prompt = format!("Enter value for {key}: ");
                        let val = rpassword::prompt_password(&prompt)
                            .context("failed to read secret value")?;
                        cronctl::secrets::set_secret_file(None, &key, &val)?;
                        println!("Secret '{key}' saved.");
                        Ok(())
                    }
                },
                Command::Start => unreachable!(),
            };
        }
    }

    // --- Normal server startup ---

    println!(
        r#"
  â•”â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•—
  â•‘       ğŸ¦€  cronctl  v{}       â•‘
  â•‘   lightweight agent platform        â•‘
  â•šâ•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•â•
"#,
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    info!(path = %config_path.display(), "loading configuration");
    let cfg = config::Config::load(&config_path).await?;
    info!(
        agents = cfg.agents.len(),
        models = cfg.models.len(),
        "configuration loaded"
    );

    // Load skill registry
    let default_agent_id = cfg
        .routing
        .as_ref()
        .and_then(|r| r.default_agent.clone())
        .or_else(|| cfg.agents.first().map(|a| a.id.clone()));
    let mut skill_registry = cronctl::skills::SkillRegistry::new(default_agent_id.clone());
    cronctl::skills::defaults::seed_defaults()?;
    skill_registry.load_global_skills_with_config(Some(&cfg))?;
    skill_registry.load_agent_skills_with_config(Some(&cfg))?;
    info!(
        global = skill_registry.global_skills.len(),
        agent = skill_registry.agent_skills.len(),
        "skills loaded"
    );

    // Push loaded skills into the unified tool registry and store the
    // agent ID for future reload operations.
    cronctl::tools::set_skill_agent_id(default_agent_id);
    cronctl::tools::sync_skills(&skill_registry);

    // Obtain the global message bus sender
    let bus = comm::sender();

    // Create a shutdown cancellation token.
    let cancel = CancellationToken::new();

    // Initialize modules
    discord::init(&cfg);
    agent::Agent::init(&cfg, bus.clone(), cancel.clone());
    models::init();
    tools::init();
    tools::builtins::exec_shell::load_extra_allowlists(&cfg.agents);

    // --- Housekeeping janitor ---
    // Run an immediate cleanup pass at startup, then spawn a background
    // task that repeats every 6 hours.
    let janitor_cfg = scheduler::JanitorConfig::from_config(&cfg);
    {
        let startup_cleaned = scheduler::run_janitor_pass(&janitor_cfg).await;
        if startup_cleaned > 0 {
            info!(deleted = startup_cleaned, "startup housekeeping pass");
        }
    }
    let _janitor_handle = scheduler::spawn_janitor(janitor_cfg);

    // Start the scheduler when agents have heartbeats/cron configured, or
    // when explicitly forced via env var.
    let has_scheduled_work = cfg
        .agents
        .iter()
        .any(|a| a.heartbeat_secs.is_some() || !a.cron_jobs.is_empty());
    if has_scheduled_work || std::env::var("CRONCTL_SCHEDULER").as_deref() == Ok("1") {
        let sched_handle = scheduler::start(&cfg).await?;
        scheduler::set_scheduler_handle(sched_handle).await;
        info!("scheduler enabled");
    } else {
        info!("scheduler disabled (no heartbeats or cron jobs configured)");
    }

    // --- Job-store-backed scheduling core ---
    // Runs alongside the legacy heartbeat/janitor scheduler above; this
    // is the calendar-driven engine behind the `cron add|rm|ls|run` CLI
    // and the `schedule_job`/`list_jobs`/etc. agent tools.
    let cron_core_cfg = cfg.cron_core.clone().unwrap_or_default();
    let cron_workspace = cron_core_cfg
        .workspace
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(cronctl::cronctl_home);
    let job_store = cronctl::store::JobStore::at_workspace(&cron_workspace);
    let message_bus = Arc::new(cronctl::bus::MessageBus::with_capacity(cron_core_cfg.bus_capacity));
    message_bus.start().await?;
    let worker_pool = Arc::new(cronctl::pool::WorkerPool::new(
        cronctl::pool::PoolConfig {
            worker_count: cron_core_cfg.worker_count,
            queue_capacity: cron_core_cfg.queue_capacity,
        },
        message_bus.clone(),
    ));
    worker_pool.start().await?;
    let job_scheduler = Arc::new(cronctl::scheduler::Scheduler::new(job_store, worker_pool.clone()));
    job_scheduler.start().await?;
    scheduler::set_adapter(scheduler::Adapter::new(job_scheduler.clone()));
    info!(
        workspace = %cron_workspace.display(),
        workers = cron_core_cfg.worker_count,
        "scheduling core started"
    );

    // Start the gateway (enabled by default; set CRONCTL_GATEWAY=0 to disable).
    let _gateway = {
        let gw = cronctl::gateway::spawn_gateway_if_enabled().await;
        if let Some(mut gw) = gw {
            // Drain commands_rx and forward into the comm bus.
            let rx = std::mem::replace(
                &mut gw.commands_rx,
                tokio::sync::mpsc::channel(1).1, // dummy receiver
            );
            cronctl::gateway::spawn_command_forwarder(rx);
            Some(gw)
        } else if std::env::var("CRONCTL_GATEWAY").as_deref() != Ok("0") {
            // Gateway was expected but failed to start.
            // With auto-bind this should be rare (10 ports tried).
            tracing::warn!("gateway failed to start (all ports in use?). Try: CRONCTL_GATEWAY=0 cronctl start");
            None
        } else {
            None
        }
    };

    info!("cronctl ready â€” all modules initialized");

    // â”€â”€ Startup summary â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€
    {
        let api_token = std::env::var("CRONCTL_API_TOKEN").ok().filter(|s| !s.is_empty());

        let gw_url = _gateway.as_ref().map(|gw| format!("http://{}", gw.addr));

        let gw_status = match &gw_url {
            Some(url) => url.clone(),
            None => "disabled".to_string(),
        };

        let sched_status = if has_scheduled_work {
            let hb_count = cfg.agents.iter().filter(|a| a.heartbeat_secs.is_some()).count();
            let cron_count: usize = cfg.agents.iter().map(|a| a.cron_jobs.len()).sum();
            format!("enabled ({hb_count} heartbeat(s), {cron_count} cron job(s))")
        } else {
            "disabled".to_string()
        };

        let skill_count = cronctl::tools::skill_count();

        let discord_status = if cfg.channels.discord.is_some() {
            "connecting"
        } else {
            "disabled"
        };

        let agent_names: Vec<&str> = cfg.agents.iter().map(|a| a.id.as_str()).collect();

        println!("  â”Œâ”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”");
        println!("  â”‚  âœ…  Ready                           â”‚");
        println!("  â”œâ”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”¤");
        println!("  â”‚  Gateway:   {:<25}â”‚", gw_status);
        println!("  â”‚  Agents:    {:<25}â”‚", agent_names.join(", "));
        println!("  â”‚  Models:    {:<25}â”‚", cfg.models.len());
        println!("  â”‚  Skills:    {:<25}â”‚", skill_count);
        println!("  â”‚  Scheduler: {:<25}â”‚", sched_status);
        println!("  â”‚  Discord:   {:<25}â”‚", discord_status);
        println!("  â””â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”€â”˜");

        // Print the full frontend URL with token baked in.
        if let Some(ref url) = gw_url {
            if let Some(ref token) = api_token {
                println!("  ğŸ”— {url}/?token={token}");
            } else {
                println!("  ğŸ”— {url}/");
            }
        }
        println!();
    }

    // Wait for shutdown signal (Ctrl-C)
    tokio::signal::ctrl_c().await?;
    info!("received Ctrl-C, shutting downâ€¦");

    // 1. Signal all agent dispatchers to stop accepting new messages.
    cancel.cancel();

    // 2. Wait for in-flight agent turns to complete (up to 30s).
    let in_flight = agent::in_flight_count();
    if in_flight > 0 {
        info!(in_flight, "waiting for in-flight agent turns to drainâ€¦");
    }
    agent::drain_in_flight(std::time::Duration::from_secs(30)).await;

    // 3. Stop the legacy scheduler if it is running.
    if let Some(handle) = scheduler::scheduler_handle_ref() {
        if let Some(sched) = &handle.cron_scheduler {
            info!("stopping schedulerâ€¦");
            let mut sched = sched.clone();
            let _ = sched.shutdown().await;
        }
    }

    // 3b. Stop the job-store-backed scheduling core.
    if let Err(e) = job_scheduler.stop().await {
        tracing::warn!(error = %e, "scheduling core: stop failed");
    }
    if let Err(e) = worker_pool.stop().await {
        tracing::warn!(error = %e, "worker pool: stop failed");
    }
    if let Err(e) = message_bus.stop().await {
        tracing::warn!(error = %e, "message bus: stop failed");
    }

    // 4. Broadcast shutdown event to WebSocket clients.
    cronctl::gateway::publish_event_json(&serde_json::json!({
        "type": "shutdown",
        "message": "cronctl daemon shutting down",
    }));

    // Give WebSocket clients a moment to receive the shutdown event
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    info!("shutdown complete");

    Ok(())
}
