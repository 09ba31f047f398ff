use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};

use policydesk_lib::db::CrmDb;
use policydesk_lib::embeddings::{VoyageClient, DEFAULT_MATCH_THRESHOLD};
use policydesk_lib::kanban::{commit_drop, Board, Lead, LeadStatus};
use policydesk_lib::processor::embeddings::{
    reembed_workspace, update_account_summary_embedding, update_contact_summary_embedding,
    update_interaction_embedding,
};
use policydesk_lib::queries::search::{
    search_contacts, search_interactions, DEFAULT_CONTACT_LIMIT, DEFAULT_INTERACTION_LIMIT,
};
use policydesk_lib::ringcentral::auth::{AuthAction, SessionAuth};
use policydesk_lib::ringcentral::client::{Dialer, Messenger, RingCentralClient};
use policydesk_lib::ringcentral::poller::{CallPoller, PollSnapshot};
use policydesk_lib::ringcentral::session::StopReason;
use policydesk_lib::ringcentral::RingCentralConfig;
use policydesk_lib::state::{create_or_update_config, AppState};
use policydesk_lib::types::Config;

#[derive(Parser)]
#[command(name = "policydesk", version, about = "PolicyDesk CRM companion")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Place a RingOut call
    Call {
        to: String,
        /// Follow the call status until it finishes
        #[arg(long)]
        watch: bool,
    },
    /// Poll the status of a call until it finishes
    Status { call_id: String },
    /// Hang up a call
    EndCall { call_id: String },
    /// Send a text message
    Sms { to: String, text: String },
    /// RingCentral session: check, token, refresh or logout
    Auth { action: AuthAction },
    /// Regenerate stored embeddings
    Embed {
        #[command(subcommand)]
        target: EmbedTarget,
    },
    /// Semantic search over contacts or interactions
    Search {
        #[command(subcommand)]
        target: SearchTarget,
    },
    /// Lead pipeline board
    Leads {
        #[command(subcommand)]
        action: LeadsAction,
    },
    /// Show or edit ~/.policydesk/config.json
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum EmbedTarget {
    /// Every contact, account and interaction in the workspace
    All {
        #[arg(long)]
        workspace: Option<String>,
    },
    Contact {
        id: String,
        #[arg(long)]
        workspace: Option<String>,
    },
    Account {
        id: String,
        #[arg(long)]
        workspace: Option<String>,
    },
    Interaction { id: String },
}

#[derive(Subcommand)]
enum SearchTarget {
    Contacts {
        query: String,
        #[arg(long)]
        workspace: Option<String>,
        #[arg(long, default_value_t = DEFAULT_CONTACT_LIMIT)]
        limit: usize,
    },
    Interactions {
        query: String,
        #[arg(long)]
        workspace: Option<String>,
        #[arg(long, default_value_t = DEFAULT_INTERACTION_LIMIT)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum LeadsAction {
    /// Print the board column by column
    List,
    /// Add a lead to the New column
    Add { first_name: String, last_name: String },
    /// Drop a lead onto a column (New, Contacted, ...) or another lead's card
    Move { lead_id: String, over_id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    SetBaseUrl { url: String },
    SetWorkspace { workspace_id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), String> {
    let state = AppState::new()?;
    let config = state.effective_config()?;

    match command {
        Command::Call { to, watch } => {
            let client = Arc::new(telephony(&config.ringcentral)?);
            let placed = client.place_call(&to).await.map_err(|e| e.to_string())?;
            println!("{}", placed.call_id);
            if watch {
                watch_call(client, &config.ringcentral, &placed.call_id).await?;
            }
        }
        Command::Status { call_id } => {
            let client = Arc::new(telephony(&config.ringcentral)?);
            watch_call(client, &config.ringcentral, &call_id).await?;
        }
        Command::EndCall { call_id } => {
            let client = telephony(&config.ringcentral)?;
            client.end_call(&call_id).await.map_err(|e| e.to_string())?;
            println!("ended {}", call_id);
        }
        Command::Sms { to, text } => {
            let client = telephony(&config.ringcentral)?;
            let sent = client.send_sms(&to, &text).await.map_err(|e| e.to_string())?;
            print_json(&sent)?;
        }
        Command::Auth { action } => {
            let client = telephony(&config.ringcentral)?;
            let status = client.auth(action).await.map_err(|e| e.to_string())?;
            print_json(&status)?;
        }
        Command::Embed { target } => embed(&state, &config, target).await?,
        Command::Search { target } => search(&state, &config, target).await?,
        Command::Leads { action } => leads(&state, action)?,
        Command::Config { action } => {
            let updated = match action {
                ConfigAction::Show => {
                    let stored = state.config.lock().map_err(|_| "Lock poisoned")?.clone();
                    print_json(&redacted(stored))?;
                    return Ok(());
                }
                ConfigAction::SetBaseUrl { url } => {
                    url::Url::parse(&url).map_err(|e| format!("Invalid URL {}: {}", url, e))?;
                    create_or_update_config(&state, |c| c.ringcentral.api_base_url = url)?
                }
                ConfigAction::SetWorkspace { workspace_id } => {
                    create_or_update_config(&state, |c| {
                        c.default_workspace_id = Some(workspace_id)
                    })?
                }
            };
            log::info!("Config: saved {}", state.config_path().display());
            print_json(&redacted(updated))?;
        }
    }
    Ok(())
}

fn telephony(config: &RingCentralConfig) -> Result<RingCentralClient, String> {
    RingCentralClient::new(config).map_err(|e| e.to_string())
}

/// Follow a call until the poller stops or Ctrl-C is pressed.
async fn watch_call(
    client: Arc<RingCentralClient>,
    config: &RingCentralConfig,
    call_id: &str,
) -> Result<(), String> {
    let poller = CallPoller::from_config(client, config);
    let mut snapshots = poller.subscribe();
    poller.start(call_id);

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    return Err("Call poller went away".to_string());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.session.call_id() != call_id {
                    continue;
                }
                print_snapshot(&snapshot);
                match snapshot.stopped {
                    None => {}
                    Some(StopReason::TooManyErrors) => {
                        return Err("Stopped polling after repeated errors".to_string());
                    }
                    Some(_) => return Ok(()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                poller.cancel();
                println!("cancelled");
                return Ok(());
            }
        }
    }
}

fn print_snapshot(snapshot: &PollSnapshot) {
    if let Some(err) = &snapshot.last_error {
        println!("  ! {} ({})", err.message, err.recovery_suggestion);
    } else if let Some(report) = &snapshot.last_report {
        println!(
            "  {:?}: {}",
            snapshot.session.phase(),
            report.status_description.as_deref().unwrap_or("-")
        );
    }
    if let Some(reason) = snapshot.stopped {
        println!("stopped: {:?}", reason);
    }
}

fn workspace(config: &Config, explicit: Option<String>) -> Result<String, String> {
    explicit
        .or_else(|| config.default_workspace_id.clone())
        .ok_or_else(|| "No workspace given and no defaultWorkspaceId configured".to_string())
}

fn open_db(state: &AppState) -> Result<CrmDb, String> {
    state.open_db().map_err(|e| e.to_string())
}

async fn embed(state: &AppState, config: &Config, target: EmbedTarget) -> Result<(), String> {
    let db = open_db(state)?;
    let voyage = VoyageClient::new(&config.voyage).map_err(|e| e.to_string())?;

    let written = match target {
        EmbedTarget::All { workspace: ws } => {
            let ws = workspace(config, ws)?;
            let report = reembed_workspace(&db, &voyage, &ws)
                .await
                .map_err(|e| e.to_string())?;
            return print_json(&report);
        }
        EmbedTarget::Contact { id, workspace: ws } => {
            let ws = workspace(config, ws)?;
            update_contact_summary_embedding(&db, &voyage, &id, &ws).await
        }
        EmbedTarget::Account { id, workspace: ws } => {
            let ws = workspace(config, ws)?;
            update_account_summary_embedding(&db, &voyage, &id, &ws).await
        }
        EmbedTarget::Interaction { id } => update_interaction_embedding(&db, &voyage, &id).await,
    }
    .map_err(|e| e.to_string())?;

    println!("{}", if written { "updated" } else { "skipped" });
    Ok(())
}

async fn search(state: &AppState, config: &Config, target: SearchTarget) -> Result<(), String> {
    let db = open_db(state)?;
    let voyage = VoyageClient::new(&config.voyage).map_err(|e| e.to_string())?;
    let threshold = if config.voyage.match_threshold > 0.0 {
        config.voyage.match_threshold
    } else {
        DEFAULT_MATCH_THRESHOLD
    };

    match target {
        SearchTarget::Contacts { query, workspace: ws, limit } => {
            let ws = workspace(config, ws)?;
            let hits = search_contacts(&db, &voyage, &query, &ws, limit, threshold)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&hits)
        }
        SearchTarget::Interactions { query, workspace: ws, limit } => {
            let ws = workspace(config, ws)?;
            let hits = search_interactions(&db, &voyage, &query, &ws, limit, threshold)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&hits)
        }
    }
}

fn leads(state: &AppState, action: LeadsAction) -> Result<(), String> {
    let db = open_db(state)?;
    match action {
        LeadsAction::List => {
            let board = Board::new(db.list_leads().map_err(|e| e.to_string())?);
            for status in LeadStatus::ALL {
                let column = board.column(status);
                println!("{} ({})", status, column.len());
                for lead in column {
                    println!("  {}  {} {}", lead.id, lead.first_name, lead.last_name);
                }
            }
        }
        LeadsAction::Add { first_name, last_name } => {
            let now = Utc::now();
            let lead = Lead {
                id: uuid::Uuid::new_v4().to_string(),
                first_name,
                last_name,
                status: LeadStatus::New,
                created_at: now,
                updated_at: now,
            };
            db.upsert_lead(&lead).map_err(|e| e.to_string())?;
            println!("{}", lead.id);
        }
        LeadsAction::Move { lead_id, over_id } => {
            let mut board = Board::new(db.list_leads().map_err(|e| e.to_string())?);
            match commit_drop(&mut board, &db, &lead_id, &over_id).map_err(|e| e.to_string())? {
                Some(mv) => println!("{}: {} -> {}", mv.lead_id, mv.from, mv.to),
                None => println!("{}: unchanged", lead_id),
            }
        }
    }
    Ok(())
}

/// Config as printed: the API key is never echoed back.
fn redacted(mut config: Config) -> Config {
    if config.voyage.api_key.is_some() {
        config.voyage.api_key = Some("********".to_string());
    }
    config
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let out = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", out);
    Ok(())
}
