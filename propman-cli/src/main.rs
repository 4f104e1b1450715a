mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

use propman_core::db::{
    export_backend_to_json, import_json_to_backend, infer_backend_type, migrate_sqlite_to_yaml,
    migrate_yaml_to_sqlite, BackendType,
};
use propman_core::{
    get_config_path, Decision, Engine, EngineConfig, Incident, ManagedRelationship, Notification,
    RelationshipStatus, Request, RequestStatus, WorkflowError,
};

use crate::cli::{Cli, Command, DbCommand, IncidentCommand, NotifyCommand, RelCommand, RequestCommand};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("propman=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<WorkflowError>() {
            Some(workflow_err) if workflow_err.is_user_error() => {
                eprintln!("{} {}", "✗".red(), workflow_err.user_message());
                std::process::exit(1);
            }
            _ => Err(err),
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => get_config_path()?,
    };
    let mut config = EngineConfig::load_or_default(&config_path)?;
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
        config.database.backend_type = None;
    }
    debug!(config = %config_path.display(), database = %config.database.path.display(), "configuration loaded");

    // Migration works on explicit files and needs no engine
    if let Command::Db(DbCommand::Migrate { from, to }) = &cli.command {
        return migrate(from, to);
    }

    let engine = Engine::open(&config)?;

    match &cli.command {
        Command::Request(cmd) => handle_request_command(cmd, &engine),
        Command::Rel(cmd) => handle_rel_command(cmd, &engine),
        Command::Notify(cmd) => handle_notify_command(cmd, &engine),
        Command::Incident(cmd) => handle_incident_command(cmd, &engine),
        Command::Reconcile => {
            let report = engine.requests().reconcile_accepted_requests()?;
            println!(
                "{} Examined {} accepted pair(s), repaired {}, failed {}.",
                if report.failed == 0 { "✓".green() } else { "!".yellow() },
                report.examined,
                report.repaired,
                report.failed
            );
            Ok(())
        }
        Command::Db(cmd) => handle_db_command(cmd, &engine),
    }
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id.trim()).with_context(|| format!("Invalid ID: {}", id))
}

fn parse_request_status(s: &str) -> Result<RequestStatus> {
    RequestStatus::parse(&s.to_lowercase()).with_context(|| {
        format!(
            "Invalid status: {}. Valid values: pending, accepted, rejected, cancelled",
            s
        )
    })
}

fn parse_decision(s: &str) -> Result<Decision> {
    Decision::parse(&s.to_lowercase())
        .with_context(|| format!("Invalid decision: {}. Valid values: accepted, rejected", s))
}

fn handle_request_command(cmd: &RequestCommand, engine: &Engine) -> Result<()> {
    let requests = engine.requests();

    match cmd {
        RequestCommand::Submit {
            from,
            to,
            community,
            message,
        } => {
            let request = requests.submit_request(from, to, community.as_deref(), message.as_deref())?;
            println!("{} Request {} sent to {}.", "✓".green(), request.id, request.target_id);
        }
        RequestCommand::Resolve {
            id,
            decision,
            by,
            message,
        } => {
            let decision = parse_decision(decision)?;
            let resolution = requests.resolve_request(&parse_id(id)?, decision, by, message.as_deref())?;
            println!(
                "{} Request {} {}.",
                "✓".green(),
                resolution.request.id,
                resolution.request.status
            );
            if let Some(relationship_id) = resolution.relationship_id {
                println!("  Relationship: {}", relationship_id);
            }
            for failure in &resolution.side_effect_failures {
                println!("{} {}", "!".yellow(), failure);
            }
        }
        RequestCommand::Cancel { id } => {
            let request = requests.cancel_request(&parse_id(id)?)?;
            println!("{} Request {} cancelled.", "✓".green(), request.id);
        }
        RequestCommand::Show { id } => {
            show_request(&requests.get_request(&parse_id(id)?)?);
        }
        RequestCommand::List { from, to, status } => {
            let status = status.as_deref().map(parse_request_status).transpose()?;
            let list = match (from, to) {
                (Some(requester), _) => requests.list_outgoing_requests(requester, status)?,
                (None, Some(target)) => requests.list_incoming_requests(target, status)?,
                (None, None) => bail!("Specify --from <member> or --to <administrator>"),
            };
            list_requests(&list);
        }
    }

    Ok(())
}

fn status_label(status: RequestStatus) -> colored::ColoredString {
    match status {
        RequestStatus::Pending => "pending".yellow(),
        RequestStatus::Accepted => "accepted".green(),
        RequestStatus::Rejected => "rejected".red(),
        RequestStatus::Cancelled => "cancelled".dimmed(),
    }
}

fn list_requests(requests: &[Request]) {
    if requests.is_empty() {
        println!("{}", "No requests found.".yellow());
        return;
    }

    println!(
        "{:<36} | {:<16} | {:<16} | {:<10} | {:<20}",
        "ID", "From", "To", "Status", "Requested"
    );
    println!("{}", "-".repeat(108));

    for request in requests {
        println!(
            "{:<36} | {:<16} | {:<16} | {:<10} | {:<20}",
            request.id,
            request.requester_id,
            request.target_id,
            status_label(request.status),
            request.requested_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn show_request(request: &Request) {
    println!("{}", format!("Request {}", request.id).bold());
    println!("{}", "-".repeat(60));
    println!("From:      {}", request.requester_id);
    println!("To:        {}", request.target_id);
    if let Some(community) = &request.community_id {
        println!("Community: {}", community);
    }
    println!("Status:    {}", status_label(request.status));
    println!("Requested: {}", request.requested_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(message) = &request.request_message {
        println!("Message:   {}", message);
    }
    if let (Some(responder), Some(at)) = (&request.responder_id, request.responded_at) {
        println!("Answered:  {} by {}", at.format("%Y-%m-%d %H:%M:%S"), responder);
    }
    if let Some(response) = &request.response_message {
        println!("Response:  {}", response);
    }
}

fn handle_rel_command(cmd: &RelCommand, engine: &Engine) -> Result<()> {
    let relationships = engine.relationships();

    match cmd {
        RelCommand::Ensure {
            admin,
            member,
            community,
            by,
            notes,
        } => {
            let id = relationships.ensure_active_relationship(
                admin,
                member,
                community.as_deref(),
                by.as_deref().unwrap_or(admin),
                notes.as_deref(),
            )?;
            println!("{} Active relationship {} ({} manages {}).", "✓".green(), id, admin, member);
        }
        RelCommand::Terminate { id, reason } => {
            let relationship = relationships.terminate_relationship(&parse_id(id)?, reason.as_deref())?;
            println!("{} Relationship {} is inactive.", "✓".green(), relationship.id);
        }
        RelCommand::Suspend { id } => {
            let relationship = relationships.suspend_relationship(&parse_id(id)?)?;
            println!("{} Relationship {} suspended.", "✓".green(), relationship.id);
        }
        RelCommand::Resume { id } => {
            let relationship = relationships.resume_relationship(&parse_id(id)?)?;
            println!("{} Relationship {} resumed.", "✓".green(), relationship.id);
        }
        RelCommand::List { admin, member, active } => {
            let mut list = match (admin, member) {
                (Some(admin), _) if *active => relationships.list_active_relationships(admin)?,
                (Some(admin), _) => relationships.list_administrator_relationships(admin)?,
                (None, Some(member)) => relationships.list_member_relationships(member)?,
                (None, None) => bail!("Specify --admin <administrator> or --member <member>"),
            };
            if *active {
                list.retain(|r| r.is_active());
            }
            list_relationships(&list);
        }
    }

    Ok(())
}

fn list_relationships(relationships: &[ManagedRelationship]) {
    if relationships.is_empty() {
        println!("{}", "No relationships found.".yellow());
        return;
    }

    println!(
        "{:<36} | {:<16} | {:<16} | {:<10} | {:<20}",
        "ID", "Administrator", "Member", "Status", "Established"
    );
    println!("{}", "-".repeat(108));

    for relationship in relationships {
        let status = match relationship.status {
            RelationshipStatus::Active => "active".green(),
            RelationshipStatus::Suspended => "suspended".yellow(),
            RelationshipStatus::Inactive => "inactive".dimmed(),
        };
        println!(
            "{:<36} | {:<16} | {:<16} | {:<10} | {:<20}",
            relationship.id,
            relationship.administrator_id,
            relationship.member_id,
            status,
            relationship.established_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
}

fn handle_notify_command(cmd: &NotifyCommand, engine: &Engine) -> Result<()> {
    let notifications = engine.notifications();

    match cmd {
        NotifyCommand::List { recipient, unread } => {
            let list = notifications.list_for_recipient(recipient, *unread)?;
            list_notifications(&list);
        }
        NotifyCommand::Read { recipient, id } => {
            notifications.mark_read(&parse_id(id)?, recipient)?;
            println!("{} Notification marked as read.", "✓".green());
        }
        NotifyCommand::ReadAll { recipient } => {
            let count = notifications.mark_all_read(recipient)?;
            println!("{} {} notification(s) marked as read.", "✓".green(), count);
        }
    }

    Ok(())
}

fn list_notifications(notifications: &[Notification]) {
    if notifications.is_empty() {
        println!("{}", "No notifications.".yellow());
        return;
    }

    for notification in notifications {
        let marker = if notification.read { " ".normal() } else { "●".blue() };
        println!(
            "{} {} {} ({})",
            marker,
            notification.created_at.format("%Y-%m-%d %H:%M"),
            notification.title.bold(),
            notification.id
        );
        for line in notification.message.lines() {
            println!("    {}", line);
        }
        if let Some(action) = &notification.action {
            println!("    {} {}", action.label.cyan(), action.url);
        }
    }
}

fn handle_incident_command(cmd: &IncidentCommand, engine: &Engine) -> Result<()> {
    let incidents = engine.incidents();

    match cmd {
        IncidentCommand::Report { reporter, title } => {
            let incident = incidents.report_incident(reporter, title)?;
            println!("{} Incident {} recorded.", "✓".green(), incident.id);
        }
        IncidentCommand::Claim { admin, dry_run } => {
            if *dry_run {
                list_incidents(&incidents.unclaimed_incidents_for(admin)?);
            } else {
                let claimed = incidents.claim_unassigned_incidents(admin)?;
                println!("{} Claimed {} incident(s) for {}.", "✓".green(), claimed, admin);
            }
        }
        IncidentCommand::List { admin } => {
            list_incidents(&incidents.incidents_for_administrator(admin)?);
        }
    }

    Ok(())
}

fn list_incidents(incidents: &[Incident]) {
    if incidents.is_empty() {
        println!("{}", "No incidents found.".yellow());
        return;
    }

    println!(
        "{:<36} | {:<16} | {:<30} | {:<12} | {:<16}",
        "ID", "Reporter", "Title", "Status", "Assigned"
    );
    println!("{}", "-".repeat(120));

    for incident in incidents {
        let title = if incident.title.chars().count() > 30 {
            format!("{}...", incident.title.chars().take(27).collect::<String>())
        } else {
            incident.title.clone()
        };
        println!(
            "{:<36} | {:<16} | {:<30} | {:<12} | {:<16}",
            incident.id,
            incident.reporter_id,
            title,
            incident.status.as_str(),
            incident.assigned_administrator_id.as_deref().unwrap_or("-")
        );
    }
}

fn handle_db_command(cmd: &DbCommand, engine: &Engine) -> Result<()> {
    let backend = engine.backend();

    match cmd {
        DbCommand::Stats => {
            let stats = backend.stats()?;
            println!("{} ({})", backend.path().display(), stats.backend_type);
            println!(
                "  Requests:      {} ({} pending)",
                stats.request_count, stats.pending_request_count
            );
            println!(
                "  Relationships: {} ({} active)",
                stats.relationship_count, stats.active_relationship_count
            );
            println!("  Notifications: {}", stats.notification_count);
            println!(
                "  Incidents:     {} ({} unclaimed)",
                stats.incident_count, stats.unclaimed_incident_count
            );
        }
        DbCommand::Export { output } => {
            let count = export_backend_to_json(backend.as_ref(), output)?;
            println!("{} Exported {} record(s) to {}.", "✓".green(), count, output.display());
        }
        DbCommand::Import { input } => {
            let count = import_json_to_backend(input, backend.as_ref())?;
            println!("{} Imported {} record(s) from {}.", "✓".green(), count, input.display());
        }
        DbCommand::Migrate { from, to } => migrate(from, to)?,
    }

    Ok(())
}

fn migrate(from: &Path, to: &Path) -> Result<()> {
    let count = match (infer_backend_type(from), infer_backend_type(to)) {
        (BackendType::Yaml, BackendType::Sqlite) => migrate_yaml_to_sqlite(from, to)?,
        (BackendType::Sqlite, BackendType::Yaml) => migrate_sqlite_to_yaml(from, to)?,
        (backend_type, _) => bail!(
            "Nothing to migrate: {} and {} are both {} files",
            from.display(),
            to.display(),
            backend_type
        ),
    };

    println!(
        "{} Migrated {} record(s) from {} to {}.",
        "✓".green(),
        count,
        from.display(),
        to.display()
    );
    Ok(())
}
