use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Administrator requests and managed relationships")]
pub struct Cli {
    /// Path to the engine config file
    #[clap(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Database file to use instead of the configured one (.db/.sqlite or .yaml)
    #[clap(long)]
    pub db: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit, answer and inspect administrator requests
    #[clap(subcommand)]
    Request(RequestCommand),

    /// Manage relationships between administrators and members
    #[clap(subcommand)]
    Rel(RelCommand),

    /// Read a recipient's notifications
    #[clap(subcommand)]
    Notify(NotifyCommand),

    /// Report, claim and list incidents
    #[clap(subcommand)]
    Incident(IncidentCommand),

    /// Create relationships missing for accepted requests
    Reconcile,

    /// Database maintenance
    #[clap(subcommand)]
    Db(DbCommand),
}

#[derive(Subcommand, Debug)]
pub enum RequestCommand {
    /// Ask an administrator to manage a member's incidents
    Submit {
        /// Member sending the request
        #[clap(long)]
        from: String,

        /// Administrator receiving the request
        #[clap(long)]
        to: String,

        /// Community the request is about
        #[clap(long)]
        community: Option<String>,

        /// Message for the administrator
        #[clap(long, short = 'm')]
        message: Option<String>,
    },

    /// Accept or reject a pending request
    Resolve {
        /// Request ID
        id: String,

        /// Decision (accepted or rejected)
        #[clap(long)]
        decision: String,

        /// Administrator answering the request
        #[clap(long)]
        by: String,

        /// Message for the member
        #[clap(long, short = 'm')]
        message: Option<String>,
    },

    /// Withdraw a pending request
    Cancel {
        /// Request ID
        id: String,
    },

    /// Show details for a request
    Show {
        /// Request ID
        id: String,
    },

    /// List requests sent by a member or received by an administrator
    List {
        /// Requests sent by this member
        #[clap(long, conflicts_with = "to")]
        from: Option<String>,

        /// Requests received by this administrator
        #[clap(long)]
        to: Option<String>,

        /// Filter by status (pending, accepted, rejected, cancelled)
        #[clap(long)]
        status: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RelCommand {
    /// Make sure an active relationship exists for the pair
    Ensure {
        /// Administrator ID
        #[clap(long)]
        admin: String,

        /// Member ID
        #[clap(long)]
        member: String,

        /// Community ID
        #[clap(long)]
        community: Option<String>,

        /// Actor establishing the relationship (defaults to the administrator)
        #[clap(long)]
        by: Option<String>,

        /// Notes stored on a newly created relationship
        #[clap(long)]
        notes: Option<String>,
    },

    /// End a relationship
    Terminate {
        /// Relationship ID
        id: String,

        /// Reason appended to the notes
        #[clap(long)]
        reason: Option<String>,
    },

    /// Pause an active relationship
    Suspend {
        /// Relationship ID
        id: String,
    },

    /// Reactivate a suspended relationship
    Resume {
        /// Relationship ID
        id: String,
    },

    /// List relationships of an administrator or a member
    List {
        /// Administrator ID
        #[clap(long, conflicts_with = "member")]
        admin: Option<String>,

        /// Member ID
        #[clap(long)]
        member: Option<String>,

        /// Only active relationships
        #[clap(long)]
        active: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum NotifyCommand {
    /// List notifications, newest first
    List {
        /// Recipient ID
        recipient: String,

        /// Only unread notifications
        #[clap(long, short = 'u')]
        unread: bool,
    },

    /// Mark one notification as read
    Read {
        /// Recipient ID
        recipient: String,

        /// Notification ID
        id: String,
    },

    /// Mark all of a recipient's notifications as read
    ReadAll {
        /// Recipient ID
        recipient: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum IncidentCommand {
    /// Record a new incident
    Report {
        /// Member reporting the incident
        #[clap(long)]
        reporter: String,

        /// Short description
        #[clap(long)]
        title: String,
    },

    /// Claim unassigned incidents of the administrator's members
    Claim {
        /// Administrator ID
        admin: String,

        /// Only show what would be claimed
        #[clap(long)]
        dry_run: bool,
    },

    /// List incidents assigned to an administrator, newest first
    List {
        /// Administrator ID
        admin: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbCommand {
    /// Show record counts
    Stats,

    /// Export the whole database to JSON
    Export {
        /// Output JSON file
        output: PathBuf,
    },

    /// Replace the database content with a JSON export
    Import {
        /// Input JSON file
        input: PathBuf,
    },

    /// Convert between YAML and SQLite storage
    Migrate {
        /// Source database file
        #[clap(long)]
        from: PathBuf,

        /// Destination database file
        #[clap(long)]
        to: PathBuf,
    },
}
