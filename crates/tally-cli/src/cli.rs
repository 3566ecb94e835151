use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tally_core::models::Category;
use tally_core::sync::ConflictDecision;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Log entries offline and sync them when a connection is available")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the database acting as the remote store
    #[arg(long, global = true, value_name = "PATH")]
    pub remote_db: Option<PathBuf>,

    /// User whose entries are read and written
    #[arg(long, global = true, value_name = "ID")]
    pub user: Option<String>,

    /// Treat the remote store as unreachable
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log a new entry
    #[command(alias = "new")]
    Add {
        /// Entry name
        name: Vec<String>,
        /// Meal category
        #[arg(short, long, value_enum, default_value_t = CategoryArg::Snack)]
        category: CategoryArg,
        /// Amount to record (e.g. calories)
        #[arg(short, long)]
        magnitude: f64,
        /// When it happened (defaults to now)
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },
    /// List entries
    List {
        /// Only entries on this UTC day (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of an entry
    Edit {
        /// Entry ID or unique ID prefix
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(short, long, value_enum)]
        category: Option<CategoryArg>,
        #[arg(short, long)]
        magnitude: Option<f64>,
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },
    /// Move an entry to the trash
    Delete {
        /// Entry ID or unique ID prefix
        id: String,
    },
    /// Take an entry out of the trash
    Restore {
        /// Entry ID or unique ID prefix
        id: String,
    },
    /// Permanently remove an entry
    Purge {
        /// Entry ID or unique ID prefix
        id: String,
    },
    /// List deleted entries
    Trash {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List changes waiting to be synced
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync pending changes with the remote store now
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle a conflicting pending change
    Resolve {
        /// Pending operation ID
        op_id: String,
        /// Which side wins
        #[arg(long, value_enum)]
        keep: KeepSide,
    },
    /// Sync in the background until interrupted; press Enter to sync now
    Watch,
    /// Remove all local data for the user
    SignOut,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CategoryArg {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

impl From<CategoryArg> for Category {
    fn from(value: CategoryArg) -> Self {
        match value {
            CategoryArg::Breakfast => Self::Breakfast,
            CategoryArg::Lunch => Self::Lunch,
            CategoryArg::Dinner => Self::Dinner,
            CategoryArg::Snack => Self::Snack,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KeepSide {
    Local,
    Remote,
}

impl From<KeepSide> for ConflictDecision {
    fn from(value: KeepSide) -> Self {
        match value {
            KeepSide::Local => Self::KeepLocal,
            KeepSide::Remote => Self::KeepRemote,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}
