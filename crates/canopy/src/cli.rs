//! Clap derive structures for the `canopy` CLI.
//!
//! Defines the command tree, global flags, and shared value enums. Kept free
//! of workspace dependencies so `build.rs` can compile it for man pages.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// canopy -- manage farm topology and device assignments
#[derive(Debug, Parser)]
#[command(
    name = "canopy",
    version,
    about = "Manage farm rows, racks, shelves and their devices from the command line",
    long_about = "Lay out a farm as rows of racks of shelves, bind home-automation\n\
        devices to any node, and watch the layout change in realtime.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Farm profile to use
    #[arg(long, short = 'p', env = "CANOPY_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend URL (overrides profile)
    #[arg(long, short = 'u', env = "CANOPY_URL", global = true)]
    pub url: Option<String>,

    /// Farm id (overrides profile)
    #[arg(long, short = 'f', env = "CANOPY_FARM", global = true)]
    pub farm: Option<String>,

    /// Project key for the backend
    #[arg(long, env = "CANOPY_ANON_KEY", global = true, hide_env = true)]
    pub anon_key: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CANOPY_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', env = "CANOPY_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "CANOPY_TIMEOUT", default_value = "30", global = true)]
    pub timeout: u64,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

/// Overlay layers that can be drawn over the topology.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LayerArg {
    Devices,
    Automation,
    Monitoring,
    Grows,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the farm layout
    #[command(alias = "topo", alias = "t")]
    Topology(TopologyArgs),

    /// Manage rows
    Rows(NodeArgs),

    /// Manage racks within a row
    Racks(NodeArgs),

    /// Manage shelves within a rack
    Shelves(NodeArgs),

    /// Search devices and manage assignments
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Stream realtime changes to the farm
    Watch(WatchArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Topology ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TopologyArgs {
    #[command(subcommand)]
    pub command: TopologyCommand,
}

#[derive(Debug, Subcommand)]
pub enum TopologyCommand {
    /// Print rows, racks and shelves as a tree
    Show {
        /// Overlay a layer and show its alert badge
        #[arg(long, short = 'l')]
        layer: Vec<LayerArg>,
    },
}

// ── Rows / racks / shelves ───────────────────────────────────────────

#[derive(Debug, Args)]
pub struct NodeArgs {
    #[command(subcommand)]
    pub command: NodeCommand,
}

#[derive(Debug, Subcommand)]
pub enum NodeCommand {
    /// List nodes under a parent
    #[command(alias = "ls")]
    List {
        /// Parent id (row for racks, rack for shelves)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Append a node under a parent
    Add {
        /// Parent id (row for racks, rack for shelves)
        #[arg(long)]
        parent: Option<String>,

        /// Name; defaults to "<Kind> <n>"
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Rename a node
    Rename {
        /// Node id
        id: String,
        /// New name
        name: String,
    },

    /// Delete a node with everything below it
    #[command(alias = "rm")]
    Remove {
        /// Node id
        id: String,
    },

    /// Move a node to a zero-based index among its siblings
    Move {
        /// Node id
        id: String,
        /// Target index (clamped to the last slot)
        index: usize,
    },

    /// Set the full order of a parent's children
    Order {
        /// Parent id (row for racks, rack for shelves)
        #[arg(long)]
        parent: Option<String>,

        /// Every child id, in the new order
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
    },
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// Search the device registry
    Search {
        /// Text matched against entity id and name
        #[arg(default_value = "")]
        query: String,

        /// Only this domain (light, sensor, switch, ...)
        #[arg(long, short = 'd')]
        domain: Option<String>,

        /// Hide devices that are already assigned
        #[arg(long)]
        available: bool,

        /// Rank results for a target (<row|rack|shelf>:<id>)
        #[arg(long, short = 't')]
        target: Option<String>,
    },

    /// List assignments, optionally on one target
    Assigned {
        /// Target (<row|rack|shelf>:<id>)
        target: Option<String>,
    },

    /// Assign a device to a target
    Assign {
        /// Device entity id (e.g. light.shelf_a1)
        entity_id: String,
        /// Target (<row|rack|shelf>:<id>)
        target: String,
    },

    /// Remove a device's assignment
    Unassign {
        /// Device entity id or assignment id
        device: String,
    },

    /// Assign every available device of a domain to a target
    QuickAssign {
        /// Target (<row|rack|shelf>:<id>)
        target: String,
        /// Device domain (light, sensor, ...)
        domain: String,
    },

    /// List the device types suggested for a node kind
    Types {
        /// row, rack or shelf
        kind: String,
    },
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Tables to watch (default: all synced tables)
    pub tables: Vec<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Interactive configuration wizard
    Init,

    /// Show the current configuration (secrets redacted)
    Show,

    /// Set a profile value
    Set {
        /// Key (url, farm_id, user_id, anon_key_env, timeout, realtime, layer_mode, insecure, ca_cert)
        key: String,
        /// Value
        value: String,
    },

    /// Store the project key or session token in the system keyring
    SetToken {
        /// Profile name (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,

        /// Store the session token instead of the project key
        #[arg(long)]
        access: bool,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
