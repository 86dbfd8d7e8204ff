//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod nodes;
pub mod topology;
pub mod util;
pub mod watch;

use canopy_core::{FarmController, NodeKind};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a farm-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    controller: &FarmController,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Topology(args) => topology::handle(controller, args, global),
        Command::Rows(args) => nodes::handle(controller, NodeKind::Row, args, global).await,
        Command::Racks(args) => nodes::handle(controller, NodeKind::Rack, args, global).await,
        Command::Shelves(args) => nodes::handle(controller, NodeKind::Shelf, args, global).await,
        Command::Devices(args) => devices::handle(controller, args, global).await,
        // Handled before a controller exists
        Command::Watch(_) | Command::Config(_) | Command::Completions(_) => {
            Err(CliError::Internal("command dispatched without a handler".into()))
        }
    }
}
