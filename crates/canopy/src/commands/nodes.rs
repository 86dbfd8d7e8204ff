//! Row, rack and shelf command handlers.
//!
//! The three levels share one argument shape; `kind` selects the level.

use tabled::Tabled;

use canopy_core::{
    AssignmentTarget, Command, CommandResult, FarmController, NodeDraft, NodeKind, NodeRecord,
};

use crate::cli::{GlobalOpts, NodeArgs, NodeCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "#")]
    position: u32,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Devices")]
    devices: usize,
}

fn node_row(controller: &FarmController, record: &NodeRecord) -> NodeRow {
    let target = AssignmentTarget::new(record.kind(), record.id().clone());
    NodeRow {
        position: record.position(),
        name: record.name().to_owned(),
        id: record.id().to_string(),
        parent: record.parent().to_string(),
        devices: controller.store().assignments_for_target(&target).len(),
    }
}

fn detail(record: &NodeRecord) -> String {
    [
        format!("Kind:     {}", record.kind()),
        format!("ID:       {}", record.id()),
        format!("Name:     {}", record.name()),
        format!("Position: {}", record.position()),
        format!("Parent:   {}", record.parent()),
    ]
    .join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    controller: &FarmController,
    kind: NodeKind,
    args: NodeArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        NodeCommand::List { parent } => {
            let records = if kind == NodeKind::Row || parent.is_some() {
                let parent = util::parent_for(controller, kind, parent.as_deref())?;
                controller.store().children(&parent)
            } else {
                all_of_kind(controller, kind)
            };
            let out = output::render_list(
                &global.output,
                &records,
                |r| node_row(controller, r),
                |r| r.id().to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        NodeCommand::Add { parent, name } => {
            let parent = util::parent_for(controller, kind, parent.as_deref())?;
            let draft = name.map_or_else(NodeDraft::default, NodeDraft::named);
            let result = controller.execute(Command::AddNode { parent, draft }).await?;
            print_node(result, global)
        }

        NodeCommand::Rename { id, name } => {
            let record = util::resolve_node(controller, kind, &id)?;
            let result = controller
                .execute(Command::RenameNode {
                    kind,
                    id: record.id().clone(),
                    name,
                })
                .await?;
            print_node(result, global)
        }

        NodeCommand::Remove { id } => {
            let record = util::resolve_node(controller, kind, &id)?;
            let result = controller
                .execute(Command::RemoveNode {
                    kind,
                    id: record.id().clone(),
                })
                .await?;
            if let CommandResult::Removed(report) = result {
                let out = output::render_single(
                    &global.output,
                    &report,
                    |r| {
                        format!(
                            "Removed {} row(s), {} rack(s), {} shelf(s), {} assignment(s)",
                            r.rows, r.racks, r.shelves, r.assignments
                        )
                    },
                    |_| record.id().to_string(),
                );
                output::print_output(&out, global.quiet);
            }
            Ok(())
        }

        NodeCommand::Move { id, index } => {
            let record = util::resolve_node(controller, kind, &id)?;
            controller
                .execute(Command::MoveNode {
                    kind,
                    id: record.id().clone(),
                    index,
                })
                .await?;
            print_siblings(controller, &record, global);
            Ok(())
        }

        NodeCommand::Order { parent, ids } => {
            let parent = util::parent_for(controller, kind, parent.as_deref())?;
            let order = ids
                .iter()
                .map(|id| util::resolve_node(controller, kind, id).map(|r| r.id().clone()))
                .collect::<Result<Vec<_>, _>>()?;
            controller
                .execute(Command::Reorder {
                    parent: parent.clone(),
                    order,
                })
                .await?;
            let records = controller.store().children(&parent);
            let out = output::render_list(
                &global.output,
                &records,
                |r| node_row(controller, r),
                |r| r.id().to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

fn all_of_kind(controller: &FarmController, kind: NodeKind) -> Vec<NodeRecord> {
    let store = controller.store();
    let mut records: Vec<NodeRecord> = match kind {
        NodeKind::Row => store
            .rows_snapshot()
            .iter()
            .map(|r| NodeRecord::Row(r.as_ref().clone()))
            .collect(),
        NodeKind::Rack => store
            .racks_snapshot()
            .iter()
            .map(|r| NodeRecord::Rack(r.as_ref().clone()))
            .collect(),
        NodeKind::Shelf => store
            .shelves_snapshot()
            .iter()
            .map(|s| NodeRecord::Shelf(s.as_ref().clone()))
            .collect(),
    };
    records.sort_by(|a, b| {
        (a.parent().to_string(), a.position(), a.name())
            .cmp(&(b.parent().to_string(), b.position(), b.name()))
    });
    records
}

fn print_node(result: CommandResult, global: &GlobalOpts) -> Result<(), CliError> {
    let CommandResult::Node(record) = result else {
        return Err(CliError::Internal("expected a node in the command result".into()));
    };
    let out = output::render_single(&global.output, &record, detail, |r| r.id().to_string());
    output::print_output(&out, global.quiet);
    Ok(())
}

fn print_siblings(controller: &FarmController, record: &NodeRecord, global: &GlobalOpts) {
    let records = controller.store().children(&record.parent());
    let out = output::render_list(
        &global.output,
        &records,
        |r| node_row(controller, r),
        |r| r.id().to_string(),
    );
    output::print_output(&out, global.quiet);
}
