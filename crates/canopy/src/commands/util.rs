//! Shared helpers for command handlers.

use canopy_core::{
    AssignmentTarget, DeviceEntityId, EntityId, FarmController, NodeKind, NodeRecord, ParentRef,
};

use crate::error::CliError;

fn list_command(kind: NodeKind) -> String {
    match kind {
        NodeKind::Row => "rows list".into(),
        NodeKind::Rack => "racks list".into(),
        NodeKind::Shelf => "shelves list".into(),
    }
}

/// Resolve a node by id, falling back to a case-insensitive name match.
///
/// A name shared by several nodes of the same kind is rejected.
pub fn resolve_node(
    controller: &FarmController,
    kind: NodeKind,
    identifier: &str,
) -> Result<NodeRecord, CliError> {
    let store = controller.store();
    if let Some(record) = store.node(kind, &EntityId::from(identifier)) {
        return Ok(record);
    }

    let tree = controller.tree();
    let matches: Vec<EntityId> = tree
        .elements()
        .filter(|e| e.kind() == kind && e.name().eq_ignore_ascii_case(identifier.trim()))
        .map(|e| e.id().clone())
        .collect();

    match matches.as_slice() {
        [id] => store.node(kind, id).ok_or_else(|| not_found(kind, identifier)),
        [] => Err(not_found(kind, identifier)),
        _ => Err(CliError::Validation {
            field: kind.to_string(),
            reason: format!(
                "{} {} nodes are named '{identifier}'; use the id instead",
                matches.len(),
                kind
            ),
        }),
    }
}

fn not_found(kind: NodeKind, identifier: &str) -> CliError {
    CliError::NotFound {
        resource_type: kind.label().into(),
        identifier: identifier.into(),
        list_command: list_command(kind),
    }
}

/// The container that holds nodes of `kind`.
///
/// Rows live directly in the farm; racks and shelves need `--parent`.
pub fn parent_for(
    controller: &FarmController,
    kind: NodeKind,
    parent: Option<&str>,
) -> Result<ParentRef, CliError> {
    let parent_kind = match kind {
        NodeKind::Row => return Ok(ParentRef::Farm(controller.config().farm_id.clone())),
        NodeKind::Rack => NodeKind::Row,
        NodeKind::Shelf => NodeKind::Rack,
    };
    let identifier = parent.ok_or_else(|| CliError::Validation {
        field: "parent".into(),
        reason: format!("--parent <{parent_kind}> is required for {kind} commands"),
    })?;
    let record = resolve_node(controller, parent_kind, identifier)?;
    ParentRef::of_node(parent_kind, record.id().clone())
        .ok_or_else(|| CliError::Internal(format!("{parent_kind} cannot hold children")))
}

/// Parse `<row|rack|shelf>:<id-or-name>` and resolve it against the farm.
pub fn resolve_target(controller: &FarmController, raw: &str) -> Result<AssignmentTarget, CliError> {
    let parsed: AssignmentTarget = raw.parse().map_err(|reason| CliError::Validation {
        field: "target".into(),
        reason,
    })?;
    let record = resolve_node(controller, parsed.kind, &parsed.id.to_string())?;
    Ok(AssignmentTarget::new(parsed.kind, record.id().clone()))
}

/// Resolve an assignment from a device entity id or the assignment's own id.
pub fn resolve_assignment(controller: &FarmController, identifier: &str) -> Result<EntityId, CliError> {
    let store = controller.store();
    if let Some(assignment) = store.assignment_for_entity(&DeviceEntityId::new(identifier)) {
        return Ok(assignment.id.clone());
    }
    let id = EntityId::from(identifier);
    if store.assignment(&id).is_some() {
        return Ok(id);
    }
    Err(CliError::NotFound {
        resource_type: "Assignment".into(),
        identifier: identifier.into(),
        list_command: "devices assigned".into(),
    })
}
