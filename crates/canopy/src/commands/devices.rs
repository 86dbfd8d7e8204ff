//! Device search and assignment handlers.

use tabled::Tabled;

use canopy_core::{
    Command, CommandResult, Device, DeviceAssignment, DeviceDomain, DeviceEntityId, DeviceFilter,
    FarmController, NodeKind, QuickAssignReport, RankedDevice, contextual_device_types,
};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Assigned To")]
    assigned: String,
}

#[derive(Tabled)]
struct RankedRow {
    #[tabled(rename = "")]
    recommended: &'static str,
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "State")]
    state: String,
}

#[derive(Tabled)]
struct AssignmentRow {
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    entity_type: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "ID")]
    id: String,
}

fn device_row(controller: &FarmController, d: &Device) -> DeviceRow {
    DeviceRow {
        entity_id: d.entity_id.to_string(),
        name: d.name.clone(),
        domain: d.domain.to_string(),
        state: d.state.clone().unwrap_or_else(|| "-".into()),
        assigned: controller
            .store()
            .assignment_for_entity(&d.entity_id)
            .map_or_else(|| "-".into(), |a| a.target.to_string()),
    }
}

fn ranked_row(r: &RankedDevice) -> RankedRow {
    RankedRow {
        recommended: if r.recommended { "★" } else { "" },
        entity_id: r.device.entity_id.to_string(),
        name: r.device.name.clone(),
        domain: r.device.domain.to_string(),
        state: r.device.state.clone().unwrap_or_else(|| "-".into()),
    }
}

fn assignment_row(a: &DeviceAssignment) -> AssignmentRow {
    AssignmentRow {
        entity_id: a.entity_id.to_string(),
        name: a.friendly_name.clone().unwrap_or_default(),
        entity_type: a.entity_type.to_string(),
        target: a.target.to_string(),
        id: a.id.to_string(),
    }
}

fn assignment_detail(a: &DeviceAssignment) -> String {
    [
        format!("ID:     {}", a.id),
        format!("Entity: {}", a.entity_id),
        format!("Name:   {}", a.friendly_name.as_deref().unwrap_or("-")),
        format!("Type:   {}", a.entity_type),
        format!("Target: {}", a.target),
    ]
    .join("\n")
}

fn quick_assign_detail(report: &QuickAssignReport) -> String {
    let mut lines = vec![format!(
        "Assigned {} of {}",
        report.success_count(),
        report.success_count() + report.failure_count()
    )];
    lines.extend(report.assigned.iter().map(|a| format!("  ✓ {}", a.entity_id)));
    lines.extend(
        report
            .failed
            .iter()
            .map(|(entity, reason)| format!("  ✗ {entity}: {reason}")),
    );
    lines.join("\n")
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    controller: &FarmController,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        DevicesCommand::Search {
            query,
            domain,
            available,
            target,
        } => {
            let mut filter = if available {
                DeviceFilter::available()
            } else {
                DeviceFilter::default()
            };
            if let Some(domain) = domain {
                filter = filter.with_domain(DeviceDomain::from(domain.as_str()));
            }

            let out = if let Some(raw) = target {
                let target = util::resolve_target(controller, &raw)?;
                let ranked = controller
                    .assignments()
                    .search_for_target(&query, &target, &filter)
                    .await?;
                output::render_list(&global.output, &ranked, ranked_row, |r| {
                    r.device.entity_id.to_string()
                })
            } else {
                let devices = controller.assignments().search_devices(&query, &filter).await?;
                output::render_list(
                    &global.output,
                    &devices,
                    |d| device_row(controller, d),
                    |d| d.entity_id.to_string(),
                )
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Assigned { target } => {
            let assignments: Vec<DeviceAssignment> = match target {
                Some(raw) => {
                    let target = util::resolve_target(controller, &raw)?;
                    controller.assignments().assigned_devices(&target).await?
                }
                None => controller
                    .store()
                    .assignments_snapshot()
                    .iter()
                    .map(|a| DeviceAssignment::clone(a))
                    .collect(),
            };
            let out = output::render_list(&global.output, &assignments, assignment_row, |a| {
                a.entity_id.to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Assign { entity_id, target } => {
            let target = util::resolve_target(controller, &target)?;
            let device = find_device(controller, &entity_id).await?;
            let result = controller
                .execute(Command::AssignDevice { device, target })
                .await?;
            let CommandResult::Assignment(assignment) = result else {
                return Err(CliError::Internal("expected an assignment in the command result".into()));
            };
            let out = output::render_single(&global.output, &assignment, assignment_detail, |a| {
                a.id.to_string()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Unassign { device } => {
            let assignment_id = util::resolve_assignment(controller, &device)?;
            controller
                .execute(Command::UnassignDevice { assignment_id })
                .await?;
            Ok(())
        }

        DevicesCommand::QuickAssign { target, domain } => {
            let target = util::resolve_target(controller, &target)?;
            let result = controller
                .execute(Command::QuickAssign {
                    target,
                    domain: DeviceDomain::from(domain.as_str()),
                })
                .await?;
            let CommandResult::QuickAssign(report) = result else {
                return Err(CliError::Internal("expected a report in the command result".into()));
            };
            let out = output::render_single(&global.output, &report, quick_assign_detail, |r| {
                r.assigned
                    .iter()
                    .map(|a| a.entity_id.to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Types { kind } => types(&kind, global),
    }
}

/// Print the domains suggested for a node kind. Needs no connection.
pub fn types(kind: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let kind: NodeKind = kind.parse().map_err(|_| CliError::Validation {
        field: "kind".into(),
        reason: format!("expected row, rack or shelf, got '{kind}'"),
    })?;
    let domains: Vec<String> = contextual_device_types(kind)
        .iter()
        .map(ToString::to_string)
        .collect();
    let out = match global.output {
        crate::cli::OutputFormat::Table | crate::cli::OutputFormat::Plain => domains.join("\n"),
        _ => output::render_single(&global.output, &domains, |_| String::new(), |_| String::new()),
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

/// Look a device up in the mirrored registry, asking the backend when the
/// mirror does not hold it.
async fn find_device(controller: &FarmController, raw: &str) -> Result<Device, CliError> {
    let entity_id = DeviceEntityId::new(raw);
    if let Some(device) = controller.store().device(&entity_id) {
        return Ok(Device::clone(&device));
    }
    controller
        .assignments()
        .search_devices(entity_id.as_str(), &DeviceFilter::default())
        .await?
        .into_iter()
        .find(|d| d.entity_id == entity_id)
        .ok_or_else(|| CliError::NotFound {
            resource_type: "Device".into(),
            identifier: raw.into(),
            list_command: "devices search".into(),
        })
}
