//! `canopy topology show`: the farm as a tree, with optional overlays.

use std::fmt::Write as _;

use serde::Serialize;

use canopy_core::{
    DeviceAssignment, FarmController, LayerSnapshot, OverlayLayer, TopologyElement, TopologyTree,
};

use crate::cli::{GlobalOpts, LayerArg, TopologyArgs, TopologyCommand};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct TopologyView {
    #[serde(flatten)]
    tree: TopologyTree,
    layers: LayerSnapshot,
}

fn overlay(arg: LayerArg) -> OverlayLayer {
    match arg {
        LayerArg::Devices => OverlayLayer::Devices,
        LayerArg::Automation => OverlayLayer::Automation,
        LayerArg::Monitoring => OverlayLayer::Monitoring,
        LayerArg::Grows => OverlayLayer::Grows,
    }
}

pub fn handle(
    controller: &FarmController,
    args: TopologyArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match args.command {
        TopologyCommand::Show { layer } => {
            let layers = controller.layers();
            for arg in layer {
                let layer = overlay(arg);
                if !layers.snapshot().is_active(layer) {
                    layers.toggle_layer(layer);
                }
            }

            let view = TopologyView {
                tree: controller.tree(),
                layers: layers.snapshot(),
            };
            let color = output::stdout_color(&global.color);
            let out = output::render_single(
                &global.output,
                &view,
                |v| render_tree(v, color),
                |v| {
                    v.tree
                        .elements()
                        .map(|e| e.id().to_string())
                        .collect::<Vec<_>>()
                        .join("\n")
                },
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }
    }
}

fn render_tree(view: &TopologyView, color: bool) -> String {
    let mut out = format!("Farm {}", view.tree.farm_id);
    for layer in view.layers.active_layers() {
        let count = view.layers.get(layer).alert_count;
        let _ = write!(out, "  {layer} {}", output::badge(count, color));
    }
    out.push('\n');

    if view.tree.rows.is_empty() {
        out.push_str("  (no rows)");
        return out;
    }

    let show_devices = view.layers.is_active(OverlayLayer::Devices);
    let row_count = view.tree.rows.len();
    for (ri, row) in view.tree.rows.iter().enumerate() {
        let row_last = ri + 1 == row_count;
        push_node(&mut out, "", row_last, TopologyElement::Row(row), show_devices);

        let row_indent = if row_last { "   " } else { "│  " };
        let rack_count = row.racks.len();
        for (ki, rack) in row.racks.iter().enumerate() {
            let rack_last = ki + 1 == rack_count;
            push_node(&mut out, row_indent, rack_last, TopologyElement::Rack(rack), show_devices);

            let rack_indent = format!("{row_indent}{}", if rack_last { "   " } else { "│  " });
            let shelf_count = rack.shelves.len();
            for (si, shelf) in rack.shelves.iter().enumerate() {
                push_node(
                    &mut out,
                    &rack_indent,
                    si + 1 == shelf_count,
                    TopologyElement::Shelf(shelf),
                    show_devices,
                );
            }
        }
    }
    out.trim_end().to_owned()
}

fn push_node(out: &mut String, indent: &str, last: bool, element: TopologyElement<'_>, devices: bool) {
    let branch = if last { "└─" } else { "├─" };
    let assigned = element.assignments();
    let _ = write!(out, "{indent}{branch} {} ({})", element.name(), element.id());
    if !assigned.is_empty() {
        let _ = write!(out, "  {} device(s)", assigned.len());
    }
    out.push('\n');

    if devices {
        let child_indent = format!("{indent}{}", if last { "   " } else { "│  " });
        for assignment in assigned {
            let _ = writeln!(out, "{child_indent}• {}", device_line(assignment));
        }
    }
}

fn device_line(assignment: &DeviceAssignment) -> String {
    match &assignment.friendly_name {
        Some(name) => format!("{name} [{}]", assignment.entity_id),
        None => assignment.entity_id.to_string(),
    }
}
