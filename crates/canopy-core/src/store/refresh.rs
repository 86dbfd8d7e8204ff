// ── Full refresh application logic ──
//
// Applies bulk snapshots from persistence and the device registry into
// the FarmStore. Each collection is replaced in a single step so readers
// never observe an empty intermediate state.

use chrono::Utc;

use super::{FarmStore, record_key};
use crate::model::{Device, DeviceAssignment, Rack, Row, Shelf};

/// Flat topology records as loaded from persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub rows: Vec<Row>,
    pub racks: Vec<Rack>,
    pub shelves: Vec<Shelf>,
}

impl FarmStore {
    /// Replace rows, racks and shelves.
    pub(crate) fn apply_topology(&self, snapshot: TopologySnapshot) {
        self.clear_parked();
        self.rows.replace_all(
            snapshot
                .rows
                .into_iter()
                .filter(|r| r.farm_id == self.farm_id)
                .map(|r| (record_key(&r.id), r))
                .collect(),
        );
        self.racks.replace_all(
            snapshot
                .racks
                .into_iter()
                .map(|r| (record_key(&r.id), r))
                .collect(),
        );
        self.shelves.replace_all(
            snapshot
                .shelves
                .into_iter()
                .map(|s| (record_key(&s.id), s))
                .collect(),
        );
    }

    /// Replace the device cache.
    pub(crate) fn apply_devices(&self, devices: Vec<Device>) {
        self.devices.replace_all(
            devices
                .into_iter()
                .map(|d| (d.entity_id.to_string(), d))
                .collect(),
        );
    }

    /// Replace the farm's assignment set.
    pub(crate) fn apply_assignments(&self, assignments: Vec<DeviceAssignment>) {
        self.assignments.replace_all(
            assignments
                .into_iter()
                .filter(|a| a.farm_id == self.farm_id)
                .map(|a| (record_key(&a.id), a))
                .collect(),
        );
    }

    /// Apply a complete refresh and stamp the refresh time.
    pub(crate) fn apply_full_snapshot(
        &self,
        topology: TopologySnapshot,
        devices: Vec<Device>,
        assignments: Vec<DeviceAssignment>,
    ) {
        self.apply_topology(topology);
        self.apply_devices(devices);
        self.apply_assignments(assignments);
        self.last_full_refresh.send_replace(Some(Utc::now()));
    }
}
