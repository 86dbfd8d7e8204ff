// ── Device assignment engine ──
//
// Mediates between the device registry and the farm's assignment records.
// A device entity id is assigned at most once per farm; the check runs
// against the store before the registry is called, and a unique-violation
// from the backend maps to the same error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::model::{
    AssignRequest, AssignmentTarget, Device, DeviceAssignment, DeviceDomain, DeviceFilter,
    EntityId, NodeKind, QuickAssignReport, RankedDevice,
};
use crate::services::{DeviceRegistry, Notifier};
use crate::store::FarmStore;

/// Device domains recommended for a node granularity. Used for ranking
/// only; any domain may be assigned anywhere.
pub fn contextual_device_types(kind: NodeKind) -> &'static [DeviceDomain] {
    const SHELF: &[DeviceDomain] = &[DeviceDomain::Light, DeviceDomain::Sensor, DeviceDomain::Switch];
    const RACK: &[DeviceDomain] = &[DeviceDomain::Fan, DeviceDomain::Climate, DeviceDomain::Sensor];
    const ROW: &[DeviceDomain] = &[
        DeviceDomain::Valve,
        DeviceDomain::Switch,
        DeviceDomain::Climate,
        DeviceDomain::Camera,
    ];
    match kind {
        NodeKind::Shelf => SHELF,
        NodeKind::Rack => RACK,
        NodeKind::Row => ROW,
    }
}

/// Mark recommended devices and move them to the front, otherwise
/// keeping the registry's order.
pub fn rank_for(kind: NodeKind, devices: Vec<Device>) -> Vec<RankedDevice> {
    let recommended = contextual_device_types(kind);
    let mut ranked: Vec<RankedDevice> = devices
        .into_iter()
        .map(|device| RankedDevice {
            recommended: recommended.contains(&device.domain),
            device,
        })
        .collect();
    ranked.sort_by_key(|d| !d.recommended);
    ranked
}

/// A conflict from the backend on insert means the device is taken.
fn is_conflict(e: &CoreError) -> bool {
    matches!(
        e,
        CoreError::Network { code: Some(code), .. } if code == canopy_api::error::UNIQUE_VIOLATION
    ) || matches!(e, CoreError::Network { status: Some(409), .. })
}

pub struct AssignmentEngine {
    store: Arc<FarmStore>,
    registry: Arc<dyn DeviceRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<FarmStore>,
        registry: Arc<dyn DeviceRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
        }
    }

    fn farm_id(&self) -> &str {
        self.store.farm_id()
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Search the registry. `assigned: Some(false)` drops devices that
    /// already have an assignment in this farm; `Some(true)` keeps only
    /// those. Results are cached in the store.
    pub async fn search_devices(
        &self,
        query: &str,
        filter: &DeviceFilter,
    ) -> Result<Vec<Device>, CoreError> {
        let devices = match self
            .registry
            .search(self.farm_id(), query, filter.domain.as_ref())
            .await
        {
            Ok(devices) => devices,
            Err(e) => {
                self.notifier
                    .error(&format!("Device search failed: {}", e.user_message()));
                return Err(e);
            }
        };
        self.store.upsert_devices(&devices);

        let Some(want_assigned) = filter.assigned else {
            return Ok(devices);
        };
        let assigned = self.store.assigned_entity_ids();
        Ok(devices
            .into_iter()
            .filter(|d| assigned.contains(&d.entity_id) == want_assigned)
            .collect())
    }

    /// Search and rank for a target: recommended domains first.
    pub async fn search_for_target(
        &self,
        query: &str,
        target: &AssignmentTarget,
        filter: &DeviceFilter,
    ) -> Result<Vec<RankedDevice>, CoreError> {
        let devices = self.search_devices(query, filter).await?;
        Ok(rank_for(target.kind, devices))
    }

    /// Assignments on one target, as the registry reports them.
    pub async fn assigned_devices(
        &self,
        target: &AssignmentTarget,
    ) -> Result<Vec<DeviceAssignment>, CoreError> {
        let assignments = self
            .registry
            .assigned_devices(self.farm_id(), Some(target))
            .await?;
        for assignment in &assignments {
            self.store.upsert_assignment(assignment.clone());
        }
        Ok(assignments)
    }

    // ── Mutations ────────────────────────────────────────────────

    /// Assign `device` to `target`.
    ///
    /// Fails with [`CoreError::DuplicateAssignment`] when the device is
    /// already assigned anywhere in the farm; the existing assignment is
    /// left as is.
    pub async fn assign_device(
        &self,
        device: &Device,
        target: &AssignmentTarget,
    ) -> Result<DeviceAssignment, CoreError> {
        match self.try_assign(device, target).await {
            Ok(assignment) => {
                self.refresh_assignments().await;
                info!(entity_id = %device.entity_id, %target, "device assigned");
                self.notifier.success(&format!(
                    "{} assigned to {}",
                    device.name,
                    self.target_label(target)
                ));
                Ok(assignment)
            }
            Err(e) => {
                self.notifier.error(&format!(
                    "Could not assign {}: {}",
                    device.name,
                    e.user_message()
                ));
                Err(e)
            }
        }
    }

    /// Remove an assignment.
    ///
    /// A `NotFound` from the registry means someone else removed it
    /// first: the local copy is dropped and the error returned so the
    /// caller can refresh.
    pub async fn unassign_device(&self, assignment_id: &EntityId) -> Result<(), CoreError> {
        let label = self
            .store
            .assignment(assignment_id)
            .map_or_else(|| assignment_id.to_string(), |a| display_name(&a));

        match self.registry.unassign(assignment_id).await {
            Ok(()) => {
                self.store.remove_assignment(assignment_id);
                self.refresh_assignments().await;
                info!(%assignment_id, "device unassigned");
                self.notifier.success(&format!("{label} unassigned"));
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                self.store.remove_assignment(assignment_id);
                self.notifier
                    .error(&format!("{label} was already unassigned"));
                Err(e)
            }
            Err(e) => {
                self.notifier.error(&format!(
                    "Could not unassign {label}: {}",
                    e.user_message()
                ));
                Err(e)
            }
        }
    }

    /// Assign every available device of `domain` to `target`.
    ///
    /// Keeps going past individual failures and sends one aggregate
    /// notification.
    pub async fn quick_assign_by_type(
        &self,
        target: &AssignmentTarget,
        domain: &DeviceDomain,
    ) -> Result<QuickAssignReport, CoreError> {
        if self.store.node(target.kind, &target.id).is_none() {
            let e = CoreError::not_found(target.kind.label(), &target.id);
            self.notifier.error(&e.user_message());
            return Err(e);
        }

        let candidates = self
            .search_devices("", &DeviceFilter::available().with_domain(domain.clone()))
            .await?;
        let label = self.target_label(target);

        if candidates.is_empty() {
            self.notifier
                .error(&format!("No available {domain} devices to assign to {label}"));
            return Ok(QuickAssignReport::default());
        }

        let mut report = QuickAssignReport::default();
        for device in &candidates {
            match self.try_assign(device, target).await {
                Ok(assignment) => report.assigned.push(assignment),
                Err(e) => {
                    debug!(entity_id = %device.entity_id, error = %e, "quick-assign item failed");
                    report
                        .failed
                        .push((device.entity_id.clone(), e.user_message()));
                }
            }
        }
        self.refresh_assignments().await;

        let total = candidates.len();
        let ok = report.success_count();
        info!(%target, %domain, ok, failed = report.failure_count(), "quick assign finished");
        if report.failed.is_empty() {
            self.notifier
                .success(&format!("Assigned {ok} {domain} device(s) to {label}"));
        } else {
            self.notifier.error(&format!(
                "Assigned {ok} of {total} {domain} device(s) to {label}; {} failed",
                report.failure_count()
            ));
        }
        Ok(report)
    }

    // ── Internals ────────────────────────────────────────────────

    async fn try_assign(
        &self,
        device: &Device,
        target: &AssignmentTarget,
    ) -> Result<DeviceAssignment, CoreError> {
        if let Some(existing) = self.store.assignment_for_entity(&device.entity_id) {
            return Err(CoreError::DuplicateAssignment {
                entity_id: device.entity_id.to_string(),
                target: self.target_label(&existing.target),
            });
        }
        if self.store.node(target.kind, &target.id).is_none() {
            return Err(CoreError::not_found(target.kind.label(), &target.id));
        }

        let request = AssignRequest::for_device(self.farm_id(), device, target.clone());
        match self.registry.assign(&request).await {
            Ok(assignment) => {
                self.store.upsert_assignment(assignment.clone());
                Ok(assignment)
            }
            Err(e) if is_conflict(&e) => Err(CoreError::DuplicateAssignment {
                entity_id: device.entity_id.to_string(),
                target: "another target".into(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Reload the farm's assignment set. Failure keeps the local copy.
    async fn refresh_assignments(&self) {
        match self.registry.assigned_devices(self.farm_id(), None).await {
            Ok(assignments) => self.store.apply_assignments(assignments),
            Err(e) => warn!(error = %e, "assignment refresh failed"),
        }
    }

    fn target_label(&self, target: &AssignmentTarget) -> String {
        match self.store.node(target.kind, &target.id) {
            Some(node) => format!("{} \"{}\"", target.kind, node.name()),
            None => target.to_string(),
        }
    }
}

fn display_name(assignment: &DeviceAssignment) -> String {
    assignment
        .friendly_name
        .clone()
        .unwrap_or_else(|| assignment.entity_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceEntityId;
    use pretty_assertions::assert_eq;

    fn device(entity: &str) -> Device {
        let entity_id = DeviceEntityId::new(entity);
        Device {
            domain: DeviceDomain::from(entity_id.domain().unwrap_or_default()),
            name: entity.into(),
            entity_id,
            state: None,
            area: None,
            last_changed: None,
        }
    }

    #[test]
    fn shelves_recommend_lights_and_sensors() {
        let types = contextual_device_types(NodeKind::Shelf);
        assert!(types.contains(&DeviceDomain::Light));
        assert!(types.contains(&DeviceDomain::Sensor));
        assert!(!types.contains(&DeviceDomain::Fan));
    }

    #[test]
    fn ranking_is_stable_with_recommended_first() {
        let ranked = rank_for(
            NodeKind::Rack,
            vec![device("light.a"), device("fan.b"), device("light.c"), device("climate.d")],
        );
        let order: Vec<&str> = ranked.iter().map(|d| d.device.entity_id.as_str()).collect();
        assert_eq!(order, vec!["fan.b", "climate.d", "light.a", "light.c"]);
        assert!(ranked[0].recommended && !ranked[3].recommended);
    }

    #[test]
    fn conflict_detection() {
        assert!(is_conflict(&CoreError::Network {
            message: "dup".into(),
            code: Some("23505".into()),
            status: Some(400),
        }));
        assert!(is_conflict(&CoreError::Network {
            message: "dup".into(),
            code: None,
            status: Some(409),
        }));
        assert!(!is_conflict(&CoreError::Network {
            message: "boom".into(),
            code: None,
            status: Some(500),
        }));
    }
}
