// Device registry and assignment endpoints

use tracing::debug;

use crate::error::Error;
use crate::rest::client::{RestClient, eq, in_list, sanitize_pattern};
use crate::rest::models::{ApiAssignment, ApiDevice, NewAssignmentBody, tables};

impl RestClient {
    /// Search the device registry mirror for a farm.
    ///
    /// `text` matches entity id or friendly name (case-insensitive
    /// substring); `domain` restricts to one device domain.
    pub async fn search_devices(
        &self,
        farm_id: &str,
        text: &str,
        domain: Option<&str>,
    ) -> Result<Vec<ApiDevice>, Error> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("farm_id", eq(farm_id)),
            ("order", "entity_id.asc".into()),
        ];
        let pattern = sanitize_pattern(text);
        if !pattern.is_empty() {
            query.push((
                "or",
                format!("(entity_id.ilike.*{pattern}*,friendly_name.ilike.*{pattern}*)"),
            ));
        }
        if let Some(domain) = domain {
            query.push(("domain", eq(domain)));
        }
        debug!(farm_id, text, ?domain, "searching devices");
        self.select(tables::DEVICES, &query).await
    }

    /// List assignments for a farm, optionally narrowed to one target.
    pub async fn list_assignments(
        &self,
        farm_id: &str,
        target: Option<(&str, &str)>,
    ) -> Result<Vec<ApiAssignment>, Error> {
        let mut query = vec![
            ("select", "*".to_string()),
            ("farm_id", eq(farm_id)),
            ("order", "created_at.asc".into()),
        ];
        if let Some((target_type, target_id)) = target {
            query.push(("target_type", eq(target_type)));
            query.push(("target_id", eq(target_id)));
        }
        self.select(tables::DEVICE_ASSIGNMENTS, &query).await
    }

    /// Create an assignment. A second assignment for the same entity is
    /// rejected by the backend's unique constraint.
    pub async fn create_assignment(&self, body: &NewAssignmentBody) -> Result<ApiAssignment, Error> {
        debug!(
            entity_id = %body.entity_id,
            target_type = %body.target_type,
            target_id = %body.target_id,
            "creating assignment"
        );
        self.insert(tables::DEVICE_ASSIGNMENTS, body).await
    }

    pub async fn delete_assignment(&self, id: &str) -> Result<(), Error> {
        debug!(id, "deleting assignment");
        self.delete_by_id(tables::DEVICE_ASSIGNMENTS, id).await
    }

    /// Delete every assignment of a farm that targets one of `target_ids`
    /// of the given `target_type`.
    ///
    /// Assignments reference their node by type and id without a foreign
    /// key, so deleting a node leaves them behind unless they are swept
    /// here.
    pub async fn delete_assignments_for_targets(
        &self,
        farm_id: &str,
        target_type: &str,
        target_ids: &[&str],
    ) -> Result<usize, Error> {
        if target_ids.is_empty() {
            return Ok(0);
        }
        debug!(farm_id, target_type, targets = target_ids.len(), "deleting assignments");
        self.delete_where(
            tables::DEVICE_ASSIGNMENTS,
            &[
                ("farm_id", eq(farm_id)),
                ("target_type", eq(target_type)),
                ("target_id", in_list(target_ids.iter().copied())),
            ],
        )
        .await
    }
}
