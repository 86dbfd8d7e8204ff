// Topology endpoints
//
// Rows embed racks which embed shelves, so one request loads the whole
// farm tree. Mutations address a single table by id.

use tracing::debug;

use crate::error::Error;
use crate::rest::client::{RestClient, eq};
use crate::rest::models::{ApiRowTree, NewNodeBody, NodePatchBody, tables};

/// Embedded select that pulls the full row → rack → shelf tree.
const TREE_SELECT: &str = "*,racks(*,shelves(*))";

impl RestClient {
    /// Fetch every row of a farm with its racks and shelves embedded.
    ///
    /// `GET /rest/v1/rows?select=*,racks(*,shelves(*))&farm_id=eq.{farm}&order=position`
    pub async fn fetch_topology(&self, farm_id: &str) -> Result<Vec<ApiRowTree>, Error> {
        debug!(farm_id, "fetching farm topology");
        self.select(
            tables::ROWS,
            &[
                ("select", TREE_SELECT.into()),
                ("farm_id", eq(farm_id)),
                ("order", "position.asc".into()),
            ],
        )
        .await
    }

    /// Insert a row, rack, or shelf into `table`.
    pub async fn create_node<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        body: &NewNodeBody,
    ) -> Result<T, Error> {
        debug!(table, name = %body.name, position = body.position, "creating node");
        self.insert(table, body).await
    }

    /// Patch a row, rack, or shelf.
    pub async fn update_node<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        id: &str,
        patch: &NodePatchBody,
    ) -> Result<T, Error> {
        debug!(table, id, "updating node");
        self.update_by_id(table, id, patch).await
    }

    /// Delete a row, rack, or shelf. The backend cascades to descendants.
    pub async fn delete_node(&self, table: &str, id: &str) -> Result<(), Error> {
        debug!(table, id, "deleting node");
        self.delete_by_id(table, id).await
    }
}
