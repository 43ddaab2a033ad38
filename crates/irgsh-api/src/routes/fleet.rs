//! Worker fleet endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use irgsh_core::fleet::{InstanceFilter, InstanceInfo, InstanceSummary};
use irgsh_fleet::FleetRegistry;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/instances", get(list_instances))
        .route("/instances/{id}", get(get_instance))
}

fn registry(state: &AppState) -> Result<&FleetRegistry, ApiError> {
    state
        .fleet
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("monitoring is not enabled".to_string()))
}

#[derive(Debug, Deserialize)]
struct InstancesQuery {
    #[serde(rename = "type")]
    instance_type: Option<String>,
    status: Option<String>,
}

impl InstancesQuery {
    fn filter(&self) -> Result<InstanceFilter, ApiError> {
        Ok(InstanceFilter {
            instance_type: non_empty(&self.instance_type).map(|s| s.parse()).transpose()?,
            status: non_empty(&self.status).map(|s| s.parse()).transpose()?,
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

#[derive(Debug, Serialize)]
struct InstancesResponse {
    instances: Vec<InstanceInfo>,
    summary: InstanceSummary,
}

async fn list_instances(
    State(state): State<AppState>,
    Query(query): Query<InstancesQuery>,
) -> Result<Json<InstancesResponse>, ApiError> {
    let registry = registry(&state)?;
    let filter = query.filter()?;
    let instances = registry.list_instances(filter).await?;
    let summary = registry.summary().await?;
    Ok(Json(InstancesResponse { instances, summary }))
}

async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceInfo>, ApiError> {
    let instance = registry(&state)?.get_instance(&id).await?;
    Ok(Json(instance))
}
