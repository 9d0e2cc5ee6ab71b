use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use gantry_core::ServiceError;

use crate::engine::TaskConnector;
use crate::model::{CreateTaskRequest, TaskListQuery, TaskQuery, TaskView};

pub fn router(connector: TaskConnector) -> Router {
    Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route("/tasks/{id}", get(get_task).delete(delete_task))
        .route("/tasks/{id}/@retry", post(retry_task))
        .route("/tasks/{id}/@cancel", post(cancel_task))
        .with_state(connector)
}

// ---------------------------------------------------------------------------
// POST /tasks
// ---------------------------------------------------------------------------

async fn create_task(
    State(connector): State<TaskConnector>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let id = connector.create(&req.task_type, req.payload, req.options)?;
    Ok(Json(serde_json::json!({ "id": id })))
}

// ---------------------------------------------------------------------------
// GET /tasks
// ---------------------------------------------------------------------------

async fn list_tasks(
    State(connector): State<TaskConnector>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let (entities, cursor) = connector.query(&TaskQuery {
        task_type: query.task_type,
        statuses: query.status.map(|s| vec![s]),
        sort_property: query.sort_property,
        sort_direction: query.sort_direction,
        cursor: query.cursor,
        page_size: query.page_size,
    })?;
    Ok(Json(serde_json::json!({
        "entities": entities,
        "cursor": cursor,
    })))
}

// ---------------------------------------------------------------------------
// GET /tasks/:id
// ---------------------------------------------------------------------------

async fn get_task(
    State(connector): State<TaskConnector>,
    Path(id): Path<String>,
) -> Result<Json<TaskView>, ServiceError> {
    match connector.get(&id)? {
        Some(view) => Ok(Json(view)),
        None => Err(ServiceError::NotFound(format!("task {id}"))),
    }
}

// ---------------------------------------------------------------------------
// POST /tasks/:id/@retry
// ---------------------------------------------------------------------------

async fn retry_task(
    State(connector): State<TaskConnector>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    connector.retry(&id)?;
    Ok(Json(serde_json::json!({ "retried": true })))
}

// ---------------------------------------------------------------------------
// POST /tasks/:id/@cancel
// ---------------------------------------------------------------------------

async fn cancel_task(
    State(connector): State<TaskConnector>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    connector.cancel(&id)?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

// ---------------------------------------------------------------------------
// DELETE /tasks/:id
// ---------------------------------------------------------------------------

async fn delete_task(
    State(connector): State<TaskConnector>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    connector.remove(&id)?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}
