use std::sync::Arc;

use serde_json::Value;

use gantry_core::ServiceError;
use gantry_entity::{EntityError, EntityQuery, EntityStore, Filter, Sort, SortDirection};

use crate::model::{SortProperty, Task, TaskQuery, TaskStatus};

/// Document property names as they appear in the persisted JSON.
pub(crate) mod prop {
    pub const TYPE: &str = "type";
    pub const STATUS: &str = "status";
    pub const DATE_NEXT_PROCESS: &str = "dateNextProcess";
    pub const RETAIN_UNTIL: &str = "retainUntil";
}

/// How many expired tasks one retention batch pulls.
const SWEEP_BATCH: usize = 100;

fn store_err(e: EntityError) -> ServiceError {
    ServiceError::Storage(e.to_string())
}

fn decode(doc: Value) -> Result<Task, ServiceError> {
    serde_json::from_value(doc).map_err(|e| ServiceError::Storage(format!("bad task record: {e}")))
}

/// Typed access to task records in the entity store.
pub struct TaskStore {
    store: Arc<dyn EntityStore>,
}

impl TaskStore {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> Result<Option<Task>, ServiceError> {
        match self.store.get(id).map_err(store_err)? {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, task: &Task) -> Result<(), ServiceError> {
        let doc = serde_json::to_value(task)
            .map_err(|e| ServiceError::Internal(format!("task encode: {e}")))?;
        self.store.set(&task.id, &doc).map_err(store_err)
    }

    pub fn remove(&self, id: &str) -> Result<bool, ServiceError> {
        self.store.remove(id).map_err(store_err)
    }

    /// The next task the dispatcher should look at for a type: earliest
    /// `dateNextProcess` among pending and processing records.
    pub fn next_due(&self, task_type: &str) -> Result<Option<Task>, ServiceError> {
        let page = self
            .store
            .query(&EntityQuery {
                filter: Some(Filter::and(vec![
                    Filter::eq(prop::TYPE, task_type),
                    Filter::or(vec![
                        Filter::eq(prop::STATUS, TaskStatus::Processing.as_str()),
                        Filter::eq(prop::STATUS, TaskStatus::Pending.as_str()),
                    ]),
                ])),
                sort: Some(Sort::asc(prop::DATE_NEXT_PROCESS)),
                cursor: None,
                limit: 1,
            })
            .map_err(store_err)?;
        match page.entities.into_iter().next() {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    /// Control-surface query: optional type and status filters, sorted page.
    pub fn query(&self, query: &TaskQuery) -> Result<(Vec<Task>, Option<String>), ServiceError> {
        let mut conditions = Vec::new();
        if let Some(task_type) = &query.task_type {
            conditions.push(Filter::eq(prop::TYPE, task_type.as_str()));
        }
        if let Some(statuses) = &query.statuses {
            if !statuses.is_empty() {
                conditions.push(Filter::or(
                    statuses
                        .iter()
                        .map(|s| Filter::eq(prop::STATUS, s.as_str()))
                        .collect(),
                ));
            }
        }

        let sort_property = query.sort_property.unwrap_or(SortProperty::DateCreated);
        let sort_direction = query.sort_direction.unwrap_or(SortDirection::Desc);

        let page = self
            .store
            .query(&EntityQuery {
                filter: (!conditions.is_empty()).then(|| Filter::and(conditions)),
                sort: Some(Sort {
                    property: sort_property.as_str().to_string(),
                    direction: sort_direction,
                }),
                cursor: query.cursor.clone(),
                limit: query.page_size.unwrap_or(0),
            })
            .map_err(store_err)?;

        let tasks = page
            .entities
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((tasks, page.cursor))
    }

    /// One batch of terminal tasks past their retention timestamp.
    /// The `-1` never-expire sentinel is excluded by the `> 0` bound;
    /// `retainUntil == now` is kept (strict less-than).
    pub fn expired_batch(&self, now_ms: i64) -> Result<Vec<Task>, ServiceError> {
        let page = self
            .store
            .query(&EntityQuery {
                filter: Some(Filter::and(vec![
                    Filter::gt(prop::RETAIN_UNTIL, 0),
                    Filter::lt(prop::RETAIN_UNTIL, now_ms),
                    Filter::or(vec![
                        Filter::eq(prop::STATUS, TaskStatus::Success.as_str()),
                        Filter::eq(prop::STATUS, TaskStatus::Failed.as_str()),
                        Filter::eq(prop::STATUS, TaskStatus::Cancelled.as_str()),
                    ]),
                ])),
                sort: None,
                cursor: None,
                limit: SWEEP_BATCH,
            })
            .map_err(store_err)?;
        page.entities.into_iter().map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_entity::MemoryStore;

    fn test_store() -> TaskStore {
        TaskStore::new(Arc::new(MemoryStore::new()))
    }

    fn make_task(id: &str, task_type: &str, status: TaskStatus, next: Option<&str>) -> Task {
        Task {
            id: id.into(),
            task_type: task_type.into(),
            status,
            payload: None,
            result: None,
            error: None,
            date_created: "2026-01-01T00:00:00.000Z".into(),
            date_modified: "2026-01-01T00:00:00.000Z".into(),
            date_next_process: next.map(Into::into),
            date_completed: None,
            date_cancelled: None,
            retry_interval: None,
            retries_remaining: None,
            retain_for: Some(0),
            retain_until: None,
        }
    }

    #[test]
    fn put_get_remove() {
        let store = test_store();
        let task = make_task("t1", "a", TaskStatus::Pending, Some("2026-01-01T00:00:00.000Z"));
        store.put(&task).unwrap();

        let got = store.get("t1").unwrap().unwrap();
        assert_eq!(got.id, "t1");
        assert_eq!(got.status, TaskStatus::Pending);

        assert!(store.remove("t1").unwrap());
        assert!(store.get("t1").unwrap().is_none());
    }

    #[test]
    fn next_due_picks_earliest_of_type() {
        let store = test_store();
        store.put(&make_task("late", "a", TaskStatus::Pending, Some("2026-01-01T00:00:02.000Z"))).unwrap();
        store.put(&make_task("early", "a", TaskStatus::Processing, Some("2026-01-01T00:00:01.000Z"))).unwrap();
        store.put(&make_task("other", "b", TaskStatus::Pending, Some("2026-01-01T00:00:00.000Z"))).unwrap();
        store.put(&make_task("done", "a", TaskStatus::Success, None)).unwrap();

        let next = store.next_due("a").unwrap().unwrap();
        assert_eq!(next.id, "early");
        assert!(store.next_due("missing").unwrap().is_none());
    }

    #[test]
    fn next_due_breaks_ties_by_insertion() {
        let store = test_store();
        for id in ["one", "two", "three"] {
            store.put(&make_task(id, "a", TaskStatus::Pending, Some("2026-01-01T00:00:00.000Z"))).unwrap();
        }
        assert_eq!(store.next_due("a").unwrap().unwrap().id, "one");
    }

    #[test]
    fn query_filters_by_type_and_status() {
        let store = test_store();
        store.put(&make_task("p1", "a", TaskStatus::Pending, Some("2026-01-01T00:00:00.000Z"))).unwrap();
        store.put(&make_task("f1", "a", TaskStatus::Failed, None)).unwrap();
        store.put(&make_task("p2", "b", TaskStatus::Pending, Some("2026-01-01T00:00:00.000Z"))).unwrap();

        let (tasks, cursor) = store
            .query(&TaskQuery {
                task_type: Some("a".into()),
                statuses: Some(vec![TaskStatus::Pending, TaskStatus::Failed]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(cursor.is_none());

        let (tasks, _) = store
            .query(&TaskQuery {
                statuses: Some(vec![TaskStatus::Pending]),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
    }

    #[test]
    fn expired_batch_applies_strict_bounds() {
        let store = test_store();
        let now = 1_000_000i64;

        let mut expired = make_task("expired", "a", TaskStatus::Success, None);
        expired.retain_until = Some(now - 1);
        store.put(&expired).unwrap();

        let mut boundary = make_task("boundary", "a", TaskStatus::Failed, None);
        boundary.retain_until = Some(now);
        store.put(&boundary).unwrap();

        let mut forever = make_task("forever", "a", TaskStatus::Cancelled, None);
        forever.retain_until = Some(-1);
        store.put(&forever).unwrap();

        let mut active = make_task("active", "a", TaskStatus::Pending, Some("2026-01-01T00:00:00.000Z"));
        active.retain_until = Some(now - 1);
        store.put(&active).unwrap();

        let batch = store.expired_batch(now).unwrap();
        let ids: Vec<&str> = batch.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["expired"]);
    }
}
