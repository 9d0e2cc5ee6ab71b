use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gantry_core::{now_millis, ServiceError};

/// Ticker period when none is overridden (ms).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// One timing rule for a scheduled task.
///
/// `next_trigger_time` (epoch ms) is when the rule next fires; a rule with
/// intervals re-arms itself from the previous trigger time, a rule without
/// goes dormant after firing once. Dormant rules stay in the table and are
/// still reported by `tasks_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_trigger_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_hours: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_minutes: Option<u32>,
}

impl Schedule {
    /// A one-shot rule firing at the given epoch ms.
    pub fn at(epoch_ms: i64) -> Self {
        Self {
            next_trigger_time: Some(epoch_ms),
            ..Default::default()
        }
    }

    /// Combined interval in ms, or `None` when no interval is set.
    fn interval_millis(&self) -> Option<i64> {
        if self.interval_days.is_none()
            && self.interval_hours.is_none()
            && self.interval_minutes.is_none()
        {
            return None;
        }
        let days = i64::from(self.interval_days.unwrap_or(0));
        let hours = i64::from(self.interval_hours.unwrap_or(0));
        let minutes = i64::from(self.interval_minutes.unwrap_or(0));
        Some(days * 86_400_000 + hours * 3_600_000 + minutes * 60_000)
    }
}

// ---------------------------------------------------------------------------
// PeriodicScheduler
// ---------------------------------------------------------------------------

/// The future a schedule callback must produce.
pub type CallbackFuture = Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send>>;
type Callback = Arc<dyn Fn() -> CallbackFuture + Send + Sync>;

struct Entry {
    times: Vec<Schedule>,
    callback: Callback,
}

type ScheduleTable = Arc<Mutex<HashMap<String, Entry>>>;

/// In-process periodic scheduler: a table of schedule rules driven by a
/// single ticker task. The ticker runs only while the table is non-empty.
///
/// Callback failures are logged and swallowed — a failing task keeps its
/// schedule and fires again.
pub struct PeriodicScheduler {
    entries: ScheduleTable,
    ticker: Mutex<Option<CancellationToken>>,
    tick_interval: Duration,
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::with_tick_interval(DEFAULT_TICK_INTERVAL_MS)
    }

    /// Override the ticker period (tests, fast schedules).
    pub fn with_tick_interval(interval_ms: u64) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ticker: Mutex::new(None),
            tick_interval: Duration::from_millis(interval_ms),
        }
    }

    /// Add (or replace) a scheduled task.
    ///
    /// Rules without a `next_trigger_time` get one computed: `now + interval`
    /// when intervals are present, `now` otherwise (fire on the next tick).
    pub async fn add_task<F, Fut>(&self, id: &str, times: Vec<Schedule>, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ServiceError>> + Send + 'static,
    {
        let now = now_millis();
        let mut times = times;
        for schedule in &mut times {
            if schedule.next_trigger_time.is_none() {
                schedule.next_trigger_time = Some(match schedule.interval_millis() {
                    Some(interval) => now + interval,
                    None => now,
                });
            }
        }

        let callback: Callback = Arc::new(move || Box::pin(callback()));
        self.entries
            .lock()
            .await
            .insert(id.to_string(), Entry { times, callback });
        debug!(task = id, "scheduled task added");

        self.ensure_ticker().await;
    }

    /// Remove a scheduled task; stops the ticker when the table empties.
    /// Safe to call from inside the task's own callback.
    pub async fn remove_task(&self, id: &str) {
        let empty = {
            let mut entries = self.entries.lock().await;
            entries.remove(id);
            entries.is_empty()
        };
        debug!(task = id, "scheduled task removed");
        if empty {
            self.stop().await;
        }
    }

    /// Snapshot of every task's schedule rules, dormant ones included.
    pub async fn tasks_info(&self) -> HashMap<String, Vec<Schedule>> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.times.clone()))
            .collect()
    }

    /// Stop the ticker. Scheduled entries stay in the table; adding a task
    /// starts a fresh ticker.
    pub async fn stop(&self) {
        if let Some(token) = self.ticker.lock().await.take() {
            token.cancel();
        }
    }

    async fn ensure_ticker(&self) {
        let mut ticker = self.ticker.lock().await;
        if ticker.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let entries = Arc::clone(&self.entries);
        let interval = self.tick_interval;
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            info!("periodic scheduler started (interval={interval:?})");
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => {
                        info!("periodic scheduler stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        run_due(&entries).await;
                    }
                }
            }
        });
        *ticker = Some(cancel);
    }
}

impl Default for PeriodicScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Fire every due schedule rule once.
///
/// The table lock is not held across callbacks, so a callback may freely
/// call back into the scheduler (including removing its own task).
async fn run_due(entries: &ScheduleTable) {
    let now = now_millis();
    let due: Vec<(String, usize, Callback)> = {
        let table = entries.lock().await;
        let mut due = Vec::new();
        for (id, entry) in table.iter() {
            for (index, schedule) in entry.times.iter().enumerate() {
                if schedule.next_trigger_time.is_some_and(|t| t <= now) {
                    due.push((id.clone(), index, Arc::clone(&entry.callback)));
                }
            }
        }
        due
    };

    for (id, index, callback) in due {
        info!(task = %id, "scheduled task triggered");
        if let Err(e) = callback().await {
            warn!(task = %id, error = %e, "scheduled task failed");
        }

        // The entry may have been removed by its own callback.
        let mut table = entries.lock().await;
        if let Some(entry) = table.get_mut(&id) {
            if let Some(schedule) = entry.times.get_mut(index) {
                schedule.next_trigger_time = match schedule.interval_millis() {
                    None => None,
                    Some(interval) => schedule.next_trigger_time.map(|previous| previous + interval),
                };
            }
        }
    }
}
