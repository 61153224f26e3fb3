//! Interval, cron and one-shot background jobs on the tokio runtime.

use crate::utils::error::{Result, StackError};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub type JobFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Wraps an async closure into a `Job`.
pub fn job<F, Fut>(f: F) -> Job
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()) as JobFuture)
}

fn deadline_after(id: &str, delay: Duration) -> Result<Instant> {
    Instant::now().checked_add(delay).ok_or_else(|| {
        StackError::validation(format!(
            "delay of job '{}' ({:?}) is too far in the future",
            id, delay
        ))
    })
}

/// Parses a crontab line. Five fields get a leading seconds field of `0`;
/// numeric weekdays use crontab numbering (0 or 7 = Sunday).
pub fn parse_crontab(expression: &str) -> Result<Schedule> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [minute, hour, day, month, weekday] => format!(
            "0 {} {} {} {} {}",
            minute,
            hour,
            day,
            month,
            crontab_weekdays(weekday)?
        ),
        [second, minute, hour, day, month, weekday, rest @ ..] if rest.len() <= 1 => {
            let mut normalized = format!(
                "{} {} {} {} {} {}",
                second,
                minute,
                hour,
                day,
                month,
                crontab_weekdays(weekday)?
            );
            for year in rest {
                normalized.push(' ');
                normalized.push_str(year);
            }
            normalized
        }
        _ => {
            return Err(StackError::validation(format!(
                "cron expression '{}' must have 5, 6 or 7 fields",
                expression
            )))
        }
    };
    Ok(Schedule::from_str(&normalized)?)
}

/// Renumbers weekdays from crontab (0-7, Sunday first and last) to 1-7.
fn crontab_weekdays(field: &str) -> Result<String> {
    let shift = |value: &str| -> Result<Option<u8>> {
        match value.parse::<u8>() {
            Ok(n @ 0..=6) => Ok(Some(n + 1)),
            Ok(7) => Ok(Some(1)),
            Ok(n) => Err(StackError::validation(format!(
                "weekday {} is out of range 0-7",
                n
            ))),
            Err(_) => Ok(None),
        }
    };

    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        let converted = match range.split_once('-') {
            Some((start, end)) => match (shift(start)?, end.parse::<u8>().ok()) {
                (Some(_), Some(7)) if step.is_some() => {
                    return Err(StackError::validation(format!(
                        "weekday step '{}' cannot end on 7; use day names",
                        item
                    )))
                }
                (Some(1), Some(7)) => "1-7".to_string(),
                (Some(start), Some(7)) => format!("{}-7,1", start),
                (Some(start), Some(_)) => match shift(end)? {
                    Some(end) => format!("{}-{}", start, end),
                    None => range.to_string(),
                },
                _ => range.to_string(),
            },
            None => match shift(range)? {
                Some(day) => day.to_string(),
                None => range.to_string(),
            },
        };
        match step {
            Some(step) => items.push(format!("{}/{}", converted, step)),
            None => items.push(converted),
        }
    }
    Ok(items.join(","))
}

/// The first fire time strictly after both `now` and the previous fire.
pub fn next_fire(
    schedule: &Schedule,
    now: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    let from = last.map_or(now, |last| last.max(now));
    schedule.after(&from).next()
}

async fn run_once(id: &str, job: &Job) {
    tracing::debug!("⏱️ Running job '{}'", id);
    if let Err(e) = job().await {
        tracing::error!("❌ Job '{}' failed: {}", id, e);
    }
}

pub struct Scheduler {
    default_interval: Duration,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            default_interval,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    fn insert(&self, id: &str, handle: JoinHandle<()>) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = jobs.insert(id.to_string(), handle) {
            previous.abort();
            tracing::info!("🔁 Replaced existing job '{}'", id);
        }
    }

    /// Runs `job` every `every` (or the default interval), first after one period.
    /// A job with the same id is replaced.
    pub fn add_interval_job(&self, id: &str, every: Option<Duration>, job: Job) -> Result<()> {
        let every = every.unwrap_or(self.default_interval);
        if every.is_zero() {
            return Err(StackError::validation(format!(
                "interval of job '{}' must be greater than zero",
                id
            )));
        }

        let job_id = id.to_string();
        let start = deadline_after(id, every)?;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                run_once(&job_id, &job).await;
            }
        });

        self.insert(id, handle);
        tracing::info!("📅 Job '{}' scheduled every {:?}", id, every);
        Ok(())
    }

    /// Runs `job` at every fire time of a crontab expression (UTC).
    pub fn add_cron_job(&self, id: &str, expression: &str, job: Job) -> Result<()> {
        let schedule = parse_crontab(expression)?;
        let first = next_fire(&schedule, Utc::now(), None).ok_or_else(|| {
            StackError::validation(format!("cron expression '{}' never fires", expression))
        })?;

        let job_id = id.to_string();
        let handle = tokio::spawn(async move {
            let mut last = None;
            loop {
                let now = Utc::now();
                let Some(next) = next_fire(&schedule, now, last) else {
                    tracing::info!("Job '{}' has no further fire times", job_id);
                    break;
                };
                tokio::time::sleep((next - now).to_std().unwrap_or(Duration::ZERO)).await;
                run_once(&job_id, &job).await;
                last = Some(next);
            }
        });

        self.insert(id, handle);
        tracing::info!(
            "📅 Cron job '{}' scheduled ({}), first run at {}",
            id,
            expression,
            first.to_rfc3339()
        );
        Ok(())
    }

    pub fn schedule_once(&self, id: &str, delay: Duration, job: Job) -> Result<()> {
        let job_id = id.to_string();
        let deadline = deadline_after(id, delay)?;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            run_once(&job_id, &job).await;
        });

        self.insert(id, handle);
        tracing::info!("📅 One-time job '{}' scheduled in {:?}", id, delay);
        Ok(())
    }

    /// Returns `false` when no such job exists.
    pub fn remove_job(&self, id: &str) -> bool {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
        match removed {
            Some(handle) => {
                let pending = !handle.is_finished();
                handle.abort();
                tracing::info!("🗑️ Removed job '{}'", id);
                pending
            }
            None => {
                tracing::warn!("⚠️ No job with id '{}'", id);
                false
            }
        }
    }

    /// Ids of jobs that are still pending, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.retain(|_, handle| !handle.is_finished());
        let mut ids: Vec<String> = jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
        tracing::info!("🛑 Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut jobs) = self.jobs.lock() {
            for (_, handle) in jobs.drain() {
                handle.abort();
            }
        }
    }
}
