use super::{DiscoveryContext, Source, WorkItem, WorkItemKind};
use crate::constants::MAX_CRON_TICKS;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Emits one work item per scheduled tick strictly after the last
/// discovery and not after now, in UTC. The first ever cycle emits
/// nothing; it only establishes the baseline.
pub struct CronSource {
    expression: String,
    schedule: Schedule,
}

impl CronSource {
    pub fn new(expression: &str) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(&normalize(expression))
            .with_context(|| format!("invalid cron schedule {expression:?}"))?;
        Ok(CronSource { expression: expression.to_string(), schedule })
    }

    fn ticks_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut ticks: Vec<DateTime<Utc>> = self
            .schedule
            .after(&after)
            .take_while(|t| *t <= until)
            .collect();
        // A long outage produces an unbounded backlog: keep only the
        // most recent ticks, still strictly increasing.
        if ticks.len() > MAX_CRON_TICKS {
            ticks.drain(..ticks.len() - MAX_CRON_TICKS);
        }
        ticks
    }

    fn tick_to_work_item(&self, tick: DateTime<Utc>) -> WorkItem {
        WorkItem {
            id: tick.format("%Y%m%d-%H%M").to_string(),
            number: 0,
            title: format!("Scheduled run {}", tick.format("%Y-%m-%d %H:%M UTC")),
            body: String::new(),
            url: String::new(),
            labels: vec![],
            comments: String::new(),
            kind: WorkItemKind::CronTick,
            time: tick.to_rfc3339(),
            schedule: self.expression.clone(),
            trigger_time: None,
        }
    }
}

/// The `cron` crate wants a seconds field; a standard five-field
/// expression gets `0` prepended so both forms are accepted.
fn normalize(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

#[async_trait]
impl Source for CronSource {
    async fn discover(&self, ctx: &DiscoveryContext) -> anyhow::Result<Vec<WorkItem>> {
        let Some(last) = ctx.last_discovery_time else {
            return Ok(vec![]);
        };
        if ctx.now <= last {
            // Clock skew between status writes; nothing can have ticked.
            return Ok(vec![]);
        }
        Ok(self
            .ticks_between(last, ctx.now)
            .into_iter()
            .map(|t| self.tick_to_work_item(t))
            .collect())
    }
}
