use chrono::{DateTime, Utc};

use super::sources::WorkItem;

/// One fetched comment, as the filter needs it: body plus creation time.
#[derive(Clone, Debug)]
pub struct CommentRecord {
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterDecision {
    /// Item passes. Carries the trigger comment's creation time when a
    /// trigger command matched.
    Accept(Option<DateTime<Utc>>),
    Reject,
}

/// Trigger/exclude comment commands for one source.
///
/// A command "appears" only when a comment line, trimmed of whitespace,
/// equals the command literal: substring mentions do not count.
#[derive(Clone, Debug, Default)]
pub struct CommentFilter {
    pub trigger: Option<String>,
    pub excludes: Vec<String>,
}

impl CommentFilter {
    pub fn new(trigger: Option<String>, excludes: Vec<String>) -> Self {
        CommentFilter { trigger, excludes }
    }

    pub fn is_empty(&self) -> bool {
        self.trigger.is_none() && self.excludes.is_empty()
    }

    /// Decide whether an item passes, given its comments in
    /// chronological order (oldest first).
    ///
    /// With both trigger and excludes configured, the most recent
    /// matching line wins: comments are scanned newest first, lines
    /// within a comment bottom up.
    pub fn evaluate(&self, comments: &[CommentRecord]) -> FilterDecision {
        match (&self.trigger, self.excludes.is_empty()) {
            (None, true) => FilterDecision::Accept(None),
            (None, false) => {
                if self.most_recent_match(comments).is_some() {
                    FilterDecision::Reject
                } else {
                    FilterDecision::Accept(None)
                }
            }
            (Some(_), true) => match self.most_recent_match(comments) {
                Some(MatchClass::Trigger(at)) => FilterDecision::Accept(Some(at)),
                _ => FilterDecision::Reject,
            },
            (Some(_), false) => match self.most_recent_match(comments) {
                Some(MatchClass::Trigger(at)) => FilterDecision::Accept(Some(at)),
                Some(MatchClass::Exclude) => FilterDecision::Reject,
                None => FilterDecision::Reject,
            },
        }
    }

    fn most_recent_match(&self, comments: &[CommentRecord]) -> Option<MatchClass> {
        for comment in comments.iter().rev() {
            for line in comment.body.lines().rev() {
                let line = line.trim();
                if let Some(trigger) = &self.trigger {
                    if line == trigger {
                        return Some(MatchClass::Trigger(comment.created_at));
                    }
                }
                if self.excludes.iter().any(|e| line == e) {
                    return Some(MatchClass::Exclude);
                }
            }
        }
        None
    }
}

#[derive(Clone, Copy, Debug)]
enum MatchClass {
    Trigger(DateTime<Utc>),
    Exclude,
}

/// Stable-sort candidates by the index of the first matching priority
/// label; items matching none sort last. A stable sort keeps discovery
/// order within a priority class.
pub fn sort_by_priority(items: &mut [WorkItem], priority_labels: &[String]) {
    if priority_labels.is_empty() {
        return;
    }
    items.sort_by_key(|item| priority_rank(item, priority_labels));
}

fn priority_rank(item: &WorkItem, priority_labels: &[String]) -> usize {
    priority_labels
        .iter()
        .position(|p| item.labels.iter().any(|l| l == p))
        .unwrap_or(priority_labels.len())
}

/// True when a completed task should be re-run for this item: the item
/// carries a trigger time newer than the task's completion.
pub fn should_retrigger(
    item: &WorkItem,
    completion_time: Option<DateTime<Utc>>,
) -> bool {
    match (item.trigger_time, completion_time) {
        (Some(triggered), Some(completed)) => triggered > completed,
        _ => false,
    }
}
