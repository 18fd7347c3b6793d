use serde::Serialize;
use std::fmt;

use crate::core::error::Op;
use crate::diff::Event;

/// Outcome of a sync run: counts per operation and every applied event in order
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub dry_run: bool,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub events: Vec<Event>,
}

impl SyncReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub fn record(&mut self, event: Event) {
        match event.op {
            Op::Create => self.created += 1,
            Op::Update => self.updated += 1,
            Op::Delete => self.deleted += 1,
        }
        self.events.push(event);
    }

    pub fn total(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for event in &self.events {
            writeln!(f, "{}", event)?;
        }
        write!(
            f,
            "Summary:\n  Created: {}\n  Updated: {}\n  Deleted: {}",
            self.created, self.updated, self.deleted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Change;
    use crate::entities::{Route, Service};

    #[test]
    fn test_counts_follow_events() {
        let mut report = SyncReport::new(true);
        report.record(
            Change::create(Service {
                name: Some("svc1".to_string()),
                ..Default::default()
            })
            .into(),
        );
        report.record(
            Change::delete(Route {
                id: Some("r1".to_string()),
                ..Default::default()
            })
            .into(),
        );

        assert_eq!((report.created, report.updated, report.deleted), (1, 0, 1));
        assert_eq!(report.total(), 2);
        let text = report.to_string();
        assert!(text.starts_with("creating service svc1\ndeleting route r1\n"));
        assert!(text.contains("Deleted: 1"));
    }
}
