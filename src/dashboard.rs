use std::collections::BTreeMap;

use serde::Serialize;

use crate::feedback::Feedback;

/// Feedback counts per UTC day, as parallel arrays sorted by day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DayCounts {
    pub labels: Vec<String>,
    pub counts: Vec<u32>,
}

pub fn per_day(feedbacks: &[Feedback]) -> DayCounts {
    let mut days = BTreeMap::<String, u32>::new();

    for fb in feedbacks {
        *days.entry(fb.created.day()).or_default() += 1;
    }

    let (labels, counts) = days.into_iter().unzip();
    DayCounts { labels, counts }
}
