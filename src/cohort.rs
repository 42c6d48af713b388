use std::collections::HashSet;

use crate::table::Subject;

/// One cohort's survival observations, ready for curve fitting or testing.
#[derive(Debug, Clone)]
pub struct GroupSurvival {
    pub label: String,
    pub times: Vec<f64>,
    pub events: Vec<bool>,
}

impl GroupSurvival {
    pub fn new(label: impl Into<String>, times: Vec<f64>, events: Vec<bool>) -> Self {
        Self {
            label: label.into(),
            times,
            events,
        }
    }

    pub fn n_subjects(&self) -> usize {
        self.times.len()
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }
}

/// Derive a cohort label per subject by membership in an external id set.
///
/// Every subject starts at `default_label`; subjects whose id is in `members`
/// get `member_label`. Returns a fresh vector aligned with `subjects` - the
/// input is never touched, so a failure elsewhere can't leave a half-labeled
/// table behind. Ids absent from `members` simply stay at the default.
pub fn label_members(
    subjects: &[Subject],
    members: &HashSet<String>,
    member_label: &str,
    default_label: &str,
) -> Vec<String> {
    subjects
        .iter()
        .map(|s| {
            if members.contains(&s.id) {
                member_label.to_string()
            } else {
                default_label.to_string()
            }
        })
        .collect()
}

/// Partition subjects into per-label groups.
///
/// Groups come out in first-appearance order of their label, so downstream
/// output is deterministic. Labels partition the subjects exhaustively; each
/// subject lands in exactly one group.
pub fn group_by_label(subjects: &[Subject], labels: &[String]) -> Vec<GroupSurvival> {
    assert_eq!(
        subjects.len(),
        labels.len(),
        "one label per subject required"
    );

    let mut groups: Vec<GroupSurvival> = Vec::new();
    for (subject, label) in subjects.iter().zip(labels.iter()) {
        let group = match groups.iter_mut().find(|g| &g.label == label) {
            Some(g) => g,
            None => {
                groups.push(GroupSurvival::new(label.clone(), Vec::new(), Vec::new()));
                groups.last_mut().unwrap()
            }
        };
        group.times.push(subject.time);
        group.events.push(subject.status.is_event());
    }
    groups
}
