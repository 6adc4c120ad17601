//! Eligibility rules for automated relocations.
//!
//! Checked in order: cooldown, confidence score, tags, then exclude-group
//! affinity. Guests leaving a maintenance node skip the cooldown, tag and
//! affinity checks but must still meet the score threshold.

use std::collections::BTreeMap;

use drift_control::ClusterLocations;
use drift_core::config::AutomationRules;
use drift_core::{GuestId, NodeName};

use crate::recommendation::{EXCLUDE_PREFIX, Recommendation};

pub const TAG_IGNORE: &str = "ignore";
pub const TAG_NO_AUTO_MIGRATE: &str = "no-auto-migrate";
pub const TAG_AUTO_MIGRATE_OK: &str = "auto-migrate-ok";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Eligible {
        /// Source node is being drained.
        maintenance: bool,
    },
    Skip(String),
}

/// Decide whether `rec` may run now.
///
/// `last_migrated_at` is the epoch of the guest's last completed
/// relocation, `now` the current epoch.
pub fn evaluate(
    rec: &Recommendation,
    rules: &AutomationRules,
    maintenance_nodes: &[String],
    last_migrated_at: Option<u64>,
    now: u64,
) -> Verdict {
    let maintenance = maintenance_nodes.iter().any(|n| *n == rec.source_node);

    if !maintenance {
        if let Some(reason) = cooldown_violation(rules, last_migrated_at, now) {
            return Verdict::Skip(reason);
        }
    }

    if rec.score < rules.min_confidence_score {
        return Verdict::Skip(format!(
            "Confidence score too low ({}% < {}%)",
            rec.score, rules.min_confidence_score
        ));
    }

    if !maintenance {
        if let Err(reason) = check_tags(rec, rules) {
            return Verdict::Skip(reason);
        }
    }

    Verdict::Eligible { maintenance }
}

fn cooldown_violation(rules: &AutomationRules, last: Option<u64>, now: u64) -> Option<String> {
    let cooldown = rules.cooldown.as_secs();
    let last = last?;
    if cooldown == 0 || last.saturating_add(cooldown) <= now {
        return None;
    }
    Some(format!(
        "In cooldown period ({}min after recent migration)",
        cooldown / 60
    ))
}

pub fn check_tags(rec: &Recommendation, rules: &AutomationRules) -> Result<(), String> {
    if rules.respect_ignore_tags && rec.tags.contains(TAG_IGNORE) {
        return Err(format!("Has '{TAG_IGNORE}' tag"));
    }
    if rec.tags.contains(TAG_NO_AUTO_MIGRATE) {
        return Err(format!("Has '{TAG_NO_AUTO_MIGRATE}' tag"));
    }
    if rules.require_auto_migrate_ok_tag && !rec.tags.contains(TAG_AUTO_MIGRATE_OK) {
        return Err(format!(
            "Missing '{TAG_AUTO_MIGRATE_OK}' tag (whitelist mode)"
        ));
    }
    Ok(())
}

/// Current node of every guest in each exclude group.
#[derive(Debug, Clone, Default)]
pub struct GroupPlacement {
    groups: BTreeMap<String, BTreeMap<GuestId, NodeName>>,
}

impl GroupPlacement {
    pub fn from_locations(locations: &ClusterLocations) -> Self {
        let mut placement = GroupPlacement::default();
        for (guest, tags) in &locations.tags {
            let Some(location) = locations.guests.get(guest) else {
                continue;
            };
            for group in tags.iter().filter(|t| t.starts_with(EXCLUDE_PREFIX)) {
                placement
                    .groups
                    .entry(group.clone())
                    .or_default()
                    .insert(*guest, location.node.clone());
            }
        }
        placement
    }

    /// Count an accepted relocation so later candidates see it.
    pub fn record_move(&mut self, rec: &Recommendation) {
        for group in rec.tags.exclude_groups() {
            self.groups
                .entry(group.to_string())
                .or_default()
                .insert(rec.vmid, rec.target_node.clone());
        }
    }
}

/// Refuse a move that would put more members of one exclude group on the
/// target than on the least-loaded other node hosting that group.
pub fn check_exclude_affinity(
    rec: &Recommendation,
    placement: &GroupPlacement,
) -> Result<(), String> {
    for group in rec.tags.exclude_groups() {
        let Some(members) = placement.groups.get(group) else {
            continue;
        };
        let mut on_target = 0usize;
        let mut elsewhere: BTreeMap<&str, usize> = BTreeMap::new();
        for (guest, node) in members {
            if *guest == rec.vmid {
                continue;
            }
            if *node == rec.target_node {
                on_target += 1;
            } else {
                *elsewhere.entry(node.as_str()).or_default() += 1;
            }
        }
        let least_elsewhere = elsewhere.values().copied().min().unwrap_or(0);
        if on_target > least_elsewhere {
            return Err(format!("Would cluster {group} VMs on {}", rec.target_node));
        }
    }
    Ok(())
}
