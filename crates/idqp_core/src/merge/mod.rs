use crate::domain::{Dataset, Incident, Rule};

/// Entities held in controller collections, keyed by server-assigned id.
pub trait Identified {
    fn id(&self) -> i64;
}

impl Identified for Dataset {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Identified for Rule {
    fn id(&self) -> i64 {
        self.id
    }
}

impl Identified for Incident {
    fn id(&self) -> i64 {
        self.id
    }
}

/// Apply a server response to a held collection: replace the element with the same id in
/// place, or append when absent. Applying the same item twice leaves the collection unchanged.
pub fn upsert_by_id<T: Identified>(items: &mut Vec<T>, item: T) -> bool {
    match items.iter_mut().find(|existing| existing.id() == item.id()) {
        Some(slot) => {
            *slot = item;
            false
        }
        None => {
            items.push(item);
            true
        }
    }
}

/// Replace the element with the same id in place. Nothing is inserted: an item the collection
/// does not hold (outside the current filter, say) leaves it unchanged.
pub fn replace_by_id<T: Identified>(items: &mut [T], item: T) -> bool {
    match items.iter_mut().find(|existing| existing.id() == item.id()) {
        Some(slot) => {
            *slot = item;
            true
        }
        None => false,
    }
}

pub fn find_by_id<T: Identified>(items: &[T], id: i64) -> Option<&T> {
    items.iter().find(|item| item.id() == id)
}

/// Incidents only move from unacknowledged to acknowledged. When a fetch races with a local
/// acknowledgement and returns the stale state, keep the acknowledged flag already observed.
pub fn merge_incident_fetch(held: &[Incident], fetched: Vec<Incident>) -> Vec<Incident> {
    fetched
        .into_iter()
        .map(|mut inc| {
            if !inc.acknowledged && find_by_id(held, inc.id).is_some_and(|h| h.acknowledged) {
                inc.acknowledged = true;
            }
            inc
        })
        .collect()
}
