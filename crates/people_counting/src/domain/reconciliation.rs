use common::domain::{Lecture, PeopleCountingItem};
use std::collections::{HashMap, HashSet};

/// A counting item that replaces one already stored for the same image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountingItemUpdate {
    pub previous: PeopleCountingItem,
    pub current: PeopleCountingItem,
}

/// Outcome of merging a result batch into a lecture's counting state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountingReconciliation {
    /// Items for images that had no count yet
    pub added: Vec<PeopleCountingItem>,
    /// Items replacing an existing count
    pub updated: Vec<CountingItemUpdate>,
}

impl CountingReconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len()
    }
}

/// Partition `incoming` against the `current` counting items.
///
/// Items keyed by an image id not present in `current` are added, the others
/// replace the stored record. When the batch names an image more than once the
/// last occurrence is kept, at the position of the first.
pub fn reconcile(
    current: &[PeopleCountingItem],
    incoming: Vec<PeopleCountingItem>,
) -> CountingReconciliation {
    let existing: HashMap<&str, &PeopleCountingItem> = current
        .iter()
        .map(|item| (item.image_id.as_str(), item))
        .collect();

    let mut reconciliation = CountingReconciliation::default();
    for item in collapse_duplicates(incoming) {
        match existing.get(item.image_id.as_str()) {
            Some(previous) => reconciliation.updated.push(CountingItemUpdate {
                previous: (*previous).clone(),
                current: item,
            }),
            None => reconciliation.added.push(item),
        }
    }
    reconciliation
}

/// Image ids of `incoming` that are not photos of `lecture`, in batch order
pub fn unknown_image_ids(lecture: &Lecture, incoming: &[PeopleCountingItem]) -> Vec<String> {
    let photos: HashSet<&str> = lecture
        .photos()
        .iter()
        .map(|photo| photo.id.as_str())
        .collect();

    let mut seen = HashSet::new();
    incoming
        .iter()
        .map(|item| item.image_id.as_str())
        .filter(|image_id| !photos.contains(image_id) && seen.insert(*image_id))
        .map(str::to_string)
        .collect()
}

fn collapse_duplicates(items: Vec<PeopleCountingItem>) -> Vec<PeopleCountingItem> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut collapsed: Vec<PeopleCountingItem> = Vec::with_capacity(items.len());

    for item in items {
        match positions.get(&item.image_id) {
            Some(&position) => collapsed[position] = item,
            None => {
                positions.insert(item.image_id.clone(), collapsed.len());
                collapsed.push(item);
            }
        }
    }
    collapsed
}
