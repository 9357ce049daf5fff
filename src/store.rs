use crate::model::enums::{ChangeKind, DataKind, PatchKind};
use crate::model::flag::FeatureFlag;
use crate::model::message::{FullSync, PatchItem};
use crate::model::segment::Segment;
use crate::utils::lock;
use arc_swap::ArcSwap;
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A change applied to the data store.
///
/// Notices are published after the mutation became visible to readers, so a
/// subscriber can safely re-read the store when handling one.
#[derive(Debug, Clone)]
pub struct ChangeNotice {
    /// The collection the changed item belongs to.
    pub kind: DataKind,
    /// Key of the changed item.
    pub key: String,
    /// Whether the item was upserted or deleted.
    pub change: ChangeKind,
}

#[derive(Clone, Debug)]
struct Item<T> {
    // None marks a tombstone; its version still guards against stale re-upserts
    data: Option<Arc<T>>,
    version: u64,
}

#[derive(Clone, Default)]
struct StoreState {
    flags: HashMap<String, Item<FeatureFlag>>,
    segments: HashMap<String, Item<Segment>>,
    version: u64,
    initialized: bool,
}

/// Resolves segments by key at evaluation time.
pub trait SegmentLookup {
    /// Returns the segment stored under `key`, if any.
    fn resolve_segment(&self, key: &str) -> Option<Arc<Segment>>;
}

/// An in-memory, thread-safe repository of flag and segment definitions.
///
/// The whole content is swapped atomically: readers hold a consistent snapshot and
/// never observe a half-applied update. Writes are serialized; the synchronizer is
/// the only writer while evaluations read concurrently from arbitrary threads.
pub struct DataStore {
    state: ArcSwap<StoreState>,
    write_lock: Mutex<()>,
    changes: broadcast::Sender<ChangeNotice>,
    stopped: AtomicBool,
}

impl DataStore {
    pub(crate) fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: ArcSwap::from_pointee(StoreState::default()),
            write_lock: Mutex::new(()),
            changes,
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns the flag stored under `key`, if any.
    pub fn flag(&self, key: &str) -> Option<Arc<FeatureFlag>> {
        self.state.load().flags.get(key).and_then(|item| item.data.clone())
    }

    /// Returns the segment stored under `key`, if any.
    pub fn segment(&self, key: &str) -> Option<Arc<Segment>> {
        self.state.load().segments.get(key).and_then(|item| item.data.clone())
    }

    /// Returns all stored flags.
    pub fn all_flags(&self) -> Vec<Arc<FeatureFlag>> {
        self.state
            .load()
            .flags
            .values()
            .filter_map(|item| item.data.clone())
            .collect()
    }

    /// Returns the keys of all stored flags.
    pub fn all_flag_keys(&self) -> Vec<String> {
        self.state
            .load()
            .flags
            .iter()
            .filter(|(_, item)| item.data.is_some())
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// True once a full sync or an offline bootstrap populated the store.
    pub fn initialized(&self) -> bool {
        self.state.load().initialized
    }

    /// The highest update version the store has seen.
    pub fn latest_version(&self) -> u64 {
        self.state.load().version
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.changes.subscribe()
    }

    /// Replaces the entire contents atomically. Snapshots at or below the
    /// current version are discarded. Returns whether the snapshot was applied.
    pub(crate) fn apply_full_sync(&self, data: FullSync) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let guard = lock(&self.write_lock);
        let old = self.state.load_full();
        if data.version <= old.version {
            return false;
        }
        let mut flags = HashMap::with_capacity(data.flags.len());
        for flag in data.flags {
            let key = flag.key.clone();
            let item = Item {
                version: flag.version,
                data: Some(Arc::new(flag)),
            };
            flags.insert(key, item);
        }
        let mut segments = HashMap::with_capacity(data.segments.len());
        for segment in data.segments {
            let key = segment.key.clone();
            let item = Item {
                version: segment.version,
                data: Some(Arc::new(segment)),
            };
            segments.insert(key, item);
        }
        let new_state = StoreState {
            flags,
            segments,
            version: data.version,
            initialized: true,
        };
        let notices = diff_states(&old, &new_state);
        self.state.store(Arc::new(new_state));
        drop(guard);
        for notice in notices {
            let _ = self.changes.send(notice);
        }
        true
    }

    /// Applies a single-item patch. Patches at or below the stored item's version
    /// are discarded, which makes redelivery idempotent and tolerates out-of-order
    /// arrival. Returns whether the patch was applied.
    pub(crate) fn apply_patch(&self, patch: PatchItem) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let guard = lock(&self.write_lock);
        let old = self.state.load_full();
        let mut new_state = (*old).clone();
        let notice = match patch.kind {
            PatchKind::FlagUpsert => match patch.flag {
                Some(flag) => upsert_item(&mut new_state.flags, &patch.key, Some(Arc::new(flag)), patch.version)
                    .map(|change| ChangeNotice { kind: DataKind::Flag, key: patch.key, change }),
                None => {
                    warn!("flag upsert patch for '{}' carries no flag definition", patch.key);
                    None
                }
            },
            PatchKind::FlagDelete => upsert_item(&mut new_state.flags, &patch.key, None, patch.version)
                .map(|change| ChangeNotice { kind: DataKind::Flag, key: patch.key, change }),
            PatchKind::SegmentUpsert => match patch.segment {
                Some(segment) => upsert_item(&mut new_state.segments, &patch.key, Some(Arc::new(segment)), patch.version)
                    .map(|change| ChangeNotice { kind: DataKind::Segment, key: patch.key, change }),
                None => {
                    warn!("segment upsert patch for '{}' carries no segment definition", patch.key);
                    None
                }
            },
            PatchKind::SegmentDelete => upsert_item(&mut new_state.segments, &patch.key, None, patch.version)
                .map(|change| ChangeNotice { kind: DataKind::Segment, key: patch.key, change }),
        };
        match notice {
            None => false,
            Some(notice) => {
                new_state.version = new_state.version.max(patch.version);
                new_state.initialized = true;
                self.state.store(Arc::new(new_state));
                drop(guard);
                let _ = self.changes.send(notice);
                true
            }
        }
    }

    /// Rejects all further mutation; readers keep serving the frozen state.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

impl SegmentLookup for DataStore {
    fn resolve_segment(&self, key: &str) -> Option<Arc<Segment>> {
        self.segment(key)
    }
}

fn upsert_item<T>(
    items: &mut HashMap<String, Item<T>>,
    key: &str,
    data: Option<Arc<T>>,
    version: u64,
) -> Option<ChangeKind> {
    if let Some(existing) = items.get(key) {
        if existing.version >= version {
            return None;
        }
    }
    let change = if data.is_some() { ChangeKind::Upsert } else { ChangeKind::Delete };
    items.insert(key.to_owned(), Item { data, version });
    Some(change)
}

fn diff_states(old: &StoreState, new: &StoreState) -> Vec<ChangeNotice> {
    let mut notices = Vec::new();
    diff_items(&old.flags, &new.flags, DataKind::Flag, &mut notices);
    diff_items(&old.segments, &new.segments, DataKind::Segment, &mut notices);
    notices
}

fn diff_items<T>(
    old: &HashMap<String, Item<T>>,
    new: &HashMap<String, Item<T>>,
    kind: DataKind,
    notices: &mut Vec<ChangeNotice>,
) {
    for (key, item) in new {
        let changed = match old.get(key) {
            None => item.data.is_some(),
            Some(prev) => prev.version != item.version || prev.data.is_some() != item.data.is_some(),
        };
        if changed {
            let change = if item.data.is_some() { ChangeKind::Upsert } else { ChangeKind::Delete };
            notices.push(ChangeNotice { kind, key: key.clone(), change });
        }
    }
    for (key, item) in old {
        if item.data.is_some() && !new.contains_key(key) {
            notices.push(ChangeNotice { kind, key: key.clone(), change: ChangeKind::Delete });
        }
    }
}

#[cfg(test)]
mod store_tests {
    use super::DataStore;
    use crate::model::enums::{ChangeKind, DataKind, PatchKind};
    use crate::model::flag::FeatureFlag;
    use crate::model::message::{FullSync, PatchItem};

    fn flag(key: &str, version: u64) -> FeatureFlag {
        serde_json::from_value(serde_json::json!({
            "key": key,
            "isEnabled": true,
            "variationType": 1,
            "variations": [{"value": "on"}, {"value": "off"}],
            "disabledVariation": 1,
            "fallthrough": {"variation": 0},
            "version": version
        }))
        .unwrap()
    }

    fn full_sync(keys: &[(&str, u64)], version: u64) -> FullSync {
        FullSync {
            flags: keys.iter().map(|(k, v)| flag(k, *v)).collect(),
            segments: vec![],
            version,
        }
    }

    fn upsert(key: &str, version: u64) -> PatchItem {
        PatchItem {
            kind: PatchKind::FlagUpsert,
            key: key.to_owned(),
            flag: Some(flag(key, version)),
            segment: None,
            version,
        }
    }

    fn delete(key: &str, version: u64) -> PatchItem {
        PatchItem {
            kind: PatchKind::FlagDelete,
            key: key.to_owned(),
            flag: None,
            segment: None,
            version,
        }
    }

    #[test]
    fn full_sync_replaces_contents() {
        let store = DataStore::new();
        assert!(!store.initialized());
        assert!(store.apply_full_sync(full_sync(&[("a", 1), ("b", 2)], 2)));
        assert!(store.initialized());
        assert_eq!(store.latest_version(), 2);
        assert!(store.flag("a").is_some());

        assert!(store.apply_full_sync(full_sync(&[("b", 3)], 3)));
        assert!(store.flag("a").is_none());
        assert_eq!(store.flag("b").unwrap().version, 3);
    }

    #[test]
    fn stale_full_sync_is_discarded() {
        let store = DataStore::new();
        assert!(store.apply_full_sync(full_sync(&[("a", 5)], 5)));
        assert!(!store.apply_full_sync(full_sync(&[("stale", 4)], 4)));
        assert!(store.flag("a").is_some());
        assert!(store.flag("stale").is_none());
    }

    #[test]
    fn patch_is_idempotent() {
        let store = DataStore::new();
        assert!(store.apply_patch(upsert("a", 5)));
        assert!(!store.apply_patch(upsert("a", 5)));
        assert_eq!(store.flag("a").unwrap().version, 5);
    }

    #[test]
    fn out_of_order_patches_keep_newest() {
        let store = DataStore::new();
        assert!(store.apply_patch(upsert("a", 5)));
        assert!(!store.apply_patch(upsert("a", 3)));
        assert_eq!(store.flag("a").unwrap().version, 5);
    }

    #[test]
    fn delete_leaves_version_tombstone() {
        let store = DataStore::new();
        assert!(store.apply_patch(upsert("a", 5)));
        assert!(store.apply_patch(delete("a", 6)));
        assert!(store.flag("a").is_none());
        assert!(!store.all_flag_keys().contains(&"a".to_owned()));
        // a re-delivered older upsert must not resurrect the item
        assert!(!store.apply_patch(upsert("a", 5)));
        assert!(store.flag("a").is_none());
        // a stale delete is ignored as well
        assert!(!store.apply_patch(delete("a", 4)));
    }

    #[test]
    fn change_notices_published_after_mutation() {
        let store = DataStore::new();
        let mut changes = store.subscribe();
        assert!(store.apply_patch(upsert("a", 1)));
        let notice = changes.try_recv().unwrap();
        assert_eq!(notice.kind, DataKind::Flag);
        assert_eq!(notice.key, "a");
        assert_eq!(notice.change, ChangeKind::Upsert);

        assert!(store.apply_patch(delete("a", 2)));
        let notice = changes.try_recv().unwrap();
        assert_eq!(notice.change, ChangeKind::Delete);

        // discarded patches publish nothing
        assert!(!store.apply_patch(upsert("a", 1)));
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn full_sync_notices_cover_the_diff() {
        let store = DataStore::new();
        assert!(store.apply_full_sync(full_sync(&[("a", 1), ("b", 1)], 1)));
        let mut changes = store.subscribe();
        assert!(store.apply_full_sync(full_sync(&[("b", 2), ("c", 2)], 2)));
        let mut seen = Vec::new();
        while let Ok(notice) = changes.try_recv() {
            seen.push((notice.key, notice.change));
        }
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            seen,
            vec![
                ("a".to_owned(), ChangeKind::Delete),
                ("b".to_owned(), ChangeKind::Upsert),
                ("c".to_owned(), ChangeKind::Upsert),
            ]
        );
    }

    #[test]
    fn no_mutation_after_stop() {
        let store = DataStore::new();
        assert!(store.apply_full_sync(full_sync(&[("a", 1)], 1)));
        store.stop();
        assert!(!store.apply_patch(upsert("b", 2)));
        assert!(!store.apply_full_sync(full_sync(&[("c", 3)], 3)));
        // readers keep serving the frozen state
        assert!(store.flag("a").is_some());
    }
}
