use crate::model::enums::{ChangeKind, DataKind};
use crate::model::flag::FeatureFlag;
use crate::store::{ChangeNotice, DataStore};
use crate::sync::status::{State, StateType};
use crate::user::User;
use crate::utils::lock;
use crate::value::Value;
use log::{debug, error};
use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// A flag value change delivered to a registered listener.
#[derive(Debug, Clone)]
pub struct FlagChange {
    /// Key of the changed flag.
    pub flag_key: String,
    /// The value before the change; `None` for maybe-changed notifications and
    /// for flags that did not resolve before the change.
    pub previous: Option<Value>,
    /// The value evaluated after the change; `None` when the flag no longer resolves.
    pub current: Option<Value>,
}

/// Handle identifying a registered listener; pass it to
/// [`FlagTracker::remove_listener`] to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerHandle(u64);

type ListenerCallback = Arc<dyn Fn(FlagChange) + Send + Sync>;
pub(crate) type EvalFn = Arc<dyn Fn(&str, &User) -> Option<Value> + Send + Sync>;

enum ListenerMode {
    Changed,
    MaybeChanged,
}

struct ListenerEntry {
    flag_key: String,
    user: User,
    mode: ListenerMode,
    callback: ListenerCallback,
    last_value: Option<Value>,
}

/// Registry of flag change listeners.
///
/// Listeners are notified from a dedicated task consuming the data store's change
/// notices, so slow or failing callbacks never block the update-application path.
/// Notices are only delivered while the synchronizer is active with a prior sync
/// applied; in offline mode no change source exists and nothing is delivered.
pub struct FlagTracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    listeners: Mutex<HashMap<u64, ListenerEntry>>,
    // segment key -> keys of flags whose rules reference it
    segment_refs: Mutex<HashMap<String, HashSet<String>>>,
    next_id: AtomicU64,
    store: Arc<DataStore>,
    evaluate: EvalFn,
}

impl FlagTracker {
    pub(crate) fn new(store: Arc<DataStore>, evaluate: EvalFn) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                listeners: Mutex::new(HashMap::new()),
                segment_refs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                store,
                evaluate,
            }),
        }
    }

    /// Registers a listener invoked when the value of `flag_key` changes for
    /// `user`. The flag is evaluated immediately to seed the comparison; the
    /// callback fires only when a later re-evaluation yields a different value.
    pub fn add_changed_listener<F>(&self, flag_key: &str, user: User, callback: F) -> ListenerHandle
    where
        F: Fn(FlagChange) + Send + Sync + 'static,
    {
        let last_value = (self.inner.evaluate)(flag_key, &user);
        self.insert(ListenerEntry {
            flag_key: flag_key.to_owned(),
            user,
            mode: ListenerMode::Changed,
            callback: Arc::new(callback),
            last_value,
        })
    }

    /// Registers a listener invoked whenever the configuration of `flag_key`
    /// (or a segment it references) changes. It signals only that the flag
    /// *may* return a different value; the callback receives the latest value
    /// for `user`, which can equal the previous one.
    pub fn add_maybe_changed_listener<F>(&self, flag_key: &str, user: User, callback: F) -> ListenerHandle
    where
        F: Fn(FlagChange) + Send + Sync + 'static,
    {
        self.insert(ListenerEntry {
            flag_key: flag_key.to_owned(),
            user,
            mode: ListenerMode::MaybeChanged,
            callback: Arc::new(callback),
            last_value: None,
        })
    }

    /// Unregisters a listener.
    pub fn remove_listener(&self, handle: ListenerHandle) {
        lock(&self.inner.listeners).remove(&handle.0);
    }

    fn insert(&self, entry: ListenerEntry) -> ListenerHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.listeners).insert(id, entry);
        ListenerHandle(id)
    }

    pub(crate) fn start(
        &self,
        mut changes: broadcast::Receiver<ChangeNotice>,
        status: watch::Receiver<State>,
        token: CancellationToken,
    ) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(notice) => {
                            let active = status.borrow().state_type() == StateType::Ok;
                            inner.handle_notice(&notice, active);
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!("change tracker lagged behind, dropped {missed} notices");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }
}

impl TrackerInner {
    fn handle_notice(&self, notice: &ChangeNotice, active: bool) {
        let affected: Vec<String> = match notice.kind {
            DataKind::Flag => {
                // the reverse index is maintained regardless of the sync state
                self.reindex_flag(&notice.key, notice.change);
                vec![notice.key.clone()]
            }
            DataKind::Segment => lock(&self.segment_refs)
                .get(&notice.key)
                .map(|flags| flags.iter().cloned().collect())
                .unwrap_or_default(),
        };
        if !active {
            return;
        }
        for flag_key in affected {
            self.dispatch(&flag_key);
        }
    }

    fn reindex_flag(&self, flag_key: &str, change: ChangeKind) {
        let refs = match change {
            ChangeKind::Delete => HashSet::new(),
            ChangeKind::Upsert => self
                .store
                .flag(flag_key)
                .map(|flag| segment_keys_of(&flag))
                .unwrap_or_default(),
        };
        let mut index = lock(&self.segment_refs);
        for flags in index.values_mut() {
            flags.remove(flag_key);
        }
        for segment_key in refs {
            index.entry(segment_key).or_default().insert(flag_key.to_owned());
        }
        index.retain(|_, flags| !flags.is_empty());
    }

    fn dispatch(&self, flag_key: &str) {
        let mut pending: Vec<(ListenerCallback, FlagChange)> = Vec::new();
        {
            let mut listeners = lock(&self.listeners);
            for entry in listeners.values_mut().filter(|entry| entry.flag_key == flag_key) {
                let current = (self.evaluate)(flag_key, &entry.user);
                match entry.mode {
                    ListenerMode::MaybeChanged => pending.push((
                        Arc::clone(&entry.callback),
                        FlagChange { flag_key: flag_key.to_owned(), previous: None, current },
                    )),
                    ListenerMode::Changed => {
                        if current != entry.last_value {
                            pending.push((
                                Arc::clone(&entry.callback),
                                FlagChange {
                                    flag_key: flag_key.to_owned(),
                                    previous: entry.last_value.clone(),
                                    current: current.clone(),
                                },
                            ));
                        }
                        entry.last_value = current;
                    }
                }
            }
        }
        // fired outside the registry lock; a panicking callback must not take
        // down delivery to the remaining listeners
        for (callback, change) in pending {
            let key = change.flag_key.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                error!("flag change listener for '{key}' panicked");
            }
        }
    }
}

fn segment_keys_of(flag: &FeatureFlag) -> HashSet<String> {
    let mut keys = HashSet::new();
    for rule in &flag.rules {
        for condition in &rule.conditions {
            if condition.op.is_segment_op() {
                if let Some(values) = condition.values.as_ref() {
                    keys.extend(values.iter().cloned());
                }
            }
        }
    }
    keys
}
