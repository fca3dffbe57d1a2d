use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type BinaryData = Vec<u8>;
type Deadline = Option<Instant>;
type Entry = (BinaryData, Deadline);
type Store = RwLock<HashMap<BinaryData, Entry>>;
type StopCondition = (Mutex<bool>, Condvar);

/// Upper bound on how long the expirer sleeps between sweeps when the
/// expiry index is empty; actual wakeups also happen as soon as an entry
/// with a deadline is inserted (see `Keyspace::set_absolute`).
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Min-heap of `(deadline, key)` ordered by earliest deadline first.
/// Entries are not removed when a key is overwritten or deleted; the
/// expirer discards them lazily at pop time by checking whether the live
/// value for that key still carries the same deadline (spec's tolerated
/// "stale entries, skipped at pop" invariant).
type ExpiryIndex = Mutex<BinaryHeap<Reverse<(Instant, BinaryData)>>>;

/// Concurrent-safe keyspace with per-key millisecond TTL and a background
/// expirer thread. All operations are linearizable with respect to one
/// another via the `RwLock` guarding the backing map.
pub struct Keyspace {
    store: Arc<Store>,
    expiry_index: Arc<ExpiryIndex>,
    expirer_stop: Arc<StopCondition>,
    expirer_handle: Option<JoinHandle<()>>,
}

impl Drop for Keyspace {
    fn drop(&mut self) {
        if let Some(handle) = self.expirer_handle.take() {
            let (stop_requested, stop_cv) = &*self.expirer_stop;
            *stop_requested.lock().unwrap() = true;
            stop_cv.notify_all();
            let _ = handle.join();
        }
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::new()
    }
}

impl Keyspace {
    pub fn new() -> Self {
        let store: Arc<Store> = Arc::new(RwLock::new(HashMap::new()));
        let expiry_index: Arc<ExpiryIndex> = Arc::new(Mutex::new(BinaryHeap::new()));
        let expirer_stop: Arc<StopCondition> = Arc::new((Mutex::new(false), Condvar::new()));

        let handle = {
            let store = store.clone();
            let expiry_index = expiry_index.clone();
            let expirer_stop = expirer_stop.clone();
            thread::spawn(move || Self::expirer_loop(store, expiry_index, expirer_stop))
        };

        Keyspace {
            store,
            expiry_index,
            expirer_stop,
            expirer_handle: Some(handle),
        }
    }

    fn expirer_loop(store: Arc<Store>, expiry_index: Arc<ExpiryIndex>, stop: Arc<StopCondition>) {
        loop {
            let (stop_requested, stop_cv) = &*stop;
            if *stop_requested.lock().unwrap() {
                break;
            }

            while let Some(Reverse((deadline, key))) = {
                let mut heap = expiry_index.lock().unwrap();
                if heap.peek().is_some_and(|Reverse((d, _))| *d <= Instant::now()) {
                    heap.pop()
                } else {
                    None
                }
            } {
                let mut store = store.write().unwrap();
                if let Some((_, Some(current_deadline))) = store.get(&key) {
                    if *current_deadline == deadline {
                        store.remove(&key);
                    }
                }
            }

            let (stop_requested, _) = &*stop;
            let _ = stop_cv.wait_timeout(stop_requested.lock().unwrap(), IDLE_SLEEP);
        }
    }

    /// `SET k v PX ms` path: `ttl` is a duration relative to now.
    pub fn set_relative(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) {
        let deadline = ttl.and_then(|d| Instant::now().checked_add(d));
        self.insert(key, value, deadline);
    }

    /// RDB-loader path: `deadline` is an absolute instant already resolved
    /// from the on-disk millisecond-epoch timestamp.
    pub fn set_absolute(&self, key: &[u8], value: &[u8], deadline: Option<Instant>) {
        self.insert(key, value, deadline);
    }

    fn insert(&self, key: &[u8], value: &[u8], deadline: Deadline) {
        self.store
            .write()
            .unwrap()
            .insert(key.to_vec(), (value.to_vec(), deadline));
        if let Some(deadline) = deadline {
            self.expiry_index
                .lock()
                .unwrap()
                .push(Reverse((deadline, key.to_vec())));
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<BinaryData> {
        let store = self.store.read().unwrap();
        match store.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => None,
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    pub fn delete(&self, key: &[u8]) -> bool {
        self.store.write().unwrap().remove(key).is_some()
    }

    /// Matches `*` as "any sequence"; every other regex metacharacter in
    /// the pattern is escaped so it matches itself literally.
    pub fn keys(&self, glob: &[u8]) -> Vec<BinaryData> {
        let glob = String::from_utf8_lossy(glob);
        let pattern = format!(
            "^{}$",
            glob.split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*")
        );
        let Ok(re) = regex::Regex::new(&pattern) else {
            return Vec::new();
        };

        let now = Instant::now();
        self.store
            .read()
            .unwrap()
            .iter()
            .filter(|(_, (_, deadline))| deadline.map_or(true, |d| d > now))
            .filter(|(key, _)| re.is_match(&String::from_utf8_lossy(key)))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn snapshot_for_display(&self) -> Vec<(BinaryData, BinaryData)> {
        let now = Instant::now();
        self.store
            .read()
            .unwrap()
            .iter()
            .filter(|(_, (_, deadline))| deadline.map_or(true, |d| d > now))
            .map(|(key, (value, _))| (key.clone(), value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn get_returns_none_for_missing_key() {
        let keyspace = Keyspace::new();
        assert_eq!(keyspace.get(b"missing"), None);
    }

    #[test]
    fn set_then_get_round_trips_value() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"foo", b"bar", None);
        assert_eq!(keyspace.get(b"foo"), Some(b"bar".to_vec()));
    }

    #[test]
    fn expired_key_reads_as_absent_even_before_expirer_sweeps() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"k", b"v", Some(Duration::from_millis(0)));
        sleep(Duration::from_millis(5));
        assert_eq!(keyspace.get(b"k"), None);
    }

    #[test]
    fn expirer_thread_eventually_evicts_expired_key() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"k", b"v", Some(Duration::from_millis(10)));
        sleep(Duration::from_millis(100));
        assert_eq!(keyspace.get(b"k"), None);
    }

    #[test]
    fn overwriting_a_key_invalidates_the_stale_expiry_entry() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"k", b"v1", Some(Duration::from_millis(10)));
        keyspace.set_relative(b"k", b"v2", None);
        sleep(Duration::from_millis(100));
        assert_eq!(keyspace.get(b"k"), Some(b"v2".to_vec()));
    }

    #[test]
    fn keys_glob_star_matches_everything() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"foo", b"1", None);
        keyspace.set_relative(b"bar", b"2", None);
        let mut result = keyspace.keys(b"*");
        result.sort();
        assert_eq!(result, vec![b"bar".to_vec(), b"foo".to_vec()]);
    }

    #[test]
    fn keys_glob_prefix_and_suffix() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"hello", b"1", None);
        keyspace.set_relative(b"hero", b"2", None);
        keyspace.set_relative(b"world", b"3", None);
        let mut result = keyspace.keys(b"h*o");
        result.sort();
        assert_eq!(result, vec![b"hello".to_vec(), b"hero".to_vec()]);
    }

    #[test]
    fn keys_glob_escapes_other_regex_metacharacters() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"a.b", b"1", None);
        keyspace.set_relative(b"axb", b"2", None);
        let result = keyspace.keys(b"a.b");
        assert_eq!(result, vec![b"a.b".to_vec()]);
    }

    #[test]
    fn expired_keys_are_excluded_from_keys_glob() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"gone", b"v", Some(Duration::from_millis(0)));
        sleep(Duration::from_millis(5));
        assert!(keyspace.keys(b"*").is_empty());
    }

    #[test]
    fn delete_removes_a_live_key() {
        let keyspace = Keyspace::new();
        keyspace.set_relative(b"k", b"v", None);
        assert!(keyspace.delete(b"k"));
        assert_eq!(keyspace.get(b"k"), None);
    }
}
