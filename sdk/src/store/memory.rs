use {
    super::{Fetched, ObjectStore, ObjectVersion, Precondition, StoreError, StoredObject},
    crate::{len_u64, progress::ProgressCallback},
    anyhow::format_err,
    async_trait::async_trait,
    bytes::Bytes,
    cloudex_protocol::{Bucket, ObjectKey},
    parking_lot::Mutex,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
    tokio::task::yield_now,
};

/// Step in which progress of an in-memory transfer is reported.
const PROGRESS_STEP: usize = 16 * 1024;

type Slot = (Bucket, String);

#[derive(Debug, Default)]
struct State {
    objects: HashMap<Slot, (Bytes, u64)>,
    next_version: u64,
    failing_gets: HashSet<Slot>,
    failing_puts: HashSet<Slot>,
    unavailable: bool,
    puts: usize,
}

impl State {
    fn check_available(&self, slot: &Slot, failing: &HashSet<Slot>) -> Result<(), StoreError> {
        if self.unavailable || failing.contains(slot) {
            return Err(StoreError::transport(format_err!(
                "injected failure for {}/{}",
                slot.0,
                slot.1
            )));
        }
        Ok(())
    }
}

/// Object store kept in process memory.
///
/// Clones share the same objects, so several links can talk to one store.
/// Every operation yields to the scheduler once before touching the state,
/// which lets concurrently awaited operations interleave. Failures can be
/// injected per object or for the whole store.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<State>>,
}

fn slot(bucket: Bucket, key: &ObjectKey) -> Slot {
    (bucket, key.as_str().to_owned())
}

fn report(progress: Option<&ProgressCallback>, len: usize) {
    let Some(progress) = progress else {
        return;
    };
    let total = len_u64(len);
    let mut done = 0;
    while done < len {
        done = done.saturating_add(PROGRESS_STEP).min(len);
        progress(len_u64(done), total);
    }
}

impl MemoryObjectStore {
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every operation fail as if the store were unreachable.
    #[inline]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    #[inline]
    pub fn fail_gets_of(&self, bucket: Bucket, key: &ObjectKey) {
        self.state.lock().failing_gets.insert(slot(bucket, key));
    }

    #[inline]
    pub fn fail_puts_of(&self, bucket: Bucket, key: &ObjectKey) {
        self.state.lock().failing_puts.insert(slot(bucket, key));
    }

    #[inline]
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_gets.clear();
        state.failing_puts.clear();
        state.unavailable = false;
    }

    #[must_use]
    #[inline]
    pub fn object(&self, bucket: Bucket, key: &ObjectKey) -> Option<Bytes> {
        self.state
            .lock()
            .objects
            .get(&slot(bucket, key))
            .map(|(data, _)| data.clone())
    }

    #[inline]
    pub fn remove(&self, bucket: Bucket, key: &ObjectKey) -> Option<Bytes> {
        self.state
            .lock()
            .objects
            .remove(&slot(bucket, key))
            .map(|(data, _)| data)
    }

    /// Sorted keys of all objects in `bucket`.
    #[must_use]
    #[inline]
    pub fn keys(&self, bucket: Bucket) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state
            .lock()
            .objects
            .keys()
            .filter(|(b, _)| *b == bucket)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Number of successful writes so far.
    #[must_use]
    #[inline]
    pub fn put_count(&self) -> usize {
        self.state.lock().puts
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(
        &self,
        bucket: Bucket,
        key: &ObjectKey,
        progress: Option<ProgressCallback>,
    ) -> Result<Fetched, StoreError> {
        yield_now().await;
        let slot = slot(bucket, key);
        let fetched = {
            let state = self.state.lock();
            state.check_available(&slot, &state.failing_gets)?;
            match state.objects.get(&slot) {
                Some((data, version)) => Fetched::Found(StoredObject {
                    data: data.clone(),
                    version: Some(ObjectVersion::new(version.to_string())),
                }),
                None => Fetched::NotFound,
            }
        };
        if let Fetched::Found(object) = &fetched {
            report(progress.as_ref(), object.data.len());
        }
        Ok(fetched)
    }

    async fn put(
        &self,
        bucket: Bucket,
        key: &ObjectKey,
        data: Bytes,
        precondition: Option<Precondition>,
        progress: Option<ProgressCallback>,
    ) -> Result<(), StoreError> {
        yield_now().await;
        let slot = slot(bucket, key);
        let len = data.len();
        {
            let mut state = self.state.lock();
            state.check_available(&slot, &state.failing_puts)?;
            let current = state.objects.get(&slot).map(|(_, version)| *version);
            let satisfied = match &precondition {
                None => true,
                Some(Precondition::IfAbsent) => current.is_none(),
                Some(Precondition::IfMatch(expected)) => {
                    current.is_some_and(|version| version.to_string() == expected.as_str())
                }
            };
            if !satisfied {
                return Err(StoreError::PreconditionFailed);
            }
            state.next_version = state.next_version.saturating_add(1);
            let version = state.next_version;
            state.objects.insert(slot, (data, version));
            state.puts = state.puts.saturating_add(1);
        }
        report(progress.as_ref(), len);
        Ok(())
    }
}
