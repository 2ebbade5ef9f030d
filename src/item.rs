//! Disk-spillable holding cell for one payload
//!
//! A [`VirtualItem`] is a cheap, cloneable handle; clones refer to the same
//! item, which is how several tables share one payload without copying it.
//!
//! ## States
//!
//! - **Resident**: the item owns the payload in memory.
//! - **Spilled**: the payload lives in a backing directory of the spill area.
//!   A weak read cache remembers the last payload handed out, so repeated
//!   reads while a caller still holds it skip the disk.
//! - **Closed**: backing storage is deleted; every access fails with
//!   [`Error::UseAfterFree`].
//!
//! The backing directory is allocated on the first spill and reused by later
//! spills of the same item until it is deleted (`materialize` with
//! `delete_backing`, or `close`).
//!
//! ## Liveness
//!
//! Holders (tables, merged annotation values) register with [`VirtualItem::add_user`].
//! An item may be closed once [`VirtualItem::can_close`] reports no remaining
//! user. Dropping the last handle of an item that was never closed still
//! deletes its backing directory.
//!
//! ## Locking
//!
//! Each item has one reader/writer lock. Reads of a resident or cached payload
//! share the read lock; disk loads, `spill`, `materialize` and `close` take
//! the write lock. There is no ordering between different items.

use crate::cache::DataCache;
use crate::data::{Data, DataType};
use crate::error::{Error, Result};
use crate::logging::{operations, status};
use crate::progress::Progress;
use crate::storage::{ReadStorage, SpillArea, WriteStorage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of something that keeps items alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HolderId(u64);

impl HolderId {
    /// A process-unique holder id
    pub fn next() -> Self {
        Self(NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Lifecycle state of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Resident,
    Spilled,
    Closed,
}

struct ReadCache {
    payload: Weak<dyn Data>,
    generation: u64,
}

enum Residency {
    Resident(Arc<dyn Data>),
    Spilled { cache: Option<ReadCache> },
    Closed,
}

struct Backing {
    path: PathBuf,
    cache: Arc<DataCache>,
}

struct ItemState {
    residency: Residency,
    backing: Option<Backing>,
    display: String,
    // Bumped whenever cached payloads must not be handed out any more
    generation: u64,
}

impl ItemState {
    fn status(&self) -> ItemStatus {
        match self.residency {
            Residency::Resident(_) => ItemStatus::Resident,
            Residency::Spilled { .. } => ItemStatus::Spilled,
            Residency::Closed => ItemStatus::Closed,
        }
    }

    fn cached_payload(&self) -> Option<Arc<dyn Data>> {
        match &self.residency {
            Residency::Spilled { cache: Some(cache) } if cache.generation == self.generation => {
                cache.payload.upgrade()
            }
            _ => None,
        }
    }

    fn backing(&self) -> Result<&Backing> {
        self.backing.as_ref().ok_or_else(|| {
            Error::io(
                PathBuf::new(),
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "spilled item has no backing directory",
                ),
            )
        })
    }

    fn load(&self, data_type: &DataType, progress: &Progress) -> Result<Arc<dyn Data>> {
        let backing = self.backing()?;
        let storage = ReadStorage::new(&backing.path)?;
        let payload = data_type.import(&storage, &backing.cache, &progress.resolve("Load virtual data"))?;
        debug!(
            operation = operations::LOAD,
            status = status::SUCCESS,
            type_id = data_type.id(),
            path = %backing.path.display(),
            "loaded payload from spill directory"
        );
        Ok(payload)
    }

    fn use_after_free(&self) -> Error {
        Error::UseAfterFree {
            display: self.display.clone(),
        }
    }
}

struct ItemInner {
    data_type: DataType,
    state: RwLock<ItemState>,
    users: Mutex<HashMap<HolderId, usize>>,
}

impl Drop for ItemInner {
    fn drop(&mut self) {
        if let Some(backing) = self.state.get_mut().backing.take() {
            if let Err(e) = SpillArea::release(&backing.path) {
                warn!(
                    operation = operations::CLOSE,
                    status = status::ERROR,
                    path = %backing.path.display(),
                    "failed to delete spill directory of dropped item: {}",
                    e
                );
            }
        }
    }
}

/// Shared handle to one disk-spillable payload
#[derive(Clone)]
pub struct VirtualItem {
    inner: Arc<ItemInner>,
}

impl VirtualItem {
    /// Wrap a resident payload. No I/O.
    pub fn wrap(payload: Arc<dyn Data>) -> Self {
        let data_type = payload.data_type();
        let display = payload.display_string();

        Self {
            inner: Arc::new(ItemInner {
                data_type,
                state: RwLock::new(ItemState {
                    residency: Residency::Resident(payload),
                    backing: None,
                    display,
                    generation: 0,
                }),
                users: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn new<D: Data>(data: D) -> Self {
        Self::wrap(Arc::new(data))
    }

    /// The payload, reading it from disk when spilled
    ///
    /// A spilled item stays spilled: the loaded payload is only remembered in
    /// the weak read cache.
    pub fn get(&self, progress: &Progress) -> Result<Arc<dyn Data>> {
        {
            let state = self.inner.state.read();
            match &state.residency {
                Residency::Resident(payload) => return Ok(Arc::clone(payload)),
                Residency::Closed => return Err(state.use_after_free()),
                Residency::Spilled { .. } => {
                    if let Some(payload) = state.cached_payload() {
                        return Ok(payload);
                    }
                }
            }
        }

        let mut state = self.inner.state.write();
        match &state.residency {
            Residency::Resident(payload) => return Ok(Arc::clone(payload)),
            Residency::Closed => return Err(state.use_after_free()),
            Residency::Spilled { .. } => {
                if let Some(payload) = state.cached_payload() {
                    return Ok(payload);
                }
            }
        }

        let payload = state.load(&self.inner.data_type, progress)?;
        let generation = state.generation;
        state.residency = Residency::Spilled {
            cache: Some(ReadCache {
                payload: Arc::downgrade(&payload),
                generation,
            }),
        };
        Ok(payload)
    }

    /// Move the payload to disk
    ///
    /// No-op when already spilled or when virtualization is disabled for
    /// `cache`. With `discard`, an item that already has a backing directory
    /// is not written again. On failure the item stays resident.
    pub fn spill(&self, cache: &Arc<DataCache>, progress: &Progress, discard: bool) -> Result<()> {
        if !cache.virtualization_enabled() {
            return Ok(());
        }

        let mut state = self.inner.state.write();
        let payload = match &state.residency {
            Residency::Closed => return Err(state.use_after_free()),
            Residency::Spilled { .. } => return Ok(()),
            Residency::Resident(payload) => Arc::clone(payload),
        };

        let existing = state.backing.as_ref().map(|b| b.path.clone());
        let path = match &existing {
            Some(path) => path.clone(),
            None => cache.spill_area().allocate()?,
        };

        if discard && existing.is_some() {
            debug!(
                operation = operations::SPILL,
                path = %path.display(),
                "reusing existing spill directory"
            );
        } else if let Err(e) = write_payload(payload.as_ref(), &path, progress) {
            if existing.is_none() {
                let _ = SpillArea::release(&path);
            }
            warn!(
                operation = operations::SPILL,
                status = status::ERROR,
                type_id = self.inner.data_type.id(),
                path = %path.display(),
                "failed to spill item: {}",
                e
            );
            return Err(e);
        }

        debug!(
            operation = operations::SPILL,
            status = status::SUCCESS,
            type_id = self.inner.data_type.id(),
            path = %path.display(),
            "spilled item"
        );

        state.backing = Some(Backing {
            path,
            cache: Arc::clone(cache),
        });
        let generation = state.generation;
        state.residency = Residency::Spilled {
            cache: Some(ReadCache {
                payload: Arc::downgrade(&payload),
                generation,
            }),
        };
        Ok(())
    }

    /// Bring the payload back into memory
    ///
    /// With `delete_backing` the backing directory is removed afterwards and
    /// the next spill allocates a new one.
    pub fn materialize(&self, progress: &Progress, delete_backing: bool) -> Result<()> {
        let mut state = self.inner.state.write();
        match &state.residency {
            Residency::Closed => return Err(state.use_after_free()),
            Residency::Resident(_) => return Ok(()),
            Residency::Spilled { .. } => {}
        }

        let payload = match state.cached_payload() {
            Some(payload) => payload,
            None => state.load(&self.inner.data_type, progress)?,
        };
        state.display = payload.display_string();
        state.residency = Residency::Resident(payload);

        if delete_backing {
            state.generation += 1;
            if let Some(backing) = state.backing.take() {
                SpillArea::release(&backing.path)?;
            }
        }

        debug!(
            operation = operations::MATERIALIZE,
            status = status::SUCCESS,
            type_id = self.inner.data_type.id(),
            delete_backing,
            "materialized item"
        );
        Ok(())
    }

    /// Deep copy with the same residency but its own backing directory
    pub fn duplicate(&self, progress: &Progress) -> Result<VirtualItem> {
        let spill_cache = {
            let state = self.inner.state.read();
            match state.status() {
                ItemStatus::Closed => return Err(state.use_after_free()),
                ItemStatus::Resident => None,
                ItemStatus::Spilled => state.backing.as_ref().map(|b| Arc::clone(&b.cache)),
            }
        };

        let payload = self.get(progress)?;
        let copy = VirtualItem::wrap(payload.duplicate(progress)?);
        if let Some(cache) = spill_cache {
            copy.spill(&cache, progress, false)?;
        }
        Ok(copy)
    }

    /// Delete backing storage and release the payload. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut state = self.inner.state.write();
        if let Residency::Closed = state.residency {
            return Ok(());
        }

        if let Residency::Resident(payload) =
            std::mem::replace(&mut state.residency, Residency::Closed)
        {
            payload.close();
        }
        state.generation += 1;

        let backing = state.backing.take();
        drop(state);

        debug!(
            operation = operations::CLOSE,
            type_id = self.inner.data_type.id(),
            "closed item"
        );

        match backing {
            Some(backing) => SpillArea::release(&backing.path),
            None => Ok(()),
        }
    }

    /// Register `holder` as a user; registrations are counted
    pub fn add_user(&self, holder: HolderId) {
        *self.inner.users.lock().entry(holder).or_insert(0) += 1;
    }

    /// Drop one registration of `holder`
    pub fn remove_user(&self, holder: HolderId) {
        let mut users = self.inner.users.lock();
        if let Some(count) = users.get_mut(&holder) {
            *count -= 1;
            if *count == 0 {
                users.remove(&holder);
            }
        }
    }

    /// Drop one registration and close the item if nobody uses it any more
    ///
    /// Returns whether the item was closed.
    pub fn release(&self, holder: HolderId) -> Result<bool> {
        self.remove_user(holder);
        if self.can_close() {
            self.close()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Number of distinct holders
    pub fn user_count(&self) -> usize {
        self.inner.users.lock().len()
    }

    pub fn can_close(&self) -> bool {
        self.inner.users.lock().is_empty()
    }

    pub fn status(&self) -> ItemStatus {
        self.inner.state.read().status()
    }

    pub fn is_resident(&self) -> bool {
        self.status() == ItemStatus::Resident
    }

    pub fn is_spilled(&self) -> bool {
        self.status() == ItemStatus::Spilled
    }

    pub fn is_closed(&self) -> bool {
        self.status() == ItemStatus::Closed
    }

    pub fn data_type(&self) -> DataType {
        self.inner.data_type.clone()
    }

    pub fn display_string(&self) -> String {
        self.inner.state.read().display.clone()
    }

    pub fn disk_path(&self) -> Option<PathBuf> {
        self.inner
            .state
            .read()
            .backing
            .as_ref()
            .map(|b| b.path.clone())
    }

    /// Whether both handles refer to the same item
    pub fn same_item(&self, other: &VirtualItem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for VirtualItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("VirtualItem")
            .field("data_type", &self.inner.data_type)
            .field("status", &state.status())
            .field("display", &state.display)
            .finish()
    }
}

impl fmt::Display for VirtualItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_string())
    }
}

/// Replace the contents of `path` with a fresh export of `payload`
fn write_payload(payload: &dyn Data, path: &Path, progress: &Progress) -> Result<()> {
    if path.exists() {
        SpillArea::release(path)?;
    }
    let storage = WriteStorage::new(path)?;
    payload.export(&storage, "data", false, &progress.resolve("Spill"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{BlobData, TextData};

    fn blob_item(bytes: &[u8]) -> VirtualItem {
        VirtualItem::new(BlobData::new(bytes.to_vec()))
    }

    #[test]
    fn test_wrap_is_resident_without_path() {
        let item = blob_item(b"abc");
        assert!(item.is_resident());
        assert!(item.disk_path().is_none());
        assert_eq!(item.data_type(), BlobData::data_type());
    }

    #[test]
    fn test_spill_and_materialize() {
        let cache = DataCache::temporary().unwrap();
        let progress = Progress::new();
        let item = blob_item(b"payload");
        let before = item.display_string();

        item.spill(&cache, &progress, false).unwrap();
        assert!(item.is_spilled());
        let path = item.disk_path().unwrap();
        assert!(path.join("data.bin").exists());

        item.materialize(&progress, false).unwrap();
        assert!(item.is_resident());
        assert_eq!(item.get(&progress).unwrap().display_string(), before);

        // Path is reused by the next spill
        item.spill(&cache, &progress, true).unwrap();
        assert_eq!(item.disk_path().unwrap(), path);
    }

    #[test]
    fn test_get_reads_through_without_promoting() {
        let cache = DataCache::temporary().unwrap();
        let progress = Progress::new();
        let item = blob_item(b"read-through");

        item.spill(&cache, &progress, false).unwrap();
        let first = item.get(&progress).unwrap();
        assert!(item.is_spilled());

        // While the caller holds the payload, the read cache hands out the same one
        let second = item.get(&progress).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        drop(first);
        drop(second);
        let reloaded = item.get(&progress).unwrap();
        assert_eq!(reloaded.display_string(), item.display_string());
        assert!(item.is_spilled());
    }

    #[test]
    fn test_materialize_with_delete_forgets_path() {
        let cache = DataCache::temporary().unwrap();
        let progress = Progress::new();
        let item = blob_item(b"delete me");

        item.spill(&cache, &progress, false).unwrap();
        let path = item.disk_path().unwrap();

        item.materialize(&progress, true).unwrap();
        assert!(!path.exists());
        assert!(item.disk_path().is_none());

        // discard has nothing to reuse, so the payload is written again
        item.spill(&cache, &progress, true).unwrap();
        let new_path = item.disk_path().unwrap();
        assert!(new_path.join("data.bin").exists());
    }

    #[test]
    fn test_spill_noop_when_virtualization_disabled() {
        let cache = DataCache::temporary().unwrap();
        cache.set_virtualization_enabled(false);
        let item = blob_item(b"stay");

        item.spill(&cache, &Progress::new(), false).unwrap();
        assert!(item.is_resident());
        assert!(item.disk_path().is_none());
    }

    #[test]
    fn test_close_is_idempotent_and_deletes_storage() {
        let cache = DataCache::temporary().unwrap();
        let progress = Progress::new();
        let item = blob_item(b"bye");
        item.spill(&cache, &progress, false).unwrap();
        let path = item.disk_path().unwrap();

        item.close().unwrap();
        assert!(item.is_closed());
        assert!(!path.exists());
        assert!(item.close().is_ok());

        assert!(matches!(item.get(&progress), Err(Error::UseAfterFree { .. })));
        assert!(matches!(
            item.spill(&cache, &progress, false),
            Err(Error::UseAfterFree { .. })
        ));
        assert!(matches!(
            item.materialize(&progress, false),
            Err(Error::UseAfterFree { .. })
        ));
        assert!(matches!(
            item.duplicate(&progress),
            Err(Error::UseAfterFree { .. })
        ));
    }

    #[test]
    fn test_duplicate_reproduces_state() {
        let cache = DataCache::temporary().unwrap();
        let progress = Progress::new();
        let item = VirtualItem::new(TextData::new("copy me"));
        item.spill(&cache, &progress, false).unwrap();

        let copy = item.duplicate(&progress).unwrap();
        assert!(!copy.same_item(&item));
        assert!(copy.is_spilled());
        assert_ne!(copy.disk_path(), item.disk_path());
        assert_eq!(copy.display_string(), "copy me");

        let resident = VirtualItem::new(TextData::new("resident"));
        assert!(resident.duplicate(&progress).unwrap().is_resident());
    }

    #[test]
    fn test_user_counting() {
        let item = blob_item(b"shared");
        let a = HolderId::next();
        let b = HolderId::next();

        item.add_user(a);
        item.add_user(a);
        item.add_user(b);
        assert_eq!(item.user_count(), 2);

        item.remove_user(a);
        assert!(!item.release(b).unwrap());
        assert_eq!(item.user_count(), 1);

        assert!(item.release(a).unwrap());
        assert!(item.is_closed());
    }

    #[test]
    fn test_drop_deletes_backing() {
        let cache = DataCache::temporary().unwrap();
        let item = blob_item(b"dropped");
        item.spill(&cache, &Progress::new(), false).unwrap();
        let path = item.disk_path().unwrap();

        let clone = item.clone();
        drop(item);
        assert!(path.exists());
        drop(clone);
        assert!(!path.exists());
    }
}
