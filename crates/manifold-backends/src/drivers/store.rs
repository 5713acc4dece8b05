//! Host-resident buffer storage shared by the host drivers
//!
//! Buffers live behind opaque `u64` handles in a map guarded by a
//! read-write lock. Launches resolve handles to raw views once per bind,
//! so kernel execution never touches the lock.

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{BackendError, Result};
use crate::kir::BufferBinding;
use crate::types::{BufferHandle, ScalarType};

/// One host buffer.
///
/// # Safety
///
/// The cell is written through raw pointers during launches. The
/// runtime's ordering contract serializes host-visible operations
/// against launches; overlapping writes from concurrent launches are the
/// caller's responsibility, matching the shared-resource policy.
struct HostBuffer {
    len: usize,
    data: UnsafeCell<Box<[u8]>>,
}

unsafe impl Sync for HostBuffer {}

impl HostBuffer {
    fn ptr(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr() }
    }
}

/// Keeps a buffer's storage alive across a launch
pub(crate) struct BufferGuard {
    _buffer: Arc<HostBuffer>,
}

/// Handle → buffer map with monotonically increasing ids
pub(crate) struct HostStore {
    buffers: RwLock<HashMap<u64, Arc<HostBuffer>>>,
    next_id: AtomicU64,
}

impl HostStore {
    pub(crate) fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn alloc(&self, bytes: usize) -> Result<BufferHandle> {
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(bytes)
            .map_err(|_| BackendError::OutOfMemory { requested: bytes })?;
        storage.resize(bytes, 0u8);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers.write().insert(
            id,
            Arc::new(HostBuffer {
                len: bytes,
                data: UnsafeCell::new(storage.into_boxed_slice()),
            }),
        );
        Ok(BufferHandle::new(id))
    }

    pub(crate) fn free(&self, handle: BufferHandle) -> Result<()> {
        if self.buffers.write().remove(&handle.id()).is_none() {
            return Err(BackendError::InvalidHandle(handle.id()));
        }
        Ok(())
    }

    fn get(&self, handle: BufferHandle) -> Result<Arc<HostBuffer>> {
        self.buffers
            .read()
            .get(&handle.id())
            .cloned()
            .ok_or(BackendError::InvalidHandle(handle.id()))
    }

    pub(crate) fn copy_in(&self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        let buffer = self.get(handle)?;
        if data.len() > buffer.len {
            return Err(BackendError::SizeMismatch {
                requested: data.len(),
                capacity: buffer.len,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), buffer.ptr(), data.len());
        }
        Ok(())
    }

    pub(crate) fn copy_out(&self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        let buffer = self.get(handle)?;
        if data.len() > buffer.len {
            return Err(BackendError::SizeMismatch {
                requested: data.len(),
                capacity: buffer.len,
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(buffer.ptr(), data.as_mut_ptr(), data.len());
        }
        Ok(())
    }

    pub(crate) fn bytes_of(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.get(handle)?.len)
    }

    /// Resolve a handle into a launch-time view.
    ///
    /// The returned binding's pointer stays valid while the paired
    /// [`BufferGuard`] is held; callers retain guards for the launch's
    /// duration so a concurrent `free` cannot drop the storage mid-run.
    pub(crate) fn binding(
        &self,
        handle: BufferHandle,
        elem: ScalarType,
        keep_alive: &mut Vec<BufferGuard>,
    ) -> Result<BufferBinding> {
        let buffer = self.get(handle)?;
        let binding = BufferBinding::new(elem, buffer.len / elem.size_bytes(), buffer.ptr());
        keep_alive.push(BufferGuard { _buffer: buffer });
        Ok(binding)
    }

    pub(crate) fn clear(&self) {
        self.buffers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_alloc_copy_roundtrip() {
        let store = HostStore::new();
        let handle = store.alloc(16).unwrap();
        assert_eq!(store.bytes_of(handle).unwrap(), 16);

        let data = b"Hello, Manifold!";
        store.copy_in(handle, data).unwrap();

        let mut out = vec![0u8; data.len()];
        store.copy_out(handle, &mut out).unwrap();
        assert_eq!(out.as_slice(), data);

        store.free(handle).unwrap();
        assert!(store.bytes_of(handle).is_err());
    }

    #[test]
    fn test_store_new_buffers_are_zeroed() {
        let store = HostStore::new();
        let handle = store.alloc(8).unwrap();
        let mut out = vec![0xFFu8; 8];
        store.copy_out(handle, &mut out).unwrap();
        assert_eq!(out, vec![0u8; 8]);
    }

    #[test]
    fn test_store_rejects_oversized_transfers() {
        let store = HostStore::new();
        let handle = store.alloc(4).unwrap();

        let err = store.copy_in(handle, &[0u8; 8]).unwrap_err();
        assert!(matches!(
            err,
            BackendError::SizeMismatch {
                requested: 8,
                capacity: 4
            }
        ));

        let mut out = vec![0u8; 8];
        let err = store.copy_out(handle, &mut out).unwrap_err();
        assert!(matches!(err, BackendError::SizeMismatch { .. }));
    }

    #[test]
    fn test_store_partial_transfers() {
        let store = HostStore::new();
        let handle = store.alloc(8).unwrap();
        store.copy_in(handle, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();

        let mut head = vec![0u8; 4];
        store.copy_out(handle, &mut head).unwrap();
        assert_eq!(head, vec![1, 2, 3, 4]);

        store.copy_in(handle, &[9, 9]).unwrap();
        let mut out = vec![0u8; 8];
        store.copy_out(handle, &mut out).unwrap();
        assert_eq!(out, vec![9, 9, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_store_invalid_handle() {
        let store = HostStore::new();
        assert!(matches!(
            store.free(BufferHandle::new(99)),
            Err(BackendError::InvalidHandle(99))
        ));
    }
}
