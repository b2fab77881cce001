//! Pin/unpin primitives consumed by the registration cache

use std::{
    collections::HashMap,
    ffi::c_void,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use nix::{sys::mman, unistd};

use crate::error::{BytelaneError, Result};

/// Opaque handle returned by a successful pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinHandle {
    /// Pinner-specific key (a hardware handle in a real binding)
    pub key: u64,
    /// First byte of the pinned range
    pub address: usize,
    /// Length of the pinned range
    pub length: usize,
}

const FALLBACK_PAGE_SIZE: usize = 4096;

/// Primitive that makes a range usable for direct hardware access
pub trait MemoryPinner: Send + Sync + std::fmt::Debug {
    /// Pin `length` bytes starting at `address`
    fn pin(&self, address: usize, length: usize) -> Result<PinHandle>;

    /// Undo a previous pin
    fn unpin(&self, handle: &PinHandle) -> Result<()>;

    /// Get pinner type name for debugging
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

fn validate_range(address: usize, length: usize) -> Result<()> {
    if address == 0 {
        return Err(BytelaneError::registration_failed(address, length, "null address"));
    }
    if length == 0 {
        return Err(BytelaneError::registration_failed(address, length, "empty range"));
    }
    if address.checked_add(length).is_none() {
        return Err(BytelaneError::registration_failed(
            address,
            length,
            "range wraps the address space",
        ));
    }
    Ok(())
}

/// Pins ranges by page-locking them with `mlock(2)`.
///
/// The kernel does not count locks: one `munlock` unlocks a page no matter
/// how many ranges locked it. The pinner keeps a per-page count and only
/// unlocks pages whose count drops to zero, so overlapping registrations
/// stay pinned until the last of them goes away.
#[derive(Debug)]
pub struct LockingPinner {
    next_key: AtomicU64,
    page_size: usize,
    pages: Mutex<HashMap<usize, usize>>,
}

impl Default for LockingPinner {
    fn default() -> Self {
        Self::new()
    }
}

impl LockingPinner {
    /// Create a new page-locking pinner
    pub fn new() -> Self {
        let page_size = match unistd::sysconf(unistd::SysconfVar::PAGE_SIZE) {
            Ok(Some(size)) if size > 0 => size as usize,
            _ => FALLBACK_PAGE_SIZE,
        };
        Self {
            next_key: AtomicU64::new(0),
            page_size,
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// Page granularity used for lock counting
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages currently locked
    pub fn locked_pages(&self) -> usize {
        self.lock_pages().len()
    }

    /// Number of live pins covering the page that holds `address`
    pub fn page_pins(&self, address: usize) -> usize {
        let page = address - address % self.page_size;
        self.lock_pages().get(&page).copied().unwrap_or(0)
    }

    fn lock_pages(&self) -> MutexGuard<'_, HashMap<usize, usize>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn page_span(&self, address: usize, length: usize) -> impl Iterator<Item = usize> {
        let page_size = self.page_size;
        let first = address - address % page_size;
        let last = (address + length - 1) - (address + length - 1) % page_size;
        (first..=last).step_by(page_size)
    }

    fn munlock_pages(&self, pages: &[usize]) -> Result<()> {
        let mut result = Ok(());
        let mut runs = pages.iter().copied().peekable();
        while let Some(start) = runs.next() {
            let mut end = start + self.page_size;
            while runs.peek() == Some(&end) {
                runs.next();
                end += self.page_size;
            }
            // SAFETY: munlock does not dereference the range
            if let Err(errno) = unsafe { mman::munlock(start as *const c_void, end - start) } {
                result = Err(BytelaneError::registration_failed(
                    start,
                    end - start,
                    errno.to_string(),
                ));
            }
        }
        result
    }
}

impl MemoryPinner for LockingPinner {
    fn pin(&self, address: usize, length: usize) -> Result<PinHandle> {
        validate_range(address, length)?;

        let mut pages = self.lock_pages();
        // SAFETY: mlock does not dereference the range; the kernel rejects
        // addresses outside the caller's mappings with ENOMEM.
        if let Err(errno) = unsafe { mman::mlock(address as *const c_void, length) } {
            // A failed mlock may still have locked a prefix of the range
            let fresh: Vec<usize> = self
                .page_span(address, length)
                .filter(|page| !pages.contains_key(page))
                .collect();
            let _ = self.munlock_pages(&fresh);
            return Err(BytelaneError::registration_failed(address, length, errno.to_string()));
        }
        for page in self.page_span(address, length) {
            *pages.entry(page).or_insert(0) += 1;
        }

        Ok(PinHandle {
            key: self.next_key.fetch_add(1, Ordering::Relaxed),
            address,
            length,
        })
    }

    fn unpin(&self, handle: &PinHandle) -> Result<()> {
        let mut pages = self.lock_pages();
        if !self.page_span(handle.address, handle.length).all(|page| pages.contains_key(&page)) {
            return Err(BytelaneError::registration_failed(
                handle.address,
                handle.length,
                "range is not pinned",
            ));
        }

        let mut released = Vec::new();
        for page in self.page_span(handle.address, handle.length) {
            if let Some(count) = pages.get_mut(&page) {
                *count -= 1;
                if *count == 0 {
                    pages.remove(&page);
                    released.push(page);
                }
            }
        }
        self.munlock_pages(&released)
    }
}

/// Bookkeeping-only pinner for hosts without a pinning facility.
///
/// Tracks live pins and can be capped to simulate resource exhaustion.
#[derive(Debug, Default)]
pub struct SoftwarePinner {
    next_key: AtomicU64,
    live: AtomicUsize,
    pinned_bytes: AtomicUsize,
    limit: Option<usize>,
}

impl SoftwarePinner {
    /// Create an unlimited software pinner
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pinner that refuses to hold more than `limit` pins at once
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Number of ranges currently pinned
    pub fn live_pins(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Total bytes currently pinned
    pub fn pinned_bytes(&self) -> usize {
        self.pinned_bytes.load(Ordering::Acquire)
    }
}

impl MemoryPinner for SoftwarePinner {
    fn pin(&self, address: usize, length: usize) -> Result<PinHandle> {
        validate_range(address, length)?;

        let limit = self.limit.unwrap_or(usize::MAX);
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .map_err(|_| BytelaneError::registration_failed(address, length, "pin limit reached"))?;
        self.pinned_bytes.fetch_add(length, Ordering::AcqRel);

        Ok(PinHandle {
            key: self.next_key.fetch_add(1, Ordering::Relaxed),
            address,
            length,
        })
    }

    fn unpin(&self, handle: &PinHandle) -> Result<()> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| live.checked_sub(1))
            .map_err(|_| {
                BytelaneError::registration_failed(
                    handle.address,
                    handle.length,
                    "range is not pinned",
                )
            })?;
        self.pinned_bytes.fetch_sub(handle.length, Ordering::AcqRel);
        Ok(())
    }
}
