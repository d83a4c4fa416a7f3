//! Per-object registry of shadows
//!
//! A [`ShadowContainer`] belongs to exactly one [`Callback`](crate::Callback)
//! and holds at most one [`Shadow`] per resolved interface. Shadows are boxed
//! and never removed before the container is dropped, so the address handed to
//! native code stays stable.

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config;
use crate::error::{Error, Result};
use crate::guid::GUID;
use crate::shadow::{Shadow, ShadowInterface, Shadowed};

/// Shadows of one object, keyed by interface id.
pub struct ShadowContainer {
    owner: *const c_void,
    type_name: &'static str,
    interfaces: &'static [ShadowInterface],
    shadows: Mutex<HashMap<GUID, Box<Shadow>>>,
}

// SAFETY: `owner` is only dereferenced by thunks while a reference to the
// owner is held, and the map is behind a mutex
unsafe impl Send for ShadowContainer {}
unsafe impl Sync for ShadowContainer {}

impl ShadowContainer {
    pub(crate) fn new<T: Shadowed>(owner: *const c_void) -> Self {
        Self {
            owner,
            type_name: std::any::type_name::<T>(),
            interfaces: T::INTERFACES,
            shadows: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<GUID, Box<Shadow>>> {
        self.shadows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The shadow for `iid`, created on first request.
    ///
    /// Queries for an ancestor of an exposed interface share that interface's
    /// shadow. Fails with [`Error::InterfaceNotSupported`] if nothing matches.
    pub fn get_or_create(&self, iid: &GUID) -> Result<&Shadow> {
        let entry =
            ShadowInterface::resolve(self.interfaces, iid).ok_or(Error::InterfaceNotSupported(*iid))?;

        let mut shadows = self.lock();
        let shadow = shadows.entry(entry.iid).or_insert_with(|| {
            tracing::trace!(
                owner = self.type_name,
                interface = entry.name,
                iid = %entry.iid,
                "creating shadow"
            );
            Box::new(Shadow::new(entry, self.owner))
        });
        let shadow: *const Shadow = &**shadow;
        drop(shadows);

        // SAFETY: boxed shadows are never removed or moved while `self` lives
        Ok(unsafe { &*shadow })
    }

    /// The shadow for `iid` if it was already created.
    pub fn get(&self, iid: &GUID) -> Option<&Shadow> {
        let entry = ShadowInterface::resolve(self.interfaces, iid)?;
        let shadows = self.lock();
        let shadow: *const Shadow = &**shadows.get(&entry.iid)?;
        drop(shadows);
        // SAFETY: as in `get_or_create`
        Some(unsafe { &*shadow })
    }

    /// True if a query for `iid` would succeed.
    #[must_use]
    pub fn supports(&self, iid: &GUID) -> bool {
        ShadowInterface::resolve(self.interfaces, iid).is_some()
    }

    /// Visit every shadow created so far.
    ///
    /// The lock is released before `f` runs, so `f` may create more shadows;
    /// those are not visited.
    pub fn for_each_shadow(&self, mut f: impl FnMut(&Shadow)) {
        let snapshot: Vec<*const Shadow> = self.lock().values().map(|s| &**s as *const Shadow).collect();
        for shadow in snapshot {
            // SAFETY: as in `get_or_create`
            f(unsafe { &*shadow });
        }
    }

    /// Number of shadows created so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sum of the native reference counts of all shadows
    #[must_use]
    pub fn live_references(&self) -> u32 {
        self.lock().values().map(|s| s.ref_count()).sum()
    }

    /// Name of the owning type
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Interfaces the owner exposes
    #[must_use]
    pub fn interfaces(&self) -> &'static [ShadowInterface] {
        self.interfaces
    }
}

impl Drop for ShadowContainer {
    fn drop(&mut self) {
        let shadows = self.shadows.get_mut().unwrap_or_else(PoisonError::into_inner);
        for shadow in shadows.values().filter(|s| s.ref_count() > 0) {
            config::refcount_violation(
                "shadow outlived its owner",
                &format_args!(
                    "{} shadow of `{}` still has {} native reference(s)",
                    shadow.interface_name(),
                    self.type_name,
                    shadow.ref_count()
                ),
            );
        }
    }
}

impl std::fmt::Debug for ShadowContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shadows = self.lock();
        f.debug_struct("ShadowContainer")
            .field("owner", &self.type_name)
            .field("shadows", &shadows.values().collect::<Vec<_>>())
            .finish()
    }
}
