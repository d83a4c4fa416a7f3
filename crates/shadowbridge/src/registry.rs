//! Process-wide type <-> interface id table
//!
//! Typed casts never consult the registry: every interface carries its id as
//! [`ComInterface::IID`]. The registry serves code that holds only a type or
//! only an id at runtime, and names interfaces in diagnostics. Debug builds
//! log a warning when a typed `query_interface` targets an interface missing
//! from an installed registry.
//!
//! Registration happens once, at startup, through a [`RegistryBuilder`].
//! [`RegistryBuilder::build`] freezes it into an immutable [`GuidTypeRegistry`]
//! that is shared by reference, so lookups never lock.
//!
//! ```ignore
//! let mut builder = RegistryBuilder::new();
//! builder.register::<ITextRenderer>().register::<IPixelSnapping>();
//! shadowbridge::registry::install(builder).expect("registry installed twice");
//!
//! let iid = shadowbridge::registry::global().expect_iid::<ITextRenderer>();
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::com::{ComInterface, IUnknown};
use crate::error::{Error, Result};
use crate::guid::GUID;

/// One registered type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredType {
    pub type_id: TypeId,
    pub name: &'static str,
    pub iid: GUID,
    /// Interface this one extends, if any
    pub base: Option<GUID>,
}

/// Mutable registration phase.
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    by_type: HashMap<TypeId, RegisteredType>,
    by_iid: HashMap<GUID, RegisteredType>,
}

impl RegistryBuilder {
    /// A builder holding `IUnknown`.
    #[must_use]
    pub fn new() -> Self {
        let mut builder = Self::default();
        builder.register::<IUnknown>();
        builder
    }

    /// Register interface `I`.
    ///
    /// # Panics
    /// If the registration conflicts with an earlier one.
    pub fn register<I: ComInterface>(&mut self) -> &mut Self {
        if let Err(e) = self.try_register::<I>() {
            panic!("interface registration failed: {e}");
        }
        self
    }

    /// Register interface `I`, reporting conflicts.
    pub fn try_register<I: ComInterface>(&mut self) -> Result<()> {
        self.register_type(TypeId::of::<I>(), I::NAME, I::IID, I::BASE_IID)
    }

    /// Register an arbitrary type under `iid`.
    ///
    /// Registering the same type under the same id again is a no-op.
    pub fn register_type(
        &mut self,
        type_id: TypeId,
        name: &'static str,
        iid: GUID,
        base: Option<GUID>,
    ) -> Result<()> {
        if let Some(existing) = self.by_type.get(&type_id) {
            if existing.iid == iid {
                return Ok(());
            }
            return Err(Error::DuplicateRegistration {
                name: name.to_string(),
                existing: existing.iid,
                requested: iid,
            });
        }
        if let Some(owner) = self.by_iid.get(&iid) {
            return Err(Error::InterfaceClaimed {
                iid,
                owner: owner.name.to_string(),
            });
        }

        let entry = RegisteredType {
            type_id,
            name,
            iid,
            base,
        };
        tracing::trace!(name, %iid, "registered interface type");
        self.by_type.insert(type_id, entry);
        self.by_iid.insert(iid, entry);
        Ok(())
    }

    /// Freeze into a read-only registry.
    #[must_use]
    pub fn build(self) -> GuidTypeRegistry {
        GuidTypeRegistry {
            by_type: self.by_type,
            by_iid: self.by_iid,
        }
    }
}

/// Read-only, hash-indexed in both directions.
#[derive(Debug, Clone)]
pub struct GuidTypeRegistry {
    by_type: HashMap<TypeId, RegisteredType>,
    by_iid: HashMap<GUID, RegisteredType>,
}

impl Default for GuidTypeRegistry {
    fn default() -> Self {
        RegistryBuilder::new().build()
    }
}

impl GuidTypeRegistry {
    /// Interface id registered for a type.
    pub fn lookup(&self, type_id: TypeId) -> Result<GUID> {
        self.by_type
            .get(&type_id)
            .map(|entry| entry.iid)
            .ok_or_else(|| Error::UnknownType(format!("{type_id:?}")))
    }

    /// Interface id registered for `T`.
    pub fn lookup_of<T: 'static>(&self) -> Result<GUID> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|entry| entry.iid)
            .ok_or_else(|| Error::UnknownType(std::any::type_name::<T>().to_string()))
    }

    /// Like [`lookup_of`](Self::lookup_of), for call sites where a missing
    /// registration is a bug.
    ///
    /// # Panics
    /// If `T` is not registered.
    #[must_use]
    pub fn expect_iid<T: 'static>(&self) -> GUID {
        match self.lookup_of::<T>() {
            Ok(iid) => iid,
            Err(e) => panic!("{e}"),
        }
    }

    /// Type registered under `iid`.
    pub fn lookup_type(&self, iid: &GUID) -> Result<&RegisteredType> {
        self.by_iid.get(iid).ok_or(Error::UnknownInterface(*iid))
    }

    /// Name of the type registered under `iid`
    #[must_use]
    pub fn name_of(&self, iid: &GUID) -> Option<&'static str> {
        self.by_iid.get(iid).map(|entry| entry.name)
    }

    /// True if `derived` is `base` or extends it through registered interfaces.
    #[must_use]
    pub fn inherits(&self, derived: &GUID, base: &GUID) -> bool {
        let mut current = Some(*derived);
        // Bounded by the number of entries so a malformed chain cannot loop
        for _ in 0..=self.by_iid.len() {
            match current {
                Some(iid) if iid == *base => return true,
                Some(iid) => current = self.by_iid.get(&iid).and_then(|entry| entry.base),
                None => return false,
            }
        }
        false
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_iid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_iid.is_empty()
    }

    /// Every registered type, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredType> {
        self.by_iid.values()
    }
}

static GLOBAL: OnceLock<GuidTypeRegistry> = OnceLock::new();
static EMPTY: OnceLock<GuidTypeRegistry> = OnceLock::new();

/// Install the process-wide registry. Only the first call succeeds.
pub fn install(builder: RegistryBuilder) -> Result<&'static GuidTypeRegistry> {
    let mut built = Some(builder.build());
    let installed = GLOBAL.get_or_init(|| built.take().unwrap_or_default());
    match built {
        None => Ok(installed),
        Some(_) => Err(Error::InvalidArgument(
            "interface registry is already installed".to_string(),
        )),
    }
}

/// The process-wide registry. Holds only `IUnknown` until [`install`] runs.
///
/// Reading it does not prevent a later [`install`].
pub fn global() -> &'static GuidTypeRegistry {
    match GLOBAL.get() {
        Some(registry) => registry,
        None => EMPTY.get_or_init(GuidTypeRegistry::default),
    }
}

/// The installed registry, if [`install`] has run.
#[must_use]
pub fn installed() -> Option<&'static GuidTypeRegistry> {
    GLOBAL.get()
}

/// True unless `registry` exists and lacks `I`; logs the miss.
pub(crate) fn check_registered<I: ComInterface>(registry: Option<&GuidTypeRegistry>) -> bool {
    match registry {
        Some(registry) if registry.lookup_type(&I::IID).is_err() => {
            tracing::warn!(iid = %I::IID, interface = I::NAME, "interface missing from registry");
            false
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::com::IID_IUNKNOWN;

    struct Alpha;
    struct Beta;

    const IID_ALPHA: GUID = GUID::from_u128(0xA1);
    const IID_BETA: GUID = GUID::from_u128(0xB2);

    #[test]
    fn test_check_registered() {
        let registry = RegistryBuilder::new().build();
        assert!(check_registered::<IUnknown>(Some(&registry)));
        assert!(check_registered::<IUnknown>(None));

        let empty = GuidTypeRegistry {
            by_type: HashMap::new(),
            by_iid: HashMap::new(),
        };
        assert!(!check_registered::<IUnknown>(Some(&empty)));
    }

    #[test]
    fn test_global_before_install_is_not_sealed() {
        // No unit test installs, so the fallback is in use
        assert!(installed().is_none());
        assert_eq!(global().name_of(&IID_IUNKNOWN), Some("IUnknown"));
        assert!(installed().is_none());
    }

    #[test]
    fn test_new_holds_iunknown() {
        let registry = RegistryBuilder::new().build();
        assert_eq!(registry.lookup_of::<IUnknown>().unwrap(), IID_IUNKNOWN);
        assert_eq!(registry.name_of(&IID_IUNKNOWN), Some("IUnknown"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_type_both_directions() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_type(TypeId::of::<Alpha>(), "Alpha", IID_ALPHA, Some(IID_IUNKNOWN))
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.lookup(TypeId::of::<Alpha>()).unwrap(), IID_ALPHA);
        let entry = registry.lookup_type(&IID_ALPHA).unwrap();
        assert_eq!(entry.type_id, TypeId::of::<Alpha>());
        assert_eq!(entry.name, "Alpha");
    }

    #[test]
    fn test_idempotent_reregistration() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_type(TypeId::of::<Alpha>(), "Alpha", IID_ALPHA, None)
            .unwrap();
        builder
            .register_type(TypeId::of::<Alpha>(), "Alpha", IID_ALPHA, None)
            .unwrap();
        assert_eq!(builder.build().len(), 2);
    }

    #[test]
    fn test_conflicts() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_type(TypeId::of::<Alpha>(), "Alpha", IID_ALPHA, None)
            .unwrap();

        let duplicate = builder.register_type(TypeId::of::<Alpha>(), "Alpha", IID_BETA, None);
        assert!(matches!(
            duplicate,
            Err(Error::DuplicateRegistration { existing, requested, .. })
                if existing == IID_ALPHA && requested == IID_BETA
        ));

        let claimed = builder.register_type(TypeId::of::<Beta>(), "Beta", IID_ALPHA, None);
        assert!(matches!(claimed, Err(Error::InterfaceClaimed { owner, .. }) if owner == "Alpha"));
    }

    #[test]
    fn test_inherits_walks_chain() {
        let mut builder = RegistryBuilder::new();
        builder
            .register_type(TypeId::of::<Alpha>(), "Alpha", IID_ALPHA, Some(IID_IUNKNOWN))
            .unwrap();
        builder
            .register_type(TypeId::of::<Beta>(), "Beta", IID_BETA, Some(IID_ALPHA))
            .unwrap();
        let registry = builder.build();

        assert!(registry.inherits(&IID_BETA, &IID_BETA));
        assert!(registry.inherits(&IID_BETA, &IID_ALPHA));
        assert!(registry.inherits(&IID_BETA, &IID_IUNKNOWN));
        assert!(!registry.inherits(&IID_ALPHA, &IID_BETA));
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = GuidTypeRegistry::default();
        assert!(matches!(registry.lookup_of::<Alpha>(), Err(Error::UnknownType(_))));
        assert!(matches!(
            registry.lookup_type(&IID_ALPHA),
            Err(Error::UnknownInterface(_))
        ));
        assert_eq!(registry.name_of(&IID_ALPHA), None);
    }

    #[test]
    #[should_panic(expected = "no registered interface id")]
    fn test_expect_iid_panics() {
        let _ = GuidTypeRegistry::default().expect_iid::<Alpha>();
    }
}
