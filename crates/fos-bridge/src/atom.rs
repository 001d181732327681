//! Atom Table - Interned strings compared by identity
//!
//! Style property and attribute names cross the script/host boundary on
//! every write. Each distinct name is stored once per context and handed out
//! as an [`Atom`]; comparing two atoms compares pointers, never bytes.
//!
//! Atoms are reference counted. A table slot is reclaimed when the last atom
//! referring to it is released.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Hot style property names pinned in every table
const COMMON_STYLE_PROPERTIES: &[&str] = &[
    "display", "position", "width", "height", "margin", "padding", "border",
    "background", "backgroundColor", "color", "fontSize", "fontFamily",
    "fontWeight", "flex", "flexDirection", "opacity", "zIndex", "overflow",
    "transform", "transition", "top", "left", "right", "bottom",
];

/// Hot attribute names pinned in every table
const COMMON_ATTRIBUTES: &[&str] = &[
    "id", "class", "style", "src", "href", "alt", "title", "type", "name",
    "value", "disabled", "checked",
];

type Slots = Mutex<HashMap<Box<str>, Weak<AtomData>>>;

struct AtomData {
    text: Box<str>,
    slots: Weak<Slots>,
}

impl Drop for AtomData {
    fn drop(&mut self) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
        // The slot may already hold a newer atom for the same text.
        if slots.get(&*self.text).is_some_and(|slot| slot.strong_count() == 0) {
            slots.remove(&*self.text);
        }
    }
}

/// Interned string handle
///
/// Cloning bumps the reference count; equality and hashing use the storage
/// address. Atoms from different tables never compare equal.
#[derive(Clone)]
pub struct Atom(Arc<AtomData>);

impl Atom {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    pub fn is_empty(&self) -> bool {
        self.0.text.is_empty()
    }

    /// Number of live handles sharing this storage
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl PartialEq for Atom {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Atom {}

impl Hash for Atom {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl Deref for Atom {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for Atom {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?})", self.as_str())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-context string interner
pub struct AtomTable {
    slots: Arc<Slots>,
    empty: Atom,
    /// Atoms held for the table's whole lifetime
    pinned: Vec<Atom>,
}

impl AtomTable {
    /// Create a table with the common style and attribute names pinned
    pub fn new() -> Self {
        Self::with_pinned(&[] as &[&str])
    }

    /// Create a table pinning the common names plus `extra`
    pub fn with_pinned<S: AsRef<str>>(extra: &[S]) -> Self {
        let slots: Arc<Slots> = Arc::new(Mutex::new(HashMap::with_capacity(64)));
        let empty = Self::intern_in(&slots, "");
        let mut table = Self { slots, empty, pinned: Vec::new() };

        let names = COMMON_STYLE_PROPERTIES
            .iter()
            .chain(COMMON_ATTRIBUTES)
            .copied()
            .chain(extra.iter().map(|name| name.as_ref()));
        let pinned: Vec<Atom> = names.map(|name| table.intern(name)).collect();
        table.pinned = pinned;
        table
    }

    /// Intern a string, returning the existing atom if one is live
    pub fn intern(&self, content: &str) -> Atom {
        if content.is_empty() {
            return self.empty.clone();
        }
        Self::intern_in(&self.slots, content)
    }

    /// Intern an optional string; `None` yields the empty atom
    pub fn intern_opt(&self, content: Option<&str>) -> Atom {
        match content {
            Some(content) => self.intern(content),
            None => self.empty.clone(),
        }
    }

    /// Canonical empty atom
    pub fn empty(&self) -> Atom {
        self.empty.clone()
    }

    /// Release one handle; storage is reclaimed with the last handle
    pub fn release(&self, atom: Atom) {
        drop(atom);
    }

    /// Whether `content` currently has a live atom
    pub fn contains(&self, content: &str) -> bool {
        self.lock()
            .get(content)
            .is_some_and(|slot| slot.strong_count() > 0)
    }

    /// Number of live interned strings, including the empty atom
    pub fn len(&self) -> usize {
        self.lock().values().filter(|slot| slot.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Box<str>, Weak<AtomData>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn intern_in(slots: &Arc<Slots>, content: &str) -> Atom {
        let mut map = slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(data) = map.get(content).and_then(Weak::upgrade) {
            return Atom(data);
        }

        let data = Arc::new(AtomData {
            text: content.into(),
            slots: Arc::downgrade(slots),
        });
        map.insert(content.into(), Arc::downgrade(&data));
        Atom(data)
    }
}

impl Default for AtomTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AtomTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomTable")
            .field("live", &self.len())
            .field("pinned", &self.pinned.len())
            .finish()
    }
}
