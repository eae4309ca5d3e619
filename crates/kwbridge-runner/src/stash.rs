//! Typed per-object scratch storage.
//!
//! A [`Stash`] maps [`StashKey`]s to values of the key's type. Keys are
//! declared as statics, so independent plugins can attach their own state to
//! an item or a session without knowing about each other and without global
//! variables.
//!
//! # Examples
//!
//! ```
//! use kwbridge_runner::{Stash, StashKey};
//!
//! static ATTEMPTS: StashKey<u32> = StashKey::new("attempts");
//!
//! let stash = Stash::default();
//! assert!(!stash.contains(&ATTEMPTS));
//! stash.insert(&ATTEMPTS, 1);
//! stash.with_mut(&ATTEMPTS, |n| *n += 1);
//! assert_eq!(stash.get(&ATTEMPTS), Some(2));
//! assert_eq!(stash.take(&ATTEMPTS), Some(2));
//! assert!(!stash.contains(&ATTEMPTS));
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

use hashbrown::HashMap;

/// Identity of one stash entry holding a `T`.
///
/// Keys compare by address, so every `static` key is distinct even when two
/// keys share a name. The name only appears in debug output.
pub struct StashKey<T> {
    name: &'static str,
    marker: PhantomData<fn() -> T>,
}

impl<T> StashKey<T> {
    /// Declare a key.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            marker: PhantomData,
        }
    }

    /// Name given at declaration.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    fn slot(&'static self) -> usize {
        std::ptr::from_ref(self).addr()
    }
}

impl<T> fmt::Debug for StashKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StashKey").field(&self.name).finish()
    }
}

/// Typed key-value scratch space.
#[derive(Default)]
pub struct Stash {
    values: RefCell<HashMap<usize, (&'static str, Box<dyn Any>)>>,
}

impl Stash {
    /// Store `value` under `key`, returning the previous value.
    pub fn insert<T: 'static>(&self, key: &'static StashKey<T>, value: T) -> Option<T> {
        self.values
            .borrow_mut()
            .insert(key.slot(), (key.name, Box::new(value)))
            .and_then(|(_, old)| old.downcast::<T>().ok().map(|boxed| *boxed))
    }

    /// Clone of the value under `key`.
    #[must_use]
    pub fn get<T: Clone + 'static>(&self, key: &'static StashKey<T>) -> Option<T> {
        self.with(key, T::clone)
    }

    /// Apply `read` to the value under `key`.
    pub fn with<T: 'static, R>(&self, key: &'static StashKey<T>, read: impl FnOnce(&T) -> R) -> Option<R> {
        self.values
            .borrow()
            .get(&key.slot())
            .and_then(|(_, value)| value.downcast_ref::<T>())
            .map(read)
    }

    /// Apply `update` to the value under `key`.
    pub fn with_mut<T: 'static, R>(
        &self,
        key: &'static StashKey<T>,
        update: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        self.values
            .borrow_mut()
            .get_mut(&key.slot())
            .and_then(|(_, value)| value.downcast_mut::<T>())
            .map(update)
    }

    /// Apply `update` to the value under `key`, inserting `init()` first
    /// when the key is missing.
    pub fn update_or_insert<T: 'static, R>(
        &self,
        key: &'static StashKey<T>,
        init: impl FnOnce() -> T,
        update: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let mut values = self.values.borrow_mut();
        let (_, value) = values
            .entry(key.slot())
            .or_insert_with(|| (key.name, Box::new(init()) as Box<dyn Any>));
        value.downcast_mut::<T>().map(update)
    }

    /// Remove and return the value under `key`.
    pub fn take<T: 'static>(&self, key: &'static StashKey<T>) -> Option<T> {
        self.values
            .borrow_mut()
            .remove(&key.slot())
            .and_then(|(_, value)| value.downcast::<T>().ok().map(|boxed| *boxed))
    }

    /// `true` when `key` holds a value.
    #[must_use]
    pub fn contains<T: 'static>(&self, key: &'static StashKey<T>) -> bool {
        self.values.borrow().contains_key(&key.slot())
    }
}

impl fmt::Debug for Stash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.borrow();
        let mut names: Vec<&str> = values.values().map(|(name, _)| *name).collect();
        names.sort_unstable();
        f.debug_tuple("Stash").field(&names).finish()
    }
}
