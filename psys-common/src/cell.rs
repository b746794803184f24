//! Primitives for dealing with self-referential data.
//!
//! A parsed image borrows from the byte view that backs it, but both need to
//! live in the same struct: the owner would have to have a stable memory
//! address while being moved along with the borrower. The [`AsSelf`] trait
//! coerces the lifetime of the dependent object down to the lifetime of its
//! owner at the time of the borrow, and [`SelfCell`] stores the two together
//! on top of that guarantee.

use std::ops::Deref;

pub use stable_deref_trait::StableDeref;

/// Safe downcasting of dependent lifetime bounds on structs.
///
/// This trait is similar to `AsRef`, except that it captures the lifetime of
/// the own instance at the time of the borrow and forces it onto the type's
/// lifetime bounds. To implement, define `Ref` as the type with all
/// dependent lifetimes set to `'slf` and return `self` in `as_self`:
///
/// ```
/// use psys_common::AsSelf;
///
/// struct Foo<'a>(&'a str);
///
/// impl<'slf> AsSelf<'slf> for Foo<'_> {
///     type Ref = Foo<'slf>;
///
///     fn as_self(&'slf self) -> &Self::Ref {
///         self
///     }
/// }
/// ```
pub trait AsSelf<'slf> {
    /// The `Self` type with `'slf` lifetimes, returned by `as_self`.
    type Ref: ?Sized;

    /// Returns a reference to `self` with downcasted lifetime.
    fn as_self(&'slf self) -> &Self::Ref;
}

impl AsSelf<'_> for u8 {
    type Ref = u8;

    fn as_self(&self) -> &Self::Ref {
        self
    }
}

impl AsSelf<'_> for str {
    type Ref = str;

    fn as_self(&self) -> &Self::Ref {
        self
    }
}

impl<'slf, T> AsSelf<'slf> for [T]
where
    T: AsSelf<'slf>,
    T::Ref: Sized,
{
    type Ref = [T::Ref];

    fn as_self(&'slf self) -> &Self::Ref {
        unsafe { &*(self as *const [T] as *const [T::Ref]) }
    }
}

impl<'slf, T> AsSelf<'slf> for &'slf T
where
    T: AsSelf<'slf> + ?Sized,
{
    type Ref = T::Ref;

    fn as_self(&'slf self) -> &Self::Ref {
        (*self).as_self()
    }
}

/// A container carrying a derived object alongside its owner.
///
/// The owner must implement [`StableDeref`], which guarantees that the data
/// pointed to never moves while the cell exists. The derived object must
/// implement [`AsSelf`], which bounds every borrow it hands out by the
/// lifetime of the cell itself. Together this makes it safe to store, for
/// example, a parsed image next to the mapped file it borrows from.
///
/// # Example
///
/// ```
/// use psys_common::{AsSelf, SelfCell};
///
/// struct Foo<'a>(&'a str);
///
/// impl<'slf> AsSelf<'slf> for Foo<'_> {
///     type Ref = Foo<'slf>;
///
///     fn as_self(&'slf self) -> &Self::Ref {
///         self
///     }
/// }
///
/// let owner = String::from("hello world");
/// let cell = SelfCell::new(owner, |s| Foo(unsafe { &*s }));
/// assert_eq!(cell.get().0, "hello world");
/// ```
#[derive(Clone, Debug)]
pub struct SelfCell<O, D>
where
    O: StableDeref,
{
    owner: O,
    derived: D,
}

impl<'slf, O, T> SelfCell<O, T>
where
    O: StableDeref + 'slf,
    T: AsSelf<'slf>,
{
    /// Creates a new `SelfCell`.
    ///
    /// The callback receives a pointer to the owned data. Dereferencing the
    /// pointer is unsafe; a borrow of it may only be used to derive the
    /// object and must not leave the callback.
    #[inline]
    pub fn new<F>(owner: O, derive: F) -> Self
    where
        F: FnOnce(*const <O as Deref>::Target) -> T,
    {
        let derived = derive(owner.deref() as *const _);
        SelfCell { owner, derived }
    }

    /// Creates a new `SelfCell` which may fail to construct.
    ///
    /// Same contract as [`SelfCell::new`].
    #[inline]
    pub fn try_new<E, F>(owner: O, derive: F) -> Result<Self, E>
    where
        F: FnOnce(*const <O as Deref>::Target) -> Result<T, E>,
    {
        let derived = derive(owner.deref() as *const _)?;
        Ok(SelfCell { owner, derived })
    }

    /// Returns a reference to the owner of this cell.
    #[inline(always)]
    pub fn owner(&self) -> &O {
        &self.owner
    }

    /// Returns a safe reference to the derived object.
    #[inline(always)]
    pub fn get(&'slf self) -> &<T as AsSelf<'slf>>::Ref {
        self.derived.as_self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Parsed<'a>(&'a [u8]);

    impl<'slf> AsSelf<'slf> for Parsed<'_> {
        type Ref = Parsed<'slf>;

        fn as_self(&'slf self) -> &Self::Ref {
            self
        }
    }

    #[test]
    fn test_derive_from_owner() {
        let owner: Vec<u8> = b"payload".to_vec();
        let cell = SelfCell::new(owner, |data| Parsed(unsafe { &*data }));
        assert_eq!(cell.get().0, b"payload");
        assert_eq!(cell.owner().len(), 7);
    }

    #[test]
    fn test_try_new_propagates() {
        let owner: Vec<u8> = Vec::new();
        let result: Result<SelfCell<_, Parsed<'_>>, &str> =
            SelfCell::try_new(owner, |_| Err("empty"));
        assert!(result.is_err());
    }
}
