//! Scoped ownership for operating-system handles.

use std::fmt;
use std::os::raw::c_void;
use std::sync::Arc;

/// The raw handle value as used by OS calls.
pub type RawHandle = *mut c_void;

const INVALID_HANDLE: RawHandle = usize::MAX as RawHandle;

/// An owned operating-system handle.
///
/// On construction the handle takes ownership of the raw value; when it is
/// dropped the handle is closed exactly once, on every exit path. Handles
/// are movable but not copyable. Use [`SharedHandle`] where several
/// components need to keep the same handle alive, such as a process handle
/// held jointly by the process model and the symbol engine.
///
/// Some OS interfaces hand out handles they close themselves, such as the
/// process and thread handles delivered with debug events. Wrap those with
/// [`Handle::borrowed`] so that dropping does not close them a second time.
pub struct Handle {
    raw: RawHandle,
    owned: bool,
}

impl Handle {
    /// Takes ownership of a raw handle value.
    ///
    /// # Safety
    ///
    /// The value must be a handle the caller owns, and nothing else may
    /// close it afterwards.
    pub unsafe fn from_raw(raw: RawHandle) -> Handle {
        Handle { raw, owned: true }
    }

    /// Wraps a raw handle owned by somebody else.
    ///
    /// Dropping the wrapper does not close the handle.
    ///
    /// # Safety
    ///
    /// The value must stay open for as long as the wrapper is used.
    pub unsafe fn borrowed(raw: RawHandle) -> Handle {
        Handle { raw, owned: false }
    }

    /// Returns the raw handle value without giving up ownership.
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    /// Returns `true` if the handle holds no usable OS resource.
    pub fn is_valid(&self) -> bool {
        !self.raw.is_null() && self.raw != INVALID_HANDLE
    }

    /// Converts this handle into a reference-counted [`SharedHandle`].
    pub fn into_shared(self) -> SharedHandle {
        SharedHandle {
            inner: Arc::new(self),
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.owned || !self.is_valid() {
            return;
        }

        #[cfg(windows)]
        unsafe {
            winapi::um::handleapi::CloseHandle(self.raw.cast());
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:p})", self.raw)
    }
}

/// A handle whose ownership is shared among cooperating components.
///
/// The underlying handle closes when the last clone is dropped.
#[derive(Clone, Debug)]
pub struct SharedHandle {
    inner: Arc<Handle>,
}

impl SharedHandle {
    /// Returns the raw handle value without affecting ownership.
    pub fn raw(&self) -> RawHandle {
        self.inner.raw()
    }

    /// Returns `true` if the handle holds no usable OS resource.
    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_values() {
        let null = unsafe { Handle::from_raw(std::ptr::null_mut()) };
        assert!(!null.is_valid());

        let invalid = unsafe { Handle::from_raw(INVALID_HANDLE) };
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_shared_clones_agree() {
        let handle = unsafe { Handle::from_raw(std::ptr::null_mut()) };
        let shared = handle.into_shared();
        let clone = shared.clone();
        assert_eq!(shared.raw(), clone.raw());
    }
}
