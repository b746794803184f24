//! Error types for the debugging engine.

use thiserror::Error;

/// An error produced while debugging a target process.
#[derive(Debug, Error)]
pub enum DebugError {
    /// An OS debugging call failed; carries the native error code.
    #[error("{context} failed with OS error {code}")]
    Os {
        /// The native error code reported by the OS.
        code: i32,
        /// The call that failed.
        context: &'static str,
    },

    /// The platform provides no user-mode debugging interface.
    #[error("user-mode debugging is not supported on this platform")]
    Unsupported,

    /// The target went away while we were still attaching to it.
    #[error("target process exited before the debugger became ready")]
    TargetExited,

    /// An internal contract was violated.
    #[error("missing {0} in the debug model")]
    MissingState(&'static str),
}

impl DebugError {
    /// Creates an OS error from the calling thread's last error value.
    #[cfg(windows)]
    pub(crate) fn last_os(context: &'static str) -> Self {
        let code = unsafe { winapi::um::errhandlingapi::GetLastError() } as i32;
        DebugError::Os { code, context }
    }

    /// The native OS error code, if this is an OS error.
    pub fn os_code(&self) -> Option<i32> {
        match *self {
            DebugError::Os { code, .. } => Some(code),
            _ => None,
        }
    }
}
