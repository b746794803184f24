//! Live symbol resolution for a debugged process.

use tracing::debug;

use psys_common::{Addr, Symbol};
use psys_image::resolve;

use crate::error::DebugError;
use crate::model::Process;

/// A source file and line resolved for a code address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    /// The source file path.
    pub file: String,
    /// The 1-based line number.
    pub line: u32,
}

/// The in-memory debug-info service attached to a live process.
///
/// Backed by the platform's debug-help library when available. A miss is
/// `Ok(None)`; errors are reserved for the service itself failing.
pub trait SymbolService {
    /// Finds the symbol covering `addr`, if the service knows one.
    fn find_symbol(&self, addr: Addr) -> Result<Option<Symbol>, DebugError>;

    /// Finds the source location for `addr`, if line info is available.
    fn find_line(&self, _addr: Addr) -> Result<Option<SourceLocation>, DebugError> {
        Ok(None)
    }
}

/// Resolves code addresses against a service plus on-disk image fallback.
///
/// The in-memory service is consulted first. When it misses and image
/// scanning is enabled, the module containing the address is mapped from
/// disk and its embedded symbol table and export directory are searched.
pub struct SymbolEngine<S> {
    service: S,
    scan_images: bool,
}

impl<S: SymbolService> SymbolEngine<S> {
    /// Creates an engine over the given service, without image scanning.
    pub fn new(service: S) -> Self {
        SymbolEngine {
            service,
            scan_images: false,
        }
    }

    /// Enables or disables the on-disk image fallback.
    pub fn with_image_scan(mut self, enabled: bool) -> Self {
        self.scan_images = enabled;
        self
    }

    /// Finds the best symbol for an address in the process.
    pub fn find_symbol(&self, process: &Process, addr: Addr) -> Option<Symbol> {
        match self.service.find_symbol(addr) {
            Ok(Some(symbol)) => return Some(symbol),
            Ok(None) => {}
            Err(err) => debug!(%addr, "symbol service failed: {err}"),
        }

        if !self.scan_images {
            return None;
        }

        let module = process.module_at(addr)?;
        let image = match module.load_image() {
            Ok(image) => image,
            Err(err) => {
                debug!(module = %module.name(), "image scan failed: {err}");
                return None;
            }
        };

        resolve::find_nearest_symbol(&image, addr)
    }

    /// Finds the source location for an address, when available.
    pub fn find_line(&self, addr: Addr) -> Option<SourceLocation> {
        self.service.find_line(addr).ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use psys_common::{ProcessId, ThreadId};

    use similar_asserts::assert_eq;

    struct MapService(Vec<(u64, &'static str)>);

    impl SymbolService for MapService {
        fn find_symbol(&self, addr: Addr) -> Result<Option<Symbol>, DebugError> {
            Ok(self
                .0
                .iter()
                .filter(|&&(start, _)| Addr(start) <= addr)
                .max_by_key(|&&(start, _)| start)
                .map(|&(start, name)| Symbol::new(Addr(start), addr.get() - start, name)))
        }
    }

    fn empty_process() -> Process {
        let handle = unsafe { psys_common::Handle::from_raw(std::ptr::null_mut()) }.into_shared();
        Process::new(ProcessId(1), handle, ThreadId(1))
    }

    #[test]
    fn test_service_hit() {
        let engine = SymbolEngine::new(MapService(vec![(0x7FFE1A2B3C33, "BaseThreadInitThunk")]));
        let process = empty_process();

        let symbol = engine
            .find_symbol(&process, Addr(0x7FFE1A2B3C40))
            .unwrap();
        assert_eq!(symbol.name(), "BaseThreadInitThunk");
        assert_eq!(symbol.code_offset(), 0xD);
    }

    #[test]
    fn test_service_miss_without_scan() {
        let engine = SymbolEngine::new(MapService(vec![]));
        let process = empty_process();

        assert_eq!(engine.find_symbol(&process, Addr(0x1000)), None);
    }

    #[test]
    fn test_service_miss_with_scan_but_no_module() {
        let engine = SymbolEngine::new(MapService(vec![])).with_image_scan(true);
        let process = empty_process();

        assert_eq!(engine.find_symbol(&process, Addr(0x1000)), None);
    }
}
