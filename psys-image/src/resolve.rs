//! Nearest-symbol lookup against an image's embedded tables.
//!
//! Two sources are searched independently: the COFF debug symbol table and
//! the export directory. Both keep the candidate with the greatest start
//! address at or below the queried address; ties go to the record seen
//! first. When both sources produce a candidate, the one starting closer to
//! the queried address wins, and debug symbols win exact ties.

use psys_common::{Addr, Symbol};

use crate::module::ImageModule;

/// Searches the image's debug symbol table for the closest function symbol.
///
/// Records with a zero value and records whose type does not encode a
/// function are skipped.
pub fn find_debug_symbol(module: &ImageModule<'_>, addr: Addr) -> Option<Symbol> {
    let view = module.symbol_view()?;
    let base = module.base();

    let mut nearest: Option<(Addr, String)> = None;
    for sym in view.iter() {
        if sym.value == 0 || !sym.is_function() {
            continue;
        }

        let sym_addr = base + sym.value as u64;
        if sym_addr > addr {
            continue;
        }

        if sym_addr == addr {
            // An exact match; we're done.
            nearest = Some((sym_addr, sym.name().into_owned()));
            break;
        }

        match nearest {
            Some((best, _)) if sym_addr <= best => {}
            _ => nearest = Some((sym_addr, sym.name().into_owned())),
        }
    }

    nearest.map(|(sym_addr, name)| Symbol::new(sym_addr, addr.get() - sym_addr.get(), name))
}

/// Searches the image's export directory for the closest named export.
///
/// Ordinal-only exports are skipped. On duplicate addresses with different
/// names, the first one seen is kept.
pub fn find_export_symbol(module: &ImageModule<'_>, addr: Addr) -> Option<Symbol> {
    let view = module.export_view()?;
    let base = module.base();

    let mut nearest: Option<(Addr, String)> = None;
    for export in view.iter() {
        let name = match export.name {
            Some(name) => name,
            None => continue,
        };

        let export_addr = base + export.address_rva as u64;
        if export_addr > addr {
            continue;
        }

        if export_addr == addr {
            nearest = Some((export_addr, name.into_owned()));
            break;
        }

        match nearest {
            Some((best, _)) if export_addr <= best => {}
            _ => nearest = Some((export_addr, name.into_owned())),
        }
    }

    nearest.map(|(export_addr, name)| {
        Symbol::new(export_addr, addr.get() - export_addr.get(), name)
    })
}

/// Finds the best symbol for an address from both in-image sources.
///
/// The candidate with the smaller displacement wins; debug symbols win
/// ties.
pub fn find_nearest_symbol(module: &ImageModule<'_>, addr: Addr) -> Option<Symbol> {
    let debug_sym = find_debug_symbol(module, addr);
    let export_sym = find_export_symbol(module, addr);

    match (debug_sym, export_sym) {
        (Some(debug_sym), Some(export_sym)) => {
            if debug_sym.code_offset() <= export_sym.code_offset() {
                Some(debug_sym)
            } else {
                Some(export_sym)
            }
        }
        (debug_sym, export_sym) => debug_sym.or(export_sym),
    }
}
