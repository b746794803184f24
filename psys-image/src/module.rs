//! Binds an image file on disk to a runtime base address.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use psys_common::{Addr, ByteView, SelfCell};

use crate::error::ImageError;
use crate::exports::ExportView;
use crate::pe::PeImage;
use crate::symbols::SymbolView;

/// An executable image mapped from disk, bound to a runtime base address.
///
/// The module owns the file mapping and the parsed image together; the
/// symbol and export views it hands out borrow from the mapping and cannot
/// outlive the module. The runtime base covers images loaded at a
/// relocated address; without an explicit base the image's preferred base
/// is used.
pub struct ImageModule<'data> {
    path: PathBuf,
    base: Addr,
    cell: SelfCell<ByteView<'data>, PeImage<'data>>,
}

impl<'data> ImageModule<'data> {
    /// Maps the file at `path` and parses it as a PE image.
    pub fn open<P: AsRef<Path>>(path: P, base: Option<Addr>) -> Result<Self, ImageError> {
        let view = ByteView::open(path.as_ref())?;
        Self::from_view(view, path.as_ref().to_path_buf(), base)
    }

    /// Parses an already mapped byte view.
    pub fn from_view(
        view: ByteView<'data>,
        path: PathBuf,
        base: Option<Addr>,
    ) -> Result<Self, ImageError> {
        let cell = SelfCell::try_new(view, |data| PeImage::parse(unsafe { &*data }))?;
        let base = base.unwrap_or_else(|| cell.get().preferred_base());

        Ok(ImageModule { path, base, cell })
    }

    /// The path the image was mapped from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The base address used for symbol address computation.
    pub fn base(&self) -> Addr {
        self.base
    }

    /// The parsed image.
    pub fn image(&self) -> &PeImage<'_> {
        self.cell.get()
    }

    /// Returns the symbol-table view, or `None` if the image has none.
    pub fn symbol_view(&self) -> Option<SymbolView<'_>> {
        self.cell.get().symbol_view()
    }

    /// Returns the export-directory view, or `None` if the image has none.
    pub fn export_view(&self) -> Option<ExportView<'_>> {
        self.cell.get().export_view()
    }

    /// Writes a fixed-format summary of the module to `writer`.
    pub fn dump_module_info<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let image = self.cell.get();
        let coff = image.coff_header();

        writeln!(writer, "File:            {}", self.path.display())?;
        writeln!(writer, "Machine:         0x{:04X}", coff.machine)?;
        writeln!(writer, "Preferred base:  {}", image.preferred_base())?;
        writeln!(writer, "Runtime base:    {}", self.base)?;
        writeln!(writer, "Sections:        {}", coff.number_of_sections)?;
        writeln!(writer, "Symbol records:  {}", coff.number_of_symbols)?;
        writeln!(
            writer,
            "Exports:         {}",
            if image.export_view().is_some() {
                "yes"
            } else {
                "no"
            }
        )
    }

    /// Lists every function symbol and named export with its address.
    pub fn dump_symbols<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        if let Some(view) = self.symbol_view() {
            for sym in view.iter() {
                if sym.value == 0 || !sym.is_function() {
                    continue;
                }
                let address = self.base + sym.value as u64;
                writeln!(writer, "RVA: {} - {}", address, sym.name())?;
            }
        }

        writeln!(writer, "--- EXPORTS ---")?;
        if let Some(view) = self.export_view() {
            for export in view.iter() {
                if let Some(name) = export.name {
                    writeln!(writer, "RVA: {} - {}", Addr(export.address_rva as u64), name)?;
                }
            }
        }

        Ok(())
    }
}
