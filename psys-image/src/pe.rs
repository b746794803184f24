//! Parsing for Portable Executable images, an extension of COFF.

use std::borrow::Cow;
use std::ops::Range;

use scroll::{Pread, LE};

use psys_common::{Addr, AsSelf};

use crate::error::ImageError;
use crate::exports::ExportView;
use crate::symbols::SymbolView;

pub(crate) const DOS_MAGIC: u16 = 0x5A4D;
pub(crate) const PE_SIGNATURE: u32 = 0x0000_4550;

const OPTIONAL_MAGIC_PE32: u16 = 0x10B;
const OPTIONAL_MAGIC_PE64: u16 = 0x20B;

const COFF_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
pub(crate) const SYMBOL_RECORD_SIZE: usize = 18;
const EXPORT_DIRECTORY_SIZE: usize = 40;

/// The COFF file header.
#[derive(Clone, Copy, Debug)]
pub struct CoffHeader {
    /// The target machine type.
    pub machine: u16,
    /// Number of entries in the section table.
    pub number_of_sections: u16,
    /// Link time, seconds since the epoch.
    pub time_date_stamp: u32,
    /// File offset of the COFF symbol table, zero if absent.
    pub pointer_to_symbol_table: u32,
    /// Number of records in the symbol table, auxiliary records included.
    pub number_of_symbols: u32,
    /// Size of the optional header in bytes.
    pub size_of_optional_header: u16,
    /// Image characteristic flags.
    pub characteristics: u16,
}

/// An entry of the optional header's data directory table.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataDirectory {
    /// RVA of the directory payload.
    pub rva: u32,
    /// Size of the directory payload in bytes.
    pub size: u32,
}

/// The optional header, present in linked images.
#[derive(Clone, Copy, Debug)]
pub struct OptionalHeader {
    /// `0x10B` for PE32, `0x20B` for PE32+.
    pub magic: u16,
    /// The address at which the image prefers to be loaded.
    pub image_base: u64,
    /// The size of the loaded image in memory.
    pub size_of_image: u32,
    /// The export data directory, if the directory table declares one.
    pub export_directory: Option<DataDirectory>,
}

/// A section table entry.
#[derive(Clone, Debug)]
pub struct Section {
    name: [u8; 8],
    /// Size of the section when loaded, may exceed the raw data size.
    pub virtual_size: u32,
    /// RVA of the section when loaded.
    pub virtual_address: u32,
    /// Size of the section's initialized data on disk.
    pub size_of_raw_data: u32,
    /// File offset of the section's raw data.
    pub pointer_to_raw_data: u32,
}

impl Section {
    /// The section name with trailing padding removed.
    pub fn name(&self) -> Cow<'_, str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end])
    }

    fn contains_rva(&self, rva: u32) -> bool {
        let size = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && (rva - self.virtual_address) < size
    }
}

/// Translates an RVA to a file offset through the section table.
///
/// RVAs below the first section fall into the header region, where file
/// offsets and virtual addresses coincide.
pub(crate) fn rva_to_offset(sections: &[Section], rva: u32) -> Option<usize> {
    for section in sections {
        if section.contains_rva(rva) {
            let delta = rva - section.virtual_address;
            return Some(section.pointer_to_raw_data as usize + delta as usize);
        }
    }

    match sections.iter().map(|s| s.virtual_address).min() {
        Some(first) if rva < first => Some(rva as usize),
        None => Some(rva as usize),
        _ => None,
    }
}

pub(crate) struct SymbolTableRanges {
    pub records: Range<usize>,
    pub strings: Range<usize>,
}

pub(crate) struct ExportRanges {
    pub functions: Range<usize>,
    pub name_rvas: Range<usize>,
    pub ordinals: Range<usize>,
    pub number_of_functions: u32,
    pub number_of_names: u32,
    pub ordinal_base: u32,
}

/// A parsed Portable Executable image.
///
/// The image borrows the raw file data for its whole lifetime; all table
/// locations are validated once at parse time so that the lazy views handed
/// out later cannot read out of bounds.
pub struct PeImage<'data> {
    data: &'data [u8],
    coff: CoffHeader,
    optional: Option<OptionalHeader>,
    sections: Vec<Section>,
    symtab: Option<SymbolTableRanges>,
    exports: Option<ExportRanges>,
}

impl<'data> PeImage<'data> {
    /// Tests whether the buffer could contain a PE image.
    pub fn test(data: &[u8]) -> bool {
        matches!(
            data.pread_with::<u16>(0, LE).ok(),
            Some(magic) if magic == DOS_MAGIC
        )
    }

    /// Tries to parse a PE image from the given slice.
    pub fn parse(data: &'data [u8]) -> Result<Self, ImageError> {
        let dos_magic: u16 = data
            .pread_with(0, LE)
            .map_err(|_| ImageError::Truncated("DOS header"))?;
        if dos_magic != DOS_MAGIC {
            return Err(ImageError::Malformed("missing MZ signature"));
        }

        let e_lfanew: u32 = data
            .pread_with(0x3C, LE)
            .map_err(|_| ImageError::Truncated("DOS header"))?;
        let pe_offset = e_lfanew as usize;

        let signature: u32 = data
            .pread_with(pe_offset, LE)
            .map_err(|_| ImageError::Truncated("PE signature"))?;
        if signature != PE_SIGNATURE {
            return Err(ImageError::Malformed("missing PE signature"));
        }

        let coff_offset = pe_offset + 4;
        let coff = Self::parse_coff(data, coff_offset)?;

        let optional_offset = coff_offset + COFF_HEADER_SIZE;
        let optional = if coff.size_of_optional_header > 0 {
            Some(Self::parse_optional(
                data,
                optional_offset,
                coff.size_of_optional_header as usize,
            )?)
        } else {
            None
        };

        let section_offset = optional_offset + coff.size_of_optional_header as usize;
        let sections = Self::parse_sections(data, section_offset, coff.number_of_sections)?;

        let symtab = Self::locate_symbol_table(data, &coff)?;
        let exports = match optional.and_then(|opt| opt.export_directory) {
            Some(dir) => Some(Self::locate_exports(data, &sections, dir)?),
            None => None,
        };

        Ok(PeImage {
            data,
            coff,
            optional,
            sections,
            symtab,
            exports,
        })
    }

    fn parse_coff(data: &[u8], offset: usize) -> Result<CoffHeader, ImageError> {
        let err = |_| ImageError::Truncated("COFF file header");
        Ok(CoffHeader {
            machine: data.pread_with(offset, LE).map_err(err)?,
            number_of_sections: data.pread_with(offset + 2, LE).map_err(err)?,
            time_date_stamp: data.pread_with(offset + 4, LE).map_err(err)?,
            pointer_to_symbol_table: data.pread_with(offset + 8, LE).map_err(err)?,
            number_of_symbols: data.pread_with(offset + 12, LE).map_err(err)?,
            size_of_optional_header: data.pread_with(offset + 16, LE).map_err(err)?,
            characteristics: data.pread_with(offset + 18, LE).map_err(err)?,
        })
    }

    fn parse_optional(
        data: &[u8],
        offset: usize,
        size: usize,
    ) -> Result<OptionalHeader, ImageError> {
        let err = |_| ImageError::Truncated("optional header");
        let magic: u16 = data.pread_with(offset, LE).map_err(err)?;

        let (image_base, directories_offset) = match magic {
            OPTIONAL_MAGIC_PE64 => {
                let base: u64 = data.pread_with(offset + 24, LE).map_err(err)?;
                (base, 112)
            }
            OPTIONAL_MAGIC_PE32 => {
                let base: u32 = data.pread_with(offset + 28, LE).map_err(err)?;
                (base as u64, 96)
            }
            _ => return Err(ImageError::Malformed("unknown optional header magic")),
        };

        let size_of_image: u32 = data.pread_with(offset + 56, LE).map_err(err)?;
        let number_of_directories: u32 =
            data.pread_with(offset + directories_offset - 4, LE).map_err(err)?;

        // Directory 0 is the export table. Respect both the declared
        // directory count and the optional header size.
        let export_directory = if number_of_directories > 0 && size >= directories_offset + 8 {
            let rva: u32 = data
                .pread_with(offset + directories_offset, LE)
                .map_err(err)?;
            let dir_size: u32 = data
                .pread_with(offset + directories_offset + 4, LE)
                .map_err(err)?;
            if rva != 0 && dir_size != 0 {
                Some(DataDirectory {
                    rva,
                    size: dir_size,
                })
            } else {
                None
            }
        } else {
            None
        };

        Ok(OptionalHeader {
            magic,
            image_base,
            size_of_image,
            export_directory,
        })
    }

    fn parse_sections(
        data: &[u8],
        offset: usize,
        count: u16,
    ) -> Result<Vec<Section>, ImageError> {
        let err = |_| ImageError::Truncated("section table");
        let mut sections = Vec::with_capacity(count as usize);

        for index in 0..count as usize {
            let base = offset + index * SECTION_HEADER_SIZE;
            let mut name = [0u8; 8];
            let raw: &[u8] = data
                .get(base..base + 8)
                .ok_or(ImageError::Truncated("section table"))?;
            name.copy_from_slice(raw);

            sections.push(Section {
                name,
                virtual_size: data.pread_with(base + 8, LE).map_err(err)?,
                virtual_address: data.pread_with(base + 12, LE).map_err(err)?,
                size_of_raw_data: data.pread_with(base + 16, LE).map_err(err)?,
                pointer_to_raw_data: data.pread_with(base + 20, LE).map_err(err)?,
            });
        }

        Ok(sections)
    }

    fn locate_symbol_table(
        data: &[u8],
        coff: &CoffHeader,
    ) -> Result<Option<SymbolTableRanges>, ImageError> {
        if coff.pointer_to_symbol_table == 0 || coff.number_of_symbols == 0 {
            return Ok(None);
        }

        let start = coff.pointer_to_symbol_table as usize;
        let len = coff.number_of_symbols as usize * SYMBOL_RECORD_SIZE;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= data.len())
            .ok_or(ImageError::Truncated("symbol table"))?;

        // The string table sits immediately after the symbol table. Its
        // first word is its own total size, including the length field.
        let strings = match data.pread_with::<u32>(end, LE) {
            Ok(size) if size as usize >= 4 => {
                let str_end = end
                    .checked_add(size as usize)
                    .filter(|&e| e <= data.len())
                    .ok_or(ImageError::Truncated("string table"))?;
                end..str_end
            }
            _ => end..end,
        };

        Ok(Some(SymbolTableRanges {
            records: start..end,
            strings,
        }))
    }

    fn locate_exports(
        data: &[u8],
        sections: &[Section],
        dir: DataDirectory,
    ) -> Result<ExportRanges, ImageError> {
        let err = |_| ImageError::Truncated("export directory");
        let offset = rva_to_offset(sections, dir.rva)
            .filter(|&o| o + EXPORT_DIRECTORY_SIZE <= data.len())
            .ok_or(ImageError::Malformed("export directory outside sections"))?;

        let ordinal_base: u32 = data.pread_with(offset + 16, LE).map_err(err)?;
        let number_of_functions: u32 = data.pread_with(offset + 20, LE).map_err(err)?;
        let number_of_names: u32 = data.pread_with(offset + 24, LE).map_err(err)?;
        let address_of_functions: u32 = data.pread_with(offset + 28, LE).map_err(err)?;
        let address_of_names: u32 = data.pread_with(offset + 32, LE).map_err(err)?;
        let address_of_ordinals: u32 = data.pread_with(offset + 36, LE).map_err(err)?;

        let table = |rva: u32, entry_size: usize, count: u32, what: &'static str| {
            let start = rva_to_offset(sections, rva).ok_or(ImageError::Malformed(what))?;
            let end = start
                .checked_add(entry_size * count as usize)
                .filter(|&end| end <= data.len())
                .ok_or(ImageError::Truncated(what))?;
            Ok::<_, ImageError>(start..end)
        };

        Ok(ExportRanges {
            functions: table(address_of_functions, 4, number_of_functions, "export address table")?,
            name_rvas: table(address_of_names, 4, number_of_names, "export name table")?,
            ordinals: table(address_of_ordinals, 2, number_of_names, "export ordinal table")?,
            number_of_functions,
            number_of_names,
            ordinal_base,
        })
    }

    /// The raw data of the image file.
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    /// The COFF file header.
    pub fn coff_header(&self) -> &CoffHeader {
        &self.coff
    }

    /// The optional header, absent in plain object files.
    pub fn optional_header(&self) -> Option<&OptionalHeader> {
        self.optional.as_ref()
    }

    /// The section table.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The address at which the image prefers to be loaded into memory.
    ///
    /// Used as the module base when the caller does not supply an explicit
    /// one. Object files without an optional header prefer the null base.
    pub fn preferred_base(&self) -> Addr {
        Addr(self.optional.map(|opt| opt.image_base).unwrap_or(0))
    }

    /// The size of the loaded image, when the optional header declares one.
    pub fn size_of_image(&self) -> Option<u32> {
        self.optional.map(|opt| opt.size_of_image)
    }

    /// Returns a view over the COFF symbol table, if the image has one.
    pub fn symbol_view(&self) -> Option<SymbolView<'data>> {
        let ranges = self.symtab.as_ref()?;
        Some(SymbolView::new(
            &self.data[ranges.records.clone()],
            self.coff.number_of_symbols,
            &self.data[ranges.strings.clone()],
        ))
    }

    /// Returns a view over the export directory, if the image has one.
    pub fn export_view(&self) -> Option<ExportView<'data>> {
        let ranges = self.exports.as_ref()?;
        Some(ExportView::new(self.data, &self.sections, ranges))
    }
}

impl<'slf, 'data: 'slf> AsSelf<'slf> for PeImage<'data> {
    type Ref = PeImage<'slf>;

    fn as_self(&'slf self) -> &Self::Ref {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_garbage() {
        assert!(!PeImage::test(b"EL"));
        assert!(matches!(
            PeImage::parse(b"ELF0000000"),
            Err(ImageError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_truncated() {
        assert!(matches!(
            PeImage::parse(b"MZ"),
            Err(ImageError::Truncated(_))
        ));
    }

    #[test]
    fn test_rva_translation() {
        let sections = vec![Section {
            name: *b".text\0\0\0",
            virtual_size: 0x1000,
            virtual_address: 0x1000,
            size_of_raw_data: 0x200,
            pointer_to_raw_data: 0x400,
        }];

        assert_eq!(rva_to_offset(&sections, 0x1010), Some(0x410));
        // Header region maps one to one.
        assert_eq!(rva_to_offset(&sections, 0x80), Some(0x80));
        assert_eq!(rva_to_offset(&sections, 0x4000), None);
    }
}
