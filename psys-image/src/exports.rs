//! The lazy view over an image's export directory.

use std::borrow::Cow;

use scroll::{Pread, LE};

use crate::pe::{rva_to_offset, ExportRanges, Section};
use crate::symbols::read_c_str;

/// A view over the export directory's parallel tables.
///
/// The directory consists of an address table indexed by unbiased ordinal,
/// a name-pointer table, and an ordinal table mapping each name slot back
/// to an address-table index. Entries without a slot in the ordinal table
/// are exported by ordinal only.
#[derive(Clone, Debug)]
pub struct ExportView<'data> {
    data: &'data [u8],
    sections: Vec<Section>,
    functions: &'data [u8],
    name_rvas: &'data [u8],
    ordinals: &'data [u8],
    number_of_functions: u32,
    number_of_names: u32,
    ordinal_base: u32,
}

impl<'data> ExportView<'data> {
    pub(crate) fn new(data: &'data [u8], sections: &[Section], ranges: &ExportRanges) -> Self {
        ExportView {
            data,
            sections: sections.to_vec(),
            functions: &data[ranges.functions.clone()],
            name_rvas: &data[ranges.name_rvas.clone()],
            ordinals: &data[ranges.ordinals.clone()],
            number_of_functions: ranges.number_of_functions,
            number_of_names: ranges.number_of_names,
            ordinal_base: ranges.ordinal_base,
        }
    }

    /// The number of entries in the export address table.
    pub fn function_count(&self) -> u32 {
        self.number_of_functions
    }

    /// The ordinal bias declared by the directory.
    pub fn ordinal_base(&self) -> u32 {
        self.ordinal_base
    }

    /// Returns an iterator over all exported entries.
    pub fn iter(&self) -> ExportIter<'data, '_> {
        ExportIter {
            view: self,
            index: 0,
        }
    }

    /// Looks up the name slot for an unbiased ordinal, if one exists.
    fn name_for_index(&self, index: u32) -> Option<Cow<'data, str>> {
        for slot in 0..self.number_of_names as usize {
            let ordinal: u16 = self.ordinals.pread_with(slot * 2, LE).ok()?;
            if ordinal as u32 != index {
                continue;
            }

            let name_rva: u32 = self.name_rvas.pread_with(slot * 4, LE).ok()?;
            let offset = rva_to_offset(&self.sections, name_rva)?;
            return Some(read_c_str(self.data, offset));
        }

        None
    }
}

/// One entry of the export directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Export<'data> {
    /// The unbiased index into the export address table.
    pub index: u32,
    /// The RVA of the exported code or data.
    pub address_rva: u32,
    /// The export name, absent for ordinal-only exports.
    pub name: Option<Cow<'data, str>>,
}

impl Export<'_> {
    /// The biased ordinal as seen by imports.
    pub fn ordinal(&self, base: u32) -> u32 {
        base + self.index
    }
}

/// An iterator over the entries of an [`ExportView`].
pub struct ExportIter<'data, 'view> {
    view: &'view ExportView<'data>,
    index: u32,
}

impl<'data> Iterator for ExportIter<'data, '_> {
    type Item = Export<'data>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.view.number_of_functions {
            return None;
        }

        let index = self.index;
        self.index += 1;

        let address_rva: u32 = self
            .view
            .functions
            .pread_with(index as usize * 4, LE)
            .ok()?;

        Some(Export {
            index,
            address_rva,
            name: self.view.name_for_index(index),
        })
    }
}
