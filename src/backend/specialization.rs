// Specialization constants
//
// SpecializationData owns both halves of a VkSpecializationInfo (map
// entries and the raw byte store). The info struct handed to the driver
// only borrows them.

use ash::vk;

#[derive(Debug, Clone, Default)]
pub struct SpecializationData {
    pub entries: Vec<vk::SpecializationMapEntry>,
    pub data: Vec<u8>,
}

impl SpecializationData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the entries and bytes a raw info struct points at.
    ///
    /// # Safety
    /// `info.p_map_entries` must point at `map_entry_count` entries and
    /// `info.p_data` at `data_size` bytes (either may be null when its
    /// count is zero).
    pub unsafe fn from_raw(info: &vk::SpecializationInfo) -> Self {
        let entries = if info.map_entry_count == 0 || info.p_map_entries.is_null() {
            Vec::new()
        } else {
            std::slice::from_raw_parts(info.p_map_entries, info.map_entry_count as usize).to_vec()
        };
        let data = if info.data_size == 0 || info.p_data.is_null() {
            Vec::new()
        } else {
            std::slice::from_raw_parts(info.p_data.cast::<u8>(), info.data_size).to_vec()
        };
        Self { entries, data }
    }

    /// Append a constant with the given raw bytes.
    ///
    /// # Panics
    /// If the byte store already holds more than `u32::MAX` bytes.
    pub fn push_bytes(&mut self, constant_id: u32, bytes: &[u8]) -> &mut Self {
        self.entries.push(vk::SpecializationMapEntry {
            constant_id,
            offset: offset_u32(self.data.len(), 0),
            size: bytes.len(),
        });
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn push_u32(&mut self, constant_id: u32, value: u32) -> &mut Self {
        self.push_bytes(constant_id, &value.to_ne_bytes())
    }

    pub fn push_i32(&mut self, constant_id: u32, value: i32) -> &mut Self {
        self.push_bytes(constant_id, &value.to_ne_bytes())
    }

    pub fn push_f32(&mut self, constant_id: u32, value: f32) -> &mut Self {
        self.push_bytes(constant_id, &value.to_ne_bytes())
    }

    /// Booleans are 32-bit VkBool32 in SPIR-V specialization.
    pub fn push_bool(&mut self, constant_id: u32, value: bool) -> &mut Self {
        self.push_u32(constant_id, vk::Bool32::from(value))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrowed view for pipeline creation. Lives no longer than `self`.
    pub fn info(&self) -> vk::SpecializationInfoBuilder<'_> {
        vk::SpecializationInfo::builder()
            .map_entries(&self.entries)
            .data(&self.data)
    }

    /// A's entries and bytes followed by B's, with B's offsets moved past A's bytes.
    ///
    /// Constant ids are not checked for collisions.
    ///
    /// # Panics
    /// If a rebased offset does not fit in `u32`, the width of
    /// `VkSpecializationMapEntry::offset`.
    pub fn concat(a: &SpecializationData, b: &SpecializationData) -> SpecializationData {
        let shift = a.data.len();

        let mut entries = Vec::with_capacity(a.entries.len() + b.entries.len());
        entries.extend_from_slice(&a.entries);
        entries.extend(b.entries.iter().map(|entry| vk::SpecializationMapEntry {
            constant_id: entry.constant_id,
            offset: offset_u32(shift, entry.offset),
            size: entry.size,
        }));

        let mut data = Vec::with_capacity(a.data.len() + b.data.len());
        data.extend_from_slice(&a.data);
        data.extend_from_slice(&b.data);

        SpecializationData { entries, data }
    }
}

fn offset_u32(base: usize, offset: u32) -> u32 {
    u32::try_from(base)
        .ok()
        .and_then(|base| base.checked_add(offset))
        .unwrap_or_else(|| panic!("specialization offset {base} + {offset} overflows u32"))
}

/// Concatenate two raw specialization infos into owned storage.
///
/// Point a new `vk::SpecializationInfo` at the result with
/// [`SpecializationData::info`].
///
/// # Safety
/// Both infos must satisfy the contract of [`SpecializationData::from_raw`].
pub unsafe fn concat_specialization_info(
    a: &vk::SpecializationInfo,
    b: &vk::SpecializationInfo,
) -> SpecializationData {
    SpecializationData::concat(
        &SpecializationData::from_raw(a),
        &SpecializationData::from_raw(b),
    )
}
