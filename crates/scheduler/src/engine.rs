//! Engine capability masks and queue-family mapping.
//!
//! An *engine* is a bitmask over the operation classes a queue family can
//! execute. Processes declare the engines they need; queue families advertise
//! the engines they have; a family can run a process iff its mask is a
//! superset of the process's mask.
//!
//! The device resolves every possible mask (16 combinations) to the family
//! with the *fewest* capabilities that still supports it, so transfer-only
//! work lands on a DMA family instead of hogging the graphics family.

use ash::vk;
use bitflags::bitflags;

bitflags! {
    /// Operation classes a queue family can execute.
    ///
    /// Combined masks describe both what a process requires and what a
    /// command-list manager supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EngineType: u32 {
        /// Copy and upload operations.
        const TRANSFER = 1 << 0;
        /// Compute dispatches.
        const COMPUTE = 1 << 1;
        /// Rasterization and render passes.
        const GRAPHICS = 1 << 2;
        /// Ray-tracing pipelines.
        const RAYTRACING = 1 << 3;
    }
}

/// Number of distinct engine masks (all subsets of the four engines).
pub const ENGINE_MASK_COUNT: usize = 16;

impl EngineType {
    /// Whether a manager or family with this mask can serve `required`.
    #[inline]
    pub fn supports(self, required: EngineType) -> bool {
        self.contains(required)
    }
}

/// Derives the engine capabilities of a queue family from its Vulkan flags.
///
/// Ray tracing rides on graphics queues, so any graphics-capable family also
/// reports the raytracing engine.
pub(crate) fn engines_from_queue_flags(flags: vk::QueueFlags) -> EngineType {
    let mut engines = EngineType::empty();
    if flags.contains(vk::QueueFlags::TRANSFER) {
        engines |= EngineType::TRANSFER;
    }
    if flags.contains(vk::QueueFlags::COMPUTE) {
        engines |= EngineType::COMPUTE;
    }
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        engines |= EngineType::GRAPHICS | EngineType::RAYTRACING;
    }
    engines
}

/// Resolves every engine mask to its serving queue family.
///
/// For each of the 16 masks, picks the family whose capability set is the
/// smallest superset of the mask (fewest set bits), ties broken by smallest
/// family index. `None` means no family supports the mask on this device.
pub(crate) fn resolve_engine_mapping(
    families: &[EngineType],
) -> [Option<usize>; ENGINE_MASK_COUNT] {
    let mut mapping = [None; ENGINE_MASK_COUNT];

    for (mask_bits, entry) in mapping.iter_mut().enumerate() {
        let mask = EngineType::from_bits_truncate(mask_bits as u32);
        *entry = families
            .iter()
            .enumerate()
            .filter(|(_, capabilities)| capabilities.supports(mask))
            .min_by_key(|(index, capabilities)| (capabilities.bits().count_ones(), *index))
            .map(|(index, _)| index);
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_is_superset_check() {
        let graphics_family = EngineType::GRAPHICS | EngineType::COMPUTE | EngineType::TRANSFER;
        assert!(graphics_family.supports(EngineType::TRANSFER));
        assert!(graphics_family.supports(EngineType::COMPUTE | EngineType::TRANSFER));
        assert!(!graphics_family.supports(EngineType::RAYTRACING));
        assert!(EngineType::empty().supports(EngineType::empty()));
    }

    #[test]
    fn test_queue_flags_conversion() {
        let graphics = engines_from_queue_flags(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        );
        assert!(graphics.contains(EngineType::GRAPHICS));
        assert!(graphics.contains(EngineType::RAYTRACING));

        let transfer_only = engines_from_queue_flags(vk::QueueFlags::TRANSFER);
        assert_eq!(transfer_only, EngineType::TRANSFER);
    }

    #[test]
    fn test_mapping_prefers_minimal_family() {
        // Family 0: a do-everything graphics family; family 1: DMA only;
        // family 2: async compute.
        let families = [
            EngineType::GRAPHICS | EngineType::RAYTRACING | EngineType::COMPUTE | EngineType::TRANSFER,
            EngineType::TRANSFER,
            EngineType::COMPUTE | EngineType::TRANSFER,
        ];
        let mapping = resolve_engine_mapping(&families);

        assert_eq!(mapping[EngineType::TRANSFER.bits() as usize], Some(1));
        assert_eq!(mapping[EngineType::COMPUTE.bits() as usize], Some(2));
        assert_eq!(
            mapping[(EngineType::COMPUTE | EngineType::TRANSFER).bits() as usize],
            Some(2)
        );
        assert_eq!(mapping[EngineType::GRAPHICS.bits() as usize], Some(0));
        assert_eq!(mapping[EngineType::RAYTRACING.bits() as usize], Some(0));
    }

    #[test]
    fn test_mapping_breaks_ties_by_lowest_index() {
        let families = [
            EngineType::COMPUTE | EngineType::TRANSFER,
            EngineType::COMPUTE | EngineType::TRANSFER,
        ];
        let mapping = resolve_engine_mapping(&families);
        assert_eq!(mapping[EngineType::COMPUTE.bits() as usize], Some(0));
    }

    #[test]
    fn test_mapping_rejects_unsupported_masks() {
        let families = [EngineType::TRANSFER];
        let mapping = resolve_engine_mapping(&families);
        assert_eq!(mapping[EngineType::GRAPHICS.bits() as usize], None);
        assert_eq!(
            mapping[(EngineType::GRAPHICS | EngineType::TRANSFER).bits() as usize],
            None
        );
    }

    #[test]
    fn test_empty_mask_maps_to_smallest_family() {
        let families = [
            EngineType::GRAPHICS | EngineType::COMPUTE | EngineType::TRANSFER,
            EngineType::TRANSFER,
        ];
        let mapping = resolve_engine_mapping(&families);
        // Every family supports the empty mask; the leanest one wins.
        assert_eq!(mapping[0], Some(1));
    }
}
