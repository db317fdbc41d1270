//! The guest address space: a region map plus a lazily committed backing
//! store.
//!
//! Grounded on `VMMemoryManager`: the region map (`BTreeMap` standing in
//! for the reference's `std::map<uint64_t, MemoryInfo>`), the
//! allocate/free/query verbs, and the `Reclaim`/`Split`/`Merge` algorithms
//! are carried over essentially unchanged. One real deviation: the
//! reference reserves guest address space with `VirtualAlloc(MEM_RESERVE)`
//! and commits pages from a hardware `SEH_Pagefault` handler. Safe Rust has
//! no portable equivalent, so the backing store here is a single eagerly
//! allocated `Vec<u8>` the size of the whole address space, and "lazy
//! commit" is tracked purely in [`GuestMemory::commit_bitmap`] for
//! bookkeeping parity with the original (what `Free` clears, what a future
//! `Query` could report as committed) rather than to avoid touching
//! physical memory. A [`PageFaultHook`] is still exposed so an embedder
//! that wants real sparse semantics (e.g. to cap peak RSS) can veto a
//! commit before it happens.

use std::collections::BTreeMap;

use crate::bitmap::Bitmap;
use crate::consts::{PAGE_SHIFT, PAGE_SIZE};
use crate::error::{HostError, HostResult};

/// The purpose a mapped region of guest memory currently serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Not currently allocated to anything; available for [`GuestMemory::allocate`].
    Freed,
    Data,
    Stack,
    Bytecode,
    /// Embedder-defined region, tagged with an embedder-chosen id.
    UserDefined(u32),
    /// Returned by [`GuestMemory::query`] for an address the map has no
    /// opinion about (should not occur for addresses inside the space).
    Unspecified,
}

const USER_DEFINED_RANGE_START: u32 = 0x8000_0000;
const USER_DEFINED_RANGE_END: u32 = 0xefff_ffff;

impl MemoryType {
    fn to_raw(self) -> u32 {
        match self {
            MemoryType::Freed => 0,
            MemoryType::Data => 1,
            MemoryType::Stack => 2,
            MemoryType::Bytecode => 3,
            MemoryType::UserDefined(tag) => tag.clamp(USER_DEFINED_RANGE_START, USER_DEFINED_RANGE_END),
            MemoryType::Unspecified => 0xffff_ffff,
        }
    }
}

/// Bit flags accepted by [`GuestMemory::allocate`] / the internal reclaim path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocateOptions {
    pub use_preferred_address: bool,
    pub use_preferred_memory_type: bool,
}

/// A single entry of the region map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub base: u64,
    pub size: u64,
    pub maximum_size: u64,
    pub tag: i64,
    pub ty: MemoryType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MemoryRange {
    base: u64,
    size: u64,
}

/// A hook an embedder can install to observe (and optionally refuse) page
/// commits as the guest touches freshly allocated memory.
pub trait PageFaultHook {
    /// Called before a page at `page_address` (already page-aligned) is
    /// committed. Returning `false` turns the access into
    /// [`HostError::PageCommitFailed`].
    fn on_commit(&mut self, page_address: u64) -> bool {
        let _ = page_address;
        true
    }
}

/// The default hook: every commit succeeds, matching the reference
/// implementation's unconditional `VirtualAlloc(MEM_COMMIT)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysCommit;

impl PageFaultHook for AlwaysCommit {}

/// The guest's flat, byte-addressable memory space.
pub struct GuestMemory<H: PageFaultHook = AlwaysCommit> {
    backing: Vec<u8>,
    region_map: BTreeMap<u64, MemoryInfo>,
    commit_bitmap: Bitmap,
    size: u64,
    hook: H,
}

fn round_up_to_block_size(value: u64) -> u64 {
    let page = PAGE_SIZE as u64;
    (value + page - 1) & !(page - 1)
}

fn round_down_to_block_size(value: u64) -> u64 {
    value & !((PAGE_SIZE as u64) - 1)
}

fn round_up_to_blocks(value: u64) -> u64 {
    round_up_to_block_size(value) >> PAGE_SHIFT
}

fn round_down_to_blocks(value: u64) -> u64 {
    value >> PAGE_SHIFT
}

impl GuestMemory<AlwaysCommit> {
    /// Creates a `size`-byte address space, entirely `Freed`.
    pub fn new(size: u64) -> Self {
        GuestMemory::with_hook(size, AlwaysCommit)
    }
}

impl<H: PageFaultHook> GuestMemory<H> {
    pub fn with_hook(size: u64, hook: H) -> Self {
        assert!(size > 0, "address space must be non-empty");
        let mut region_map = BTreeMap::new();
        region_map.insert(
            0,
            MemoryInfo { base: 0, size, maximum_size: size, tag: 0, ty: MemoryType::Freed },
        );
        let bit_count = round_up_to_blocks(size).max(1) as usize;
        GuestMemory {
            backing: vec![0u8; size as usize],
            region_map,
            commit_bitmap: Bitmap::new(bit_count),
            size,
            hook,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the host-addressable slice an access of `size` bytes at
    /// `address` would touch, without checking mapping state.
    fn host_range(&self, address: u64, size: u64) -> HostResult<std::ops::Range<usize>> {
        let end = address.checked_add(size).ok_or(HostError::RangeOverflow { address, size })?;
        if end > self.size {
            return Err(HostError::RangeOverflow { address, size });
        }
        Ok(address as usize..end as usize)
    }

    fn region_containing(&self, address: u64) -> Option<&MemoryInfo> {
        self.region_map
            .range(..=address)
            .next_back()
            .map(|(_, info)| info)
            .filter(|info| address < info.base + info.maximum_size)
    }

    fn ensure_committed(&mut self, address: u64, size: u64) -> HostResult<()> {
        if size == 0 {
            return Ok(());
        }
        let first_page = round_down_to_blocks(address);
        let last_page = round_down_to_blocks(address + size - 1);
        for page in first_page..=last_page {
            if self.commit_bitmap.get(page as usize) == Some(false) {
                let page_address = page << PAGE_SHIFT;
                if !self.hook.on_commit(page_address) {
                    return Err(HostError::PageCommitFailed { page_address });
                }
                self.commit_bitmap.set(page as usize);
            }
        }
        Ok(())
    }

    /// Copies `buf.len()` bytes from guest memory starting at `address`.
    pub fn read(&mut self, address: u64, buf: &mut [u8]) -> HostResult<()> {
        let size = buf.len() as u64;
        if self.region_containing(address).map(|r| r.ty) == Some(MemoryType::Freed) {
            return Err(HostError::UnmappedAddress { address });
        }
        self.ensure_committed(address, size)?;
        let range = self.host_range(address, size)?;
        buf.copy_from_slice(&self.backing[range]);
        Ok(())
    }

    /// Copies `buf` into guest memory starting at `address`.
    pub fn write(&mut self, address: u64, buf: &[u8]) -> HostResult<()> {
        let size = buf.len() as u64;
        if self.region_containing(address).map(|r| r.ty) == Some(MemoryType::Freed) {
            return Err(HostError::UnmappedAddress { address });
        }
        self.ensure_committed(address, size)?;
        let range = self.host_range(address, size)?;
        self.backing[range].copy_from_slice(buf);
        Ok(())
    }

    /// Fills `size` bytes starting at `address` with `value`.
    pub fn fill(&mut self, address: u64, size: u64, value: u8) -> HostResult<()> {
        if self.region_containing(address).map(|r| r.ty) == Some(MemoryType::Freed) {
            return Err(HostError::UnmappedAddress { address });
        }
        self.ensure_committed(address, size)?;
        let range = self.host_range(address, size)?;
        self.backing[range].fill(value);
        Ok(())
    }

    /// Reports the region an address belongs to, if any.
    pub fn query(&self, address: u64) -> Option<MemoryInfo> {
        self.region_containing(address).copied()
    }

    /// Allocates `size` bytes of `ty`-typed memory, optionally at a fixed
    /// `address`. Returns the base address of the new allocation.
    pub fn allocate(
        &mut self,
        address: u64,
        size: u64,
        ty: MemoryType,
        tag: i64,
        options: AllocateOptions,
    ) -> HostResult<u64> {
        let mut reclaim_options = options;
        reclaim_options.use_preferred_memory_type = true;
        self.reclaim(MemoryType::Freed, address, size, ty, tag, reclaim_options)
            .ok_or(HostError::OutOfMemory { size })
    }

    /// Frees a previously allocated region (or a prefix of one if `size`
    /// is non-zero and smaller than the whole allocation), coalescing it
    /// with any adjacent freed neighbours.
    pub fn free(&mut self, base: u64, size: u64) -> u64 {
        if base & (PAGE_SIZE as u64 - 1) != 0 {
            return 0;
        }
        let info = match self.query(base) {
            Some(info) if info.ty != MemoryType::Freed => info,
            _ => return 0,
        };

        let free_size = if size == 0 { info.maximum_size - (base - info.base) } else { size };
        if free_size == 0 {
            return 0;
        }

        let options = AllocateOptions { use_preferred_address: true, use_preferred_memory_type: true };
        let Some(freed_address) =
            self.reclaim(info.ty, base, free_size, MemoryType::Freed, 0, options)
        else {
            return 0;
        };

        let merged_address = self.merge(freed_address, MemoryType::Freed);

        let bit_index = round_down_to_blocks(merged_address.unwrap_or(freed_address)) as usize;
        let page_count = round_up_to_blocks(free_size) as usize;
        self.commit_bitmap.clear_range(bit_index, page_count);

        free_size
    }

    /// Core split/allocate algorithm shared by [`GuestMemory::allocate`] and
    /// [`GuestMemory::free`]: carve `size` bytes of `source_type` memory out
    /// of the map and retag it as `target_type`.
    fn reclaim(
        &mut self,
        source_type: MemoryType,
        address: u64,
        size: u64,
        target_type: MemoryType,
        tag: i64,
        options: AllocateOptions,
    ) -> Option<u64> {
        let actual_size = round_up_to_block_size(size);
        if actual_size == 0 {
            return None;
        }

        let (start, original) = if options.use_preferred_address {
            if address & (PAGE_SIZE as u64 - 1) != 0 {
                return None;
            }
            let end = address.checked_add(actual_size)?.checked_sub(1)?;
            let candidate = self.region_containing(address).copied()?;
            if end > candidate.base + candidate.maximum_size - 1 {
                return None;
            }
            if options.use_preferred_memory_type && candidate.ty != source_type {
                return None;
            }
            (address, candidate)
        } else {
            let candidate = self
                .region_map
                .values()
                .find(|info| {
                    actual_size <= info.maximum_size
                        && (!options.use_preferred_memory_type || info.ty == source_type)
                })
                .copied()?;
            (candidate.base, candidate)
        };

        if original.ty == target_type {
            return None;
        }

        let split = split_range(
            MemoryRange { base: original.base, size: original.maximum_size },
            start,
            actual_size,
        )?;

        self.region_map.remove(&original.base);

        match split {
            Split::Exact => {
                self.region_map.insert(
                    original.base,
                    MemoryInfo { base: original.base, size, maximum_size: original.maximum_size, tag, ty: target_type },
                );
            }
            Split::Two(remainder) => {
                self.region_map.insert(
                    start,
                    MemoryInfo { base: start, size, maximum_size: actual_size, tag, ty: target_type },
                );
                self.region_map.insert(
                    remainder.base,
                    MemoryInfo { base: remainder.base, size: remainder.size, maximum_size: remainder.size, tag: original.tag, ty: original.ty },
                );
            }
            Split::Three(before, after) => {
                self.region_map.insert(
                    start,
                    MemoryInfo { base: start, size, maximum_size: actual_size, tag, ty: target_type },
                );
                self.region_map.insert(
                    before.base,
                    MemoryInfo { base: before.base, size: before.size, maximum_size: before.size, tag: original.tag, ty: original.ty },
                );
                self.region_map.insert(
                    after.base,
                    MemoryInfo { base: after.base, size: after.size, maximum_size: after.size, tag: original.tag, ty: original.ty },
                );
            }
        }

        Some(start)
    }

    /// Coalesces `address`'s region with same-typed, address-contiguous
    /// neighbours. Returns the (possibly shifted) base address of the
    /// merged region, if any merge happened.
    fn merge(&mut self, address: u64, ty: MemoryType) -> Option<u64> {
        let mut target = address;
        let mut merged_any = false;

        loop {
            let Some(current) = self.region_containing(target).copied() else { break };
            if current.ty != ty {
                break;
            }

            if let Some((&prev_base, prev)) = self.region_map.range(..current.base).next_back() {
                if prev.ty == ty && prev_base + prev.maximum_size == current.base {
                    let mut merged = *prev;
                    merged.maximum_size += current.maximum_size;
                    merged.size += current.maximum_size;
                    self.region_map.remove(&current.base);
                    self.region_map.insert(prev_base, merged);
                    target = prev_base;
                    merged_any = true;
                    continue;
                }
            }

            if let Some((&next_base, next)) = self.region_map.range(current.base + 1..).next() {
                if next.ty == ty && current.base + current.maximum_size == next_base {
                    let mut merged = current;
                    merged.maximum_size += next.maximum_size;
                    merged.size += next.maximum_size;
                    self.region_map.remove(&next_base);
                    self.region_map.insert(current.base, merged);
                    target = current.base;
                    merged_any = true;
                    continue;
                }
            }

            break;
        }

        merged_any.then_some(target)
    }
}

enum Split {
    Exact,
    Two(MemoryRange),
    Three(MemoryRange, MemoryRange),
}

/// Carves `[target_start, target_start + target_size)` out of `source`,
/// returning the shape of whatever is left over. Mirrors
/// `VMMemoryManager::Split`.
fn split_range(source: MemoryRange, target_start: u64, target_size: u64) -> Option<Split> {
    let start = source.base;
    let end = source.base + source.size - 1;
    let target_end = target_start + target_size - 1;

    if !(start <= target_start && target_end <= end) {
        return None;
    }

    if start == target_start && end == target_end {
        return Some(Split::Exact);
    }

    if start == target_start {
        let remainder = MemoryRange { base: target_end + 1, size: end - target_end };
        return Some(Split::Two(remainder));
    }

    if end == target_end {
        let remainder = MemoryRange { base: start, size: target_start - start };
        return Some(Split::Two(remainder));
    }

    let before = MemoryRange { base: start, size: target_start - start };
    let after = MemoryRange { base: target_end + 1, size: end - target_end };
    Some(Split::Three(before, after))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_space_is_one_freed_region() {
        let mem = GuestMemory::new(0x10000);
        let info = mem.query(0).unwrap();
        assert_eq!(info.ty, MemoryType::Freed);
        assert_eq!(info.maximum_size, 0x10000);
    }

    #[test]
    fn allocate_then_query_reports_the_new_type() {
        let mut mem = GuestMemory::new(0x10000);
        let addr = mem
            .allocate(0, 0x1000, MemoryType::Data, 0, AllocateOptions::default())
            .unwrap();
        assert_eq!(addr, 0);
        let info = mem.query(0).unwrap();
        assert_eq!(info.ty, MemoryType::Data);
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut mem = GuestMemory::new(0x10000);
        let addr = mem
            .allocate(0, 0x1000, MemoryType::Data, 0, AllocateOptions::default())
            .unwrap();
        mem.write(addr, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        mem.read(addr, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn reading_freed_memory_is_an_error() {
        let mut mem = GuestMemory::new(0x10000);
        let mut buf = [0u8; 4];
        assert!(mem.read(0, &mut buf).is_err());
    }

    #[test]
    fn free_then_reallocate_reuses_the_space() {
        let mut mem = GuestMemory::new(0x10000);
        let addr = mem
            .allocate(0, 0x1000, MemoryType::Data, 0, AllocateOptions::default())
            .unwrap();
        assert_eq!(mem.free(addr, 0), 0x1000);
        let info = mem.query(0).unwrap();
        assert_eq!(info.ty, MemoryType::Freed);
        assert_eq!(info.maximum_size, 0x10000);
    }

    #[test]
    fn allocating_past_the_space_fails() {
        let mut mem = GuestMemory::new(0x1000);
        let err = mem.allocate(0, 0x2000, MemoryType::Data, 0, AllocateOptions::default());
        assert!(err.is_err());
    }

    #[test]
    fn split_classifies_exact_prefix_suffix_and_mid_fits() {
        let source = MemoryRange { base: 0, size: 0x3000 };
        assert!(matches!(split_range(source, 0, 0x3000), Some(Split::Exact)));
        assert!(matches!(split_range(source, 0, 0x1000), Some(Split::Two(_))));
        assert!(matches!(split_range(source, 0x2000, 0x1000), Some(Split::Two(_))));
        assert!(matches!(split_range(source, 0x1000, 0x1000), Some(Split::Three(_, _))));
    }
}
