use log::{debug, trace};
use thiserror::Error;

use crate::constants::ROOT_FRAME;
use crate::geometry::Geometry;
use crate::memory::{PhysicalMemory, Word};
use crate::scan::{scan_tree, FrameSet};

/// Why a virtual-memory operation was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("virtual address {addr:#x} is outside the {limit:#x}-word address space")]
    AddressOutOfRange { addr: u64, limit: u64 },
}

/// Demand-paged translator over a hierarchical page-table tree.
///
/// Reads and writes of single words drive the whole lifecycle: missing
/// tables are built during the walk, frames are taken from the pool while
/// it lasts, and afterwards the resident page farthest (cyclically) from
/// the target is pushed out to the backing store.
pub struct VmTranslator {
    geometry: Geometry,
    memory: PhysicalMemory,
    /// Frames committed to the walk in progress; rebuilt per translation
    path: FrameSet,
}

impl VmTranslator {
    /// Set up a translator with a zeroed root table
    pub fn new(geometry: Geometry) -> Self {
        let memory = PhysicalMemory::new(geometry);
        let path = FrameSet::new(geometry.num_frames);
        let mut vm = VmTranslator {
            geometry,
            memory,
            path,
        };
        vm.memory.clear_frame(ROOT_FRAME);
        vm
    }

    /// Read the word at virtual address `addr`
    pub fn read(&mut self, addr: u64) -> Result<Word, VmError> {
        self.check_range(addr)?;
        let physical = self.translate(addr);
        Ok(self.memory.read(physical))
    }

    /// Write `value` at virtual address `addr`
    pub fn write(&mut self, addr: u64, value: Word) -> Result<(), VmError> {
        self.check_range(addr)?;
        let physical = self.translate(addr);
        self.memory.write(physical, value);
        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// The physical memory the translator drives (for inspection)
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    fn check_range(&self, addr: u64) -> Result<(), VmError> {
        let limit = self.geometry.virtual_memory_size();
        if addr >= limit {
            return Err(VmError::AddressOutOfRange { addr, limit });
        }
        Ok(())
    }

    /// Walk the page-table tree for `addr`, building missing links, and
    /// return the physical address of the target word.
    fn translate(&mut self, addr: u64) -> usize {
        let va = self.geometry.decompose(addr);
        self.path.clear();
        self.path.insert(ROOT_FRAME);

        let mut prev = ROOT_FRAME;
        for level in 0..self.geometry.tables_depth {
            let slot = self.memory.frame_to_address(prev) + self.geometry.table_index(addr, level);
            let entry = self.memory.read(slot);
            let cur = if entry == 0 {
                trace!("{} faults at level {}", va, level);
                self.handle_fault(va.page, level, slot)
            } else {
                entry as usize
            };
            self.path.insert(cur);
            prev = cur;
        }
        self.memory.frame_to_address(prev) + va.offset
    }

    /// Fill the zero entry at `parent_slot` with a freshly chosen frame;
    /// the frame becomes a table, or the leaf for `page` at the last level.
    fn handle_fault(&mut self, page: u64, level: u32, parent_slot: usize) -> usize {
        let frame = self.allocate_frame(page);
        self.memory.write(parent_slot, frame as Word);
        if level + 1 == self.geometry.tables_depth {
            trace!("restoring page {} into frame {}", page, frame);
            self.memory.restore(frame, page);
        } else {
            self.memory.clear_frame(frame);
        }
        frame
    }

    /// Pick the frame for a new table or page: a reclaimed empty table if
    /// one exists, else the frame past the tree's high-water mark, else the
    /// eviction victim. Never frame 0.
    fn allocate_frame(&mut self, target_page: u64) -> usize {
        let outcome = scan_tree(&self.memory, &self.geometry, target_page, &self.path);

        if let Some(empty) = outcome.empty_table {
            debug!("reclaiming empty table in frame {}", empty.frame);
            self.memory.write(empty.parent_slot, 0);
            return empty.frame;
        }

        let next = outcome.max_frame + 1;
        if next < self.geometry.num_frames {
            return next;
        }

        // Pool exhausted; a resident leaf must exist by the tree invariant
        let Some(victim) = outcome.victim else {
            unreachable!("full frame pool with no resident page");
        };
        debug!(
            "evicting page {} (distance {}) from frame {}",
            victim.page, victim.distance, victim.frame
        );
        self.memory.evict(victim.frame, victim.page);
        self.memory.write(victim.parent_slot, 0);
        victim.frame
    }
}
