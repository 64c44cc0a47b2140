//! Depth-first scan of the page-table tree. A single traversal collects
//! everything the allocator needs to pick a frame: the highest linked frame
//! index, a reclaimable empty table, and the best eviction candidate.

use crate::constants::ROOT_FRAME;
use crate::geometry::Geometry;
use crate::memory::PhysicalMemory;

/// Set of frames committed to the walk in progress.
///
/// Frames in the set must not be reclaimed or evicted; the walker inserts
/// every frame of the partial path, root included, before a scan runs.
pub struct FrameSet {
    bits: Box<[bool]>,
}

impl FrameSet {
    pub fn new(num_frames: usize) -> Self {
        FrameSet {
            bits: vec![false; num_frames].into_boxed_slice(),
        }
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
    }

    #[inline]
    pub fn insert(&mut self, frame: usize) {
        self.bits[frame] = true;
    }

    #[inline]
    pub fn contains(&self, frame: usize) -> bool {
        self.bits[frame]
    }
}

/// A non-root table whose entries are all zero, plus the slot linking it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimableTable {
    pub frame: usize,
    /// Physical address of the parent entry pointing at `frame`
    pub parent_slot: usize,
}

/// The resident leaf maximizing cyclic distance from the target page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub frame: usize,
    pub page: u64,
    /// Physical address of the parent entry pointing at `frame`
    pub parent_slot: usize,
    pub distance: u64,
}

/// Everything one traversal learns about the reachable tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanOutcome {
    /// Highest frame index linked anywhere in the tree
    pub max_frame: usize,
    /// Some reclaimable empty table, if any exists (last one found)
    pub empty_table: Option<ReclaimableTable>,
    /// Best eviction candidate (first leaf attaining the maximal distance)
    pub victim: Option<EvictionCandidate>,
}

/// Walk every reachable frame once, starting from the root table.
///
/// The scan never returns early: even with an empty table in hand it still
/// needs `max_frame` and the victim, so the whole tree is visited.
pub fn scan_tree(
    memory: &PhysicalMemory,
    geometry: &Geometry,
    target_page: u64,
    in_use: &FrameSet,
) -> ScanOutcome {
    let mut scan = TreeScan {
        memory,
        geometry,
        target_page,
        in_use,
        outcome: ScanOutcome::default(),
    };

    // The root is visited here so it is never an empty-table candidate.
    let root_base = memory.frame_to_address(ROOT_FRAME);
    for slot in 0..geometry.page_size() {
        let child = memory.read(root_base + slot);
        if child != 0 {
            scan.visit(child as usize, 1, slot as u64, root_base + slot);
        }
    }
    scan.outcome
}

struct TreeScan<'a> {
    memory: &'a PhysicalMemory,
    geometry: &'a Geometry,
    target_page: u64,
    in_use: &'a FrameSet,
    outcome: ScanOutcome,
}

impl TreeScan<'_> {
    /// Visit `frame`, reached through the entry at `parent_slot` while
    /// descending bit-groups that spell `page` so far.
    fn visit(&mut self, frame: usize, depth: u32, page: u64, parent_slot: usize) {
        if frame > self.outcome.max_frame {
            self.outcome.max_frame = frame;
        }

        if depth == self.geometry.tables_depth {
            // Leaf: candidate for eviction unless committed to the walk
            if self.in_use.contains(frame) {
                return;
            }
            let distance = self.geometry.cyclic_distance(self.target_page, page);
            let better = match self.outcome.victim {
                None => true,
                Some(best) => distance > best.distance,
            };
            if better {
                self.outcome.victim = Some(EvictionCandidate {
                    frame,
                    page,
                    parent_slot,
                    distance,
                });
            }
            return;
        }

        let base = self.memory.frame_to_address(frame);
        let mut has_children = false;
        for slot in 0..self.geometry.page_size() {
            let child = self.memory.read(base + slot);
            if child != 0 {
                has_children = true;
                self.visit(
                    child as usize,
                    depth + 1,
                    (page << self.geometry.offset_width) | slot as u64,
                    base + slot,
                );
            }
        }
        if !has_children && !self.in_use.contains(frame) {
            self.outcome.empty_table = Some(ReclaimableTable { frame, parent_slot });
        }
    }
}
