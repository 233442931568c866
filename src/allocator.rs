//! The allocator core: a raw buffer carved into chunks, tracked by two
//! red-black trees whose nodes are the chunk headers themselves.

use std::alloc::{self, Layout};
use std::fmt::Write as _;

use bytemuck::{Pod, Zeroable};
use colored::Colorize;
use red_black_tree::{Color, NodeStore, RedBlackTree, NIL};

use crate::error::FreeError;

/// Embedded at the start of every chunk, free or allocated. Doubles as
/// the red-black tree's node: `parent`/`left`/`right`/`color` are link
/// fields rewritten by [`RedBlackTree`], never touched directly except
/// through the [`NodeStore`] impl below.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub(crate) struct ChunkHeader {
    /// Total chunk length including this header and any padding.
    pub chunk_size: i64,
    /// Bytes between the end of this header and the aligned user region.
    /// Zero for free chunks.
    pub padding: u64,
    pub parent: u32,
    pub left: u32,
    pub right: u32,
    pub color: u8,
    _reserved: [u8; 3],
}

unsafe impl Zeroable for ChunkHeader {}
unsafe impl Pod for ChunkHeader {}

/// Size of [`ChunkHeader`] -- the minimum footprint of any chunk.
pub const HEADER_SIZE: usize = std::mem::size_of::<ChunkHeader>();

#[inline(always)]
fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

#[inline(always)]
fn encode_color(c: Color) -> u8 {
    match c {
        Color::Red => 0,
        Color::Black => 1,
    }
}

#[inline(always)]
fn decode_color(c: u8) -> Color {
    if c == 0 {
        Color::Red
    } else {
        Color::Black
    }
}

/// A dynamic memory allocator over a single buffer obtained from the
/// global allocator at construction and released at [`Drop`].
///
/// Free chunks and allocated chunks are each tracked by a [`RedBlackTree`]
/// keyed by `chunk_size`; both trees are embedded in the same buffer,
/// via the chunk headers that are also the trees' nodes. Node indices
/// are byte offsets from the start of the buffer -- `NIL` (`u32::MAX`)
/// is the only offset that can never name a real chunk.
pub struct Allocator {
    buf: *mut u8,
    capacity: usize,
    layout: Layout,
    free_tree: RedBlackTree<i64>,
    alloc_tree: RedBlackTree<i64>,
}

impl Allocator {
    /// Obtains a buffer of `capacity` bytes from the global allocator and
    /// initializes it as a single free chunk spanning the whole capacity.
    ///
    /// # Panics
    /// If `capacity` does not exceed [`HEADER_SIZE`] -- a chunk must have
    /// room for at least its own header plus one payload byte.
    pub fn create(capacity: u32) -> Self {
        let capacity = capacity as usize;
        assert!(
            capacity > HEADER_SIZE,
            "capacity {} must exceed header size {}",
            capacity,
            HEADER_SIZE
        );
        let layout = Layout::from_size_align(capacity, std::mem::align_of::<ChunkHeader>())
            .expect("capacity too large to form a valid layout");
        let buf = unsafe { alloc::alloc(layout) };
        if buf.is_null() {
            alloc::handle_alloc_error(layout);
        }

        let mut allocator = Allocator {
            buf,
            capacity,
            layout,
            free_tree: RedBlackTree::new(),
            alloc_tree: RedBlackTree::new(),
        };

        allocator.write_header(
            0,
            ChunkHeader {
                chunk_size: capacity as i64,
                padding: 0,
                parent: NIL,
                left: NIL,
                right: NIL,
                color: encode_color(Color::Red),
                _reserved: [0; 3],
            },
        );
        let mut free_tree = allocator.free_tree;
        free_tree.insert(&mut allocator, 0);
        allocator.free_tree = free_tree;

        log::debug!("create: capacity={} header_size={}", capacity, HEADER_SIZE);
        allocator
    }

    #[inline(always)]
    fn header(&self, idx: u32) -> ChunkHeader {
        debug_assert!((idx as usize) < self.capacity);
        unsafe { (self.buf.add(idx as usize) as *const ChunkHeader).read_unaligned() }
    }

    #[inline(always)]
    fn write_header(&mut self, idx: u32, header: ChunkHeader) {
        debug_assert!((idx as usize) < self.capacity);
        unsafe { (self.buf.add(idx as usize) as *mut ChunkHeader).write_unaligned(header) }
    }

    #[inline(always)]
    fn base_addr(&self) -> usize {
        self.buf as usize
    }

    /// Convenience form of [`allocate`](Self::allocate) with `alignment = 1`,
    /// matching the reference implementation's single-argument overload.
    pub fn allocate_unaligned(&mut self, size: i32) -> Option<*mut u8> {
        self.allocate(size, 1)
    }

    /// Finds and carves out a free chunk able to hold `size` bytes at
    /// `alignment`, returning the address of the payload, or `None` if
    /// no free chunk qualifies.
    ///
    /// # Panics
    /// If `size < 1` or `alignment` is not a power of two.
    pub fn allocate(&mut self, size: i32, alignment: i32) -> Option<*mut u8> {
        assert!(size >= 1, "size must be >= 1, got {}", size);
        assert!(
            alignment >= 1 && (alignment as u32).is_power_of_two(),
            "alignment must be a power of two >= 1, got {}",
            alignment
        );

        let needed = size as i64 + HEADER_SIZE as i64;
        let base = self.base_addr();

        let mut free_tree = self.free_tree;
        let found = free_tree.find(self, |store, idx| {
            let header = store.header(idx);
            if header.chunk_size < needed {
                // Too small -- ascend toward larger chunks.
                return 1;
            }
            let node_addr = base + idx as usize;
            let p0 = node_addr + HEADER_SIZE;
            let p = align_up(p0, alignment as usize);
            let chunk_end = node_addr + header.chunk_size as usize;
            if p + size as usize > chunk_end {
                // Big enough by size alone, but alignment eats past the
                // end of the chunk -- keep looking at larger chunks.
                return 1;
            }
            let allocated_span = (p + size as usize) - node_addr;
            let residue = header.chunk_size - allocated_span as i64;
            if residue > 0 && residue < HEADER_SIZE as i64 + 1 {
                // Residue too small to host a future header -- invalid.
                // Rejects the whole {1..=HEADER_SIZE} dead zone, not just
                // {1..HEADER_SIZE}: a residue of exactly HEADER_SIZE bytes
                // has zero room for payload once its own header lands.
                return 1;
            }
            0
        });

        if found == NIL {
            log::debug!(
                "allocate: no chunk fits size={} alignment={}",
                size,
                alignment
            );
            return None;
        }

        let node_addr = base + found as usize;
        let p0 = node_addr + HEADER_SIZE;
        let p = align_up(p0, alignment as usize);
        let allocated_span = (p + size as usize) - node_addr;
        let padding = (p - p0) as u64;
        let old_size = self.header(found).chunk_size;

        free_tree.remove(self, found);
        self.free_tree = free_tree;

        let mut header = self.header(found);
        header.chunk_size = allocated_span as i64;
        header.padding = padding;
        self.write_header(found, header);

        if old_size != allocated_span as i64 {
            let residue_offset = found + allocated_span as u32;
            let residue_size = old_size - allocated_span as i64;
            self.write_header(
                residue_offset,
                ChunkHeader {
                    chunk_size: residue_size,
                    padding: 0,
                    parent: NIL,
                    left: NIL,
                    right: NIL,
                    color: encode_color(Color::Red),
                    _reserved: [0; 3],
                },
            );
            let mut free_tree = self.free_tree;
            free_tree.insert(self, residue_offset);
            self.free_tree = free_tree;
        }

        let mut alloc_tree = self.alloc_tree;
        alloc_tree.insert(self, found);
        self.alloc_tree = alloc_tree;

        log::debug!(
            "allocate: size={} alignment={} -> address={:#x}",
            size,
            alignment,
            p
        );
        Some(p as *mut u8)
    }

    /// Releases a chunk returned by [`allocate`](Self::allocate). `size`
    /// must be the exact size passed to the matching `allocate` call.
    ///
    /// A mismatched `address`/`size` pair is a silent no-op -- without
    /// provenance tracking the core cannot tell "already freed" from
    /// "never allocated" from "wrong size passed", and raising here would
    /// destabilize callers that free an object past the end of its
    /// natural lifetime. Use [`try_free`](Self::try_free) to observe the
    /// failure instead.
    pub fn free(&mut self, address: *mut u8, size: i32) {
        let _ = self.try_free(address, size);
    }

    /// Same as [`free`](Self::free), but reports a mismatched
    /// address/size pair instead of silently ignoring it.
    pub fn try_free(&mut self, address: *mut u8, size: i32) -> Result<(), FreeError> {
        assert!(size >= 1, "size must be >= 1, got {}", size);
        let target = size as i64 + HEADER_SIZE as i64;
        let addr = address as usize;

        let found = self.find_allocated(self.alloc_tree.root, target, addr);

        if found == NIL {
            log::warn!(
                "free: no allocated chunk at {:#x} with size {}",
                addr,
                size
            );
            return Err(FreeError::NotAllocated {
                address: addr,
                size,
            });
        }

        let mut alloc_tree = self.alloc_tree;
        alloc_tree.remove(self, found);
        self.alloc_tree = alloc_tree;

        let mut free_tree = self.free_tree;
        free_tree.insert(self, found);
        self.free_tree = free_tree;

        log::debug!("free: address={:#x} size={}", addr, size);
        Ok(())
    }

    /// Locates the allocated chunk with `chunk_size == target` whose user
    /// address is `addr`, starting the search at `node`.
    ///
    /// A plain three-way descent (smaller → right, larger → left, equal →
    /// stop) is not enough here: `chunk_size` ties can end up split across
    /// *both* children of an equal-size node once rotations run, even
    /// though insertion always attaches new ties to the right. So once a
    /// node with `chunk_size == target` is reached, both of its children
    /// are searched for further ties rather than assuming they only ever
    /// lie to the right.
    fn find_allocated(&self, node: u32, target: i64, addr: usize) -> u32 {
        if node == NIL {
            return NIL;
        }
        let header = self.header(node);
        if header.chunk_size < target {
            return self.find_allocated(header.right, target, addr);
        }
        if header.chunk_size > target {
            return self.find_allocated(header.left, target, addr);
        }
        let node_addr = self.base_addr() + node as usize;
        let user_addr = node_addr + HEADER_SIZE + header.padding as usize;
        if user_addr == addr {
            return node;
        }
        let hit = self.find_allocated(header.left, target, addr);
        if hit != NIL {
            return hit;
        }
        self.find_allocated(header.right, target, addr)
    }

    /// Total buffer capacity passed to [`create`](Self::create).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of `chunk_size` across both trees; should always equal
    /// `capacity` (the partition invariant).
    pub fn total_tracked_size(&self) -> i64 {
        let mut total = 0i64;
        for idx in self.free_tree.inorder(self) {
            total += self.header(idx).chunk_size;
        }
        for idx in self.alloc_tree.inorder(self) {
            total += self.header(idx).chunk_size;
        }
        total
    }

    /// Checks the red-black invariants on both trees; used by tests.
    pub fn trees_are_valid(&self) -> bool {
        self.free_tree.is_valid(self) && self.alloc_tree.is_valid(self)
    }

    /// Diagnostic dump of the free tree's shape, colored by node color.
    /// Not on the allocate/free hot path -- purely for interactive
    /// inspection of a misbehaving allocator.
    pub fn dump_free_tree(&self) -> String {
        let mut out = String::new();
        self.dump_subtree(&mut out, self.free_tree.root, "");
        out
    }

    fn dump_subtree(&self, out: &mut String, node: u32, indent: &str) {
        if node == NIL {
            return;
        }
        let header = self.header(node);
        let label = format!("{}", header.chunk_size);
        let colored_label = if decode_color(header.color) == Color::Red {
            label.as_str().red().to_string()
        } else {
            label.as_str().black().to_string()
        };
        let _ = writeln!(out, "{}offset={} size={}", indent, node, colored_label);
        let child_indent = format!("{}  ", indent);
        self.dump_subtree(out, header.left, &child_indent);
        self.dump_subtree(out, header.right, &child_indent);
    }
}

impl NodeStore for Allocator {
    type Key = i64;

    fn key(&self, idx: u32) -> i64 {
        self.header(idx).chunk_size
    }

    fn left(&self, idx: u32) -> u32 {
        self.header(idx).left
    }

    fn right(&self, idx: u32) -> u32 {
        self.header(idx).right
    }

    fn parent(&self, idx: u32) -> u32 {
        self.header(idx).parent
    }

    fn color(&self, idx: u32) -> Color {
        decode_color(self.header(idx).color)
    }

    fn set_left(&mut self, idx: u32, v: u32) {
        let mut header = self.header(idx);
        header.left = v;
        self.write_header(idx, header);
    }

    fn set_right(&mut self, idx: u32, v: u32) {
        let mut header = self.header(idx);
        header.right = v;
        self.write_header(idx, header);
    }

    fn set_parent(&mut self, idx: u32, v: u32) {
        let mut header = self.header(idx);
        header.parent = v;
        self.write_header(idx, header);
    }

    fn set_color(&mut self, idx: u32, c: Color) {
        let mut header = self.header(idx);
        header.color = encode_color(c);
        self.write_header(idx, header);
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.buf, self.layout) };
    }
}
