//! Memory stack markers, alignment and unwinding.

use foundation_memory::allocator::{HeapAllocator, RawAllocator};
use foundation_memory::arena::{BLOCK_HEADER_SIZE, MemoryArena};
use foundation_memory::block::{BlockAllocator, FixedBlockAllocator};
use foundation_memory::config::MAX_ALIGNMENT;
use foundation_memory::stack::{MemoryStack, MemoryStackUnwinder};
use foundation_memory::utils::is_aligned_ptr;
use foundation_memory::MemoryError;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn markers_are_totally_ordered() {
    let mut stack = MemoryStack::new(512).unwrap();
    let m1 = stack.top();
    stack.allocate(64, 8).unwrap();
    let m2 = stack.top();
    assert!(m1 < m2);

    // Growing into a new block keeps the order.
    stack.allocate(900, 8).unwrap();
    let m3 = stack.top();
    assert!(m2 < m3);
    assert!(m3.block_count() > m2.block_count());

    unsafe { stack.unwind(m2) };
    assert_eq!(stack.top(), m2);
    unsafe { stack.unwind(m1) };
    assert_eq!(stack.top(), m1);
}

#[test]
fn unwinder_restores_on_drop() {
    let mut stack = MemoryStack::new(256).unwrap();
    let before = stack.top();
    {
        let mut scope = MemoryStackUnwinder::new(&mut stack);
        for _ in 0..20 {
            scope.stack().allocate(100, 16).unwrap();
        }
        assert!(scope.stack().block_count() > 1);
    }
    assert_eq!(stack.top(), before);
    assert_eq!(stack.block_count(), 1);
    assert!(stack.cache_size() > 0);
}

#[test]
fn cached_blocks_are_reused() {
    let mut stack = MemoryStack::new(MemoryStack::min_block_size(128)).unwrap();
    let before = stack.top();
    stack.allocate(100, 8).unwrap();
    stack.allocate(100, 8).unwrap();
    let grown = stack.block_count();
    unsafe { stack.unwind(before) };

    let cached = stack.cache_size();
    assert_eq!(cached, grown - 1);
    stack.allocate(100, 8).unwrap();
    stack.allocate(100, 8).unwrap();
    assert_eq!(stack.cache_size(), cached - 1);
}

#[test]
fn fixed_block_stack_runs_out() {
    let blocks = FixedBlockAllocator::<HeapAllocator>::new(256);
    let mut stack = MemoryStack::with_block_allocator(blocks).unwrap();
    assert!(stack.allocate(128, 8).is_ok());
    let error = stack.allocate(200, 8).unwrap_err();
    assert!(error.is_bad_allocation_size() || error.is_out_of_memory());
}

#[test]
fn blocks_without_usable_space_are_rejected() {
    assert!(matches!(MemoryStack::new(0), Err(MemoryError::InvalidConfig { .. })));

    // The header-sized block goes back, so a retry sees the same error
    // instead of an exhausted fixed allocator.
    let mut arena: MemoryArena<FixedBlockAllocator> =
        MemoryArena::new(FixedBlockAllocator::new(BLOCK_HEADER_SIZE));
    for _ in 0..2 {
        let error = arena.allocate_block().unwrap_err();
        assert!(matches!(error, MemoryError::InvalidConfig { .. }));
    }
    assert_eq!(arena.allocator().block_size(), BLOCK_HEADER_SIZE);
}

#[test]
fn deallocation_is_a_no_op() {
    let mut stack = MemoryStack::new(1024).unwrap();
    let node = stack.allocate_node(32, 8).unwrap();
    let top = stack.top();
    unsafe { stack.deallocate_node(node, 32, 8) };
    assert_eq!(stack.top(), top);
}

proptest! {
    #[test]
    fn every_allocation_is_aligned(
        requests in proptest::collection::vec(
            (1usize..300, prop_oneof![Just(1usize), Just(8), Just(16), Just(2 * MAX_ALIGNMENT)]),
            1..64,
        ),
    ) {
        let mut stack = MemoryStack::new(1024).unwrap();
        let start = stack.top();
        for (size, alignment) in requests {
            let memory = stack.allocate(size, alignment).unwrap();
            prop_assert!(is_aligned_ptr(memory.as_ptr(), alignment));
        }
        unsafe { stack.unwind(start) };
        prop_assert_eq!(stack.top(), start);
    }
}
