//! Temporary allocator scopes and the per-thread stack registry.
//!
//! Only `per_thread_stacks_are_recycled` touches the registry; the other
//! tests use explicit stacks so they can run in parallel with it.

use std::thread;

use foundation_memory::allocator::{RawAllocator, StdAllocator};
use foundation_memory::config::{TEMPORARY_STACK_MODE, TemporaryStackMode};
use foundation_memory::temporary::{
    TemporaryAllocator, TemporaryStack, TemporaryStackInitializer, registered_temporary_stacks,
    release_unused_temporary_stacks,
};
use foundation_memory::utils::is_aligned_ptr;
use pretty_assertions::assert_eq;

#[test]
fn three_nested_scopes() {
    let stack = TemporaryStack::new(1024).unwrap();
    let start = stack.top();

    let mut a = TemporaryAllocator::with_stack(&stack);
    a.allocate(64, 8).unwrap();
    let after_a = stack.top();
    {
        let mut b = TemporaryAllocator::with_stack(&stack);
        b.allocate(128, 16).unwrap();
        let after_b = stack.top();
        {
            let mut c = TemporaryAllocator::with_stack(&stack);
            assert_eq!(stack.depth(), 3);
            assert!(c.is_active() && !b.is_active() && !a.is_active());
            c.allocate(512, 8).unwrap();
            c.allocate(512, 8).unwrap();
        }
        assert_eq!(stack.top(), after_b);
        assert!(b.is_active());
    }
    assert_eq!(stack.top(), after_a);
    drop(a);
    assert_eq!(stack.top(), start);
    assert_eq!(stack.depth(), 0);
}

#[test]
fn out_of_order_drop_leaves_stack_consistent() {
    let stack = TemporaryStack::new(256).unwrap();
    let start = stack.top();

    let mut a = TemporaryAllocator::with_stack(&stack);
    a.allocate(300, 8).unwrap();
    let mut b = TemporaryAllocator::with_stack(&stack);
    b.allocate(64, 8).unwrap();

    // Dropping the outer scope first unwinds the inner one as well.
    drop(a);
    assert_eq!(stack.depth(), 0);
    assert_eq!(stack.top(), start);
    assert!(b.is_retired());
    stack.shrink_to_fit();

    let mut c = TemporaryAllocator::with_stack(&stack);
    c.allocate(512, 8).unwrap();
    let after_c = stack.top();
    assert!(b.allocate(8, 8).is_err());

    drop(b);
    assert_eq!(stack.depth(), 1);
    assert_eq!(stack.top(), after_c);
    assert!(c.is_active());

    let memory = c.allocate(128, 16).unwrap();
    unsafe { memory.as_ptr().write_bytes(0xAB, 128) };
    drop(c);
    assert_eq!(stack.depth(), 0);
    assert_eq!(stack.top(), start);
}

#[test]
fn temporary_allocator_backs_containers() {
    let stack = TemporaryStack::new(4096).unwrap();
    let start = stack.top();
    {
        let mut scratch = TemporaryAllocator::with_stack(&stack);
        let marker = scratch.marker();
        assert_eq!(marker, start);

        let words = StdAllocator::<u64, _>::new(&mut scratch);
        let memory = words.allocate(32).unwrap();
        assert!(is_aligned_ptr(memory.as_ptr(), 8));
        unsafe {
            for i in 0..32 {
                memory.as_ptr().add(i).write(i as u64);
            }
            assert_eq!(memory.as_ptr().add(31).read(), 31);
            words.deallocate(memory, 32);
        }
    }
    assert_eq!(stack.top(), start);
}

#[test]
fn try_allocate_stays_in_current_block() {
    let stack = TemporaryStack::new(256).unwrap();
    let mut scratch = TemporaryAllocator::with_stack(&stack);
    let left = stack.capacity_left();
    assert!(scratch.try_allocate(left + 1, 1).is_none());
    assert!(scratch.try_allocate(16, 8).is_some());
    assert!(scratch.max_node_size() >= stack.next_capacity());
}

#[test]
fn per_thread_stacks_are_recycled() {
    if TEMPORARY_STACK_MODE != TemporaryStackMode::Automatic {
        return;
    }
    let use_scratch = || {
        let mut scratch = TemporaryAllocator::new().unwrap();
        scratch.allocate(256, 8).unwrap();
        assert_eq!(scratch.stack().depth(), 1);
    };

    thread::spawn(use_scratch).join().unwrap();
    let registered = registered_temporary_stacks();
    assert!(registered >= 1);

    // An exited thread's stack is claimed by the next thread.
    thread::spawn(use_scratch).join().unwrap();
    assert_eq!(registered_temporary_stacks(), registered);

    assert_eq!(release_unused_temporary_stacks(), registered);
    assert_eq!(registered_temporary_stacks(), 0);

    // An initializer chooses the size of a freshly registered stack.
    thread::spawn(|| {
        let _init = TemporaryStackInitializer::new(16 * 1024).unwrap();
        let scratch = TemporaryAllocator::new().unwrap();
        assert!(scratch.stack().capacity_left() >= 16 * 1024);
    })
    .join()
    .unwrap();
    assert_eq!(release_unused_temporary_stacks(), 1);
}
