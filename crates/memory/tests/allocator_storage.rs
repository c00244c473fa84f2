//! Storage wrappers, type erasure and the container facade.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use foundation_memory::allocator::{
    AnyAllocatorReference, FallbackAllocator, HeapAllocator, RawAllocator, StdAllocator,
    make_allocator_reference, make_thread_safe_allocator,
};
use foundation_memory::pool::{MemoryPool, NodePool};
use foundation_memory::stack::MemoryStack;
use foundation_memory::utils::is_aligned_ptr;
use pretty_assertions::assert_eq;

#[test]
fn thread_safe_pool_across_threads() {
    let pool = MemoryPool::<NodePool>::new(64, 4096).unwrap();
    let shared = Arc::new(make_thread_safe_allocator(pool));

    std::thread::scope(|scope| {
        for worker in 0..4u8 {
            let shared = Arc::clone(&shared);
            scope.spawn(move || {
                let nodes: Vec<_> = (0..50)
                    .map(|_| shared.allocate_node(64, 8).unwrap())
                    .collect();
                for node in &nodes {
                    unsafe { node.as_ptr().write_bytes(worker, 64) };
                }
                for node in nodes {
                    unsafe { shared.deallocate_node(node, 64, 8) };
                }
            });
        }
    });

    let pool = Arc::try_unwrap(shared).unwrap().into_inner().into_inner();
    assert!(pool.free_nodes() >= 50);
    assert!(pool.block_count() >= 1);
}

#[test]
fn same_resource_with_swapped_arguments_across_threads() {
    let first = make_thread_safe_allocator(HeapAllocator);
    let second = make_thread_safe_allocator(HeapAllocator);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..10_000 {
                assert!(!first.same_resource(&second));
            }
        });
        scope.spawn(|| {
            for _ in 0..10_000 {
                assert!(!second.same_resource(&first));
            }
        });
    });
    assert!(first.same_resource(&first));
}

#[test]
fn references_share_one_pool() {
    let mut pool = MemoryPool::<NodePool>::new(32, 1024).unwrap();
    let before = pool.free_nodes();
    {
        let first = make_allocator_reference(&mut pool);
        let second = first.clone();
        assert!(first.same_resource(&second));

        let node = first.allocate_node(32, 8).unwrap();
        unsafe { second.deallocate_node(node, 32, 8) };
    }
    assert_eq!(pool.free_nodes(), before);
}

#[test]
fn stateless_references_always_compare_equal() {
    let mut a = HeapAllocator;
    let mut b = HeapAllocator;
    let first = make_allocator_reference(&mut a);
    let second = make_allocator_reference(&mut b);
    assert!(first.same_resource(&second));
}

#[test]
fn any_reference_erases_stateful_and_stateless() {
    let mut pool = MemoryPool::<NodePool>::new(16, 1024).unwrap();
    let before = pool.free_nodes();
    {
        let mut any = AnyAllocatorReference::new(&mut pool);
        assert!(any.is_stateful());
        assert_eq!(any.max_node_size(), 16);

        let node = any.allocate_node(16, 8).unwrap();
        let mut copy = any.clone();
        unsafe { copy.deallocate_node(node, 16, 8) };
    }
    assert_eq!(pool.free_nodes(), before);

    let mut heap = HeapAllocator;
    let mut any = AnyAllocatorReference::new(&mut heap);
    assert!(!any.is_stateful());
    let node = any.allocate_node(100, 16).unwrap();
    assert!(is_aligned_ptr(node.as_ptr(), 16));
    unsafe { any.deallocate_node(node, 100, 16) };
}

#[test]
fn shared_stack_handles() {
    let stack = Rc::new(RefCell::new(MemoryStack::new(1024).unwrap()));
    let start = stack.borrow().top();

    let mut handle = Rc::clone(&stack);
    handle.allocate_node(64, 8).unwrap();
    assert!(stack.borrow().top() > start);

    let mut other = Rc::clone(&stack);
    let first = make_allocator_reference(&mut handle);
    let second = make_allocator_reference(&mut other);
    assert!(first.same_resource(&second));

    unsafe { stack.borrow_mut().unwind(start) };
    assert_eq!(stack.borrow().top(), start);
}

#[test]
fn std_allocator_elements_and_rebind() {
    let mut pool = MemoryPool::<NodePool>::new(64, 4096).unwrap();
    let before = pool.free_nodes();
    {
        let words = StdAllocator::<u64, _>::new(&mut pool);
        assert_eq!(words.max_size(), words.reference().max_array_size() / 8);

        let one = words.allocate(1).unwrap();
        let eight = words.allocate(8).unwrap();
        unsafe {
            one.as_ptr().write(7);
            eight.as_ptr().add(7).write(9);
        }

        let bytes = words.clone().rebind::<u8>();
        assert!(bytes == words);
        let empty = bytes.allocate(0).unwrap();

        unsafe {
            bytes.deallocate(empty, 0);
            words.deallocate(eight, 8);
            words.deallocate(one, 1);
        }
    }
    assert_eq!(pool.free_nodes(), before);
}

#[test]
fn std_allocator_rejects_oversized_requests() {
    let mut pool = MemoryPool::<NodePool>::new(16, 1024).unwrap();
    let words = StdAllocator::<u64, _>::new(&mut pool);
    let too_many = words.max_size() + 1;
    assert!(words.allocate(too_many).unwrap_err().is_bad_allocation_size());
}

#[test]
fn fallback_routes_by_ownership() {
    let stack = MemoryStack::new(512).unwrap();
    let mut allocator = FallbackAllocator::new(stack, HeapAllocator);

    let small = allocator.allocate_node(64, 8).unwrap();
    let large = allocator.allocate_node(8192, 8).unwrap();
    assert!(allocator.default_allocator().owns(small.as_ptr()));
    assert!(!allocator.default_allocator().owns(large.as_ptr()));

    unsafe {
        allocator.deallocate_node(large, 8192, 8);
        allocator.deallocate_node(small, 64, 8);
    }
    let (stack, _) = allocator.into_parts();
    assert_eq!(stack.block_count(), 1);
}
