//! Property tests for free list capacity and contiguity invariants.

use std::ptr::NonNull;

use foundation_memory::free_list::{FreeList, FreeMemoryList, OrderedFreeMemoryList};
use proptest::prelude::*;

const REGION: usize = 4096;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 16-byte aligned backing memory
fn region() -> Vec<u128> {
    vec![0; REGION / size_of::<u128>()]
}

fn fill<L: FreeList>(list: &mut L, memory: &mut [u128]) {
    let start = NonNull::new(memory.as_mut_ptr().cast::<u8>()).unwrap();
    unsafe { list.insert(start, size_of_val(memory)) };
}

fn round_trip<L: FreeList>(node_size: usize, count: usize, order: &[usize]) {
    let mut memory = region();
    let mut list = L::new(node_size);
    fill(&mut list, &mut memory);
    let initial = list.capacity();
    let count = count.min(initial);

    let nodes: Vec<_> = (0..count).map(|_| list.allocate().unwrap()).collect();
    assert_eq!(list.capacity(), initial - count);

    for &index in order.iter().filter(|&&index| index < count) {
        unsafe { list.deallocate(nodes[index]) };
    }
    assert_eq!(list.capacity(), initial);
}

fn shuffled(count: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..count).collect::<Vec<_>>()).prop_shuffle()
}

// ---------------------------------------------------------------------------
// Property: capacity returns to its initial value in any deallocation order
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn unordered_capacity_round_trip(
        node_size in prop_oneof![Just(8usize), Just(16), Just(24), Just(64)],
        order in shuffled(128),
    ) {
        round_trip::<FreeMemoryList>(node_size, 128, &order);
    }

    #[test]
    fn ordered_capacity_round_trip(
        node_size in prop_oneof![Just(16usize), Just(24), Just(32), Just(64)],
        order in shuffled(128),
    ) {
        round_trip::<OrderedFreeMemoryList>(node_size, 128, &order);
    }

    #[test]
    fn ordered_three_node_runs_round_trip(order in shuffled(20)) {
        let mut memory = region();
        let mut list = OrderedFreeMemoryList::new(16);
        fill(&mut list, &mut memory);
        let initial = list.capacity();

        let arrays: Vec<_> = (0..20).map(|_| list.allocate_array(48).unwrap()).collect();
        prop_assert_eq!(list.capacity(), initial - 60);

        for index in order {
            unsafe { list.deallocate_array(arrays[index], 48) };
        }
        prop_assert_eq!(list.capacity(), initial);
        prop_assert!(list.allocate_array(REGION).is_some());
    }
}

// ---------------------------------------------------------------------------
// Ordered-list contiguity
// ---------------------------------------------------------------------------

#[test]
fn ordered_arrays_need_a_surviving_run() {
    let mut memory = region();
    let mut list = OrderedFreeMemoryList::new(16);
    fill(&mut list, &mut memory);

    let nodes: Vec<_> = (0..list.capacity()).map(|_| list.allocate().unwrap()).collect();
    // Free every other node, then one run of three.
    for node in nodes.iter().step_by(2) {
        unsafe { list.deallocate(*node) };
    }
    assert!(list.allocate_array(32).is_none());

    unsafe {
        list.deallocate(nodes[11]);
        list.deallocate(nodes[13]);
    }
    let run = list.allocate_array(80).unwrap();
    assert_eq!(run, nodes[10]);
    assert!(list.allocate_array(32).is_none());
}

#[test]
fn ordered_three_node_runs_forward_and_reverse() {
    let mut memory = region();
    let mut list = OrderedFreeMemoryList::new(16);
    fill(&mut list, &mut memory);
    let initial = list.capacity();

    let arrays: Vec<_> = (0..30).map(|_| list.allocate_array(48).unwrap()).collect();
    for array in &arrays {
        unsafe { list.deallocate_array(*array, 48) };
    }
    assert_eq!(list.capacity(), initial);

    let arrays: Vec<_> = (0..30).map(|_| list.allocate_array(48).unwrap()).collect();
    for array in arrays.iter().rev() {
        unsafe { list.deallocate_array(*array, 48) };
    }
    assert_eq!(list.capacity(), initial);
    assert!(list.allocate_array(REGION).is_some());
}

#[test]
fn unordered_fresh_memory_serves_arrays() {
    let mut memory = region();
    let mut list = FreeMemoryList::new(8);
    fill(&mut list, &mut memory);

    let array = list.allocate_array(64).unwrap();
    let node = list.allocate().unwrap();
    assert_eq!(node.as_ptr(), array.as_ptr().wrapping_add(64));
    unsafe {
        list.deallocate(node);
        list.deallocate_array(array, 64);
    }
    assert_eq!(list.capacity(), REGION / 8);
}
