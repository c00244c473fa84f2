//! Debug handlers and fill patterns.
//!
//! Handlers are process-global, so every test that installs one holds
//! `HANDLERS` and restores the previous handler before returning.

use std::ptr::NonNull;

use foundation_memory::config::{DEBUG_FILL, DEBUG_LEAK_CHECK, DEBUG_POINTER_CHECK};
use foundation_memory::debugging::{
    AllocatorInfo, DebugMagic, GlobalLeakCounter, debug_is_filled, set_invalid_pointer_handler,
    set_leak_handler,
};
use foundation_memory::pool::{MemoryPool, NodePool};
use foundation_memory::stack::MemoryStack;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

static HANDLERS: Mutex<()> = parking_lot::const_mutex(());
static LEAKS: Mutex<Vec<(&'static str, isize)>> = parking_lot::const_mutex(Vec::new());
static INVALID: Mutex<Vec<(&'static str, usize)>> = parking_lot::const_mutex(Vec::new());

fn record_leak(info: AllocatorInfo, amount: isize) {
    LEAKS.lock().push((info.name, amount));
}

fn record_invalid(info: AllocatorInfo, ptr: *const u8) {
    INVALID.lock().push((info.name, ptr.addr()));
}

fn leaks_of(name: &str) -> Vec<isize> {
    LEAKS
        .lock()
        .iter()
        .filter(|(leaker, _)| *leaker == name)
        .map(|(_, amount)| *amount)
        .collect()
}

#[test]
fn dropped_pool_reports_leaked_node() {
    let _serial = HANDLERS.lock();
    let previous = set_leak_handler(Some(record_leak));

    let mut pool = MemoryPool::<NodePool>::new(32, 1024).unwrap();
    let kept = pool.allocate().unwrap();
    let returned = pool.allocate().unwrap();
    unsafe { pool.deallocate(returned) };
    let _ = kept;
    drop(pool);

    set_leak_handler(Some(previous));
    let leaks = leaks_of("foundation_memory::MemoryPool<NodePool>");
    if DEBUG_LEAK_CHECK {
        assert_eq!(leaks, vec![32]);
    } else {
        assert!(leaks.is_empty());
    }
}

#[test]
fn last_global_guard_checks_balance() {
    static COUNTER: GlobalLeakCounter = GlobalLeakCounter::new("debugging::test_counter");

    let _serial = HANDLERS.lock();
    let previous = set_leak_handler(Some(record_leak));

    let first = COUNTER.guard();
    let second = COUNTER.guard();
    assert_eq!(COUNTER.instances(), 2);
    COUNTER.on_allocate(48);
    COUNTER.on_deallocate(16);

    drop(first);
    assert!(leaks_of("debugging::test_counter").is_empty());
    drop(second);

    set_leak_handler(Some(previous));
    if DEBUG_LEAK_CHECK {
        assert_eq!(leaks_of("debugging::test_counter"), vec![32]);
    }
}

#[test]
fn unwinding_to_a_discarded_marker_is_reported() {
    if !DEBUG_POINTER_CHECK {
        return;
    }
    let _serial = HANDLERS.lock();
    let previous = set_invalid_pointer_handler(Some(record_invalid));
    INVALID.lock().clear();

    let mut stack = MemoryStack::new(256).unwrap();
    let start = stack.top();
    stack.allocate(300, 8).unwrap();
    let grown = stack.top();
    unsafe {
        stack.unwind(start);
        // `grown` lives in a block that is gone.
        stack.unwind(grown);
    }
    assert_eq!(stack.top(), start);

    set_invalid_pointer_handler(Some(previous));
    let reports = INVALID.lock().clone();
    assert_eq!(
        reports,
        vec![("foundation_memory::MemoryStack", grown.position().addr())]
    );
}

#[test]
fn marker_ahead_of_top_is_reported_and_ignored() {
    if !DEBUG_POINTER_CHECK {
        return;
    }
    let _serial = HANDLERS.lock();
    let previous = set_invalid_pointer_handler(Some(record_invalid));
    INVALID.lock().clear();

    let mut stack = MemoryStack::new(256).unwrap();
    let start = stack.top();
    stack.allocate(32, 8).unwrap();
    let ahead = stack.top();
    unsafe {
        stack.unwind(start);
        stack.unwind(ahead);
    }
    assert_eq!(stack.top(), start);
    // The stack still hands out the memory it unwound.
    stack.allocate(32, 8).unwrap();
    assert_eq!(stack.top(), ahead);

    set_invalid_pointer_handler(Some(previous));
    let reports = INVALID.lock().clone();
    assert_eq!(
        reports,
        vec![("foundation_memory::MemoryStack", ahead.position().addr())]
    );
}

#[test]
fn new_memory_carries_the_fill_pattern() {
    let mut pool = MemoryPool::<NodePool>::new(64, 1024).unwrap();
    let node: NonNull<u8> = pool.allocate().unwrap();
    let unfilled = unsafe { debug_is_filled(node.as_ptr(), 64, DebugMagic::NewMemory) };
    // Disabled fill never reports a mismatch.
    assert!(unfilled.is_none());
    if DEBUG_FILL {
        assert_eq!(unsafe { node.as_ptr().read() }, DebugMagic::NewMemory as u8);
    }
    unsafe { pool.deallocate(node) };
}
