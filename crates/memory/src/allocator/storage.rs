//! Allocator storage and reference wrappers
//!
//! [`AllocatorStorage`] gives every allocator one uniform surface. What it
//! actually holds is decided by a [`StoragePolicy`]:
//! - [`DirectStorage`] owns the allocator by value
//! - [`ReferenceStorage`] holds the allocator's [`AllocatorHandle`], so it
//!   points at stateful allocators, is empty for stateless ones and clones
//!   shared ones
//!
//! Every entry point goes through a `lock_api` mutex. The default
//! [`NoMutex`] is a single flag and keeps the storage `!Sync`;
//! substituting `parking_lot::RawMutex` makes the same storage shareable
//! across threads ([`ThreadSafeAllocator`]).
//!
//! # Safety
//!
//! [`StatefulHandle`] is a raw pointer captured from a `&'a mut` borrow.
//! Clones of one handle alias the same allocator; they are `!Send` and only
//! ever produce one live `&mut` at a time because every access is scoped to
//! a closure that does not re-enter the handle.

use core::cell::{Cell, RefCell};
use core::fmt;
use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use std::rc::Rc;

use parking_lot::lock_api::{self, GuardNoSend, RawMutex};

use crate::debugging::AllocatorInfo;
use crate::error::MemoryResult;

use super::traits::{AllocatorHandle, ComposableAllocator, RawAllocator};

// ============================================================================
// Handles
// ============================================================================

/// Non-owning pointer to a stateful allocator
pub struct StatefulHandle<'a, A: ?Sized> {
    allocator: NonNull<A>,
    _marker: PhantomData<&'a mut A>,
}

impl<A: ?Sized> Clone for StatefulHandle<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: ?Sized> Copy for StatefulHandle<'_, A> {}

impl<A: ?Sized> fmt::Debug for StatefulHandle<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StatefulHandle").field(&self.allocator).finish()
    }
}

impl<'a, A: RawAllocator + ?Sized + 'a> AllocatorHandle<'a, A> for StatefulHandle<'a, A> {
    const IS_STATEFUL: bool = true;

    fn from_allocator(allocator: &'a mut A) -> Self {
        Self {
            allocator: NonNull::from(allocator),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn with<R>(&mut self, f: impl FnOnce(&mut A) -> R) -> R {
        // SAFETY: the pointer comes from a `&'a mut A` that outlives the
        // handle and no other access is live during `f`.
        f(unsafe { self.allocator.as_mut() })
    }

    #[inline]
    fn with_ref<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        // SAFETY: as above.
        f(unsafe { self.allocator.as_ref() })
    }

    fn same_resource(&self, other: &Self) -> bool {
        ptr::addr_eq(self.allocator.as_ptr(), other.allocator.as_ptr())
    }
}

/// Zero-sized stand-in for a default-constructible allocator
pub struct StatelessHandle<A>(PhantomData<fn() -> A>);

impl<A> StatelessHandle<A> {
    /// Creates the handle without an allocator instance
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<A> Default for StatelessHandle<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for StatelessHandle<A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for StatelessHandle<A> {}

impl<A> fmt::Debug for StatelessHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatelessHandle")
    }
}

impl<'a, A: RawAllocator + Default + 'a> AllocatorHandle<'a, A> for StatelessHandle<A> {
    const IS_STATEFUL: bool = false;

    fn from_allocator(_allocator: &'a mut A) -> Self {
        Self::new()
    }

    #[inline]
    fn with<R>(&mut self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut A::default())
    }

    #[inline]
    fn with_ref<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&A::default())
    }

    fn same_resource(&self, _other: &Self) -> bool {
        true
    }
}

/// Allocators whose clones refer to one underlying resource
pub trait SharedAllocator: RawAllocator + Clone {
    /// Whether `self` and `other` manage the same memory
    fn shares_resource_with(&self, other: &Self) -> bool;
}

/// Handle that stores a clone of a [`SharedAllocator`]
#[derive(Debug, Clone)]
pub struct SharedHandle<A>(A);

impl<'a, A: SharedAllocator + 'a> AllocatorHandle<'a, A> for SharedHandle<A> {
    const IS_STATEFUL: bool = true;

    fn from_allocator(allocator: &'a mut A) -> Self {
        Self(allocator.clone())
    }

    #[inline]
    fn with<R>(&mut self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.0)
    }

    #[inline]
    fn with_ref<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.0)
    }

    fn same_resource(&self, other: &Self) -> bool {
        self.0.shares_resource_with(&other.0)
    }
}

// Single-threaded shared ownership of any allocator.
// SAFETY: every call borrows the one inner allocator, so memory is handed
// out and returned by the same allocator whichever clone is used.
unsafe impl<A: RawAllocator> RawAllocator for Rc<RefCell<A>> {
    type Handle<'a>
        = SharedHandle<Self>
    where
        Self: 'a;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        self.borrow_mut().allocate_node(size, alignment)
    }

    unsafe fn deallocate_node(&mut self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.borrow_mut().deallocate_node(ptr, size, alignment) }
    }

    fn allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        self.borrow_mut().allocate_array(count, size, alignment)
    }

    unsafe fn deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) {
        // SAFETY: forwarded caller contract.
        unsafe { self.borrow_mut().deallocate_array(ptr, count, size, alignment) }
    }

    fn max_node_size(&self) -> usize {
        self.borrow().max_node_size()
    }

    fn max_array_size(&self) -> usize {
        self.borrow().max_array_size()
    }

    fn max_alignment(&self) -> usize {
        self.borrow().max_alignment()
    }

    fn info(&self) -> AllocatorInfo {
        self.borrow().info()
    }
}

// SAFETY: forwards to the inner allocator; a failed borrow reports the
// memory as not owned without touching it.
unsafe impl<A: ComposableAllocator> ComposableAllocator for Rc<RefCell<A>> {
    fn try_allocate_node(&mut self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.try_borrow_mut().ok()?.try_allocate_node(size, alignment)
    }

    fn try_allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        self.try_borrow_mut()
            .ok()?
            .try_allocate_array(count, size, alignment)
    }

    unsafe fn try_deallocate_node(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        alignment: usize,
    ) -> bool {
        match self.try_borrow_mut() {
            // SAFETY: forwarded caller contract.
            Ok(mut inner) => unsafe { inner.try_deallocate_node(ptr, size, alignment) },
            Err(_) => false,
        }
    }

    unsafe fn try_deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> bool {
        match self.try_borrow_mut() {
            // SAFETY: forwarded caller contract.
            Ok(mut inner) => unsafe { inner.try_deallocate_array(ptr, count, size, alignment) },
            Err(_) => false,
        }
    }
}

impl<A: RawAllocator> SharedAllocator for Rc<RefCell<A>> {
    fn shares_resource_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

// ============================================================================
// Storage policies
// ============================================================================

/// What an [`AllocatorStorage`] actually holds
pub trait StoragePolicy {
    /// The allocator reached through this storage
    type Allocator: RawAllocator + ?Sized;

    /// Whether two storages may refer to different allocator states
    const IS_STATEFUL: bool;

    /// Runs `f` with exclusive access to the allocator
    fn with<R>(&mut self, f: impl FnOnce(&mut Self::Allocator) -> R) -> R;

    /// Runs `f` with shared access to the allocator
    fn with_ref<R>(&self, f: impl FnOnce(&Self::Allocator) -> R) -> R;

    /// Whether memory from `self` may be returned through `other`
    fn same_resource(&self, other: &Self) -> bool;
}

/// Owns the allocator by value
#[derive(Debug, Default, Clone)]
pub struct DirectStorage<A> {
    allocator: A,
}

impl<A: RawAllocator> DirectStorage<A> {
    /// Wraps `allocator`
    pub const fn new(allocator: A) -> Self {
        Self { allocator }
    }

    /// Returns the stored allocator
    pub fn into_inner(self) -> A {
        self.allocator
    }
}

impl<A: RawAllocator> StoragePolicy for DirectStorage<A> {
    type Allocator = A;

    const IS_STATEFUL: bool = true;

    #[inline]
    fn with<R>(&mut self, f: impl FnOnce(&mut A) -> R) -> R {
        f(&mut self.allocator)
    }

    #[inline]
    fn with_ref<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.allocator)
    }

    fn same_resource(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

/// Holds an [`AllocatorHandle`], never the allocator itself
pub struct ReferenceStorage<'a, A: RawAllocator + ?Sized + 'a> {
    handle: A::Handle<'a>,
}

impl<'a, A: RawAllocator + ?Sized + 'a> ReferenceStorage<'a, A> {
    /// References `allocator`
    pub fn new(allocator: &'a mut A) -> Self {
        Self::from_handle(<A::Handle<'a> as AllocatorHandle<'a, A>>::from_allocator(allocator))
    }

    /// Wraps an existing handle
    pub fn from_handle(handle: A::Handle<'a>) -> Self {
        Self { handle }
    }

    /// The stored handle
    pub fn handle(&self) -> &A::Handle<'a> {
        &self.handle
    }
}

impl<'a, A: RawAllocator + ?Sized + 'a> Clone for ReferenceStorage<'a, A> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
        }
    }
}

impl<'a, A: RawAllocator + ?Sized + 'a> StoragePolicy for ReferenceStorage<'a, A> {
    type Allocator = A;

    const IS_STATEFUL: bool = <A::Handle<'a> as AllocatorHandle<'a, A>>::IS_STATEFUL;

    #[inline]
    fn with<R>(&mut self, f: impl FnOnce(&mut A) -> R) -> R {
        self.handle.with(f)
    }

    #[inline]
    fn with_ref<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        self.handle.with_ref(f)
    }

    fn same_resource(&self, other: &Self) -> bool {
        self.handle.same_resource(&other.handle)
    }
}

// ============================================================================
// Locking
// ============================================================================

/// Lock that never blocks; the default for single-threaded storage
///
/// The `Cell` keeps storages using it `!Sync`. Locking it again while a
/// guard is alive panics, like a second `RefCell::borrow_mut`.
pub struct NoMutex(Cell<bool>);

// SAFETY: the type is `!Sync`, so it is only ever locked from one thread,
// and the flag turns a second lock on that thread into a panic. At most
// one guard exists at a time.
unsafe impl RawMutex for NoMutex {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self(Cell::new(false));

    type GuardMarker = GuardNoSend;

    #[inline]
    fn lock(&self) {
        assert!(self.try_lock(), "allocator storage is already locked");
    }

    #[inline]
    fn try_lock(&self) -> bool {
        !self.0.replace(true)
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.0.set(false);
    }
}

// ============================================================================
// AllocatorStorage
// ============================================================================

/// Uniform, optionally locked front for any storage policy
pub struct AllocatorStorage<S, M: RawMutex = NoMutex> {
    storage: lock_api::Mutex<M, S>,
}

/// Owns an allocator, single-threaded
pub type AllocatorAdapter<A> = AllocatorStorage<DirectStorage<A>, NoMutex>;

/// Owns an allocator behind a `parking_lot` mutex
pub type ThreadSafeAllocator<A> = AllocatorStorage<DirectStorage<A>, parking_lot::RawMutex>;

/// References an allocator according to its classification
pub type AllocatorReference<'a, A, M = NoMutex> = AllocatorStorage<ReferenceStorage<'a, A>, M>;

/// Wraps `allocator` in an owning, unlocked storage
pub fn make_allocator_adapter<A: RawAllocator>(allocator: A) -> AllocatorAdapter<A> {
    AllocatorStorage::new(DirectStorage::new(allocator))
}

/// Wraps `allocator` in an owning storage guarded by a `parking_lot` mutex
pub fn make_thread_safe_allocator<A: RawAllocator>(allocator: A) -> ThreadSafeAllocator<A> {
    AllocatorStorage::new(DirectStorage::new(allocator))
}

/// Creates a reference to `allocator`
pub fn make_allocator_reference<'a, A: RawAllocator + ?Sized + 'a>(
    allocator: &'a mut A,
) -> AllocatorReference<'a, A> {
    AllocatorStorage::new(ReferenceStorage::new(allocator))
}

impl<S, M: RawMutex> AllocatorStorage<S, M> {
    /// Wraps a storage policy value
    pub fn new(storage: S) -> Self {
        Self {
            storage: lock_api::Mutex::new(storage),
        }
    }

    /// Locks the storage for a sequence of operations
    pub fn lock(&self) -> lock_api::MutexGuard<'_, M, S> {
        self.storage.lock()
    }

    /// Direct access without locking
    pub fn get_mut(&mut self) -> &mut S {
        self.storage.get_mut()
    }

    /// Returns the storage policy value
    pub fn into_inner(self) -> S {
        self.storage.into_inner()
    }
}

impl<S: StoragePolicy, M: RawMutex> AllocatorStorage<S, M> {
    /// Whether distinct storages may refer to distinct allocator states
    pub const IS_STATEFUL: bool = S::IS_STATEFUL;

    /// Allocates a node from the stored allocator
    pub fn allocate_node(&self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        self.storage
            .lock()
            .with(|allocator| allocator.allocate_node(size, alignment))
    }

    /// Allocates an array from the stored allocator
    pub fn allocate_array(
        &self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        self.storage
            .lock()
            .with(|allocator| allocator.allocate_array(count, size, alignment))
    }

    /// Returns a node to the stored allocator
    ///
    /// # Safety
    /// See [`RawAllocator::deallocate_node`].
    pub unsafe fn deallocate_node(&self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        self.storage.lock().with(|allocator| {
            // SAFETY: forwarded caller contract.
            unsafe { allocator.deallocate_node(ptr, size, alignment) }
        });
    }

    /// Returns an array to the stored allocator
    ///
    /// # Safety
    /// See [`RawAllocator::deallocate_array`].
    pub unsafe fn deallocate_array(
        &self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) {
        self.storage.lock().with(|allocator| {
            // SAFETY: forwarded caller contract.
            unsafe { allocator.deallocate_array(ptr, count, size, alignment) }
        });
    }

    /// See [`RawAllocator::max_node_size`]
    pub fn max_node_size(&self) -> usize {
        self.storage.lock().with_ref(|allocator| allocator.max_node_size())
    }

    /// See [`RawAllocator::max_array_size`]
    pub fn max_array_size(&self) -> usize {
        self.storage
            .lock()
            .with_ref(|allocator| allocator.max_array_size())
    }

    /// See [`RawAllocator::max_alignment`]
    pub fn max_alignment(&self) -> usize {
        self.storage.lock().with_ref(|allocator| allocator.max_alignment())
    }

    /// Diagnostic tag of the stored allocator
    pub fn info(&self) -> AllocatorInfo {
        self.storage.lock().with_ref(|allocator| allocator.info())
    }

    /// Whether memory from `self` may be returned through `other`
    pub fn same_resource(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        // Both locks are always taken in address order.
        if ptr::from_ref(self).addr() < ptr::from_ref(other).addr() {
            let this = self.storage.lock();
            let other = other.storage.lock();
            this.same_resource(&other)
        } else {
            let other = other.storage.lock();
            let this = self.storage.lock();
            this.same_resource(&other)
        }
    }
}

impl<S, M> AllocatorStorage<S, M>
where
    S: StoragePolicy,
    S::Allocator: ComposableAllocator,
    M: RawMutex,
{
    /// See [`ComposableAllocator::try_allocate_node`]
    pub fn try_allocate_node(&self, size: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.storage
            .lock()
            .with(|allocator| allocator.try_allocate_node(size, alignment))
    }

    /// See [`ComposableAllocator::try_allocate_array`]
    pub fn try_allocate_array(
        &self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> Option<NonNull<u8>> {
        self.storage
            .lock()
            .with(|allocator| allocator.try_allocate_array(count, size, alignment))
    }

    /// See [`ComposableAllocator::try_deallocate_node`]
    ///
    /// # Safety
    /// Forwarded contract.
    pub unsafe fn try_deallocate_node(&self, ptr: NonNull<u8>, size: usize, alignment: usize) -> bool {
        self.storage.lock().with(|allocator| {
            // SAFETY: forwarded caller contract.
            unsafe { allocator.try_deallocate_node(ptr, size, alignment) }
        })
    }

    /// See [`ComposableAllocator::try_deallocate_array`]
    ///
    /// # Safety
    /// Forwarded contract.
    pub unsafe fn try_deallocate_array(
        &self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> bool {
        self.storage.lock().with(|allocator| {
            // SAFETY: forwarded caller contract.
            unsafe { allocator.try_deallocate_array(ptr, count, size, alignment) }
        })
    }
}

impl<S: Clone, M: RawMutex> Clone for AllocatorStorage<S, M> {
    fn clone(&self) -> Self {
        Self::new(self.storage.lock().clone())
    }
}

impl<S: Default, M: RawMutex> Default for AllocatorStorage<S, M> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S, M: RawMutex> fmt::Debug for AllocatorStorage<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatorStorage").finish_non_exhaustive()
    }
}

// SAFETY: forwards to the stored allocator through `&mut self`.
unsafe impl<S: StoragePolicy, M: RawMutex> RawAllocator for AllocatorStorage<S, M> {
    type Handle<'a>
        = StatefulHandle<'a, Self>
    where
        Self: 'a;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        self.storage
            .get_mut()
            .with(|allocator| allocator.allocate_node(size, alignment))
    }

    unsafe fn deallocate_node(&mut self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        self.storage.get_mut().with(|allocator| {
            // SAFETY: forwarded caller contract.
            unsafe { allocator.deallocate_node(ptr, size, alignment) }
        });
    }

    fn allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        self.storage
            .get_mut()
            .with(|allocator| allocator.allocate_array(count, size, alignment))
    }

    unsafe fn deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) {
        self.storage.get_mut().with(|allocator| {
            // SAFETY: forwarded caller contract.
            unsafe { allocator.deallocate_array(ptr, count, size, alignment) }
        });
    }

    fn max_node_size(&self) -> usize {
        Self::max_node_size(self)
    }

    fn max_array_size(&self) -> usize {
        Self::max_array_size(self)
    }

    fn max_alignment(&self) -> usize {
        Self::max_alignment(self)
    }

    fn info(&self) -> AllocatorInfo {
        Self::info(self)
    }
}
