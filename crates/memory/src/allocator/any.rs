//! Type-erased allocator reference
//!
//! [`AnyAllocatorReference`] refers to any [`RawAllocator`] without a type
//! parameter. The concrete allocator's handle is stored in a small inline
//! buffer next to a static table of function pointers, so erasing an
//! allocator never touches the heap.
//!
//! # Safety
//!
//! - The buffer holds exactly one initialized `A::Handle<'a>` for the
//!   lifetime of the reference; the table was created for that same `A`.
//! - Handles larger than [`ANY_REFERENCE_CAPACITY`] or aligned above a
//!   pointer are rejected at compile time where they are first wrapped.

use core::fmt;
use core::marker::PhantomData;
use core::mem::{MaybeUninit, align_of, size_of};
use core::ptr::{self, NonNull};

use crate::debugging::AllocatorInfo;
use crate::error::MemoryResult;

use super::storage::StatefulHandle;
use super::traits::{AllocatorHandle, RawAllocator};

const BUFFER_WORDS: usize = 4;

type Buffer = [MaybeUninit<usize>; BUFFER_WORDS];

/// Largest handle, in bytes, an [`AnyAllocatorReference`] can store
pub const ANY_REFERENCE_CAPACITY: usize = size_of::<Buffer>();

struct AnyVTable {
    allocate_node: unsafe fn(*mut (), usize, usize) -> MemoryResult<NonNull<u8>>,
    deallocate_node: unsafe fn(*mut (), NonNull<u8>, usize, usize),
    allocate_array: unsafe fn(*mut (), usize, usize, usize) -> MemoryResult<NonNull<u8>>,
    deallocate_array: unsafe fn(*mut (), NonNull<u8>, usize, usize, usize),
    max_node_size: unsafe fn(*const ()) -> usize,
    max_array_size: unsafe fn(*const ()) -> usize,
    max_alignment: unsafe fn(*const ()) -> usize,
    info: unsafe fn(*const ()) -> AllocatorInfo,
    clone: unsafe fn(*const (), *mut ()),
    drop: unsafe fn(*mut ()),
    is_stateful: bool,
}

struct VTableFor<'a, A: RawAllocator + ?Sized + 'a>(PhantomData<&'a mut A>);

impl<'a, A: RawAllocator + ?Sized + 'a> VTableFor<'a, A> {
    const FITS: () = assert!(
        size_of::<A::Handle<'a>>() <= size_of::<Buffer>()
            && align_of::<A::Handle<'a>>() <= align_of::<Buffer>(),
        "allocator handle does not fit into AnyAllocatorReference"
    );

    const VTABLE: AnyVTable = AnyVTable {
        allocate_node: Self::allocate_node,
        deallocate_node: Self::deallocate_node,
        allocate_array: Self::allocate_array,
        deallocate_array: Self::deallocate_array,
        max_node_size: Self::max_node_size,
        max_array_size: Self::max_array_size,
        max_alignment: Self::max_alignment,
        info: Self::info,
        clone: Self::clone,
        drop: Self::drop,
        is_stateful: <A::Handle<'a> as AllocatorHandle<'a, A>>::IS_STATEFUL,
    };

    unsafe fn handle<'h>(this: *mut ()) -> &'h mut A::Handle<'a> {
        // SAFETY: `this` points at the buffer holding our handle type.
        unsafe { &mut *this.cast::<A::Handle<'a>>() }
    }

    unsafe fn handle_ref<'h>(this: *const ()) -> &'h A::Handle<'a> {
        // SAFETY: as above.
        unsafe { &*this.cast::<A::Handle<'a>>() }
    }

    unsafe fn allocate_node(this: *mut (), size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        // SAFETY: `this` is the buffer holding this vtable's handle type.
        unsafe { Self::handle(this) }.with(|allocator| allocator.allocate_node(size, alignment))
    }

    unsafe fn deallocate_node(this: *mut (), ptr: NonNull<u8>, size: usize, alignment: usize) {
        // SAFETY: `this` is the buffer holding this vtable's handle type.
        unsafe { Self::handle(this) }.with(|allocator| {
            // SAFETY: forwarded caller contract.
            unsafe { allocator.deallocate_node(ptr, size, alignment) }
        });
    }

    unsafe fn allocate_array(
        this: *mut (),
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        // SAFETY: `this` is the buffer holding this vtable's handle type.
        unsafe { Self::handle(this) }
            .with(|allocator| allocator.allocate_array(count, size, alignment))
    }

    unsafe fn deallocate_array(
        this: *mut (),
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) {
        // SAFETY: `this` is the buffer holding this vtable's handle type.
        unsafe { Self::handle(this) }.with(|allocator| {
            // SAFETY: forwarded caller contract.
            unsafe { allocator.deallocate_array(ptr, count, size, alignment) }
        });
    }

    unsafe fn max_node_size(this: *const ()) -> usize {
        // SAFETY: `this` is the buffer holding this vtable's handle type.
        unsafe { Self::handle_ref(this) }.with_ref(|allocator| allocator.max_node_size())
    }

    unsafe fn max_array_size(this: *const ()) -> usize {
        // SAFETY: `this` is the buffer holding this vtable's handle type.
        unsafe { Self::handle_ref(this) }.with_ref(|allocator| allocator.max_array_size())
    }

    unsafe fn max_alignment(this: *const ()) -> usize {
        // SAFETY: `this` is the buffer holding this vtable's handle type.
        unsafe { Self::handle_ref(this) }.with_ref(|allocator| allocator.max_alignment())
    }

    unsafe fn info(this: *const ()) -> AllocatorInfo {
        // SAFETY: `this` is the buffer holding this vtable's handle type.
        unsafe { Self::handle_ref(this) }.with_ref(|allocator| allocator.info())
    }

    unsafe fn clone(source: *const (), target: *mut ()) {
        // SAFETY: `target` is an uninitialized buffer that fits the handle.
        unsafe {
            let handle = Self::handle_ref(source).clone();
            target.cast::<A::Handle<'a>>().write(handle);
        }
    }

    unsafe fn drop(this: *mut ()) {
        // SAFETY: the handle is initialized and dropped exactly once.
        unsafe { ptr::drop_in_place(this.cast::<A::Handle<'a>>()) }
    }
}

/// Reference to any allocator, stored inline
///
/// # Examples
/// ```
/// use foundation_memory::allocator::{AnyAllocatorReference, HeapAllocator, RawAllocator};
///
/// let mut heap = HeapAllocator::new();
/// let mut any = AnyAllocatorReference::new(&mut heap);
/// let node = any.allocate_node(16, 8).unwrap();
/// unsafe { any.deallocate_node(node, 16, 8) };
/// ```
pub struct AnyAllocatorReference<'a> {
    storage: Buffer,
    vtable: &'static AnyVTable,
    _marker: PhantomData<(&'a mut (), *mut ())>,
}

impl<'a> AnyAllocatorReference<'a> {
    /// Erases a reference to `allocator`
    pub fn new<A: RawAllocator + ?Sized + 'a>(allocator: &'a mut A) -> Self {
        Self::from_handle::<A>(<A::Handle<'a> as AllocatorHandle<'a, A>>::from_allocator(allocator))
    }

    /// Erases an existing handle
    pub fn from_handle<A: RawAllocator + ?Sized + 'a>(handle: A::Handle<'a>) -> Self {
        let () = VTableFor::<'a, A>::FITS;

        let mut storage: Buffer = [MaybeUninit::uninit(); BUFFER_WORDS];
        // SAFETY: `FITS` proved the handle fits size and alignment.
        unsafe { storage.as_mut_ptr().cast::<A::Handle<'a>>().write(handle) };

        Self {
            storage,
            vtable: &VTableFor::<'a, A>::VTABLE,
            _marker: PhantomData,
        }
    }

    /// Whether the erased allocator has per-instance state
    pub fn is_stateful(&self) -> bool {
        self.vtable.is_stateful
    }

    fn this(&self) -> *const () {
        self.storage.as_ptr().cast()
    }

    fn this_mut(&mut self) -> *mut () {
        self.storage.as_mut_ptr().cast()
    }
}

impl Clone for AnyAllocatorReference<'_> {
    fn clone(&self) -> Self {
        let mut storage: Buffer = [MaybeUninit::uninit(); BUFFER_WORDS];
        // SAFETY: same vtable, fresh buffer.
        unsafe { (self.vtable.clone)(self.this(), storage.as_mut_ptr().cast()) };
        Self {
            storage,
            vtable: self.vtable,
            _marker: PhantomData,
        }
    }
}

impl Drop for AnyAllocatorReference<'_> {
    fn drop(&mut self) {
        let drop = self.vtable.drop;
        // SAFETY: the buffer holds an initialized handle.
        unsafe { drop(self.this_mut()) }
    }
}

impl fmt::Debug for AnyAllocatorReference<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyAllocatorReference")
            .field("allocator", &self.info())
            .field("stateful", &self.is_stateful())
            .finish()
    }
}

// SAFETY: every call reaches the erased allocator through its own handle,
// which upholds the allocator contract.
unsafe impl RawAllocator for AnyAllocatorReference<'_> {
    type Handle<'b>
        = StatefulHandle<'b, Self>
    where
        Self: 'b;

    fn allocate_node(&mut self, size: usize, alignment: usize) -> MemoryResult<NonNull<u8>> {
        let allocate = self.vtable.allocate_node;
        // SAFETY: the buffer holds the handle the vtable was built for.
        unsafe { allocate(self.this_mut(), size, alignment) }
    }

    unsafe fn deallocate_node(&mut self, ptr: NonNull<u8>, size: usize, alignment: usize) {
        let deallocate = self.vtable.deallocate_node;
        // SAFETY: as above, plus the forwarded caller contract.
        unsafe { deallocate(self.this_mut(), ptr, size, alignment) }
    }

    fn allocate_array(
        &mut self,
        count: usize,
        size: usize,
        alignment: usize,
    ) -> MemoryResult<NonNull<u8>> {
        let allocate = self.vtable.allocate_array;
        // SAFETY: as above.
        unsafe { allocate(self.this_mut(), count, size, alignment) }
    }

    unsafe fn deallocate_array(
        &mut self,
        ptr: NonNull<u8>,
        count: usize,
        size: usize,
        alignment: usize,
    ) {
        let deallocate = self.vtable.deallocate_array;
        // SAFETY: as above, plus the forwarded caller contract.
        unsafe { deallocate(self.this_mut(), ptr, count, size, alignment) }
    }

    fn max_node_size(&self) -> usize {
        // SAFETY: as above.
        unsafe { (self.vtable.max_node_size)(self.this()) }
    }

    fn max_array_size(&self) -> usize {
        // SAFETY: as above.
        unsafe { (self.vtable.max_array_size)(self.this()) }
    }

    fn max_alignment(&self) -> usize {
        // SAFETY: as above.
        unsafe { (self.vtable.max_alignment)(self.this()) }
    }

    fn info(&self) -> AllocatorInfo {
        // SAFETY: as above.
        unsafe { (self.vtable.info)(self.this()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{HEAP_MAX_ALIGNMENT, HeapAllocator};

    #[test]
    fn stateless_allocator_erases() {
        let mut heap = HeapAllocator::new();
        let mut any = AnyAllocatorReference::new(&mut heap);
        assert!(!any.is_stateful());

        let node = any.allocate_array(4, 8, 8).unwrap();
        unsafe { any.deallocate_array(node, 4, 8, 8) };
        assert_eq!(any.max_alignment(), HEAP_MAX_ALIGNMENT);
    }

    #[test]
    fn clones_share_the_allocator() {
        let mut heap = HeapAllocator::new();
        let any = AnyAllocatorReference::new(&mut heap);
        let mut copy = any.clone();
        let node = copy.allocate_node(8, 8).unwrap();
        drop(any);
        unsafe { copy.deallocate_node(node, 8, 8) };
    }
}
