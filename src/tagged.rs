use crate::cfg::{self, AtomicWord, Word};
use crate::sync::atomic::Ordering;
use crate::Pack;
use std::{fmt, marker::PhantomData, ptr::NonNull};

/// The address half of a packed head word.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct Addr {
    addr: Word,
}

/// A generation counter, bumped every time a head is written with a new
/// top. Two heads holding the same address but different tags are distinct.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub(crate) struct Tag {
    value: Word,
}

/// A `(pointer, tag)` pair packed into one atomically updatable word.
///
/// Equality compares both components, so a CAS against a stale `TaggedPtr`
/// fails when the same address has since been written back under a
/// different tag. It succeeds if the tag has come back around too.
#[repr(transparent)]
pub(crate) struct TaggedPtr<T> {
    packed: Word,
    _ptr: PhantomData<*mut T>,
}

/// An atomic cell holding a [`TaggedPtr`].
pub(crate) struct AtomicTaggedPtr<T> {
    word: AtomicWord,
    _ptr: PhantomData<*mut T>,
}

// === impl Addr ===

impl Pack for Addr {
    const LEN: usize = cfg::ADDR_BITS;

    type Prev = ();

    #[inline(always)]
    fn as_word(&self) -> Word {
        self.addr
    }

    #[inline(always)]
    fn from_word(addr: Word) -> Self {
        debug_assert!(addr <= Self::BITS);
        Self { addr }
    }
}

impl Addr {
    #[inline(always)]
    fn from_ptr<T>(ptr: *mut T) -> Self {
        let addr = ptr as usize as Word;
        assert!(
            addr <= Self::BITS,
            "pointer {:p} does not fit in {} address bits",
            ptr,
            Self::LEN
        );
        Self { addr }
    }

    #[inline(always)]
    fn as_ptr<T>(self) -> *mut T {
        self.addr as usize as *mut T
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Addr")
            .field(&format_args!("{:#x}", self.addr))
            .finish()
    }
}

// === impl Tag ===

impl Pack for Tag {
    /// The tag gets every bit the address doesn't use.
    const LEN: usize = cfg::WIDTH - Addr::LEN;

    type Prev = Addr;

    #[inline(always)]
    fn as_word(&self) -> Word {
        self.value
    }

    #[inline(always)]
    fn from_word(value: Word) -> Self {
        debug_assert!(value <= Self::BITS);
        Self { value }
    }
}

impl Tag {
    pub(crate) const ZERO: Self = Self { value: 0 };

    /// Returns the following generation, wrapping around at the tag width.
    #[inline(always)]
    pub(crate) fn next(self) -> Self {
        Self {
            value: self.value.wrapping_add(1) & Self::BITS,
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tag").field(&self.value).finish()
    }
}

// === impl TaggedPtr ===

impl<T> TaggedPtr<T> {
    /// The empty head, `(null, 0)`.
    #[inline(always)]
    pub(crate) fn null() -> Self {
        Self::from_word(0)
    }

    /// A head pointing at `ptr` with a zero tag.
    #[inline(always)]
    pub(crate) fn new(ptr: *mut T) -> Self {
        Self::from_parts(ptr, Tag::ZERO)
    }

    #[inline(always)]
    pub(crate) fn from_parts(ptr: *mut T, tag: Tag) -> Self {
        Self::from_word(tag.pack(Addr::from_ptr(ptr).pack(0)))
    }

    /// Returns the pointer component, with the tag bits masked off.
    #[inline(always)]
    pub(crate) fn next_pointer(self) -> *mut T {
        Addr::from_packed(self.packed).as_ptr()
    }

    #[inline(always)]
    pub(crate) fn as_non_null(self) -> Option<NonNull<T>> {
        NonNull::new(self.next_pointer())
    }

    #[inline(always)]
    pub(crate) fn is_null(self) -> bool {
        self.next_pointer().is_null()
    }

    #[inline(always)]
    pub(crate) fn tag(self) -> Tag {
        Tag::from_packed(self.packed)
    }

    /// Returns this pointer with its tag set to one past `previous`'s tag.
    #[inline(always)]
    pub(crate) fn create_tag(self, previous: Self) -> Self {
        Self::from_word(previous.tag().next().pack(self.packed))
    }

    /// Returns a head pointing at `ptr`.
    ///
    /// A non-null `ptr` is tagged one past `reference`. A null `ptr` is
    /// tagged one past `self` instead. When `self` is a fresh `(null, 0)`
    /// candidate, that puts the empty head back at tag 1 regardless of how
    /// far `reference` had counted.
    #[inline]
    pub(crate) fn set(self, ptr: *mut T, reference: Self) -> Self {
        let next = Self::new(ptr);
        if ptr.is_null() {
            next.create_tag(self)
        } else {
            next.create_tag(reference)
        }
    }

    #[inline(always)]
    fn from_word(packed: Word) -> Self {
        Self {
            packed,
            _ptr: PhantomData,
        }
    }
}

impl<T> Clone for TaggedPtr<T> {
    #[inline(always)]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaggedPtr<T> {}

impl<T> PartialEq for TaggedPtr<T> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.packed == other.packed
    }
}

impl<T> Eq for TaggedPtr<T> {}

impl<T> fmt::Debug for TaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedPtr")
            .field("ptr", &self.next_pointer())
            .field("tag", &self.tag())
            .finish()
    }
}

// === impl AtomicTaggedPtr ===

impl<T> AtomicTaggedPtr<T> {
    pub(crate) fn null() -> Self {
        Self {
            word: AtomicWord::new(0),
            _ptr: PhantomData,
        }
    }

    #[inline(always)]
    pub(crate) fn load(&self, order: Ordering) -> TaggedPtr<T> {
        TaggedPtr::from_word(self.word.load(order))
    }

    #[inline(always)]
    pub(crate) fn compare_exchange(
        &self,
        current: TaggedPtr<T>,
        new: TaggedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr<T>, TaggedPtr<T>> {
        self.word
            .compare_exchange(current.packed, new.packed, success, failure)
            .map(TaggedPtr::from_word)
            .map_err(TaggedPtr::from_word)
    }

    #[inline(always)]
    pub(crate) fn compare_exchange_weak(
        &self,
        current: TaggedPtr<T>,
        new: TaggedPtr<T>,
        success: Ordering,
        failure: Ordering,
    ) -> Result<TaggedPtr<T>, TaggedPtr<T>> {
        self.word
            .compare_exchange_weak(current.packed, new.packed, success, failure)
            .map(TaggedPtr::from_word)
            .map_err(TaggedPtr::from_word)
    }
}

impl<T> fmt::Debug for AtomicTaggedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.load(Ordering::Relaxed), f)
    }
}
