//! Layout of the word that holds a stack's head.
//!
//! On 64-bit targets, user-space virtual addresses only use the low 48 bits,
//! so the tag lives in the 16 high bits of the same `usize` and the head can
//! be swapped with a single-word CAS. On 32-bit targets the address takes the
//! whole native word, so the head is widened to a `u64` holding the address
//! in its low half and a 32-bit tag in its high half, and swapped with a
//! double-word CAS.

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("tagged-stack requires a 32-bit or 64-bit target");

#[cfg(target_pointer_width = "64")]
mod layout {
    pub(crate) type Word = usize;
    pub(crate) type AtomicWord = crate::sync::atomic::AtomicUsize;

    pub(crate) const ADDR_BITS: usize = 48;
}

#[cfg(target_pointer_width = "32")]
mod layout {
    pub(crate) type Word = u64;
    pub(crate) type AtomicWord = crate::sync::atomic::AtomicU64;

    pub(crate) const ADDR_BITS: usize = 32;
}

pub(crate) use self::layout::*;

pub(crate) const WIDTH: usize = std::mem::size_of::<Word>() * 8;

pub(crate) const fn make_mask(bits: usize) -> Word {
    if bits == 0 {
        0
    } else {
        Word::MAX >> (WIDTH - bits)
    }
}
