//! A lock-free intrusive stack.
//!
//! [`Stack`] is a [Treiber stack]: a singly linked list whose head is swapped
//! with compare-and-swap, so any number of threads may push and pop at once
//! without taking a lock. The head carries a generation tag alongside the
//! pointer to the top node, and writing a new top bumps the tag past the
//! head it replaces. While the stack stays non-empty, a thread whose CAS is
//! based on a stale view of the head therefore fails even when the same node
//! address has since been popped, reused, and pushed back (the
//! [ABA problem]). See the implementation notes for when that protection
//! runs out.
//!
//! The stack is _intrusive_: it never allocates or frees anything. Callers
//! own [`Node`]s and hand the stack pointers to them, which makes it a
//! suitable building block for freelists, memory pools and work queues.
//!
//! # Examples
//!
//! ```
//! use std::ptr::NonNull;
//! use tagged_stack::{Node, Stack};
//!
//! let stack = Stack::new();
//! let mut a = Node::new("a");
//! let mut b = Node::new("b");
//!
//! unsafe {
//!     stack.push(NonNull::from(&mut a));
//!     stack.push(NonNull::from(&mut b));
//! }
//!
//! let top = stack.pop().unwrap();
//! assert_eq!(unsafe { *top.as_ref().value() }, "b");
//! let next = stack.pop().unwrap();
//! assert_eq!(unsafe { *next.as_ref().value() }, "a");
//! assert!(stack.pop().is_none());
//! ```
//!
//! # Implementation notes
//!
//! On 64-bit targets the head is a single `usize`: the low 48 bits hold the
//! address of the top node and the high 16 bits hold the tag. On 32-bit
//! targets the address fills a whole word, so the head is a `u64` holding a
//! 32-bit address and a 32-bit tag, updated with a double-word CAS.
//!
//! The tag does not only grow. A pop that takes the last node tags the new
//! empty head one past that pop's own starting guess of `(null, 0)`, not one
//! past the head it replaced, so draining the stack drops the tag back to a
//! small value (usually 1). Pushes after that count up from there again, and
//! a `(pointer, tag)` pair the head held before the stack emptied can come
//! back after only a few operations. A thread that stalled holding that old
//! head can then complete its CAS and install a stale `next` pointer. The
//! tag only protects against ABA across updates that don't empty the stack,
//! and even then only until it wraps around at 2<sup>16</sup> (or
//! 2<sup>32</sup>). Uses that can drain the stack while another thread may
//! be stalled in `pop` need another reclamation or reuse discipline on top.
//!
//! [Treiber stack]: https://en.wikipedia.org/wiki/Treiber_stack
//! [ABA problem]: https://en.wikipedia.org/wiki/ABA_problem
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_debug_implementations, missing_docs, rust_2018_idioms)]

#[macro_use]
mod macros;

pub(crate) mod cfg;
mod stack;
pub(crate) mod sync;
mod tagged;
#[cfg(not(loom))]
#[cfg_attr(docsrs, doc(cfg(not(loom))))]
pub mod workload;

pub use self::stack::{Node, Stack};

use cfg::Word;

/// A field packed into some of the bits of a head word.
///
/// Each field sits directly above its `Prev` field, so a layout is a chain
/// of `Pack` impls starting from `()`.
pub(crate) trait Pack: Sized {
    const LEN: usize;

    const BITS: Word = cfg::make_mask(Self::LEN);
    const SHIFT: usize = Self::Prev::SHIFT + Self::Prev::LEN;
    const MASK: Word = Self::BITS << Self::SHIFT;

    type Prev: Pack;

    fn as_word(&self) -> Word;
    fn from_word(val: Word) -> Self;

    #[inline(always)]
    fn pack(&self, to: Word) -> Word {
        let value = self.as_word();
        debug_assert!(value <= Self::BITS);

        (to & !Self::MASK) | (value << Self::SHIFT)
    }

    #[inline(always)]
    fn from_packed(from: Word) -> Self {
        let value = (from & Self::MASK) >> Self::SHIFT;
        debug_assert!(value <= Self::BITS);
        Self::from_word(value)
    }
}

impl Pack for () {
    const BITS: Word = 0;
    const LEN: usize = 0;
    const SHIFT: usize = 0;
    const MASK: Word = 0;

    type Prev = ();

    fn as_word(&self) -> Word {
        unreachable!()
    }
    fn from_word(_val: Word) -> Self {
        unreachable!()
    }

    fn pack(&self, _to: Word) -> Word {
        unreachable!()
    }

    fn from_packed(_from: Word) -> Self {
        unreachable!()
    }
}

#[cfg(all(test, loom))]
mod tests;
