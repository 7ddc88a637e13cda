use crate::sync::atomic::{AtomicPtr, Ordering};
use crate::tagged::{AtomicTaggedPtr, TaggedPtr};
use crossbeam_utils::CachePadded;
use std::{
    fmt,
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
};

/// A lock-free LIFO stack of caller-owned [`Node`]s.
///
/// The stack only links and unlinks nodes; it never allocates or frees them.
/// See the [crate-level documentation](crate) for how the head is tagged.
pub struct Stack<T> {
    head: CachePadded<AtomicTaggedPtr<Node<T>>>,
}

/// An element that can be linked into a [`Stack`].
///
/// Besides the caller's value, a node holds the link to the node below it
/// while it is on a stack.
pub struct Node<T> {
    next: AtomicPtr<Node<T>>,
    #[cfg(debug_assertions)]
    linked: crate::sync::atomic::AtomicBool,
    value: T,
}

// === impl Stack ===

impl<T> Stack<T> {
    /// Returns a new, empty stack.
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicTaggedPtr::null()),
        }
    }

    /// Pushes `node` onto the top of the stack.
    ///
    /// This always succeeds, though it may retry internally while other
    /// threads are updating the stack.
    ///
    /// # Safety
    ///
    /// - The caller must have exclusive access to `node`, and `node` must not
    ///   currently be linked into this or any other stack.
    /// - `node` must stay valid until it has been popped *and* no other
    ///   operation on this stack that started before that pop is still in
    ///   flight. A concurrent [`pop`](Self::pop) may read the link of a node
    ///   that another thread has just popped, so the node's memory may be
    ///   reused as another `Node<T>` but not deallocated while the stack is
    ///   in use.
    ///
    /// # Panics
    ///
    /// Panics if `node`'s address does not fit in the head's address field
    /// (48 bits on 64-bit targets), since the high bits would otherwise spill
    /// into the tag. With debug assertions enabled, also panics if `node` is
    /// already linked into a stack.
    pub unsafe fn push(&self, node: NonNull<Node<T>>) {
        let ptr = node.as_ptr();
        let node = node.as_ref();
        #[cfg(debug_assertions)]
        {
            let was_linked = node.linked.swap(true, Ordering::Relaxed);
            assert!(!was_linked, "pushed node {:p} is already linked", ptr);
        }

        node.next.store(ptr::null_mut(), Ordering::Relaxed);
        let mut new_head = TaggedPtr::new(ptr);

        // Fast path: the stack is empty and has never been written.
        let mut head = match self.head.compare_exchange(
            TaggedPtr::null(),
            new_head,
            Ordering::Release,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                test_println!("-> push {:p}; was empty", ptr);
                return;
            }
            Err(actual) => actual,
        };

        loop {
            test_println!("-> push {:p}; head={:?}", ptr, head);
            node.next.store(head.next_pointer(), Ordering::Relaxed);
            new_head = new_head.create_tag(head);

            match self.head.compare_exchange(
                head,
                new_head,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    test_println!("-> push {:p}; successful, new_head={:?}", ptr, new_head);
                    return;
                }
                // lost the race!
                Err(actual) => {
                    debug_assert_ne!(
                        actual, head,
                        "strong compare_exchange failed against an unchanged head"
                    );
                    test_println!("-> push {:p}; retry, actual={:?}", ptr, actual);
                    head = actual;
                }
            }
        }
    }

    /// Removes the top node from the stack and returns it, or returns `None`
    /// if the stack is empty.
    ///
    /// The returned node belongs to the caller again. Its link still points
    /// wherever it pointed while it was on the stack, which means nothing to
    /// the caller.
    pub fn pop(&self) -> Option<NonNull<Node<T>>> {
        // Start from a guess that the stack is empty. If it is, the CAS
        // swaps the empty head for itself and we're done; otherwise it hands
        // us the real head to work from.
        let mut head = TaggedPtr::null();
        let mut new_head = TaggedPtr::null();
        loop {
            match self.head.compare_exchange_weak(
                head,
                new_head,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let top = head.as_non_null()?;
                    test_println!("-> pop {:?}; new_head={:?}", top, new_head);
                    #[cfg(debug_assertions)]
                    unsafe {
                        // the successful CAS made us the node's only owner.
                        top.as_ref().linked.store(false, Ordering::Relaxed);
                    }
                    return Some(top);
                }
                Err(actual) => {
                    head = actual;
                    let top = match head.as_non_null() {
                        Some(top) => top,
                        None => {
                            test_println!("-> pop; empty, head={:?}", head);
                            return None;
                        }
                    };
                    // Safety: nodes stay valid while the stack may still hand
                    // them out (see `push`). If `top` was popped in the
                    // meantime, `next` may be stale, but then the head's tag
                    // has moved on and the CAS below fails.
                    let next = unsafe { top.as_ref() }.next.load(Ordering::Relaxed);
                    new_head = new_head.set(next, head);
                    test_println!("-> pop; retry, head={:?}; new_head={:?}", head, new_head);
                }
            }
        }
    }

    /// Returns `true` if the stack held no nodes when it was checked.
    ///
    /// Other threads may push or pop at any time, so the answer can be out
    /// of date by the time it is returned.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    #[cfg(test)]
    pub(crate) fn head(&self) -> &AtomicTaggedPtr<Node<T>> {
        &self.head
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack").field("head", &*self.head).finish()
    }
}

// Nodes are handed between threads through the stack.
unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

// === impl Node ===

impl<T> Node<T> {
    /// Returns a new, unlinked node holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            #[cfg(debug_assertions)]
            linked: crate::sync::atomic::AtomicBool::new(false),
            value,
        }
    }

    /// Returns a reference to the node's value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Returns a mutable reference to the node's value.
    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Consumes the node, returning its value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Node<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Node<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: fmt::Debug> fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("next", &self.next.load(Ordering::Relaxed))
            .field("value", &self.value)
            .finish()
    }
}
