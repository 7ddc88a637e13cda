use std::{
    ptr::NonNull,
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};
use tagged_stack::Node;

/// Runs a closure per thread against a shared stack, timing from the moment
/// every thread is released until every thread has finished.
#[derive(Clone)]
pub struct MultithreadedBench<T> {
    start: Arc<Barrier>,
    end: Arc<Barrier>,
    stack: Arc<T>,
}

impl<T: Send + Sync + 'static> MultithreadedBench<T> {
    /// `threads` is the number of calls to `thread` that will be made.
    pub fn new(stack: Arc<T>, threads: usize) -> Self {
        // one extra party for the thread calling `run`.
        Self {
            start: Arc::new(Barrier::new(threads + 1)),
            end: Arc::new(Barrier::new(threads + 1)),
            stack,
        }
    }

    pub fn thread(&self, f: impl FnOnce(&Barrier, &T) + Send + 'static) -> &Self {
        let start = self.start.clone();
        let end = self.end.clone();
        let stack = self.stack.clone();
        thread::spawn(move || {
            f(&*start, &*stack);
            end.wait();
        });
        self
    }

    pub fn run(&self) -> Duration {
        self.start.wait();
        let t0 = Instant::now();
        self.end.wait();
        t0.elapsed()
    }
}

/// Heap-allocated nodes that outlive every benchmark thread using them.
pub struct Nodes {
    nodes: Vec<NonNull<Node<()>>>,
}

/// One thread's share of a `Nodes` allocation.
pub struct Slots(pub Vec<Option<NonNull<Node<()>>>>);

unsafe impl Send for Slots {}

impl Nodes {
    pub fn new(len: usize) -> Self {
        let nodes = (0..len)
            .map(|_| NonNull::from(Box::leak(Box::new(Node::new(())))))
            .collect();
        Self { nodes }
    }

    pub fn split(&self, per_thread: usize) -> impl Iterator<Item = Slots> + '_ {
        self.nodes
            .chunks(per_thread)
            .map(|chunk| Slots(chunk.iter().copied().map(Some).collect()))
    }
}

impl Drop for Nodes {
    fn drop(&mut self) {
        for node in self.nodes.drain(..) {
            drop(unsafe { Box::from_raw(node.as_ptr()) });
        }
    }
}
