//! A multithreaded push/pop workload for measuring a [`Stack`].
//!
//! Every thread owns a few nodes. In each loop it pushes all of them and
//! then pops the same number back, so a thread may end up holding nodes
//! that another thread started with. Since every thread pops only as many
//! nodes as it has just pushed, the stack can never be empty when a pop
//! runs, and every slot should be full again at the end. A thread reports
//! each empty slot as a node that failed to return. With a correct stack
//! that count is always zero.
//!
//! # Examples
//!
//! ```
//! use tagged_stack::workload::Workload;
//!
//! let workload = Workload::builder()
//!     .threads(2)
//!     .loops(1_000)
//!     .nodes_per_thread(4)
//!     .finish()
//!     .unwrap();
//! let report = workload.run();
//!
//! assert_eq!(report.missing(), 0);
//! assert_eq!(report.operations(), 2 * 1_000 * 4 * 2);
//! println!("{}", report);
//! ```
use crate::{Node, Stack};
use std::{
    convert::TryFrom,
    fmt,
    ptr::NonNull,
    sync::{Arc, Barrier},
    thread,
    time::{Duration, Instant},
};

/// A validated workload configuration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Workload {
    threads: usize,
    loops: usize,
    nodes_per_thread: usize,
}

/// Configures a [`Workload`].
///
/// Returned by [`Workload::builder`].
#[derive(Debug, Clone)]
pub struct Builder {
    threads: usize,
    loops: usize,
    nodes_per_thread: usize,
}

/// An invalid [`Workload`] configuration.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum Error {
    /// A knob was set to zero.
    #[error("workload needs at least one {knob}")]
    Zero {
        /// The name of the knob.
        knob: &'static str,
    },
    /// The total number of operations does not fit in a `u64`.
    #[error(
        "{threads} threads x {loops} loops x {nodes_per_thread} nodes overflows the operation count"
    )]
    TooManyOperations {
        /// Configured thread count.
        threads: usize,
        /// Configured loop count.
        loops: usize,
        /// Configured nodes per thread.
        nodes_per_thread: usize,
    },
}

/// The outcome of [`Workload::run`].
#[derive(Debug, Clone)]
pub struct Report {
    threads: Vec<ThreadReport>,
    operations: u64,
    left_on_stack: usize,
}

/// What one workload thread observed.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ThreadReport {
    /// The thread's index, in spawn order.
    pub index: usize,
    /// Wall-clock time the thread spent in its push/pop loop.
    pub elapsed: Duration,
    /// How many of the thread's slots were empty at the end.
    pub missing: usize,
}

/// A node pointer on its way back to the coordinating thread.
struct Held(NonNull<Node<()>>);

// The worker that sends a `Held` no longer touches the node.
unsafe impl Send for Held {}

// === impl Workload ===

impl Workload {
    const DEFAULT_THREADS: usize = 4;
    const DEFAULT_LOOPS: usize = 100_000;
    const DEFAULT_NODES_PER_THREAD: usize = 1;

    /// Returns a [`Builder`] with the default configuration: 4 threads,
    /// 100 000 loops, and 1 node per thread.
    pub fn builder() -> Builder {
        Builder {
            threads: Self::DEFAULT_THREADS,
            loops: Self::DEFAULT_LOOPS,
            nodes_per_thread: Self::DEFAULT_NODES_PER_THREAD,
        }
    }

    /// The number of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// The number of push/pop rounds per thread.
    pub fn loops(&self) -> usize {
        self.loops
    }

    /// The number of nodes each thread starts with.
    pub fn nodes_per_thread(&self) -> usize {
        self.nodes_per_thread
    }

    /// Runs the workload against a fresh [`Stack`].
    ///
    /// All threads start together. Nodes are only freed after every thread
    /// has been joined, since a thread may still be reading a node that
    /// another thread has already popped.
    ///
    /// # Panics
    ///
    /// If a worker thread panics, the panic is propagated.
    pub fn run(&self) -> Report {
        let stack = Arc::new(Stack::new());
        let start = Arc::new(Barrier::new(self.threads));

        let handles: Vec<_> = (0..self.threads)
            .map(|index| {
                let stack = stack.clone();
                let start = start.clone();
                let (loops, nodes) = (self.loops, self.nodes_per_thread);
                thread::spawn(move || worker(index, &stack, &start, loops, nodes))
            })
            .collect();

        let mut threads = Vec::with_capacity(self.threads);
        let mut held = Vec::with_capacity(self.threads * self.nodes_per_thread);
        for handle in handles {
            let (report, nodes) = handle
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            threads.push(report);
            held.extend(nodes);
        }

        let mut left_on_stack = 0;
        while let Some(node) = stack.pop() {
            left_on_stack += 1;
            held.push(Held(node));
        }

        for Held(node) in held {
            // Safety: every worker has exited, so nothing can still reach
            // the node, and it was allocated by `worker` with `Box`.
            drop(unsafe { Box::from_raw(node.as_ptr()) });
        }

        Report {
            threads,
            operations: self.operations(),
            left_on_stack,
        }
    }

    fn operations(&self) -> u64 {
        // `Builder::finish` checked that this can't overflow.
        (self.threads * self.loops * self.nodes_per_thread * 2) as u64
    }
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            threads: Self::DEFAULT_THREADS,
            loops: Self::DEFAULT_LOOPS,
            nodes_per_thread: Self::DEFAULT_NODES_PER_THREAD,
        }
    }
}

fn worker(
    index: usize,
    stack: &Stack<()>,
    start: &Barrier,
    loops: usize,
    nodes: usize,
) -> (ThreadReport, Vec<Held>) {
    let mut slots: Vec<Option<NonNull<Node<()>>>> = (0..nodes)
        .map(|_| Some(NonNull::from(Box::leak(Box::new(Node::new(()))))))
        .collect();

    start.wait();
    let t0 = Instant::now();
    for _ in 0..loops {
        for node in slots.iter().flatten() {
            // Safety: this thread holds every node in `slots` exclusively,
            // and nodes are freed only after all threads are joined.
            unsafe { stack.push(*node) };
        }

        for slot in slots.iter_mut() {
            *slot = stack.pop();
        }
    }
    let elapsed = t0.elapsed();

    let missing = slots.iter().filter(|slot| slot.is_none()).count();
    let report = ThreadReport {
        index,
        elapsed,
        missing,
    };
    (report, slots.into_iter().flatten().map(Held).collect())
}

// === impl Builder ===

impl Builder {
    /// Sets the number of worker threads.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets how many push/pop rounds each thread runs.
    pub fn loops(mut self, loops: usize) -> Self {
        self.loops = loops;
        self
    }

    /// Sets how many nodes each thread pushes and pops per round.
    pub fn nodes_per_thread(mut self, nodes_per_thread: usize) -> Self {
        self.nodes_per_thread = nodes_per_thread;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Zero`] if any knob is zero, and
    /// [`Error::TooManyOperations`] if the total operation count would not
    /// fit in a `u64`.
    pub fn finish(self) -> Result<Workload, Error> {
        let Self {
            threads,
            loops,
            nodes_per_thread,
        } = self;

        for &(knob, value) in &[
            ("thread", threads),
            ("loop", loops),
            ("node per thread", nodes_per_thread),
        ] {
            if value == 0 {
                return Err(Error::Zero { knob });
            }
        }

        let too_many = Error::TooManyOperations {
            threads,
            loops,
            nodes_per_thread,
        };
        let operations = threads
            .checked_mul(loops)
            .and_then(|n| n.checked_mul(nodes_per_thread))
            .and_then(|n| n.checked_mul(2))
            .ok_or_else(|| too_many.clone())?;
        if u64::try_from(operations).is_err() {
            return Err(too_many);
        }

        Ok(Workload {
            threads,
            loops,
            nodes_per_thread,
        })
    }
}

// === impl Report ===

impl Report {
    /// Per-thread results, in spawn order.
    pub fn threads(&self) -> &[ThreadReport] {
        &self.threads
    }

    /// The total number of pushes and pops performed.
    pub fn operations(&self) -> u64 {
        self.operations
    }

    /// The slowest thread's elapsed time.
    pub fn max_elapsed(&self) -> Duration {
        self.threads
            .iter()
            .map(|thread| thread.elapsed)
            .max()
            .unwrap_or_default()
    }

    /// The total number of nodes that failed to return to their threads.
    pub fn missing(&self) -> usize {
        self.threads.iter().map(|thread| thread.missing).sum()
    }

    /// How many nodes were still on the stack after every thread finished.
    pub fn left_on_stack(&self) -> usize {
        self.left_on_stack
    }

    /// Operations per second, measured against the slowest thread.
    ///
    /// Runs shorter than a millisecond are counted as one millisecond.
    pub fn ops_per_sec(&self) -> u64 {
        let millis = self.max_elapsed().as_millis().max(1);
        let rate = u128::from(self.operations) * 1000 / millis;
        u64::try_from(rate).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "operations per second: {}", self.ops_per_sec())?;
        for thread in &self.threads {
            writeln!(
                f,
                "thread {}: {:?}, {} nodes failed to return",
                thread.index, thread.elapsed, thread.missing
            )?;
        }
        if self.left_on_stack > 0 {
            writeln!(f, "{} nodes left on the stack", self.left_on_stack)?;
        }
        Ok(())
    }
}
