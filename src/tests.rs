use self::util::*;
use crate::sync::atomic::Ordering;
use crate::tagged::TaggedPtr;
use crate::{Node, Stack};
use loom::sync::Arc;
use loom::thread;
use std::ptr::NonNull;

pub(crate) mod util {
    use super::*;

    pub(crate) fn run_model(name: &'static str, f: impl Fn() + Sync + Send + 'static) {
        run_builder(name, loom::model::Builder::new(), f)
    }

    pub(crate) fn run_builder(
        name: &'static str,
        mut builder: loom::model::Builder,
        f: impl Fn() + Sync + Send + 'static,
    ) {
        let iters = std::sync::atomic::AtomicUsize::new(1);
        if builder.preemption_bound.is_none() {
            builder.preemption_bound = std::env::var("LOOM_MAX_PREEMPTIONS")
                .ok()
                .and_then(|max| max.parse().ok())
                .or(Some(3));
        }
        builder.check(move || {
            test_println!(
                "\n------------ running test {}; iteration {} ------------\n",
                name,
                iters.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            );
            f()
        });
    }

    pub(crate) fn alloc<T>(value: T) -> NonNull<Node<T>> {
        NonNull::from(Box::leak(Box::new(Node::new(value))))
    }

    pub(crate) unsafe fn free<T>(node: NonNull<Node<T>>) -> T {
        Box::from_raw(node.as_ptr()).into_inner()
    }

    /// Lets a raw node pointer move into a spawned model thread.
    pub(crate) struct Handle<T>(pub(crate) NonNull<Node<T>>);

    unsafe impl<T: Send> Send for Handle<T> {}
}

#[test]
fn push_push() {
    run_model("push_push", || {
        let stack = Arc::new(Stack::new());
        let a = Handle(alloc(1));
        let b = Handle(alloc(2));
        let (pa, pb) = (a.0, b.0);

        let s = stack.clone();
        let t1 = thread::spawn(move || unsafe { s.push(a.0) });
        let s = stack.clone();
        let t2 = thread::spawn(move || unsafe { s.push(b.0) });

        t1.join().expect("thread 1 should not panic");
        t2.join().expect("thread 2 should not panic");

        let first = stack.pop().expect("two nodes were pushed");
        let second = stack.pop().expect("two nodes were pushed");
        assert!(stack.pop().is_none());
        assert!(
            (first, second) == (pa, pb) || (first, second) == (pb, pa),
            "popped {:?} then {:?}",
            first,
            second
        );

        unsafe {
            free(pa);
            free(pb);
        }
    });
}

#[test]
fn push_pop() {
    run_model("push_pop", || {
        let stack = Arc::new(Stack::new());
        let a = alloc(1);
        let b = Handle(alloc(2));
        let pb = b.0;
        unsafe { stack.push(a) };

        let s = stack.clone();
        let t1 = thread::spawn(move || unsafe { s.push(b.0) });
        let s = stack.clone();
        let t2 = thread::spawn(move || s.pop().map(Handle));

        t1.join().expect("thread 1 should not panic");
        let popped = t2
            .join()
            .expect("thread 2 should not panic")
            .expect("the stack was never empty")
            .0;
        assert!(popped == a || popped == pb);

        let rest = stack.pop().expect("one node should be left");
        assert!(rest != popped && (rest == a || rest == pb));
        assert!(stack.pop().is_none());
        assert!(stack.is_empty());

        unsafe {
            free(a);
            free(pb);
        }
    });
}

#[test]
fn pop_pop_single() {
    run_model("pop_pop_single", || {
        let stack = Arc::new(Stack::new());
        let a = alloc(1);
        unsafe { stack.push(a) };

        let s = stack.clone();
        let t1 = thread::spawn(move || s.pop().map(Handle));
        let s = stack.clone();
        let t2 = thread::spawn(move || s.pop().map(Handle));

        let r1 = t1.join().expect("thread 1 should not panic");
        let r2 = t2.join().expect("thread 2 should not panic");

        match (r1, r2) {
            (Some(node), None) | (None, Some(node)) => assert_eq!(node.0, a),
            (Some(_), Some(_)) => panic!("node was popped twice"),
            (None, None) => panic!("node was lost"),
        }
        assert!(stack.pop().is_none());

        unsafe { free(a) };
    });
}

#[test]
fn pop_empty_concurrently() {
    run_model("pop_empty_concurrently", || {
        let stack = Arc::new(Stack::<usize>::new());
        let before = stack.head().load(Ordering::Acquire);

        let s = stack.clone();
        let t1 = thread::spawn(move || assert!(s.pop().is_none()));
        assert!(stack.pop().is_none());
        t1.join().expect("thread 1 should not panic");

        assert_eq!(stack.head().load(Ordering::Acquire), before);

        let a = alloc(7);
        unsafe { stack.push(a) };
        assert_eq!(stack.pop(), Some(a));
        unsafe { free(a) };
    });
}

#[test]
fn pop_sees_pushed_value() {
    run_model("pop_sees_pushed_value", || {
        let stack = Arc::new(Stack::new());
        let a = Handle(alloc(0usize));

        let s = stack.clone();
        let t1 = thread::spawn(move || unsafe {
            *(*a.0.as_ptr()).value_mut() = 42;
            s.push(a.0);
        });

        let popped = loop {
            if let Some(node) = stack.pop() {
                break node;
            }
            thread::yield_now();
        };
        assert_eq!(unsafe { *popped.as_ref().value() }, 42);

        t1.join().expect("thread 1 should not panic");
        unsafe { free(popped) };
    });
}

#[test]
fn aba() {
    run_model("aba", || {
        let stack = Arc::new(Stack::new());
        let x = alloc(1usize);
        let y = alloc(2usize);
        unsafe {
            stack.push(y);
            stack.push(x);
        }
        let stale = test_dbg!(stack.head().load(Ordering::Acquire));
        let stale_candidate = TaggedPtr::null().set(y.as_ptr(), stale);

        // Pop two nodes, then reuse the first one and push it back to the
        // same address while the main thread is popping.
        let s = stack.clone();
        let t1 = thread::spawn(move || {
            let first = s.pop().map(Handle);
            let second = s.pop().map(Handle);
            if let Some(ref first) = first {
                unsafe {
                    *(*first.0.as_ptr()).value_mut() += 10;
                    s.push(first.0);
                }
            }
            second
        });

        let mine = stack.pop();
        let second = t1.join().expect("thread 1 should not panic");

        // Nodes have left and re-entered the stack since `stale` was read,
        // so a CAS from it must fail even when `x` is on top again.
        assert!(stack
            .head()
            .compare_exchange(stale, stale_candidate, Ordering::AcqRel, Ordering::Acquire)
            .is_err());

        let mut held: Vec<_> = mine.into_iter().chain(second.map(|h| h.0)).collect();
        while let Some(node) = stack.pop() {
            held.push(node);
        }
        held.sort();
        let mut expected = vec![x, y];
        expected.sort();
        assert_eq!(held, expected, "every node comes back exactly once");

        unsafe {
            free(x);
            free(y);
        }
    });
}
