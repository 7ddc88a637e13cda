pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    pub(crate) mod atomic {
        pub use loom::sync::atomic::*;
        pub use std::sync::atomic::Ordering;
    }
}

#[cfg(not(loom))]
mod inner {
    pub(crate) use std::sync::atomic;
}
