macro_rules! test_println {
    ($($arg:tt)*) => {
        if cfg!(test) && cfg!(tagged_stack_print) {
            if std::thread::panicking() {
                // loom's scheduler may already be torn down while unwinding,
                // so don't ask it for anything here.
                println!("[PANIC {:>17}:{:<3}] {}", file!(), line!(), format_args!($($arg)*))
            } else {
                println!("[{:?} {:>17}:{:<3}] {}", std::thread::current().id(), file!(), line!(), format_args!($($arg)*))
            }
        }
    }
}

#[cfg(all(test, loom))]
macro_rules! test_dbg {
    ($e:expr) => {
        match $e {
            e => {
                test_println!("{} = {:?}", stringify!($e), &e);
                e
            }
        }
    };
}
