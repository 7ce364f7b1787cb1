//! Minimal benchmark binary.
//!
//! Build it, then drive it like any pulsebench harness:
//!
//! ```text
//! $ timeit list
//! $ timeit measure vec_push -p 5 -n 3 -o vec_push.json
//! $ timeit show -m vec_push.json
//! ```

use pulsebench::prelude::*;

pulsebench::benchmark!("vec_push", || {
    let mut v = Vec::with_capacity(64);
    for i in 0..64u64 {
        v.push(i);
    }
    std::hint::black_box(&v);
});

pulsebench::benchmark!("string_format", || {
    let s = format!("{}-{}", 42u64, "suffix");
    std::hint::black_box(&s);
});

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}
