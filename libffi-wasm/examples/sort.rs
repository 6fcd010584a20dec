// Example: sorting through a closure invoked the way a host would invoke
// it, via a wasm table slot rather than a native function pointer.
//
// On a real wasm32 target there is no libc to link `qsort` from, and the
// comparator can't be handed to a host as a callable Rust value anyway —
// only as a table index. This demo plays the role of the host itself: it
// runs its own insertion sort, but every comparison goes through
// `FnPtr2::call`, which exercises the same indirect-call path
// (`libffi_wasm_sys::host::mock::invoke_closure`) that a JS runtime or a
// WASI-like embedder would use when calling back into wasm.
//
// Run with: cargo run --example sort --features host-mock

use libffi_wasm::high::Closure2;

fn sort<T: Ord>(array: &mut [T]) {
    let lambda = |x: *const T, y: *const T| {
        let x = unsafe { &*x };
        let y = unsafe { &*y };
        match x.cmp(y) {
            core::cmp::Ordering::Less => -1i32,
            core::cmp::Ordering::Equal => 0,
            core::cmp::Ordering::Greater => 1,
        }
    };
    let compare = Closure2::new(&lambda);
    let compare = compare.code_ptr();

    // Insertion sort, standing in for the host's own sorting routine.
    for i in 1..array.len() {
        let mut j = i;
        while j > 0 {
            let order = compare.call(&array[j] as *const T, &array[j - 1] as *const T);
            if order < 0 {
                array.swap(j, j - 1);
                j -= 1;
            } else {
                break;
            }
        }
    }
}

fn main() {
    let mut v = vec![3, 4, 8, 1, 2, 0, 9];
    sort(&mut v);

    assert_eq!(vec![0, 1, 2, 3, 4, 8, 9], v);
}
