use std::sync::atomic::{AtomicUsize, Ordering};

static RAN: AtomicUsize = AtomicUsize::new(0);

fn worker() {
    RAN.fetch_add(1, Ordering::Relaxed);
    uthread::yield_now();
    RAN.fetch_add(1, Ordering::Relaxed);
}

#[uthread::start]
fn main() {
    uthread::create(worker).unwrap();
    uthread::create(worker).unwrap();
    assert_eq!(RAN.load(Ordering::Relaxed), 0);
}
