//! Creates `numthreads` threads that each count to `numexecs`, yielding after every step.

use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};

static NUM_EXECS: AtomicUsize = AtomicUsize::new(0);

fn counter() {
    let id = uthread::current();
    println!("Thread {id} started!");
    for i in 0..NUM_EXECS.load(Ordering::Relaxed) {
        println!("Thread {id}: {i}");
        uthread::yield_now();
    }
    println!("Thread {id} ended!");
    uthread::exit();
}

fn main() -> uthread::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let (num_threads, num_execs) = match &args[..] {
        [_, threads, execs] => match (threads.parse::<usize>(), execs.parse::<usize>()) {
            (Ok(threads), Ok(execs)) => (threads, execs),
            _ => usage(&args[0]),
        },
        _ => usage(args.first().map_or("uthread", String::as_str)),
    };
    NUM_EXECS.store(num_execs, Ordering::Relaxed);

    uthread::init()?;
    for _ in 0..num_threads {
        uthread::create(counter)?;
    }
    uthread::run()?;
    uthread::teardown()?;

    println!("all threads ended.");
    Ok(())
}

fn usage(program: &str) -> ! {
    eprintln!("{program} numthreads numexecs");
    process::exit(2);
}
