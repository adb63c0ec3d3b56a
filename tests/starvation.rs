use std::env;
use std::process::Command;

const CHILD: &str = "UTHREAD_STARVATION_CHILD";

fn lone() {
    uthread::yield_now();
    eprintln!("lone thread yielded to itself");
    uthread::exit();
}

/// Driver exits, leaving one thread that yields then exits with nothing left to run.
fn starve() -> ! {
    uthread::init().unwrap();
    uthread::create(lone).unwrap();
    uthread::exit();
}

#[test]
fn last_exit_terminates_process() {
    if env::var_os(CHILD).is_some() {
        starve();
    }

    let output = Command::new(env::current_exe().unwrap())
        .args(["--exact", "last_exit_terminates_process", "--nocapture"])
        .env(CHILD, "1")
        .output()
        .unwrap();

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_eq!(output.status.code(), Some(1), "{stderr}");
    assert!(stderr.contains("lone thread yielded to itself"), "{stderr}");
    assert!(stderr.contains("no runnable threads"), "{stderr}");
}
