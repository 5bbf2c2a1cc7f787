//! Raises a real SIGTERM, so it gets a test binary of its own.

mod common;

use common::{FakeLoader, FakeWorker, TestEnv, is_socket, wait_for};
use nix::sys::signal::{Signal, raise};
use std::sync::Arc;
use std::time::{Duration, Instant};
use trema::supervisor::Supervisor;

#[test]
fn test_sigterm_tears_down() {
    let env = TestEnv::new();
    let worker = FakeWorker::new("ctl_signal");
    let poll = Duration::from_millis(100);
    let sup = Arc::new(
        Supervisor::with_loader(env.run_options(), Box::new(FakeLoader(worker.clone())))
            .poll_interval(poll),
    );
    let run = {
        let sup = sup.clone();
        std::thread::spawn(move || sup.run(vec!["ctl_signal.toml".to_string()]))
    };
    assert!(wait_for(Duration::from_secs(10), || is_socket(
        &env.socket("ctl_signal")
    )));

    let raised = Instant::now();
    raise(Signal::SIGTERM).unwrap();
    run.join().unwrap().unwrap();
    assert!(raised.elapsed() < poll + Duration::from_secs(2));

    assert!(sup.is_shutting_down());
    assert_eq!(worker.stops(), 1);
    assert!(!env.pid_file("ctl_signal").exists());
    assert!(!env.socket("ctl_signal").exists());
}
