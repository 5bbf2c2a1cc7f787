mod common;

use common::{TestEnv, is_alive, is_socket, wait_for};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

#[test]
fn test_daemonize_and_killall() {
    let env = TestEnv::new();
    let script = env.create_worker("e2e_daemon", "sleep 60");
    let script = script.to_string_lossy().to_string();

    let (parent, output) = env.run_command_with_pid(&["run", "-d", &script]);
    println!("stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(output.status.success(), "run -d should return once forked");

    assert!(wait_for(TIMEOUT, || is_socket(&env.socket("e2e_daemon"))));
    let daemon = env.read_pid("e2e_daemon").expect("pid file should exist");
    assert_ne!(daemon, parent, "pid file must hold the daemon's pid");
    assert!(is_alive(daemon));

    // a second instance refuses to start and leaves the daemon alone
    let output = env.run_command(&["run", &script]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already running"), "stderr: {stderr}");
    assert_eq!(env.read_pid("e2e_daemon"), Some(daemon));

    let output = env.run_command(&["show", "-n", "e2e_daemon", "missing"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("missing"));

    let output = env.run_command(&["killall", "e2e_daemon"]);
    println!("stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(output.status.success());

    assert!(wait_for(TIMEOUT, || !is_alive(daemon)));
    assert!(!env.pid_file("e2e_daemon").exists());
    assert!(!env.socket("e2e_daemon").exists());
}

#[test]
fn test_network_from_cli() {
    let env = TestEnv::new();
    let script = env.create_worker("e2e_net", "sleep 60");
    let conf = env.write(
        "network.toml",
        r#"
sudo = false

[nodes.s1]
kind = "switch"
run = "sleep 60"

[nodes.h1]
kind = "host"
run = "sleep 60"

[[links]]
endpoints = ["s1", "h1"]
up = "touch link_up"
down = "rm link_up"
"#,
    );
    let (script, conf) = (
        script.to_string_lossy().to_string(),
        conf.to_string_lossy().to_string(),
    );

    let output = env.run_command(&["run", "-d", "-c", &conf, &script]);
    assert!(output.status.success());
    assert!(wait_for(TIMEOUT, || is_socket(&env.socket("e2e_net"))));
    assert!(env.project_dir().join("link_up").exists());

    let output = env.run_command(&["show", "-n", "e2e_net", "s1"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Kind: switch"), "stdout: {stdout}");
    let pid: u32 = stdout
        .lines()
        .find_map(|line| line.strip_prefix("PID: "))
        .and_then(|pid| pid.trim().parse().ok())
        .expect("switch should report a pid");
    // nodes started before the fork are still stopped by the daemon
    assert!(is_alive(pid));

    let output = env.run_command(&["port_up", "-n", "e2e_net", "--switch", "s1", "--port", "1"]);
    assert!(output.status.success());

    let output = env.run_command(&["delete_link", "-n", "e2e_net", "h1", "s1"]);
    assert!(output.status.success());
    assert!(!env.project_dir().join("link_up").exists());
    let output = env.run_command(&["delete_link", "-n", "e2e_net", "h1", "s1"]);
    assert!(output.status.success());

    let output = env.run_command(&["killall", "e2e_net"]);
    assert!(output.status.success());
    assert!(wait_for(TIMEOUT, || !env.pid_file("e2e_net").exists()));
    assert!(wait_for(TIMEOUT, || !is_alive(pid)));
}

#[test]
fn test_killall_unknown_controller() {
    let env = TestEnv::new();
    let output = env.run_command(&["killall", "nothing_here"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("socket file"), "stderr: {stderr}");
}
