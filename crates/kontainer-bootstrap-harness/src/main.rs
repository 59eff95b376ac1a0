// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Stand-in "managed runtime" used by the integration tests in
//! `tests/`. Linking `kontainer-bootstrap` installs its constructor;
//! whatever reaches `main` here reports its post-bootstrap state on
//! stdout so an external test process (playing the orchestrator role)
//! can assert on it.

use tracing::info;

fn main() {
    tracing_subscriber::fmt::try_init().ok();

    let is_init = kontainer_bootstrap::is_init_process();
    let pid = nix::unistd::getpid();
    let ppid = nix::unistd::getppid();
    let uid = nix::unistd::getuid();

    info!(%is_init, %pid, %ppid, %uid, "harness resumed");
    println!("is_init={is_init} pid={pid} ppid={ppid} uid={uid}");

    if is_init {
        // Hold the process open briefly so the orchestrator-side test
        // can inspect /proc/<pid>/{ns,status} before it exits.
        std::thread::sleep(std::time::Duration::from_millis(500));
    }
}
