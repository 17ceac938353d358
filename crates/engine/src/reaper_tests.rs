// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use nix::sys::signal::Signal;
use std::process::Command;

/// Poll the reaper until a notification arrives or the deadline passes.
async fn wait_for_exit(reaper: &Reaper, rx: &mut mpsc::Receiver<ProcessExit>) -> ProcessExit {
    for _ in 0..200 {
        reaper.poll_once().await;
        match rx.try_recv() {
            Ok(exit) => return exit,
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("no exit notification within deadline");
}

#[tokio::test]
async fn child_exit_reports_real_status() {
    let child = Command::new("sh").args(["-c", "exit 7"]).spawn().unwrap();
    let pid = child.id() as i32;

    let reaper = Reaper::new();
    let mut rx = reaper.subscribe();
    reaper.monitor(pid);

    let exit = wait_for_exit(&reaper, &mut rx).await;
    assert_eq!(exit.pid, pid);
    assert_eq!(exit.status, Some(7));
    assert_eq!(reaper.monitored_count(), 0);
}

#[tokio::test]
async fn reparented_process_reports_unknown_status() {
    // Double fork: sh backgrounds a sleep and exits, leaving the sleep
    // reparented to init. Its pid arrives on stdout.
    let output = Command::new("sh")
        .args(["-c", "sleep 300 & echo $!"])
        .output()
        .unwrap();
    let pid: i32 = String::from_utf8_lossy(&output.stdout).trim().parse().unwrap();

    let reaper = Reaper::new();
    let mut rx = reaper.subscribe();
    reaper.monitor(pid);

    // Still alive: a few polls produce nothing.
    for _ in 0..3 {
        reaper.poll_once().await;
    }
    assert!(rx.try_recv().is_err());

    kill(Pid::from_raw(pid), Signal::SIGKILL).unwrap();

    let exit = wait_for_exit(&reaper, &mut rx).await;
    assert_eq!(exit.pid, pid);
    assert_eq!(exit.status, None);
}

#[tokio::test]
async fn monitoring_twice_notifies_once() {
    let child = Command::new("sh").args(["-c", "exit 0"]).spawn().unwrap();
    let pid = child.id() as i32;

    let reaper = Reaper::new();
    let mut rx = reaper.subscribe();
    reaper.monitor(pid);
    reaper.monitor(pid);

    let exit = wait_for_exit(&reaper, &mut rx).await;
    assert_eq!(exit.status, Some(0));

    // Drained watch list: further polls must not re-notify.
    for _ in 0..3 {
        reaper.poll_once().await;
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn all_subscribers_hear_the_exit() {
    let child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
    let pid = child.id() as i32;

    let reaper = Reaper::new();
    let mut rx1 = reaper.subscribe();
    let mut rx2 = reaper.subscribe();
    reaper.monitor(pid);

    let exit = wait_for_exit(&reaper, &mut rx1).await;
    assert_eq!(exit.status, Some(3));
    assert_eq!(rx2.try_recv().unwrap(), exit);
}
