//! Full-plate runs against mock hardware.

mod common;

use ami::{spawn_plate_run, ControllerState};
use common::{bench, small_plate};
use std::sync::Arc;
use tokio::sync::Mutex;

#[tokio::test]
async fn run_writes_images_plate_copy_and_merge_script() {
    let (mut controller, bench) = bench(small_plate());
    let summary = controller.run_plate().await.unwrap();

    assert_eq!(summary.samples_completed, 24);
    assert_eq!(summary.images_captured, 72);
    assert_eq!(summary.samples_skipped, 0);
    assert!(summary
        .run_dir
        .starts_with(bench.images.path().join("AMi_sample/xs2")));

    let saved = ami::PlateConfig::load(summary.run_dir.join("plate.toml")).unwrap();
    assert_eq!(&saved, controller.plate());

    for name in ["A1a_0.jpg", "A1a_2.jpg", "C4b_1.jpg"] {
        assert!(summary.run_dir.join("rawimages").join(name).exists(), "{name}");
    }

    let script = std::fs::read_to_string(&summary.script).unwrap();
    assert!(summary.script.ends_with("processxs2.com"));
    let expected_first = "rm OUT*.tif \n\
        echo 'processing: A1a' \n\
        align_image_stack -m -a OUT rawimages/A1a_0.jpg rawimages/A1a_1.jpg rawimages/A1a_2.jpg  \n\
        enfuse --exposure-weight=0 --saturation-weight=0 --contrast-weight=1 --hard-mask --output=A1a.tif OUT*.tif \n\
        rm OUT*.tif \n\
        echo 'processing: A1b' \n";
    assert!(script.starts_with(expected_first), "{script}");
    assert_eq!(script.matches("rm OUT*.tif \n").count(), 25);
}

#[tokio::test]
async fn slices_are_taken_bottom_up_after_each_idle_wait() {
    let (mut controller, bench) = bench(small_plate());
    controller.run_plate().await.unwrap();

    let log = bench.log.entries();
    let first = log
        .iter()
        .position(|e| e == "capture A1a_0.jpg")
        .unwrap();
    // Stack for A1a: 7.75, 8.00, 8.25, each followed by the aux interlock
    assert_eq!(
        log[first - 3..first + 1],
        ["G0 Z7.750", "M9", "M8", "capture A1a_0.jpg"]
    );
    assert_eq!(
        log[first + 1..first + 4],
        ["G0 Z8.000", "M9", "M8"]
    );
}

#[tokio::test]
async fn cancellation_cleans_up_exactly_once() {
    let (controller, bench) = bench(small_plate());
    let handle = controller.run_handle();
    let states = controller.subscribe();

    let cancel = handle.clone();
    bench.camera.on_capture(move |n| {
        // Twice, mid-stack of the third sample
        if n == 7 || n == 8 {
            cancel.request_cancel();
        }
    });

    let shared = Arc::new(Mutex::new(controller));
    let summary = spawn_plate_run(shared.clone()).await.unwrap().unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.samples_completed, 3);
    assert_eq!(bench.camera.captures(), 9);
    assert_eq!(bench.log.count("$21=0"), 1);
    assert_eq!(bench.log.count("$21=1"), 1);
    assert_eq!(bench.log.count("light1 off"), 1);
    assert_eq!(bench.log.count("light2 off"), 1);
    assert_eq!(bench.log.count("preview off"), 1);
    assert!(!bench.camera.is_previewing());

    let script = std::fs::read_to_string(&summary.script).unwrap();
    assert_eq!(script.matches("echo 'processing:").count(), 3);

    assert_eq!(*states.borrow(), ControllerState::Idle);
    assert!(!handle.is_running());
    assert!(!handle.is_cancel_requested());

    // Cleanup runs last: hard limits come back after everything else
    let log = bench.log.entries();
    assert_eq!(log.last().map(String::as_str), Some("$21=1"));
}

#[tokio::test]
async fn cancel_outside_a_run_does_not_affect_the_next_run() {
    let (mut controller, bench) = bench(small_plate());
    controller.run_handle().request_cancel();

    let summary = controller.run_plate().await.unwrap();
    assert!(!summary.cancelled);
    assert_eq!(summary.samples_completed, 24);
    assert_eq!(bench.camera.captures(), 72);
}

#[tokio::test]
async fn preview_cannot_be_toggled_while_the_run_holds_the_state() {
    let (controller, bench) = bench(small_plate());
    let handle = controller.run_handle();
    let shared = Arc::new(Mutex::new(controller));

    let cancel = handle.clone();
    bench.camera.on_capture(move |n| {
        if n == 1 {
            cancel.request_cancel();
        }
    });
    spawn_plate_run(shared.clone()).await.unwrap().unwrap();

    // After the run the live view is closed and can be toggled again
    let mut controller = shared.lock().await;
    assert!(!controller.is_viewing());
    controller.toggle_preview().await.unwrap();
    assert!(controller.is_viewing());
}

#[tokio::test]
async fn stuck_idle_input_aborts_the_run_safely() {
    let (mut controller, bench) = bench(small_plate());
    bench.idle.set_level(true);

    let err = controller.run_plate().await.unwrap_err();
    assert!(matches!(err, ami::AmiError::IdleTimeout(_)));
    assert_eq!(bench.camera.captures(), 0);
    assert_eq!(bench.log.count("light1 off"), 1);
    assert_eq!(controller.state(), ControllerState::Idle);
    assert!(bench
        .status
        .messages()
        .iter()
        .any(|m| m.contains("home the machine")));
}
