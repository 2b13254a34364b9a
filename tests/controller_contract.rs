use std::sync::Arc;
use std::time::Duration;

use scraper_panel::{
    controller::MotorMoveController,
    device::{
        mock::{CallJournal, DeviceCall, MockDevice},
        DeviceHandle, POSITION_ATTR,
    },
    error::{DeviceOperation, PanelError},
};
use tracing_test::traced_test;

fn read(device: &str) -> DeviceCall {
    DeviceCall::Read {
        device: device.into(),
        attribute: POSITION_ATTR.into(),
    }
}

fn write(device: &str, value: f64) -> DeviceCall {
    DeviceCall::Write {
        device: device.into(),
        attribute: POSITION_ATTR.into(),
        value,
    }
}

fn abort(device: &str) -> DeviceCall {
    DeviceCall::Abort {
        device: device.into(),
    }
}

#[tokio::test]
async fn relative_move_is_one_read_then_one_write() {
    let controller = MotorMoveController::new();

    for (start, delta) in [(10.0, -2.5), (0.0, 0.25), (-4.0, 4.0), (3.5, 0.0)] {
        let device = MockDevice::new("motor/lt_ipapscrapers_ctrl/3", start).unwrap();
        controller.move_relative(&device, delta).await.unwrap();

        assert_eq!(
            device.journal().calls(),
            vec![
                read("motor/lt_ipapscrapers_ctrl/3"),
                write("motor/lt_ipapscrapers_ctrl/3", start + delta),
            ]
        );
    }
}

#[tokio::test]
async fn relative_move_from_ten_by_minus_two_and_a_half_writes_seven_and_a_half() {
    let device = MockDevice::new("motor/sr_ipapfshscrapers_ctrl/5", 10.0).unwrap();
    MotorMoveController::new()
        .move_relative(&device, -2.5)
        .await
        .unwrap();

    assert_eq!(device.value(), 7.5);
}

#[tokio::test]
async fn absolute_move_never_reads() {
    let device = MockDevice::new("pm/sr_hslit_ctrl/1", 123.0).unwrap();
    MotorMoveController::new()
        .move_absolute(&device, 42.0)
        .await
        .unwrap();

    assert_eq!(
        device.journal().calls(),
        vec![write("pm/sr_hslit_ctrl/1", 42.0)]
    );
}

#[tokio::test]
#[traced_test]
async fn failed_read_skips_the_write() {
    let device = MockDevice::new("motor/lt_ipapscrapers_ctrl/1", 5.0)
        .unwrap()
        .failing_read("device unreachable");

    let err = MotorMoveController::new()
        .move_relative(&device, 1.0)
        .await
        .unwrap_err();

    match &err {
        PanelError::DeviceCommunication {
            device, operation, ..
        } => {
            assert_eq!(device, "motor/lt_ipapscrapers_ctrl/1");
            assert_eq!(*operation, DeviceOperation::Read);
        }
        other => panic!("expected DeviceCommunication, got {other:?}"),
    }
    assert!(err.to_string().contains("device unreachable"));
    assert_eq!(
        device.journal().calls(),
        vec![read("motor/lt_ipapscrapers_ctrl/1")]
    );
    assert!(logs_contain("read failed"));
}

#[tokio::test]
async fn relative_move_with_failed_write_leaves_the_position() {
    let device = MockDevice::new("motor/lt_ipapscrapers_ctrl/2", 4.0)
        .unwrap()
        .failing_write("attribute is not writable in state MOVING");

    let err = MotorMoveController::new()
        .move_relative(&device, 1.5)
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        PanelError::DeviceCommunication {
            operation: DeviceOperation::Write,
            ..
        }
    ));
    assert_eq!(err.device(), Some("motor/lt_ipapscrapers_ctrl/2"));
    assert_eq!(
        device.journal().calls(),
        vec![
            read("motor/lt_ipapscrapers_ctrl/2"),
            write("motor/lt_ipapscrapers_ctrl/2", 5.5),
        ]
    );
    assert_eq!(device.value(), 4.0);
}

#[tokio::test]
async fn invalid_position_read_is_never_written_back() {
    let device = MockDevice::new("motor/lt_ipapscrapers_ctrl/1", f64::NAN).unwrap();

    let err = MotorMoveController::new()
        .move_relative(&device, 1.0)
        .await
        .unwrap_err();

    assert!(matches!(err, PanelError::InvalidCommand(_)));
    assert_eq!(
        device.journal().calls(),
        vec![read("motor/lt_ipapscrapers_ctrl/1")]
    );
}

#[tokio::test]
async fn overflowing_target_is_never_written() {
    let device = MockDevice::new("motor/lt_ipapscrapers_ctrl/1", f64::MAX).unwrap();

    let err = MotorMoveController::new()
        .move_relative(&device, f64::MAX)
        .await
        .unwrap_err();

    assert!(matches!(err, PanelError::InvalidCommand(_)));
    assert_eq!(
        device.journal().calls(),
        vec![read("motor/lt_ipapscrapers_ctrl/1")]
    );
    assert_eq!(device.value(), f64::MAX);
}

#[tokio::test]
async fn failed_write_is_reported_as_write_error() {
    let device = MockDevice::new("pm/lt01_vslit_ctrl/2", 0.0)
        .unwrap()
        .failing_write("attribute is not writable in state FAULT");

    let err = MotorMoveController::new()
        .move_absolute(&device, 1.0)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PanelError::DeviceCommunication {
            operation: DeviceOperation::Write,
            ..
        }
    ));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn abort_reaches_every_device_after_a_failure() {
    let journal = CallJournal::new();
    let first: DeviceHandle = Arc::new(
        MockDevice::with_journal("motor/lt_ipapscrapers_ctrl/1", 0.0, journal.clone())
            .unwrap()
            .failing_abort("connection lost"),
    );
    let second: DeviceHandle = Arc::new(
        MockDevice::with_journal("motor/lt_ipapscrapers_ctrl/2", 0.0, journal.clone()).unwrap(),
    );

    let report = MotorMoveController::new().abort(&[first, second]).await;

    assert_eq!(
        journal.calls(),
        vec![
            abort("motor/lt_ipapscrapers_ctrl/1"),
            abort("motor/lt_ipapscrapers_ctrl/2"),
        ]
    );
    assert_eq!(report.attempted, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        report.failures[0].device(),
        Some("motor/lt_ipapscrapers_ctrl/1")
    );
}

#[tokio::test]
async fn abort_of_healthy_devices_is_clean() {
    let journal = CallJournal::new();
    let devices: Vec<DeviceHandle> = ["motor/x/1", "motor/x/2"]
        .into_iter()
        .map(|name| {
            Arc::new(MockDevice::with_journal(name, 0.0, journal.clone()).unwrap()) as DeviceHandle
        })
        .collect();

    let report = MotorMoveController::new().abort(&devices).await;

    assert!(report.is_clean());
    assert_eq!(journal.calls(), vec![abort("motor/x/1"), abort("motor/x/2")]);
}

#[tokio::test]
async fn abort_collects_every_failure() {
    let journal = CallJournal::new();
    let devices: Vec<DeviceHandle> = ["motor/x/1", "motor/x/2", "pm/x_slit/1"]
        .into_iter()
        .map(|name| {
            Arc::new(
                MockDevice::with_journal(name, 0.0, journal.clone())
                    .unwrap()
                    .failing_abort("FAULT"),
            ) as DeviceHandle
        })
        .collect();

    let report = MotorMoveController::new().abort(&devices).await;

    assert_eq!(journal.calls().len(), 3);
    let failed: Vec<_> = report.failures.iter().filter_map(|e| e.device()).collect();
    assert_eq!(failed, vec!["motor/x/1", "motor/x/2", "pm/x_slit/1"]);
    assert!(matches!(
        report.into_result(),
        Err(PanelError::AbortFailed(errors)) if errors.len() == 3
    ));
}

#[tokio::test(start_paused = true)]
async fn timeout_turns_a_hung_call_into_a_communication_error() {
    let device = MockDevice::new("motor/lt_ipapscrapers_ctrl/4", 1.0)
        .unwrap()
        .stalling(Duration::from_secs(60));

    let controller = MotorMoveController::with_timeout(Duration::from_millis(500));
    let err = controller.move_relative(&device, 1.0).await.unwrap_err();

    assert!(err.to_string().contains("no answer within 500 ms"));
    assert_eq!(device.journal().calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn without_timeout_a_slow_device_is_awaited() {
    let device = MockDevice::new("motor/lt_ipapscrapers_ctrl/4", 1.0)
        .unwrap()
        .stalling(Duration::from_secs(60));

    MotorMoveController::new()
        .move_relative(&device, 1.0)
        .await
        .unwrap();

    assert_eq!(device.value(), 2.0);
}
