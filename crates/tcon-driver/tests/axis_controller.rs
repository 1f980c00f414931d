//! Scripted-device scenarios for AxisController.

use std::time::Duration;
use tcon_core::mock_serial::{self, MockDeviceHarness};
use tcon_core::{Axis, AxisKind, StageError};
use tcon_driver::protocol::DEFAULT_ERROR_TOKEN;
use tcon_driver::{AxisController, AxisState, BlockLimits, LineChannel, PollTiming};

fn setup(timing: PollTiming) -> (AxisController, LineChannel, MockDeviceHarness) {
    let (port, device) = mock_serial::new();
    let channel = LineChannel::new(
        Box::new(port),
        BlockLimits {
            overall_timeout: Duration::from_secs(1),
            max_empty_reads: 10,
            read_timeout: Duration::from_millis(50),
        },
    );
    let axis = Axis::new("position", "2", AxisKind::Linear, 0.001, 0, 1300);
    (
        AxisController::new(axis, timing, DEFAULT_ERROR_TOKEN),
        channel,
        device,
    )
}

fn fast() -> PollTiming {
    PollTiming {
        settle_delay: Duration::from_millis(5),
        motion_timeout: Duration::from_secs(5),
        position_retries: 2,
    }
}

#[tokio::test]
async fn move_settles_after_second_poll() {
    let (mut ctrl, mut chan, mut device) = setup(fast());

    let task = tokio::spawn(async move {
        let outcome = ctrl.move_to(&mut chan, 800).await;
        (ctrl, outcome)
    });

    device.expect_and_respond("d2 800", &[]).await;
    device.expect_and_respond("abs2", &[]).await;
    // Both poll answers arrive in one burst after the first query.
    device.expect_command("r2").await;
    device
        .send_response(b"Move = 1\r\n\r\nMove = 0, PC2 = 800\r\n\r\n")
        .unwrap();
    device.expect_command("r2").await;

    let (ctrl, outcome) = task.await.unwrap();
    let outcome = outcome.unwrap();
    assert_eq!(outcome.position_steps, 800);
    assert_eq!(outcome.polls, 2);
    assert_eq!(ctrl.state(), AxisState::Settled);
    assert_eq!(ctrl.last_position(), Some(800));
}

#[tokio::test]
async fn position_never_regresses_to_unknown() {
    let (mut ctrl, mut chan, mut device) = setup(fast());

    let task = tokio::spawn(async move { ctrl.move_to(&mut chan, 500).await });

    device.expect_and_respond("d2 500", &[]).await;
    device.expect_and_respond("abs2", &[]).await;
    device.expect_and_respond("r2", &["Move = 1", "PC2 = 250"]).await;
    // No Move field: still moving.
    device.expect_and_respond("r2", &["PC2 = 400"]).await;
    device.expect_and_respond("r2", &["Move = 0"]).await;

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.position_steps, 400);
    assert_eq!(outcome.polls, 3);
}

#[tokio::test]
async fn settled_without_position_repolls() {
    let (mut ctrl, mut chan, mut device) = setup(fast());

    let task = tokio::spawn(async move { ctrl.move_to(&mut chan, 10).await });

    device.expect_and_respond("d2 10", &[]).await;
    device.expect_and_respond("abs2", &[]).await;
    device.expect_and_respond("r2", &["Move = 0"]).await;
    device.expect_and_respond("r2", &["PC2 = 10"]).await;

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.position_steps, 10);
    assert_eq!(outcome.polls, 2);
}

#[tokio::test]
async fn settled_without_any_position_is_unavailable() {
    let (mut ctrl, mut chan, mut device) = setup(fast());

    let task = tokio::spawn(async move {
        let result = ctrl.move_to(&mut chan, 10).await;
        (ctrl, result)
    });

    device.expect_and_respond("d2 10", &[]).await;
    device.expect_and_respond("abs2", &[]).await;
    for _ in 0..3 {
        device.expect_and_respond("r2", &["Move = 0"]).await;
    }

    let (ctrl, result) = task.await.unwrap();
    assert!(matches!(
        result,
        Err(StageError::PositionUnavailable { attempts: 3, .. })
    ));
    assert_eq!(ctrl.state(), AxisState::Stalled);
    assert_eq!(ctrl.last_position(), None);
}

#[tokio::test]
async fn syntax_error_on_confirmation_stalls() {
    let (mut ctrl, mut chan, mut device) = setup(fast());

    let task = tokio::spawn(async move {
        let result = ctrl.move_to(&mut chan, 800).await;
        (ctrl, result)
    });

    device.expect_and_respond("d2 800", &["Syntax error"]).await;

    let (ctrl, result) = task.await.unwrap();
    match result {
        Err(StageError::ProtocolError { command, response }) => {
            assert_eq!(command, "d2 800");
            assert_eq!(response, "Syntax error");
        }
        other => panic!("expected ProtocolError, got {other:?}"),
    }
    assert_eq!(ctrl.state(), AxisState::Stalled);
    // abs2 never followed.
    assert!(device.take_writes().await.is_empty());
}

#[tokio::test]
async fn silent_device_during_poll_is_unresponsive() {
    let (mut ctrl, mut chan, mut device) = setup(fast());

    let task = tokio::spawn(async move {
        let result = ctrl.move_to(&mut chan, 800).await;
        (ctrl, result)
    });

    device.expect_and_respond("d2 800", &[]).await;
    device.expect_and_respond("abs2", &[]).await;
    device.expect_command("r2").await;

    let (ctrl, result) = task.await.unwrap();
    assert!(matches!(
        result,
        Err(StageError::DeviceUnresponsive { ref command, .. }) if command == "r2"
    ));
    assert_eq!(ctrl.state(), AxisState::Stalled);
}

#[tokio::test(start_paused = true)]
async fn endless_motion_hits_motion_timeout() {
    let timing = PollTiming {
        settle_delay: Duration::from_secs(1),
        motion_timeout: Duration::from_millis(3500),
        position_retries: 0,
    };
    let (mut ctrl, mut chan, mut device) = setup(timing);

    let responder = tokio::spawn(async move {
        device.expect_and_respond("rtncr2", &[]).await;
        loop {
            device.expect_and_respond("r2", &["Move = 1"]).await;
        }
    });

    let result = ctrl.reset_to_reference(&mut chan).await;
    responder.abort();

    assert!(matches!(result, Err(StageError::DeviceUnresponsive { .. })));
    assert_eq!(ctrl.state(), AxisState::Stalled);
}

#[tokio::test]
async fn reset_to_reference_polls_like_a_move() {
    let (mut ctrl, mut chan, mut device) = setup(fast());

    let task = tokio::spawn(async move { ctrl.reset_to_reference(&mut chan).await });

    device.expect_and_respond("rtncr2", &[]).await;
    device.expect_and_respond("r2", &["Move = 1"]).await;
    device.expect_and_respond("r2", &["Move = 0", "PC2 = 0"]).await;

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.position_steps, 0);
}
