use asda_rs::cmds::{
    DEFAULT_JOG_SPEED, DEFAULT_JOG_STEP, JOG_FORWARD, JOG_REVERSE, JOG_STOP, JogCommand, REG_ERROR,
    REG_JOG, SPEED_MAX,
};
use asda_rs::transport::{MemoryTransport, RetryPolicy, RetryingTransport};
use asda_rs::{Direction, JogError, LinkError, ServoController};

#[test]
fn operator_session_from_connect_to_quit() {
    let drive = MemoryTransport::new();
    drive.set_register(REG_JOG, 300);

    let mut controller = ServoController::with_transport(drive.clone());
    controller.check_connection().unwrap();
    assert_eq!(controller.initialize_speed(), 300);

    controller.jog(JogCommand::Forward).unwrap();
    controller.increase_speed(DEFAULT_JOG_STEP).unwrap();
    controller.jog(JogCommand::Reverse).unwrap();
    controller.decrease_speed(DEFAULT_JOG_STEP).unwrap();
    controller.stop_jog().unwrap();
    controller.close().unwrap();

    assert_eq!(
        drive.jog_writes(),
        vec![
            JOG_FORWARD,
            325,
            JOG_FORWARD,
            JOG_REVERSE,
            300,
            JOG_REVERSE,
            JOG_STOP,
            JOG_STOP,
            DEFAULT_JOG_SPEED,
        ]
    );
    assert_eq!(drive.register(REG_JOG), Some(DEFAULT_JOG_SPEED));
}

#[test]
fn speed_writes_never_collide_with_command_codes() {
    let drive = MemoryTransport::new();
    let mut controller = ServoController::with_transport(drive.clone());

    for requested in [-10_000, -1, 0, 1, 2999, 3000, 3001, 4998, 4999, 5000, 65_535, i32::MAX] {
        controller.set_jog_speed(requested).unwrap();
    }
    assert!(drive.jog_writes().iter().all(|&v| v <= SPEED_MAX));
}

#[test]
fn faulted_drive_sees_no_jog_traffic_before_shutdown() {
    let drive = MemoryTransport::new();
    drive.set_register(REG_ERROR, 7);

    let mut controller = ServoController::with_transport(drive.clone());
    let err = controller.check_connection().unwrap_err();
    assert!(matches!(&err, LinkError::Fault(f) if f.description() == "Overspeed"));
    assert!(err.to_string().contains("Overspeed"));

    assert!(matches!(controller.set_jog_speed(100), Err(JogError::Faulted(_))));
    assert!(drive.jog_writes().is_empty());
    assert_eq!(controller.current_direction(), Direction::Stopped);

    drop(controller);
    assert_eq!(drive.jog_writes(), vec![JOG_STOP, DEFAULT_JOG_SPEED]);
}

#[test]
fn retry_policy_masks_a_single_timeout() {
    let drive = MemoryTransport::new();
    let transport = RetryingTransport::new(
        drive.clone(),
        RetryPolicy {
            attempts: 1,
            backoff_ms: 0,
        },
    );
    let mut controller = ServoController::with_transport(transport);

    drive.fail_next_writes(1);
    controller.jog(JogCommand::Forward).unwrap();
    assert_eq!(controller.current_direction(), Direction::Forward);

    drive.fail_next_writes(2);
    assert!(controller.set_jog_speed(600).is_err());
    assert_eq!(controller.current_speed(), DEFAULT_JOG_SPEED);
}
