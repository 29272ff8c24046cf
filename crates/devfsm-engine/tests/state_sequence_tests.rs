//! 状态序列测试
//!
//! Operating 收到 Calibrate 后排入 Calibrating → Verifying → Loaded，
//! 序列优先于转换表逐个执行，故障时被清空。

mod common;

use common::*;
use devfsm_engine::{
    CommandStatus, EngineBuilder, IdleOutcome, StateId, StateResult, DEFAULT_SEQUENCE_CAPACITY,
};
use std::sync::Arc;
use std::time::Duration;

fn with_steps(b: EngineBuilder<Sim>) -> EngineBuilder<Sim> {
    b.initial_configuration(sim_config())
        .state(StepState::new(CALIBRATING))
        .state(StepState::new(VERIFYING))
        // 没有序列时这两个状态完成后会停机
        .transition(CALIBRATING, StateResult::Completed, StateId::STOP)
        .transition(VERIFYING, StateResult::Completed, StateId::STOP)
}

/// 工作线程依次进入过的状态（每次进入后第一次 state_proc）
fn entered(rig: &Rig) -> Vec<StateId> {
    rig.journal
        .outcomes
        .lock()
        .iter()
        .filter(|(_, o)| *o == IdleOutcome::Entered)
        .map(|(id, _)| id.clone())
        .collect()
}

fn operating_rig() -> Rig {
    let rig = rig_with(with_steps);
    rig.engine.start().unwrap();
    assert!(rig.engine.wait_for_state(&StateId::LOADED, WAIT));
    let open = rig.engine.submit(SimCommand::Open);
    assert_eq!(open.wait(WAIT), CommandStatus::Success);
    assert!(rig.engine.wait_for_state(&OPERATING, WAIT));
    assert!(!rig.engine.in_state_sequence());
    rig
}

#[test]
fn test_sequence_overrides_transition_table() {
    let rig = operating_rig();

    let calibrate = rig.engine.submit(SimCommand::Calibrate);
    assert_eq!(calibrate.wait(WAIT), CommandStatus::Success);
    assert!(wait_until(WAIT, || entered(&rig).len() >= 5));

    assert_eq!(
        entered(&rig),
        vec![StateId::LOADED, OPERATING, CALIBRATING, VERIFYING, StateId::LOADED]
    );
    assert_eq!(rig.engine.current_state(), Some(StateId::LOADED));
    assert_eq!(rig.engine.previous_state(), Some(VERIFYING));
    assert!(!rig.engine.in_state_sequence());
    assert!(rig.engine.is_running());
    assert_eq!(rig.engine.metrics().faults, 0);
}

#[test]
fn test_table_applies_without_sequence() {
    let rig = operating_rig();

    // 只排入 Calibrating：序列用完后 Calibrating 的表项生效
    let cmd = Arc::new(
        rig.engine
            .new_command(SimCommand::Calibrate)
            .with_payload(vec![CALIBRATING]),
    );
    rig.engine.enqueue_command(cmd.clone());
    assert_eq!(cmd.wait(WAIT), CommandStatus::Success);

    rig.engine.join(WAIT).unwrap();
    assert_eq!(rig.engine.current_state(), Some(StateId::END));
    assert_eq!(rig.engine.previous_state(), Some(StateId::STOP));
    assert!(!entered(&rig).contains(&VERIFYING));
}

#[test]
fn test_fault_abandons_remaining_sequence() {
    let rig = operating_rig();

    let cmd = Arc::new(
        rig.engine
            .new_command(SimCommand::Calibrate)
            .with_payload(vec![CALIBRATING, NOWHERE, VERIFYING]),
    );
    rig.engine.enqueue_command(cmd.clone());
    assert_eq!(cmd.wait(WAIT), CommandStatus::Success);

    assert!(rig.engine.wait_for_state(&StateId::TRANSITION_ERROR, WAIT));
    assert!(!rig.engine.in_state_sequence());
    assert_eq!(rig.engine.metrics().faults, 1);

    // 复位后按正常路线回到 Loaded，被丢弃的 Verifying 不会再出现
    let reset = rig.engine.submit(SimCommand::Reset);
    assert_eq!(reset.wait(WAIT), CommandStatus::Success);
    assert!(rig.engine.wait_for_state(&StateId::LOADED, WAIT));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.engine.current_state(), Some(StateId::LOADED));
    assert!(!entered(&rig).contains(&VERIFYING));
}

#[test]
fn test_oversized_sequence_is_refused() {
    let rig = operating_rig();

    let route = vec![VERIFYING; DEFAULT_SEQUENCE_CAPACITY + 1];
    let cmd = Arc::new(
        rig.engine
            .new_command(SimCommand::Calibrate)
            .with_payload(route),
    );
    rig.engine.enqueue_command(cmd.clone());
    assert_eq!(cmd.wait(WAIT), CommandStatus::Rejected);

    assert!(!rig.engine.in_state_sequence());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.engine.current_state(), Some(OPERATING));
    assert!(!entered(&rig).contains(&VERIFYING));
}
