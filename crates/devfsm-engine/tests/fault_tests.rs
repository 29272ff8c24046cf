//! 故障处理测试
//!
//! - `state_proc` panic → GenericError，工作线程继续运行
//! - 状态报告 Error 且转换表无条目 → GenericError
//! - 请求转到未注册的状态 → TransitionError
//! - 复位命令把错误状态带回 Start，再由配置驱动回到 Loaded

mod common;

use common::*;
use devfsm_engine::{CommandStatus, StateChangeEvent, StateId, StateResult};
use parking_lot::Mutex;
use std::sync::Arc;

fn into_operating(rig: &Rig) {
    rig.engine.start().unwrap();
    let open = rig.engine.submit(SimCommand::Open);
    assert_eq!(open.wait(WAIT), CommandStatus::Success);
    assert!(rig.engine.wait_for_state(&OPERATING, WAIT));
}

#[test]
fn test_panic_in_state_proc_moves_to_generic_error() {
    let rig = rig_with(|b| b.initial_configuration(sim_config()));
    into_operating(&rig);

    let boom = rig.engine.submit(SimCommand::Panic);
    assert!(rig.engine.wait_for_state(&StateId::GENERIC_ERROR, WAIT));
    assert_eq!(rig.engine.previous_state(), Some(OPERATING.clone()));
    // 错误状态拒绝了引发 panic 的命令
    assert_eq!(boom.wait(WAIT), CommandStatus::Failed);
    assert!(rig.engine.is_running());
    assert!(rig.engine.metrics().faults >= 1);

    // 错误状态中的普通命令以 Failed 结束
    let measure = rig.engine.submit(SimCommand::Measure);
    assert_eq!(measure.wait(WAIT), CommandStatus::Failed);
    assert_eq!(rig.engine.current_state(), Some(StateId::GENERIC_ERROR));
}

#[test]
fn test_reset_recovers_through_start() {
    let rig = rig_with(|b| b.initial_configuration(sim_config()));
    into_operating(&rig);
    let boom = rig.engine.submit(SimCommand::Panic);
    assert_eq!(boom.wait(WAIT), CommandStatus::Failed);
    assert!(rig.engine.wait_for_state(&StateId::GENERIC_ERROR, WAIT));

    let reset = rig.engine.submit(SimCommand::Reset);
    assert_eq!(reset.wait(WAIT), CommandStatus::Success);
    // 配置仍在，Start 立即完成
    assert!(rig.engine.wait_for_state(&StateId::LOADED, WAIT));
    assert_eq!(rig.engine.previous_state(), Some(StateId::START));

    let open = rig.engine.submit(SimCommand::Open);
    assert_eq!(open.wait(WAIT), CommandStatus::Success);
    assert!(rig.engine.wait_for_state(&OPERATING, WAIT));
}

#[test]
fn test_reported_error_without_table_entry() {
    let rig = rig_with(|b| b.initial_configuration(sim_config()));
    rig.hardware.set_fail_open(true);
    rig.engine.start().unwrap();

    let open = rig.engine.submit(SimCommand::Open);
    assert_eq!(open.wait(WAIT), CommandStatus::Failed);
    assert!(rig.engine.wait_for_state(&StateId::GENERIC_ERROR, WAIT));
    assert_eq!(rig.engine.previous_state(), Some(StateId::LOADED));
    assert!(!rig.engine.is_open());
}

#[test]
fn test_reported_error_follows_transition_table() {
    let rig = rig_with(|b| {
        b.initial_configuration(sim_config())
            .transition(StateId::LOADED, StateResult::Error, StateId::STOP)
    });
    rig.hardware.set_fail_open(true);
    rig.engine.start().unwrap();

    let open = rig.engine.submit(SimCommand::Open);
    assert_eq!(open.wait(WAIT), CommandStatus::Failed);
    // Stop 立即完成并转入 End
    assert!(rig.engine.wait_for_state(&StateId::END, WAIT));
    rig.engine.join(WAIT).unwrap();
    assert_eq!(rig.engine.previous_state(), Some(StateId::STOP));
}

#[test]
fn test_unknown_target_moves_to_transition_error() {
    let rig = rig_with(|b| b.initial_configuration(sim_config()));
    into_operating(&rig);

    let jump = rig.engine.submit(SimCommand::Jump);
    assert_eq!(jump.wait(WAIT), CommandStatus::Success);
    assert!(rig.engine.wait_for_state(&StateId::TRANSITION_ERROR, WAIT));
    assert_eq!(rig.engine.previous_state(), Some(OPERATING.clone()));
    assert_ne!(rig.engine.current_state(), Some(NOWHERE.clone()));
    assert!(rig.engine.metrics().faults >= 1);

    let reset = rig.engine.submit(SimCommand::Reset);
    assert_eq!(reset.wait(WAIT), CommandStatus::Success);
    assert!(rig.engine.wait_for_state(&StateId::LOADED, WAIT));
}

#[test]
fn test_state_change_listeners() {
    let rig = rig_with(|b| b.initial_configuration(sim_config()));
    let events: Arc<Mutex<Vec<StateChangeEvent>>> = Arc::default();
    {
        let events = events.clone();
        rig.engine
            .add_state_change_listener(Arc::new(move |e: &StateChangeEvent| {
                events.lock().push(e.clone());
            }));
    }
    rig.engine
        .add_state_change_listener(Arc::new(|e: &StateChangeEvent| {
            if e.current == StateId::LOADED {
                panic!("listener bug");
            }
        }));

    into_operating(&rig);
    assert!(wait_until(WAIT, || events.lock().len() >= 2));

    let mut seen: Vec<_> = events
        .lock()
        .iter()
        .map(|e| (e.previous.clone(), e.current.clone(), e.trigger))
        .collect();
    seen.sort_by_key(|(_, current, _)| current.id());
    assert_eq!(
        seen,
        vec![
            (StateId::START, StateId::LOADED, StateResult::Completed),
            (StateId::LOADED, OPERATING.clone(), StateResult::Completed),
        ]
    );
    assert!(events.lock().iter().all(|e| &*e.device == "sim"));

    // 监听器的 panic 只计数，不影响状态机
    assert!(wait_until(WAIT, || rig.engine.metrics().listener_failures == 1));
    assert_eq!(rig.engine.current_state(), Some(OPERATING.clone()));
}
