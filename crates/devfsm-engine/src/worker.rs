//! 工作线程主循环
//!
//! 这是唯一调用状态 `enter`/`state_proc`/`exit` 的代码路径。每次迭代：
//!
//! 1. 检查停止请求（有则转入 End 并退出）
//! 2. 没有当前命令且队列非空时出队（过期命令直接以 Timeout 结束）
//! 3. 调用当前状态的 `state_proc` 一次
//! 4. 按结果转换状态：Completed → 后继状态；Error/panic → 错误状态（清空状态序列）
//! 5. 当前命令进入终态后清除
//! 6. 按当前状态的空闲策略等待
//!
//! 状态回调中的 panic 在循环边界被捕获并转为故障，工作线程不会因此退出。

use crate::command::{Command, CommandStatus};
use crate::context::{StateContext, StateFault};
use crate::engine::Shared;
use crate::hooks::StateChangeEvent;
use crate::identity::StateId;
use crate::idle::{IdleOutcome, Wake};
use crate::metrics::EngineMetrics;
use crate::profile::DeviceProfile;
use crate::registry::StateRegistry;
use crate::state::{IdlePeriod, State, StateResult};
use crate::transition::TransitionTable;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, error, info, info_span, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Enter,
    Proc,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// 留在当前状态，正常空闲
    Continue,
    /// 进入了新状态，立即执行其 `state_proc`
    Transitioned,
    /// 已经执行完 End，退出循环
    Finished,
}

/// panic 负载转文本
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

pub(crate) struct Worker<P: DeviceProfile> {
    shared: Arc<Shared<P>>,
    registry: StateRegistry<P>,
    transitions: TransitionTable,
    data: P::Data,
    /// 当前状态在注册表中的下标
    current: usize,
    previous: Option<StateId>,
    command: Option<Arc<Command<P::Command>>>,
    fault: Option<StateFault>,
    idle: IdleOutcome,
}

impl<P: DeviceProfile> Worker<P> {
    /// `registry` 必须包含 Start/End/GenericError/TransitionError（由 builder 保证）
    pub(crate) fn new(
        shared: Arc<Shared<P>>,
        registry: StateRegistry<P>,
        transitions: TransitionTable,
        data: P::Data,
    ) -> Self {
        let current = registry.index_of(&StateId::START).unwrap_or(0);
        Self {
            shared,
            registry,
            transitions,
            data,
            current,
            previous: None,
            command: None,
            fault: None,
            idle: IdleOutcome::Entered,
        }
    }

    pub(crate) fn run(mut self) {
        let span = info_span!("fsm", device = %self.shared.name);
        let _guard = span.enter();

        #[cfg(feature = "realtime")]
        if self.shared.options.realtime_priority {
            use thread_priority::*;

            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => info!("Worker thread priority set to MAX (realtime)"),
                Err(e) => warn!(
                    "Failed to set worker thread priority: {:?}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                ),
            }
        }

        info!("Worker started with {} states", self.registry.len());
        self.enter_initial();

        loop {
            if self.shared.stop_requested.load(Ordering::Acquire) {
                debug!("Stop requested, moving to {}", StateId::END);
                self.abandon_sequence();
                self.transition_to(StateId::END, StateResult::Working);
                break;
            }
            if self.step() == Flow::Finished {
                break;
            }
        }

        self.finalize();
    }

    fn state(&self) -> &dyn State<P> {
        self.registry.get(self.current)
    }

    fn state_id(&self) -> StateId {
        self.state().id().clone()
    }

    fn enter_initial(&mut self) {
        let start = self.state_id();
        self.registry.get_mut(self.current).core_mut().activate();
        self.shared.publish_state(None, &start);
        self.idle = IdleOutcome::Entered;
        if let Err(msg) = self.invoke(Phase::Enter) {
            error!("Enter of {} panicked: {}", start, msg);
            self.record_fault(start, msg);
            self.transition_to(StateId::GENERIC_ERROR, StateResult::Error);
        }
    }

    fn step(&mut self) -> Flow {
        if self.command.is_none() {
            self.dequeue();
        }

        let period = self.state().period();
        let started = Instant::now();
        let outcome = self.invoke(Phase::Proc);
        let elapsed = started.elapsed();

        let metrics = &self.shared.metrics;
        metrics.record_state_proc(elapsed.as_micros() as u64);
        if let IdlePeriod::Watchdog(p) = period
            && elapsed > p
        {
            EngineMetrics::incr(&metrics.watchdog_overruns);
            debug!(
                "StateProc of {} took {:?}, longer than its {:?} period",
                self.state().id(),
                elapsed,
                p
            );
        }

        let flow = match outcome {
            Err(msg) => {
                let origin = self.state_id();
                error!("StateProc of {} panicked: {}", origin, msg);
                self.fail_to(origin, msg, StateId::GENERIC_ERROR)
            },
            Ok(()) => match self.state().result() {
                StateResult::Working => Flow::Continue,
                StateResult::Completed => self.complete(),
                StateResult::Error => {
                    let origin = self.state_id();
                    let msg = self
                        .state()
                        .core()
                        .last_error()
                        .unwrap_or("state reported an error")
                        .to_string();
                    error!("State {} failed: {}", origin, msg);
                    let target = self
                        .transitions
                        .get(&origin, StateResult::Error)
                        .cloned()
                        .unwrap_or(StateId::GENERIC_ERROR);
                    self.fail_to(origin, msg, target)
                },
            },
        };

        self.clear_settled_command();

        match flow {
            Flow::Finished => Flow::Finished,
            Flow::Transitioned => {
                self.idle = IdleOutcome::Entered;
                Flow::Transitioned
            },
            Flow::Continue => {
                self.idle = self.wait(self.state().period());
                Flow::Continue
            },
        }
    }

    /// Completed：状态序列 → 状态声明的后继 → 转换表 → 原地重入
    fn complete(&mut self) -> Flow {
        let from = self.state_id();
        let target = self
            .shared
            .sequence
            .pop()
            .or_else(|| self.state().next_state())
            .or_else(|| self.transitions.get(&from, StateResult::Completed).cloned());
        match target {
            Some(to) => self.transition_to(to, StateResult::Completed),
            None => {
                trace!("{} completed without successor, re-entering", from);
                self.transition_to(from, StateResult::Completed)
            },
        }
    }

    fn record_fault(&mut self, origin: StateId, message: String) {
        self.abandon_sequence();
        EngineMetrics::incr(&self.shared.metrics.faults);
        self.fault = Some(StateFault { origin, message });
    }

    fn fail_to(&mut self, origin: StateId, message: String, target: StateId) -> Flow {
        self.record_fault(origin, message);
        self.transition_to(target, StateResult::Error)
    }

    fn abandon_sequence(&self) {
        let dropped = self.shared.sequence.clear();
        if dropped > 0 {
            warn!("Abandoning {} queued states", dropped);
        }
    }

    fn dequeue(&mut self) {
        let now = Instant::now();
        while let Some(cmd) = self.shared.queue.pop() {
            if cmd.is_expired(now) {
                if self.shared.settle(&cmd, CommandStatus::Timeout) {
                    EngineMetrics::incr(&self.shared.metrics.commands_timed_out);
                    warn!(
                        "Command {} ({:?}) expired after {:?} in queue",
                        cmd.id(),
                        cmd.kind(),
                        cmd.age()
                    );
                }
                continue;
            }
            if !cmd.activate() {
                debug!("Skipping command {} already {:?}", cmd.id(), cmd.status());
                continue;
            }
            trace!("Dispatching command {} ({:?})", cmd.id(), cmd.kind());
            self.shared.current_command.store(Some(cmd.clone()));
            self.command = Some(cmd);
            break;
        }
    }

    fn clear_settled_command(&mut self) {
        if let Some(cmd) = &self.command
            && cmd.is_settled()
        {
            trace!("Command {} settled as {:?}", cmd.id(), cmd.status());
            self.command = None;
            self.shared.current_command.store(None);
        }
    }

    /// 调用当前状态的回调，panic 转为错误文本
    fn invoke(&mut self, phase: Phase) -> Result<(), String> {
        let Worker {
            shared,
            registry,
            data,
            current,
            previous,
            command,
            fault,
            idle,
            ..
        } = self;
        let state = registry.get_mut(*current);
        let mut ctx = StateContext {
            shared: &**shared,
            data,
            command: command.as_ref(),
            idle: *idle,
            fault: fault.as_ref(),
            previous: previous.as_ref(),
        };
        catch_unwind(AssertUnwindSafe(|| match phase {
            Phase::Enter => state.enter(&mut ctx),
            Phase::Proc => state.state_proc(&mut ctx),
            Phase::Exit => state.exit(&mut ctx),
        }))
        .map_err(|panic| panic_message(panic.as_ref()))
    }

    /// 离开当前状态并进入 `target`
    ///
    /// - 目标未注册：转入 TransitionError
    /// - 目标 `enter` panic：转入 GenericError（已在错误状态中则停留）
    /// - 目标是 End：执行 End 的 enter/state_proc/exit 后返回 `Finished`
    fn transition_to(&mut self, target: StateId, trigger: StateResult) -> Flow {
        let mut target = target;
        let mut trigger = trigger;

        loop {
            let from = self.state_id();

            let Some(index) = self.registry.index_of(&target) else {
                let msg = format!("no state registered for {} (requested by {})", target, from);
                error!("Transition failed: {}", msg);
                if target == StateId::TRANSITION_ERROR {
                    return Flow::Continue;
                }
                self.record_fault(from, msg);
                target = StateId::TRANSITION_ERROR;
                trigger = StateResult::Error;
                continue;
            };
            let reentry = index == self.current;

            if let Err(msg) = self.invoke(Phase::Exit) {
                error!("Exit of {} panicked: {}", from, msg);
                EngineMetrics::incr(&self.shared.metrics.faults);
            }

            self.current = index;
            self.previous = Some(from.clone());
            if !target.is_error() {
                self.fault = None;
            }
            self.registry.get_mut(index).core_mut().activate();
            self.shared.publish_state(Some(&from), &target);
            EngineMetrics::incr(&self.shared.metrics.transitions);

            if self.shared.options.log_transitions {
                info!("{} -> {} ({:?})", from, target, trigger);
            } else {
                debug!("{} -> {} ({:?})", from, target, trigger);
            }

            let event = StateChangeEvent {
                device: self.shared.name.clone(),
                previous: from,
                current: target.clone(),
                trigger,
            };
            self.shared
                .hooks
                .read()
                .fire_state_change(&event, &self.shared.metrics);

            self.idle = IdleOutcome::Entered;
            if target == StateId::END {
                return self.run_end();
            }

            match self.invoke(Phase::Enter) {
                Ok(()) if reentry => return Flow::Continue,
                Ok(()) => return Flow::Transitioned,
                Err(msg) => {
                    error!("Enter of {} panicked: {}", target, msg);
                    self.record_fault(target.clone(), msg);
                    if target.is_error() {
                        return Flow::Continue;
                    }
                    target = StateId::GENERIC_ERROR;
                    trigger = StateResult::Error;
                },
            }
        }
    }

    /// End：enter、一次 state_proc、exit，然后结束循环
    fn run_end(&mut self) -> Flow {
        for phase in [Phase::Enter, Phase::Proc, Phase::Exit] {
            if let Err(msg) = self.invoke(phase) {
                error!("{:?} of {} panicked: {}", phase, StateId::END, msg);
                EngineMetrics::incr(&self.shared.metrics.faults);
            }
        }
        Flow::Finished
    }

    /// 按空闲策略等待，返回下一次 `state_proc` 的原因
    fn wait(&self, period: IdlePeriod) -> IdleOutcome {
        if period == IdlePeriod::Continuous {
            return IdleOutcome::Continuous;
        }
        let shared = &self.shared;
        let dispatchable = || self.command.is_none() && !shared.queue.is_empty();
        if dispatchable() {
            return IdleOutcome::CommandPending;
        }

        let wake = match period {
            IdlePeriod::Watchdog(d) => shared.wake.wait_timeout(d),
            _ => shared.wake.wait(),
        };
        let outcome = match wake {
            Wake::TimedOut => IdleOutcome::Tick,
            Wake::Notified if dispatchable() => IdleOutcome::CommandPending,
            Wake::Notified => IdleOutcome::Woken,
        };
        trace!("Idle ended: {:?}", outcome);
        outcome
    }

    fn finalize(&mut self) {
        // SeqCst：与 enqueue_command 中 push 后的检查配对
        self.shared.finished.store(true, Ordering::SeqCst);

        let mut rejected = self.shared.purge(CommandStatus::Rejected);
        if let Some(cmd) = self.command.take()
            && self.shared.settle(&cmd, CommandStatus::Rejected)
        {
            rejected += 1;
        }
        self.shared.current_command.store(None);
        self.shared.running.store(false, Ordering::Release);

        if rejected > 0 {
            warn!("Worker stopped, {} unfinished commands rejected", rejected);
        } else {
            info!("Worker stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(f: impl FnOnce() + std::panic::UnwindSafe) -> Box<dyn Any + Send> {
        match catch_unwind(f) {
            Ok(()) => panic!("closure did not panic"),
            Err(p) => p,
        }
    }

    #[test]
    fn test_panic_message() {
        let p = payload_of(|| panic!("static text"));
        assert_eq!(panic_message(p.as_ref()), "static text");

        let p = payload_of(|| panic!("formatted {}", 42));
        assert_eq!(panic_message(p.as_ref()), "formatted 42");

        let p = payload_of(|| std::panic::panic_any(7u8));
        assert_eq!(panic_message(p.as_ref()), "unknown panic payload");
    }
}
