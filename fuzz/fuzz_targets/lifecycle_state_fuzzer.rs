//! Fuzz target for the lifecycle state machine
//!
//! Ensure resource ordering and exactly-once effects hold on every path
//!
//! # Strategy
//!
//! - Arbitrary interleavings of unlock, lock, drain timer firings (current
//!   and stale generations), teardown and visibility edges
//! - Init steps fail at random so retries are exercised
//! - 0..=8 subsystems
//!
//! # Invariants
//!
//! - Secret readable only while Unlocked; never installed twice without a clear
//! - Subsystems stop in exactly the reverse of their start order
//! - Nothing runs while Locked once the lock actions are applied
//! - A completed init step never runs again
//! - A drain executes at most once, and only for the current generation
//! - Visibility actions only while Unlocked

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use latchkey_core::{
    InitStep, Lifecycle, LifecycleAction, LifecycleConfig, LockState, SubsystemId, Visibility,
    visibility_actions,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum LifecycleOp {
    Unlock { failing_steps: u8 },
    Lock,
    DrainFires { generation_back: u8 },
    Teardown,
    Visibility { foreground: bool },
}

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    subsystems: u8,
    ops: Vec<LifecycleOp>,
}

#[derive(Default)]
struct Resident {
    installed: bool,
    readable: bool,
    running: Vec<SubsystemId>,
    completed: HashSet<InitStep>,
    drained: HashSet<u64>,
}

impl Resident {
    fn apply(&mut self, machine: &mut Lifecycle, actions: &[LifecycleAction], failing_steps: u8) {
        for action in actions {
            match action {
                LifecycleAction::InstallSecret => {
                    assert!(!self.installed, "secret installed twice");
                    self.installed = true;
                },
                LifecycleAction::ClearSecret => {
                    self.installed = false;
                    self.readable = false;
                },
                LifecycleAction::UnsealSecret => {
                    assert!(self.installed, "unsealed without a secret");
                    self.readable = true;
                },
                LifecycleAction::SealSecret => self.readable = false,
                LifecycleAction::Initialize(step) => {
                    assert!(!self.completed.contains(step), "{step} ran after completing");
                    let bit = 1u8 << InitStep::ALL.iter().position(|s| s == step).unwrap_or(0);
                    let succeeded = failing_steps & bit == 0;
                    if succeeded {
                        self.completed.insert(*step);
                    }
                    machine.record_init(*step, succeeded);
                },
                LifecycleAction::StartSubsystem(id) => {
                    assert!(!self.running.contains(id), "subsystem started twice");
                    self.running.push(*id);
                },
                LifecycleAction::StopSubsystem(id) => {
                    assert_eq!(self.running.pop(), Some(*id), "stop order must reverse start order");
                },
                _ => {},
            }
        }
    }
}

fuzz_target!(|scenario: Scenario| {
    let subsystems = (0..usize::from(scenario.subsystems % 9)).map(SubsystemId).collect();
    let mut machine = Lifecycle::new(subsystems, &LifecycleConfig::default());
    let mut resident = Resident::default();
    let mut visibility = Visibility::Background;

    for op in scenario.ops {
        match op {
            LifecycleOp::Unlock { failing_steps } => {
                if let Some(actions) = machine.begin_unlock() {
                    assert_eq!(machine.state(), LockState::Unlocking);
                    resident.apply(&mut machine, &actions, failing_steps);
                    let finish = machine.finish_unlock().unwrap_or_default();
                    resident.apply(&mut machine, &finish, 0);
                    assert!(resident.readable);
                } else {
                    assert_ne!(machine.state(), LockState::Locked);
                }
            },
            LifecycleOp::Lock => {
                if let Some(actions) = machine.begin_lock() {
                    resident.apply(&mut machine, &actions, 0);
                    assert!(resident.running.is_empty());
                    assert_eq!(machine.pending_drain(), Some(machine.generation()));
                }
            },
            LifecycleOp::DrainFires { generation_back } => {
                let generation = machine.generation().wrapping_sub(u64::from(generation_back));
                let actions = machine.drain_due(generation);
                if !actions.is_empty() {
                    assert_eq!(generation, machine.generation(), "stale drain executed");
                    assert!(resident.drained.insert(generation), "drain ran twice");
                }
                resident.apply(&mut machine, &actions, 0);
            },
            LifecycleOp::Teardown => {
                let actions = machine.teardown();
                resident.apply(&mut machine, &actions, 0);
                assert_eq!(machine.state(), LockState::Locked);
                assert!(!resident.installed);
                assert!(machine.pending_drain().is_none());
                resident.drained.insert(machine.generation());
            },
            LifecycleOp::Visibility { foreground } => {
                let next =
                    if foreground { Visibility::Foreground } else { Visibility::Background };
                let actions = visibility_actions(visibility, next, machine.state());
                if machine.state() != LockState::Unlocked {
                    assert!(actions.is_empty());
                }
                visibility = next;
            },
        }

        if machine.state() == LockState::Locked {
            assert!(!resident.readable, "secret readable while locked");
            assert!(resident.running.is_empty(), "subsystem running while locked");
        }
        assert_eq!(machine.is_initialized(), resident.completed.len() == InitStep::ALL.len());
    }
});
