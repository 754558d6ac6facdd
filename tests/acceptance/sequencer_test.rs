//! Reset lifecycle acceptance tests.
//!
//! Drive the sequencer against the simulated stack, board and file storage
//! on a manually clocked board, so every step is deterministic.
//!
//! # Acceptance Criteria
//!
//! - Boot reaches normal operation with both interrupt kinds armed
//! - A communication reset reinitializes without rerunning boot work
//! - An application reset releases the stack and issues one software reset
//! - Fatal initialization errors fail-stop while the watchdog keeps running
//! - Persistent counters survive reboots; storage faults are reported

use super::common::{node_config, step_until, HookCounter};
use node_common::error::{NodeError, StackError};
use node_common::node::{BitRate, BusController, EmergencyCode, ErrorClass, ResetRequest, FALLBACK_NODE_ID};
use node_common::state::SequencerState;
use node_runtime::collaborators::{NoPersistence, Persistence};
use node_runtime::context::{NodeContext, NodeShared};
use node_runtime::hal::{InterruptController, InterruptSource};
use node_runtime::sequencer::Sequencer;
use node_sim::{FilePersistence, SimBoard, SimStack};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_boot_reaches_normal_operation() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));

    assert!(stack.is_initialized());
    assert!(stack.is_normal(BusController::Can1));
    assert!(board.is_enabled(InterruptSource::Timer));
    assert!(board.is_enabled(InterruptSource::Bus(BusController::Can1)));
    assert!(!board.is_enabled(InterruptSource::Bus(BusController::Can2)));
    assert_eq!(board.priority(InterruptSource::Timer), 3);
    assert_eq!(board.priority(InterruptSource::Bus(BusController::Can1)), 5);
    assert_eq!(HookCounter::get(&app.starts), 1);
    assert_eq!(HookCounter::get(&app.resets), 1);
    assert_eq!(shared.counters.power_on_count(), 1);
    assert_eq!(sequencer.node_id().get(), config.bus.node_id);
}

#[test]
fn test_foreground_services_watchdog_every_iteration() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
    let before = board.watchdog_services();

    for _ in 0..20 {
        assert_eq!(sequencer.step().unwrap(), SequencerState::NormalOperation);
    }

    assert_eq!(board.watchdog_services() - before, 60);
    assert_eq!(HookCounter::get(&app.asyncs), 20);
    assert_eq!(sequencer.iterations(), 20);
}

#[test]
fn test_communication_reset_reinitializes() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
    shared.counters.main_cycle.record(900);

    stack.write_node_id(0x33);
    stack.request_reset(ResetRequest::Communication);
    assert_eq!(sequencer.step().unwrap(), SequencerState::ApplyConfig);
    assert_eq!(sequencer.step().unwrap(), SequencerState::StackInit);
    assert!(!board.is_enabled(InterruptSource::Timer));
    assert!(!board.is_enabled(InterruptSource::Bus(BusController::Can1)));

    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
    assert_eq!(sequencer.reset_cycles(), 2);
    assert_eq!(sequencer.node_id().get(), 0x33);
    assert_eq!(stack.stats().inits, 2);
    assert_eq!(HookCounter::get(&app.starts), 1);
    assert_eq!(HookCounter::get(&app.resets), 2);
    assert_eq!(shared.counters.power_on_count(), 1);
    assert_eq!(shared.counters.main_cycle.max(), 0);
}

#[test]
fn test_application_reset_tears_down() {
    let config = node_config(2);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));

    stack.request_reset(ResetRequest::Application);
    assert_eq!(sequencer.run().unwrap(), SequencerState::Teardown);

    assert_eq!(HookCounter::get(&app.ends), 1);
    assert!(!stack.is_initialized());
    assert_eq!(board.software_resets(), 1);
    for source in InterruptSource::ALL {
        assert!(!board.is_enabled(source));
    }

    // Terminal: further steps do nothing
    let services = board.watchdog_services();
    assert_eq!(sequencer.step().unwrap(), SequencerState::Teardown);
    assert_eq!(board.watchdog_services(), services);
    assert_eq!(board.software_resets(), 1);
}

#[test]
fn test_invalid_node_id_falls_back() {
    let mut config = node_config(1);
    config.bus.node_id = 0;
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
    assert_eq!(sequencer.node_id(), FALLBACK_NODE_ID);
}

#[test]
fn test_illegal_bit_rate_halts_with_watchdog_serviced() {
    let mut config = node_config(1);
    config.bus.bit_rate = BitRate(333);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    assert_eq!(sequencer.run().unwrap(), SequencerState::Halted);
    assert!(matches!(
        sequencer.halt_reason(),
        Some(NodeError::StackInit(StackError::IllegalBitRate(_)))
    ));

    let services = board.watchdog_services();
    for _ in 0..10 {
        assert_eq!(sequencer.step().unwrap(), SequencerState::Halted);
    }
    assert_eq!(board.watchdog_services() - services, 10);
    assert!(!board.is_enabled(InterruptSource::Timer));
    assert_eq!(HookCounter::get(&app.resets), 0);
}

#[test]
fn test_bit_rate_written_at_runtime_applies_on_communication_reset() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
    assert_eq!(sequencer.bit_rate(), config.bus.bit_rate);

    stack.write_bit_rate(BitRate(500));
    stack.request_reset(ResetRequest::Communication);
    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
    assert_eq!(sequencer.bit_rate(), BitRate(500));

    // An unsupported rate only takes effect, and fails, at the next reset
    stack.write_bit_rate(BitRate(333));
    assert_eq!(sequencer.step().unwrap(), SequencerState::NormalOperation);
    stack.request_reset(ResetRequest::Communication);
    assert_eq!(sequencer.run().unwrap(), SequencerState::Halted);
    assert_eq!(
        sequencer.halt_reason(),
        Some(&NodeError::StackInit(StackError::IllegalBitRate(333)))
    );
    assert_eq!(sequencer.reset_cycles(), 3);
}

#[test]
fn test_corrupt_dictionary_halts_at_boot() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    stack.corrupt_dictionary();
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    assert_eq!(sequencer.step().unwrap(), SequencerState::Halted);
    assert!(matches!(
        sequencer.halt_reason(),
        Some(NodeError::DictionaryInconsistent)
    ));
    assert_eq!(HookCounter::get(&app.starts), 0);
    assert!(!stack.is_initialized());
}

fn boot_once(config: &node_common::config::NodeConfig, persistence: &dyn Persistence) -> (u32, SimStack) {
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::manual();
    let shared = NodeShared::from_config(config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, persistence, &app, &board, &shared);

    let mut sequencer = Sequencer::new(ctx, config).unwrap();
    assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
    sequencer.step().unwrap();
    let count = shared.counters.power_on_count();
    drop(sequencer);
    (count, stack)
}

#[test]
fn test_power_on_count_survives_reboots() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.json");
    let config = node_config(1);

    for boot in 1..=3 {
        let persistence = FilePersistence::new(&path);
        let (count, stack) = boot_once(&config, &persistence);
        assert_eq!(count, boot);
        assert!(stack.errors().is_empty());
    }
    assert_eq!(FilePersistence::new(&path).load().unwrap().power_on_count, 3);
}

#[test]
fn test_corrupt_storage_reported_after_stack_init() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("node.json");
    fs::write(&path, "garbage").unwrap();
    let config = node_config(1);

    let persistence = FilePersistence::new(&path);
    let (count, stack) = boot_once(&config, &persistence);

    // Boot continues from a fresh count and the fault goes to the error sink
    assert_eq!(count, 1);
    let errors = stack.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, EmergencyCode::NonVolatileMemory);
    assert_eq!(errors[0].class, ErrorClass::Hardware);
}
