//! Interrupt timing acceptance tests.
//!
//! Run the node on a board clocked by the host with the interrupt lines
//! live, and check the timing guarantees the executive makes.
//!
//! # Acceptance Criteria
//!
//! - Every timer interrupt advances the tick counter by exactly one
//! - A timer handler running past its period is reported as an overflow
//! - Receive interrupts drain each controller independently
//! - Foreground cycle times are measured across tick boundaries

use super::common::{node_config, step_until, with_interrupt_lines, HookCounter};
use node_common::node::{BusController, EmergencyCode, ErrorClass};
use node_common::state::SequencerState;
use node_runtime::collaborators::NoPersistence;
use node_runtime::context::{NodeContext, NodeShared};
use node_runtime::instrumentation::{CycleClock, PeriodMeter};
use node_runtime::sequencer::Sequencer;
use node_sim::{deliver_frame, CanFrame, SimBoard, SimStack};
use std::thread;
use std::time::Duration;

#[test]
fn test_ticks_match_timer_interrupts() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::realtime(config.tick_period);
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);
    let mut sequencer = Sequencer::new(ctx, &config).unwrap();

    with_interrupt_lines(ctx, &board, &[BusController::Can1], || {
        assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
        thread::sleep(Duration::from_millis(60));
    });

    let ticks = u64::from(shared.ticks.now());
    assert!(ticks >= 10, "only {ticks} ticks in 60 ms");
    assert_eq!(stack.stats().tpdo_passes, ticks);
    assert_eq!(HookCounter::get(&app.fast), ticks);
}

#[test]
fn test_slow_fast_hook_reports_timer_overflow() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::realtime(config.tick_period);
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::with_fast_delay(Duration::from_micros(1500));
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);
    let mut sequencer = Sequencer::new(ctx, &config).unwrap();

    with_interrupt_lines(ctx, &board, &[BusController::Can1], || {
        assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
        thread::sleep(Duration::from_millis(40));
    });

    let overruns = shared.counters.timer_overruns();
    assert!(overruns > 0);
    let overflows: Vec<_> = stack
        .errors()
        .into_iter()
        .filter(|e| e.code == EmergencyCode::IsrTimerOverflow)
        .collect();
    assert_eq!(overflows.len(), usize::try_from(overruns).unwrap());
    assert!(overflows.iter().all(|e| e.class == ErrorClass::SoftwareInternal));
}

#[test]
fn test_receive_interrupts_drain_each_controller() {
    let config = node_config(2);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::realtime(config.tick_period);
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);
    let mut sequencer = Sequencer::new(ctx, &config).unwrap();
    let controllers = [BusController::Can1, BusController::Can2];

    with_interrupt_lines(ctx, &board, &controllers, || {
        assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
        for i in 0..6u8 {
            assert!(deliver_frame(&board, &stack, BusController::Can1, CanFrame::new(0x181, &[i])));
            if i % 2 == 0 {
                assert!(deliver_frame(&board, &stack, BusController::Can2, CanFrame::new(0x282, &[i])));
            }
            thread::sleep(Duration::from_millis(2));
        }
        thread::sleep(Duration::from_millis(10));
    });

    let stats = stack.stats();
    assert_eq!(stats.frames_received, [6, 3]);
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stack.pending_frames(BusController::Can1), 0);
    assert_eq!(stack.pending_frames(BusController::Can2), 0);
}

#[test]
fn test_frames_before_normal_mode_are_dropped() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::realtime(config.tick_period);

    assert!(!deliver_frame(&board, &stack, BusController::Can1, CanFrame::new(0x181, &[1])));
    assert_eq!(stack.stats().frames_dropped, 1);
}

#[test]
fn test_foreground_cycle_time_measured() {
    let config = node_config(1);
    let stack = SimStack::from_config(&config.bus);
    let board = SimBoard::realtime(config.tick_period);
    let shared = NodeShared::from_config(&config);
    let app = HookCounter::default();
    let ctx = NodeContext::new(&stack, &NoPersistence, &app, &board, &shared);
    let mut sequencer = Sequencer::new(ctx, &config).unwrap();

    with_interrupt_lines(ctx, &board, &[BusController::Can1], || {
        assert!(step_until(&mut sequencer, SequencerState::NormalOperation));
        for _ in 0..10 {
            thread::sleep(Duration::from_millis(3));
            assert_eq!(sequencer.step().unwrap(), SequencerState::NormalOperation);
        }
    });

    // At least two whole ticks pass between iterations, in 1/100 tick units
    assert!(shared.counters.main_cycle.max() >= 100);
    assert!(shared.counters.main_cycle.current() > 0);
}

#[test]
fn test_period_meter_across_tick_wrap() {
    let clock = CycleClock::new(32_000);
    let mut meter = PeriodMeter::new(65_534);

    let sample = meter.sample(&clock, 65_534, 8_000);
    assert_eq!(sample.elapsed_ms, 0);
    assert_eq!(sample.cycle_time, 25);

    // Two ticks later across the wrap, counter restarted below its last value
    let sample = meter.sample(&clock, 0, 4_000);
    assert_eq!(sample.elapsed_ms, 2);
    assert_eq!(sample.cycle_time, 188);
}
