//! Unit tests for adaptive pacing

use pocket_exporter::export::{BatchOutcome, PacingConfig, RateController};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

fn controller() -> RateController {
    RateController::new(PacingConfig {
        jitter: (1.0, 1.0),
        ..PacingConfig::default()
    })
}

#[test]
fn test_first_delay_is_base_delay() {
    let controller = controller();
    let mut rng = StdRng::seed_from_u64(1);
    let decision = controller.next_delay(&controller.initial_state(), &mut rng);
    assert_eq!(decision.delay, Duration::from_millis(1500));
    assert!(decision.cooldown.is_none());
}

#[test]
fn test_delay_never_decreases_while_succeeding() {
    let controller = controller();
    let mut state = controller.initial_state();
    let mut previous = state.current_delay;
    for _ in 0..200 {
        state = controller.observe(state, BatchOutcome::Success);
        assert!(state.current_delay >= previous);
        previous = state.current_delay;
    }
    // ten percent per ten batches
    assert_eq!(previous, Duration::from_millis(1500).mul_f64(3.0));
}

#[test]
fn test_cooldown_on_cadence() {
    let controller = controller();
    let mut rng = StdRng::seed_from_u64(7);
    let mut state = controller.initial_state();
    let mut cooldowns = Vec::new();
    for batch in 1..=60u64 {
        state = controller.observe(state, BatchOutcome::Success);
        if controller.next_delay(&state, &mut rng).is_cooldown() {
            cooldowns.push(batch);
        }
    }
    assert_eq!(cooldowns, vec![20, 40, 60]);
}

#[test]
fn test_rate_limit_escalates_and_recovers() {
    let controller = controller();
    let calm = controller.initial_state().current_delay;

    let mut state = controller.observe(controller.initial_state(), BatchOutcome::RateLimited);
    assert!(state.current_delay > calm);
    state = controller.observe(state, BatchOutcome::RateLimited);
    let escalated = state.current_delay;
    assert!(escalated > calm.mul_f64(2.0));

    for _ in 0..4 {
        state = controller.observe(state, BatchOutcome::Success);
    }
    assert!(state.escalation > 1.0);
    state = controller.observe(state, BatchOutcome::Success);
    assert_eq!(state.escalation, 1.0);
    assert!(state.current_delay < escalated);
}

#[test]
fn test_transient_failure_does_not_escalate() {
    let controller = controller();
    let state = controller.observe(controller.initial_state(), BatchOutcome::TransientFailure);
    assert_eq!(state.escalation, 1.0);
    assert_eq!(state.consecutive_failures, 1);
}

#[test]
fn test_delay_is_capped() {
    let controller = controller();
    let mut state = controller.initial_state();
    for _ in 0..100 {
        state = controller.observe(state, BatchOutcome::RateLimited);
    }
    let mut rng = StdRng::seed_from_u64(3);
    let decision = controller.next_delay(&state, &mut rng);
    assert_eq!(decision.delay, controller.config().max_delay);
}

#[test]
fn test_jitter_stays_in_range() {
    let controller = RateController::new(PacingConfig::default());
    let state = controller.initial_state();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..500 {
        let ms = controller.next_delay(&state, &mut rng).delay.as_millis();
        assert!((1199..=1800).contains(&ms), "delay {ms}ms out of range");
    }
}

#[test]
fn test_three_rate_limits_raise_the_fourth_delay() {
    let controller = controller();
    let mut rng = StdRng::seed_from_u64(11);
    let mut state = controller.initial_state();
    let first = controller.next_delay(&state, &mut rng).delay;
    for _ in 0..3 {
        state = controller.observe(state, BatchOutcome::RateLimited);
    }
    let fourth = controller.next_delay(&state, &mut rng).delay;
    assert!(fourth > first);
    assert_eq!(state.consecutive_failures, 3);
}
