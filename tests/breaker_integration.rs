//! Circuit breaker integration tests - configuration and recovery cycles

use std::sync::Arc;
use std::time::Duration;

use persona_gateway::PersonalizationError;
use persona_gateway::config::CircuitBreakerConfig;
use persona_gateway::failsafe::{CircuitBreaker, CircuitStatus};
use persona_gateway::store::{MemoryStateStore, StateStore};

#[test]
fn test_circuit_breaker_with_custom_config() {
    // Stricter configuration
    let custom_config = CircuitBreakerConfig {
        enabled: true,
        max_errors: 3, // Lower than default 5
        recovery_threshold: 4,
        cooldown: Duration::from_secs(60),
    };

    let cb = CircuitBreaker::with_memory_store(&custom_config);

    // Should open after 3 failures (not default 5)
    for _ in 0..2 {
        cb.record_failure(&PersonalizationError::Network, Duration::from_millis(10));
    }
    assert!(cb.can_proceed());

    cb.record_failure(&PersonalizationError::Network, Duration::from_millis(10));
    assert!(!cb.can_proceed());
}

#[test]
fn test_circuit_breaker_with_lenient_config() {
    // More lenient configuration for a flaky provider
    let lenient_config = CircuitBreakerConfig {
        enabled: true,
        max_errors: 10, // Higher than default 5
        recovery_threshold: 3,
        cooldown: Duration::from_secs(30),
    };

    let cb = CircuitBreaker::with_memory_store(&lenient_config);

    // Still closed after 5 failures (default would open)
    for _ in 0..5 {
        cb.record_failure(&PersonalizationError::Timeout, Duration::from_millis(10));
    }
    assert!(cb.can_proceed());

    // Opens after 10
    for _ in 0..5 {
        cb.record_failure(&PersonalizationError::Timeout, Duration::from_millis(10));
    }
    assert!(!cb.can_proceed());
}

#[test]
fn test_disabled_circuit_breaker_config() {
    let disabled_config = CircuitBreakerConfig {
        enabled: false,
        max_errors: 3,
        recovery_threshold: 2,
        cooldown: Duration::from_secs(30),
    };

    let cb = CircuitBreaker::with_memory_store(&disabled_config);

    // Never gates, even with many failures
    for _ in 0..100 {
        cb.record_failure(&PersonalizationError::Network, Duration::from_millis(10));
    }
    assert!(cb.can_proceed());
}

#[test]
fn test_cooldown_enables_half_open_probe() {
    let config = CircuitBreakerConfig {
        enabled: true,
        max_errors: 2,
        recovery_threshold: 3,
        cooldown: Duration::from_millis(10),
    };

    let cb = CircuitBreaker::with_memory_store(&config);

    cb.record_failure(&PersonalizationError::Timeout, Duration::from_millis(5));
    cb.record_failure(&PersonalizationError::Timeout, Duration::from_millis(5));
    assert_eq!(cb.snapshot().status, CircuitStatus::Open);
    assert!(!cb.can_proceed());

    // Wait for the cooldown to elapse
    std::thread::sleep(Duration::from_millis(15));

    // Next check performs the probe transition
    assert!(cb.can_proceed());
    assert_eq!(cb.snapshot().status, CircuitStatus::HalfOpen);
}

#[test]
fn test_full_recovery_cycle() {
    let config = CircuitBreakerConfig {
        enabled: true,
        max_errors: 2,
        recovery_threshold: 2,
        cooldown: Duration::from_millis(0),
    };

    let cb = CircuitBreaker::with_memory_store(&config);

    // Trip the breaker
    cb.record_failure(&PersonalizationError::Network, Duration::from_millis(5));
    cb.record_failure(&PersonalizationError::Network, Duration::from_millis(5));
    assert_eq!(cb.snapshot().status, CircuitStatus::Open);

    // Probe, then recover through consecutive successes
    assert!(cb.try_probe());
    cb.record_success(Duration::from_millis(5));
    assert_eq!(cb.snapshot().status, CircuitStatus::HalfOpen);
    cb.record_success(Duration::from_millis(5));
    assert_eq!(cb.snapshot().status, CircuitStatus::Closed);

    // Lifetime counters survived the whole cycle
    let metrics = cb.metrics();
    assert_eq!(metrics.total_requests, 4);
    assert_eq!(metrics.total_errors, 2);
    assert_eq!(metrics.error_rate, 50.0);
    assert_eq!(metrics.uptime, 50.0);
}

#[test]
fn test_fallback_strategy_surfaced_on_failure() {
    let cb = CircuitBreaker::with_memory_store(&CircuitBreakerConfig::default());

    let strategy = cb.record_failure(&PersonalizationError::Timeout, Duration::from_millis(5));
    assert_eq!(strategy.reason, "timeout");
    assert!(strategy.should_retry);

    let strategy = cb.record_failure(&PersonalizationError::Data, Duration::from_millis(5));
    assert_eq!(strategy.reason, "data");
    assert!(!strategy.should_retry);
}

#[test]
fn test_independent_instances_do_not_interfere() {
    let config = CircuitBreakerConfig {
        enabled: true,
        max_errors: 3,
        recovery_threshold: 2,
        cooldown: Duration::from_secs(30),
    };

    // Each breaker gets its own injected store
    let cb1 = CircuitBreaker::new(&config, Arc::new(MemoryStateStore::new()));
    let cb2 = CircuitBreaker::new(&config, Arc::new(MemoryStateStore::new()));

    for _ in 0..3 {
        cb1.record_failure(&PersonalizationError::Network, Duration::from_millis(5));
    }

    assert!(!cb1.can_proceed());
    assert!(cb2.can_proceed());
    assert_eq!(cb2.snapshot().total_requests, 0);
}

#[test]
fn test_shared_store_shares_state() {
    let config = CircuitBreakerConfig {
        enabled: true,
        max_errors: 3,
        recovery_threshold: 2,
        cooldown: Duration::from_secs(30),
    };

    // Two breaker handles over one store observe the same counters
    let store = Arc::new(MemoryStateStore::new());
    let cb1 = CircuitBreaker::new(&config, Arc::clone(&store) as Arc<dyn StateStore>);
    let cb2 = CircuitBreaker::new(&config, Arc::clone(&store) as Arc<dyn StateStore>);

    for _ in 0..3 {
        cb1.record_failure(&PersonalizationError::Network, Duration::from_millis(5));
    }

    assert!(!cb2.can_proceed());
    assert_eq!(cb2.snapshot().total_errors, 3);
}
