//! Installs the process-global subscriber, so it lives in its own test binary
//! away from the `#[traced_test]` unit tests.
#![cfg(feature = "tracing-basic")]

use dog_governor::init_tracing;

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing(false);
    assert!(tracing::dispatcher::has_been_set());

    // A second call keeps the first subscriber instead of panicking
    init_tracing(true);
    assert!(tracing::dispatcher::has_been_set());
}
