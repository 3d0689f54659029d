//! Self-test verifier against well-behaved and broken engines.

mod common;

use common::FakeEngine;
use shroud::selftest::{SelfTestStep, run_self_test};

#[test]
fn test_self_test_passes_with_working_engine() {
    run_self_test(&FakeEngine::new()).unwrap();
}

#[test]
fn test_self_test_fails_when_encrypt_fails() {
    let failure = run_self_test(&FakeEngine::failing()).unwrap_err();
    assert_eq!(failure.step, SelfTestStep::Encrypt);
    assert!(failure.reason.contains("simulated"));
}

#[test]
fn test_self_test_catches_accepted_wrong_password() {
    let failure = run_self_test(&FakeEngine::ignoring_secret()).unwrap_err();
    assert_eq!(failure.step, SelfTestStep::DecryptWrong);
    assert!(failure.to_string().contains("decrypt with wrong password"));
}

#[test]
fn test_self_test_catches_corrupt_output() {
    let failure = run_self_test(&FakeEngine::corrupting()).unwrap_err();
    assert_eq!(failure.step, SelfTestStep::VerifyContent);
}
