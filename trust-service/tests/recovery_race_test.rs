//! Concurrent recovery code spends.

mod common;

use common::TestApp;
use trust_service::services::{PresentedCode, Scope, ServiceError, StepUpRequest};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_spends_of_one_code_succeed_once() {
    let app = TestApp::spawn();
    let claim = app.seed_member(false);
    let codes = app.enroll(&claim).await;
    let code = codes[0].clone();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let mfa = app.state.mfa.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            mfa.verify_step_up(StepUpRequest {
                claim,
                scope: Scope::Global,
                code: PresentedCode::Recovery(code),
                device_hash: None,
                device_label: None,
            })
            .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(issued) => {
                successes += 1;
                assert_eq!(issued.remaining_recovery_codes, codes.len() - 1);
            }
            Err(ServiceError::InvalidCode) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(successes, 1);
    let user = app.store.user(claim.user_id).unwrap();
    assert_eq!(user.unused_recovery_codes(), codes.len() - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_spends_of_distinct_codes_all_land() {
    let app = TestApp::spawn();
    let claim = app.seed_member(false);
    let codes = app.enroll(&claim).await;

    let mut handles = Vec::new();
    for code in codes.iter().take(8).cloned() {
        let mfa = app.state.mfa.clone();
        handles.push(tokio::spawn(async move {
            mfa.verify_step_up(StepUpRequest {
                claim,
                scope: Scope::Global,
                code: PresentedCode::Recovery(code),
                device_hash: None,
                device_label: None,
            })
            .await
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await.unwrap() {
            panic!("valid code rejected: {}", e);
        }
    }

    let user = app.store.user(claim.user_id).unwrap();
    assert_eq!(user.unused_recovery_codes(), codes.len() - 8);
}
