//! Abuse control in front of case creation

use std::time::Duration;

use vetline_core::config::RateLimitConfig;
use vetline_core::{Caller, Error};
use vetline_ratelimit::{Policies, PolicyName, RateLimiter};

use crate::test_utils::{distress_request, Harness, SCENE};

/// Gate a create the way the API does: limit by client key, then create.
async fn gated_create(
    limiter: &RateLimiter,
    h: &Harness,
    client: &str,
    reporter: &str,
) -> Result<String, Error> {
    limiter.check(PolicyName::DistressCall, client).await?;
    h.engine
        .create_case(&Caller::reporter(reporter), distress_request(SCENE))
        .await
        .map(|created| created.case_id)
}

#[tokio::test(start_paused = true)]
async fn fourth_call_in_window_is_rejected_until_reset() {
    let h = Harness::new();
    let limiter = RateLimiter::in_memory(Policies::from_config(&RateLimitConfig::default()));
    let client = "203.0.113.9";

    for reporter in ["r1", "r2", "r3"] {
        gated_create(&limiter, &h, client, reporter).await.unwrap();
    }

    match gated_create(&limiter, &h, client, "r4").await {
        Err(Error::TooManyRequests {
            message,
            retry_after_secs,
        }) => {
            assert_eq!(
                message,
                "Too many distress calls. Please wait before creating another."
            );
            assert!((1..=60).contains(&retry_after_secs));
        }
        other => panic!("expected rate limit, got {:?}", other),
    }

    // another client is unaffected
    gated_create(&limiter, &h, "198.51.100.4", "r5").await.unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;
    gated_create(&limiter, &h, client, "r4").await.unwrap();
}
