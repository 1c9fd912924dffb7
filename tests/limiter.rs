//! Cross-task behavior of the rate limiter: admission bounds, fairness,
//! window expiry, and endpoint independence.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{two_endpoint_config, AdvancingSleeper};
use tollgate::{Clock, Cost, EndpointId, ManualClock, RateLimiter};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reserves_never_exceed_capacity() {
    let limiter = Arc::new(RateLimiter::new(&two_endpoint_config(5, 100, 1)));
    let pro = EndpointId::from("pro");

    let in_flight = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let limiter = Arc::clone(&limiter);
        let pro = pro.clone();
        let in_flight = Arc::clone(&in_flight);
        let high_water = Arc::clone(&high_water);
        handles.push(tokio::spawn(async move {
            let reservation = limiter.reserve(&pro, Cost::tokens(10)).await.expect("admitted");

            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            high_water.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);

            limiter.release(reservation).expect("release");
        }));
    }
    let results = futures::future::join_all(handles).await;
    assert!(results.iter().all(|r| r.is_ok()), "every caller is eventually admitted");

    let max_observed = high_water.load(Ordering::SeqCst);
    assert!(max_observed <= 5, "no instant may hold more than capacity, saw {max_observed}");
}

#[tokio::test]
async fn sixth_reserve_blocks_until_the_first_entry_expires() {
    // Capacity 5 requests / 60s: five immediate reserves succeed, the sixth
    // blocks until the first committed entry leaves the window.
    let clock = ManualClock::new();
    let limiter = Arc::new(
        RateLimiter::new(&two_endpoint_config(5, 100, 1))
            .with_clock(clock.clone())
            .with_sleeper(AdvancingSleeper::new(clock.clone())),
    );
    let pro = EndpointId::from("pro");

    for _ in 0..5 {
        let reservation = limiter.reserve(&pro, Cost::tokens(1)).await.expect("admitted");
        limiter.commit(reservation, Cost::new(1, 1)).expect("commit");
    }
    assert!(limiter.wait_time(&pro, Cost::tokens(1)).unwrap() > Duration::ZERO);

    let reservation = limiter.reserve(&pro, Cost::tokens(1)).await.expect("eventually admitted");
    assert!(
        clock.now_millis() >= 60_000,
        "admission required waiting out the window, clock only reached {}ms",
        clock.now_millis()
    );

    // With the five original entries evicted, the tracker never saw more
    // than five requests in any 60s span.
    limiter.commit(reservation, Cost::new(1, 1)).expect("commit");
    let snapshot = limiter.snapshot();
    let pro_snapshot = snapshot.iter().find(|s| s.endpoint == pro).unwrap();
    assert!(pro_snapshot.dimensions.iter().all(|d| d.used <= d.capacity));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_are_admitted_in_arrival_order() {
    let limiter = Arc::new(RateLimiter::new(&two_endpoint_config(1, 100, 1)));
    let pro = EndpointId::from("pro");

    // Fill the single slot so every subsequent reserve queues.
    let held = limiter.reserve(&pro, Cost::tokens(1)).await.expect("admitted");

    let admitted_order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for index in 0..3 {
        let limiter = Arc::clone(&limiter);
        let pro = pro.clone();
        let admitted_order = Arc::clone(&admitted_order);
        handles.push(tokio::spawn(async move {
            let reservation = limiter.reserve(&pro, Cost::tokens(1)).await.expect("admitted");
            admitted_order.lock().unwrap().push(index);
            limiter.release(reservation).expect("release");
        }));
        // Give each waiter time to take its ticket before the next arrives.
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    limiter.release(held).expect("release");
    for handle in handles {
        handle.await.expect("task");
    }

    assert_eq!(*admitted_order.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_waiter_does_not_block_successors() {
    let limiter = Arc::new(RateLimiter::new(&two_endpoint_config(1, 100, 1)));
    let pro = EndpointId::from("pro");

    let held = limiter.reserve(&pro, Cost::tokens(1)).await.expect("admitted");

    let first = {
        let limiter = Arc::clone(&limiter);
        let pro = pro.clone();
        tokio::spawn(async move { limiter.reserve(&pro, Cost::tokens(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(25)).await;

    let second = {
        let limiter = Arc::clone(&limiter);
        let pro = pro.clone();
        tokio::spawn(async move {
            let reservation = limiter.reserve(&pro, Cost::tokens(1)).await.expect("admitted");
            limiter.release(reservation).expect("release");
        })
    };
    tokio::time::sleep(Duration::from_millis(25)).await;

    // The head waiter gives up; the one behind it must still get through.
    first.abort();
    let _ = first.await;
    limiter.release(held).expect("release");

    tokio::time::timeout(Duration::from_secs(5), second)
        .await
        .expect("second waiter admitted")
        .expect("task");
}

#[tokio::test]
async fn endpoints_do_not_serialize_each_other() {
    let limiter = Arc::new(RateLimiter::new(&two_endpoint_config(1, 100, 1)));
    let pro = EndpointId::from("pro");
    let flash = EndpointId::from("flash");

    // Saturate pro entirely.
    let held = limiter.reserve(&pro, Cost::tokens(1)).await.expect("admitted");

    // Flash admissions proceed immediately regardless.
    let reservation = tokio::time::timeout(
        Duration::from_millis(500),
        limiter.reserve(&flash, Cost::tokens(1)),
    )
    .await
    .expect("not serialized behind pro")
    .expect("admitted");

    limiter.release(reservation).expect("release");
    limiter.release(held).expect("release");
}

#[tokio::test]
async fn sweeper_task_reclaims_abandoned_reservations() {
    let clock = ManualClock::new();
    let limiter = Arc::new(
        RateLimiter::new(&two_endpoint_config(1, 100, 1)).with_clock(clock.clone()),
    );
    let pro = EndpointId::from("pro");

    // Reserve and "crash": the reservation is never resolved.
    let abandoned = limiter.reserve(&pro, Cost::tokens(1)).await.expect("admitted");
    std::mem::forget(abandoned);

    clock.advance(600_000); // past the default grace period
    let handle = Arc::clone(&limiter).spawn_sweeper(Duration::from_millis(10));

    // The slot frees once the sweeper runs.
    let reservation = tokio::time::timeout(
        Duration::from_secs(5),
        limiter.reserve(&pro, Cost::tokens(1)),
    )
    .await
    .expect("sweeper freed the slot")
    .expect("admitted");
    limiter.release(reservation).expect("release");

    handle.abort();
}
