use auction_coordinator::app::AppState;
use auction_coordinator::auction::model::{Auction, AuctionStatus, CreateAuctionRequest};
use auction_coordinator::clock::{Clock, ManualClock};
use auction_coordinator::config::PENALTY_DAYS;
use auction_coordinator::live_sync::{BroadcastLiveSync, ChangeFilter, EntityType, LiveSync};
use auction_coordinator::notification::model::{Notification, NotificationRequest, NotificationType};
use auction_coordinator::roster::model::Admission;
use auction_coordinator::scheduler::AuctionScheduler;
use auction_coordinator::store::{MemoryFailure, MemoryStore, Store};
use auction_coordinator::user::Identity;
use chrono::{Duration, Utc};
use futures::StreamExt;
use std::sync::Arc;

// region:    --- Fixtures

/// Tracing for test output
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .without_time()
        .with_target(false)
        .with_test_writer()
        .try_init();
}

struct TestApp {
    state: AppState,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    live_sync: Arc<BroadcastLiveSync>,
}

fn setup() -> TestApp {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let live_sync = Arc::new(BroadcastLiveSync::default());
    let state = AppState::new(store.clone(), clock.clone(), live_sync.clone());
    TestApp {
        state,
        store,
        clock,
        live_sync,
    }
}

fn owner() -> Identity {
    Identity::new("owner", "Owner")
}

fn user(n: usize) -> Identity {
    Identity::new(format!("user-{}", n), format!("User {}", n))
}

/// Starts in one minute, ends in one hour, payment due in two.
async fn create_auction(
    app: &TestApp,
    max_participants: i32,
    starting_price: i64,
    step_price: i64,
) -> Auction {
    let now = app.clock.now();
    let request = CreateAuctionRequest {
        name: "Vintage camera".into(),
        product: "Camera".into(),
        category: "Electronics".into(),
        description: "Leica M3, 1956".into(),
        image_urls: vec!["https://img.example/leica.jpg".into()],
        max_participants: Some(max_participants),
        starting_price: Some(starting_price),
        step_price: Some(step_price),
        start_time: Some(now + Duration::minutes(1)),
        end_time: Some(now + Duration::hours(1)),
        payment_deadline: Some(now + Duration::hours(2)),
    };
    app.state.registry.create(&owner(), request).await.unwrap()
}

/// Moves the clock into the bidding window.
fn open_bidding(app: &TestApp) {
    app.clock.advance(Duration::minutes(2));
}

/// Moves the clock past the payment deadline of an auction created by
/// `create_auction` after `open_bidding`.
fn pass_payment_deadline(app: &TestApp) {
    app.clock.advance(Duration::hours(3));
}

fn scheduler(app: &TestApp) -> AuctionScheduler {
    AuctionScheduler::new(
        Arc::clone(&app.state.registry),
        Arc::clone(&app.state.settlement),
        app.clock.clone(),
        std::time::Duration::from_millis(10),
    )
}

async fn notifications_of(app: &TestApp, recipient: &str, kind: NotificationType) -> Vec<Notification> {
    app.state
        .dispatcher
        .list(recipient)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == kind)
        .collect()
}

// endregion: --- Fixtures

// region:    --- Bidding

/// Starting price 100000, step 5000
#[tokio::test]
async fn test_bid_sequence_scenario() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    open_bidding(&app);
    let ledger = &app.state.ledger;

    let first = ledger.place_bid(auction.id, &user(1), 105_000).await.unwrap();
    assert_eq!(first.amount, 105_000);

    let err = ledger
        .place_bid(auction.id, &user(2), 105_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BID_TOO_LOW");

    ledger.place_bid(auction.id, &user(2), 110_000).await.unwrap();
    assert_eq!(ledger.current_highest(auction.id).await.unwrap(), 110_000);

    let highest = ledger.highest_bid(auction.id).await.unwrap().unwrap();
    assert_eq!(highest.bidder_id, "user-2");

    let amounts: Vec<i64> = ledger
        .list_bids(auction.id)
        .await
        .unwrap()
        .iter()
        .map(|b| b.amount)
        .collect();
    assert_eq!(amounts, vec![110_000, 105_000]);
}

/// The starting price must be beaten, not matched
#[tokio::test]
async fn test_first_bid_must_exceed_starting_price() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    open_bidding(&app);

    let err = app
        .state
        .ledger
        .place_bid(auction.id, &user(1), 100_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BID_TOO_LOW");
    assert_eq!(
        app.state.ledger.current_highest(auction.id).await.unwrap(),
        100_000
    );

    // any amount above the highest is accepted, step or not
    app.state
        .ledger
        .place_bid(auction.id, &user(1), 100_001)
        .await
        .unwrap();
}

/// Preconditions are reported in order
#[tokio::test]
async fn test_bid_preconditions() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    let ledger = &app.state.ledger;

    let err = ledger.place_bid(999, &user(1), 200_000).await.unwrap_err();
    assert_eq!(err.code(), "AUCTION_NOT_FOUND");
    let err = ledger.place_bid(999, &user(1), 0).await.unwrap_err();
    assert_eq!(err.code(), "AUCTION_NOT_FOUND");

    let err = ledger
        .place_bid(auction.id, &user(1), 200_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUCTION_NOT_ACTIVE");

    open_bidding(&app);
    let err = ledger
        .place_bid(auction.id, &owner(), 200_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "OWNER_CANNOT_BID");

    let err = ledger.place_bid(auction.id, &owner(), 0).await.unwrap_err();
    assert_eq!(err.code(), "OWNER_CANNOT_BID");

    let err = ledger.place_bid(auction.id, &user(1), 0).await.unwrap_err();
    assert_eq!(err.code(), "BID_TOO_LOW");

    app.clock.advance(Duration::hours(1));
    let err = ledger
        .place_bid(auction.id, &user(1), 200_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUCTION_NOT_ACTIVE");
}

/// Concurrent bidders never get a stale amount accepted
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bids() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 1_000).await;
    open_bidding(&app);

    let auction_id = auction.id;
    let mut handles = Vec::new();
    for i in 0..24 {
        let ledger = Arc::clone(&app.state.ledger);
        let amount = 100_000 + (i as i64 % 7 + 1) * 1_000;
        handles.push(tokio::spawn(async move {
            ledger.place_bid(auction_id, &user(i), amount).await
        }));
    }

    let mut accepted = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(bid) => accepted.push(bid),
            Err(e) => assert_eq!(e.code(), "BID_TOO_LOW"),
        }
    }

    // in append order every accepted bid beat the previous one
    accepted.sort_by_key(|b| b.id);
    assert!(accepted.windows(2).all(|w| w[0].amount < w[1].amount));
    assert_eq!(
        app.state.ledger.current_highest(auction.id).await.unwrap(),
        107_000
    );
    assert_eq!(
        app.state.ledger.list_bids(auction.id).await.unwrap().len(),
        accepted.len()
    );
}

/// Owner gets new-bid, other participants get new-bid-participant
#[tokio::test]
async fn test_bid_notifications_fan_out() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    for n in 1..=3 {
        app.state.roster.join(auction.id, &user(n)).await.unwrap();
    }
    open_bidding(&app);

    app.state
        .ledger
        .place_bid(auction.id, &user(1), 105_000)
        .await
        .unwrap();
    app.state
        .ledger
        .place_bid(auction.id, &user(2), 110_000)
        .await
        .unwrap();

    let owner_bids = notifications_of(&app, "owner", NotificationType::NewBid).await;
    assert_eq!(owner_bids.len(), 2);
    assert!(owner_bids
        .iter()
        .any(|n| n.message.contains("110.000 VND") && n.message.contains("User 2")));

    // user-1 hears about user-2's bid only, user-3 about both
    assert_eq!(
        notifications_of(&app, "user-1", NotificationType::NewBidParticipant)
            .await
            .len(),
        1
    );
    assert_eq!(
        notifications_of(&app, "user-2", NotificationType::NewBidParticipant)
            .await
            .len(),
        1
    );
    assert_eq!(
        notifications_of(&app, "user-3", NotificationType::NewBidParticipant)
            .await
            .len(),
        2
    );
}

/// Serialization conflicts are retried before surfacing
#[tokio::test]
async fn test_conflicts_are_retried() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    open_bidding(&app);
    app.state.registry.get(auction.id).await.unwrap();

    app.store.set_failure(Some(MemoryFailure::Conflicts(2)));
    app.state
        .ledger
        .place_bid(auction.id, &user(1), 105_000)
        .await
        .unwrap();

    app.store.set_failure(Some(MemoryFailure::Conflicts(3)));
    let err = app
        .state
        .ledger
        .place_bid(auction.id, &user(1), 110_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONCURRENCY_CONFLICT");

    app.store.set_failure(None);
    assert_eq!(
        app.state.ledger.current_highest(auction.id).await.unwrap(),
        105_000
    );
}

// endregion: --- Bidding

// region:    --- Admission

/// Joining twice keeps one roster entry and one pair of notifications
#[tokio::test]
async fn test_join_is_idempotent() {
    let app = setup();
    let auction = create_auction(&app, 5, 100_000, 5_000).await;

    let first = app.state.roster.join(auction.id, &user(1)).await.unwrap();
    let second = app.state.roster.join(auction.id, &user(1)).await.unwrap();
    assert!(first.is_new());
    assert!(matches!(second, Admission::AlreadyJoined { .. }));
    assert_eq!(first.participant(), second.participant());

    assert_eq!(
        app.state.roster.participants(auction.id).await.unwrap().len(),
        1
    );
    assert!(app
        .state
        .roster
        .is_participant(auction.id, "user-1")
        .await
        .unwrap());
    assert_eq!(
        notifications_of(&app, "user-1", NotificationType::JoinBidder)
            .await
            .len(),
        1
    );
    let joins = notifications_of(&app, "owner", NotificationType::Join).await;
    assert_eq!(joins.len(), 1);
    assert_eq!(joins[0].from_user_id.as_deref(), Some("user-1"));
}

/// maxParticipants 2, three concurrent joins
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_respect_capacity() {
    let app = setup();
    let auction = create_auction(&app, 2, 100_000, 5_000).await;

    let auction_id = auction.id;
    let mut handles = Vec::new();
    for n in 1..=3 {
        let roster = Arc::clone(&app.state.roster);
        handles.push(tokio::spawn(async move {
            roster.join(auction_id, &user(n)).await
        }));
    }

    let mut joined = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(admission) => {
                assert!(admission.is_new());
                joined += 1;
            }
            Err(e) => {
                assert_eq!(e.code(), "AUCTION_FULL");
                full += 1;
            }
        }
    }
    assert_eq!((joined, full), (2, 1));
    assert_eq!(
        app.state.roster.participants(auction.id).await.unwrap().len(),
        2
    );
}

/// N concurrent joins against capacity K admit exactly K
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_joins() {
    let app = setup();
    let auction = create_auction(&app, 4, 100_000, 5_000).await;
    open_bidding(&app);

    let auction_id = auction.id;
    let mut handles = Vec::new();
    for n in 0..16 {
        let roster = Arc::clone(&app.state.roster);
        handles.push(tokio::spawn(async move {
            roster.join(auction_id, &user(n)).await.is_ok()
        }));
    }
    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 4);
}

#[tokio::test]
async fn test_join_preconditions() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;

    let err = app
        .state
        .roster
        .join(auction.id, &owner())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "OWNER_CANNOT_JOIN");

    let err = app.state.roster.join(404, &user(1)).await.unwrap_err();
    assert_eq!(err.code(), "AUCTION_NOT_FOUND");

    // joining stays open while active
    open_bidding(&app);
    app.state.roster.join(auction.id, &user(1)).await.unwrap();

    app.clock.advance(Duration::hours(1));
    let err = app
        .state
        .roster
        .join(auction.id, &user(2))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUCTION_ENDED");
}

// endregion: --- Admission

// region:    --- Notifications

/// Concurrent duplicates of one logical notification store one record
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_notify_stores_once() {
    let app = setup();
    let request = NotificationRequest::new(
        "user-1",
        7,
        NotificationType::JoinBidder,
        "You have successfully joined the auction \"x\".".into(),
    )
    .participant("user-1");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let dispatcher = Arc::clone(&app.state.dispatcher);
        let request = request.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.notify(request).await.unwrap()
        }));
    }
    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(app.store.notification_count(), 1);
    assert_eq!(app.state.dispatcher.unread_count("user-1").await.unwrap(), 1);
}

/// A duplicate of a failed notify stores the record instead of reporting it done
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_notify_after_failed_first_caller() {
    let app = setup();
    let request = NotificationRequest::new(
        "user-1",
        7,
        NotificationType::Ban,
        "You have been banned for 30 days.".into(),
    )
    .participant("user-1");

    // enough conflicts to exhaust whichever caller goes first
    app.store.set_failure(Some(MemoryFailure::Conflicts(3)));
    let first = {
        let dispatcher = Arc::clone(&app.state.dispatcher);
        let request = request.clone();
        tokio::spawn(async move { dispatcher.notify(request).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = app.state.dispatcher.notify(request).await;
    let first = first.await.unwrap();

    let results = [first, second];
    let failed = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.code() == "CONCURRENCY_CONFLICT"))
        .count();
    let stored = results.iter().filter(|r| matches!(r, Ok(true))).count();
    assert_eq!(failed, 1);
    assert_eq!(stored, 1);
    assert!(!results.iter().any(|r| matches!(r, Ok(false))));
    assert_eq!(app.store.notification_count(), 1);
}

// endregion: --- Notifications

// region:    --- Lifecycle

/// Concurrent readers persist the transition to ended exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_end_transition_is_published_once() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    let mut changes = app
        .live_sync
        .subscribe(ChangeFilter::entity(EntityType::Auction));
    app.clock.advance(Duration::hours(2));

    let auction_id = auction.id;
    let mut handles = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&app.state.registry);
        handles.push(tokio::spawn(async move {
            registry.get(auction_id).await.unwrap().status
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), AuctionStatus::Ended);
    }

    let mut ended = 0;
    while let Ok(Some(event)) =
        tokio::time::timeout(std::time::Duration::from_millis(100), changes.next()).await
    {
        if event.payload["status"] == "ended" {
            ended += 1;
        }
    }
    assert_eq!(ended, 1);
}

/// Deleting an auction removes its bids and roster
#[tokio::test]
async fn test_delete_removes_bids_and_participants() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    app.state.roster.join(auction.id, &user(1)).await.unwrap();
    open_bidding(&app);
    app.state
        .ledger
        .place_bid(auction.id, &user(1), 150_000)
        .await
        .unwrap();

    app.state.registry.delete(auction.id, "owner").await.unwrap();
    assert!(app.store.list_bids(auction.id).await.unwrap().is_empty());
    assert!(app
        .store
        .list_participants(auction.id)
        .await
        .unwrap()
        .is_empty());
    assert!(app
        .state
        .registry
        .list_joined_by("user-1")
        .await
        .unwrap()
        .is_empty());
}

/// Listings are newest first
#[tokio::test]
async fn test_listing_queries() {
    let app = setup();
    let first = create_auction(&app, 0, 100_000, 5_000).await;
    app.clock.advance(Duration::seconds(1));
    let second = create_auction(&app, 0, 200_000, 5_000).await;
    app.state.roster.join(first.id, &user(1)).await.unwrap();

    let all: Vec<i64> = app
        .state
        .registry
        .list_all()
        .await
        .unwrap()
        .iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(all, vec![second.id, first.id]);
    assert_eq!(
        app.state.registry.list_owned_by("owner").await.unwrap().len(),
        2
    );
    let joined = app.state.registry.list_joined_by("user-1").await.unwrap();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].id, first.id);
}

// endregion: --- Lifecycle

// region:    --- Settlement

/// Winner of 250000 never pays: banned for 30 days from the check, one ban
/// and one payment-failed notification
#[tokio::test]
async fn test_unpaid_winner_is_banned() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    app.state.roster.join(auction.id, &user(1)).await.unwrap();
    open_bidding(&app);
    app.state
        .ledger
        .place_bid(auction.id, &user(1), 250_000)
        .await
        .unwrap();

    pass_payment_deadline(&app);
    let check_time = app.clock.now();
    let scheduler = scheduler(&app);
    scheduler.tick().await;
    scheduler.tick().await;

    let winner = app.store.get_user("user-1").await.unwrap().unwrap();
    assert_eq!(
        winner.banned_until,
        Some(check_time + Duration::days(PENALTY_DAYS))
    );

    let bans = notifications_of(&app, "user-1", NotificationType::Ban).await;
    assert_eq!(bans.len(), 1);
    assert!(bans[0].message.contains("30 days"));
    assert_eq!(
        notifications_of(&app, "owner", NotificationType::PaymentFailed)
            .await
            .len(),
        1
    );

    let settled = app.store.get_auction(auction.id).await.unwrap().unwrap();
    assert!(settled.settled_at.is_some());
    assert_eq!(settled.penalized_user_id.as_deref(), Some("user-1"));
}

/// A ban blocks bidding, joining and creating
#[tokio::test]
async fn test_banned_user_is_locked_out() {
    let app = setup();
    let unpaid = create_auction(&app, 0, 100_000, 5_000).await;
    open_bidding(&app);
    app.state
        .ledger
        .place_bid(unpaid.id, &user(1), 150_000)
        .await
        .unwrap();
    pass_payment_deadline(&app);
    scheduler(&app).tick().await;

    let next = create_auction(&app, 0, 100_000, 5_000).await;
    let err = app
        .state
        .roster
        .join(next.id, &user(1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "USER_BANNED");

    open_bidding(&app);
    let err = app
        .state
        .ledger
        .place_bid(next.id, &user(1), 150_000)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BIDDER_BANNED");

    let request = CreateAuctionRequest {
        name: "Bike".into(),
        product: "Bike".into(),
        category: "Sports".into(),
        starting_price: Some(10),
        start_time: Some(app.clock.now() + Duration::hours(1)),
        end_time: Some(app.clock.now() + Duration::hours(2)),
        payment_deadline: Some(app.clock.now() + Duration::hours(3)),
        ..Default::default()
    };
    let err = app
        .state
        .registry
        .create(&user(1), request)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "USER_BANNED");
}

/// Concurrent sweeps: one ban write, one ban and one payment-failed
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sweeps_settle_once() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    open_bidding(&app);
    app.state
        .ledger
        .place_bid(auction.id, &user(1), 250_000)
        .await
        .unwrap();
    pass_payment_deadline(&app);
    app.state
        .registry
        .advance_statuses(app.clock.now())
        .await
        .unwrap();

    let check_time = app.clock.now();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let settlement = Arc::clone(&app.state.settlement);
        handles.push(tokio::spawn(async move { settlement.sweep().await.unwrap() }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(
        notifications_of(&app, "user-1", NotificationType::Ban)
            .await
            .len(),
        1
    );
    assert_eq!(
        notifications_of(&app, "owner", NotificationType::PaymentFailed)
            .await
            .len(),
        1
    );
    assert_eq!(
        notifications_of(&app, "owner", NotificationType::AuctionEnded)
            .await
            .len(),
        1
    );
    let winner = app.store.get_user("user-1").await.unwrap().unwrap();
    assert_eq!(
        winner.banned_until,
        Some(check_time + Duration::days(PENALTY_DAYS))
    );
}

/// A ban already in force is neither extended nor re-notified
#[tokio::test]
async fn test_active_ban_is_not_extended() {
    let app = setup();
    let first = create_auction(&app, 0, 100_000, 5_000).await;
    let second = create_auction(&app, 0, 100_000, 5_000).await;
    open_bidding(&app);
    for auction in [&first, &second] {
        app.state
            .ledger
            .place_bid(auction.id, &user(1), 120_000)
            .await
            .unwrap();
    }

    pass_payment_deadline(&app);
    let check_time = app.clock.now();
    scheduler(&app).tick().await;

    let winner = app.store.get_user("user-1").await.unwrap().unwrap();
    assert_eq!(
        winner.banned_until,
        Some(check_time + Duration::days(PENALTY_DAYS))
    );
    assert_eq!(
        notifications_of(&app, "user-1", NotificationType::Ban)
            .await
            .len(),
        1
    );
    assert_eq!(
        notifications_of(&app, "owner", NotificationType::PaymentFailed)
            .await
            .len(),
        2
    );
}

/// Approved payment means no penalty
#[tokio::test]
async fn test_paid_auction_is_not_penalized() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    open_bidding(&app);
    app.state
        .ledger
        .place_bid(auction.id, &user(1), 150_000)
        .await
        .unwrap();

    app.clock.advance(Duration::minutes(90));
    app.state
        .registry
        .approve_payment(auction.id, "owner")
        .await
        .unwrap();

    pass_payment_deadline(&app);
    scheduler(&app).tick().await;

    let winner = app.store.get_user("user-1").await.unwrap().unwrap();
    assert_eq!(winner.banned_until, None);
    assert!(notifications_of(&app, "user-1", NotificationType::Ban)
        .await
        .is_empty());
}

/// Owner, participants and a winner who never joined all hear the result
#[tokio::test]
async fn test_end_announcement() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    app.state.roster.join(auction.id, &user(1)).await.unwrap();
    app.state.roster.join(auction.id, &user(2)).await.unwrap();
    open_bidding(&app);
    app.state
        .ledger
        .place_bid(auction.id, &user(1), 105_000)
        .await
        .unwrap();
    app.state
        .ledger
        .place_bid(auction.id, &user(3), 130_000)
        .await
        .unwrap();

    app.clock.advance(Duration::hours(1));
    let scheduler = scheduler(&app);
    scheduler.tick().await;
    scheduler.tick().await;

    let ended = notifications_of(&app, "owner", NotificationType::AuctionEnded).await;
    assert_eq!(ended.len(), 1);
    assert!(ended[0].message.contains("130.000 VND by User 3"));
    for loser in ["user-1", "user-2"] {
        assert_eq!(
            notifications_of(&app, loser, NotificationType::AuctionEndedLose)
                .await
                .len(),
            1
        );
    }
    assert_eq!(
        notifications_of(&app, "user-3", NotificationType::AuctionEndedWin)
            .await
            .len(),
        1
    );
    assert!(
        app.store
            .get_auction(auction.id)
            .await
            .unwrap()
            .unwrap()
            .end_announced
    );
}

/// The reactive worker announces without waiting for a sweep
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reactive_end_announcement() {
    let app = setup();
    let auction = create_auction(&app, 0, 100_000, 5_000).await;
    let worker = Arc::clone(&app.state.settlement).spawn_reactive(app.live_sync.as_ref());

    app.clock.advance(Duration::hours(1) + Duration::minutes(1));
    app.state.registry.get(auction.id).await.unwrap();

    let mut announced = false;
    for _ in 0..50 {
        if !notifications_of(&app, "owner", NotificationType::AuctionEnded)
            .await
            .is_empty()
        {
            announced = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    worker.abort();
    assert!(announced);
}

/// One failing auction does not block the rest of the sweep
#[tokio::test]
async fn test_sweep_isolates_failures() {
    let app = setup();
    let broken = create_auction(&app, 0, 100_000, 5_000).await;
    let healthy = create_auction(&app, 0, 100_000, 5_000).await;
    open_bidding(&app);
    for auction in [&broken, &healthy] {
        app.state
            .ledger
            .place_bid(auction.id, &user(1), 120_000)
            .await
            .unwrap();
    }
    pass_payment_deadline(&app);
    app.state
        .registry
        .advance_statuses(app.clock.now())
        .await
        .unwrap();

    app.store
        .set_failure(Some(MemoryFailure::OnAuction(broken.id)));
    let report = app.state.settlement.sweep().await.unwrap();
    assert!(report.failed >= 1);
    assert_eq!(report.settled, 1);
    assert!(app
        .store
        .get_auction(healthy.id)
        .await
        .unwrap()
        .unwrap()
        .settled_at
        .is_some());

    app.store.set_failure(None);
    let report = app.state.settlement.sweep().await.unwrap();
    assert_eq!(report.failed, 0);
    assert!(app
        .store
        .get_auction(broken.id)
        .await
        .unwrap()
        .unwrap()
        .settled_at
        .is_some());
}

// endregion: --- Settlement
