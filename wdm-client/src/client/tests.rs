use super::fixture::*;
use super::*;
use crate::binding::BindingEvent;
use crate::catalog::DataSink;
use crate::event::EventId;
use std::sync::Arc;
use wdm_types::{DataVersion, EventRecord, TraitPath, UpdateResponse};

fn no_retry() -> Harness {
    let mut h = Harness::new();
    h.client.disable_resubscribe();
    h
}

fn last_status(h: &Harness) -> (ExchangeId, StatusReport, bool) {
    let sent = h.binding.last_sent().unwrap();
    match sent.message {
        Message::StatusReport(status) => (sent.exchange, status, sent.expect_response),
        other => panic!("expected a status report, got {:?}", other),
    }
}

// =============================================================================
// Subscribing
// =============================================================================

#[test]
fn subscribe_then_response_establishes() {
    let mut h = Harness::new();
    h.establish();

    assert_eq!(h.client.state(), ClientState::EstablishedIdle);
    assert_eq!(h.client.config(), ClientConfig::Initiator);
    assert_eq!(h.client.subscription_id(), Ok(SUBSCRIPTION));
    assert_eq!(
        h.recorder.seen(),
        vec![
            Seen::ExchangeStart(ExchangeId(1)),
            Seen::PrepareNeeded(0),
            Seen::Established(SUBSCRIPTION),
        ]
    );
    assert_eq!(h.binding.closed_exchanges(), vec![ExchangeId(1)]);
    assert!(h.binding.open_exchanges().is_empty());
    assert_eq!(h.client.ref_count(), 1);
}

#[test]
fn subscribe_request_carries_sink_versions() {
    let mut h = Harness::new();
    h.sink1.set_version(DataVersion(7));
    h.subscribe();

    let sent = h.binding.last_sent().unwrap();
    assert!(sent.expect_response);
    let Message::SubscribeRequest(request) = sent.message else {
        panic!("expected a subscribe request");
    };
    assert_eq!(request.paths.len(), 3);
    assert_eq!(request.paths[0].path, TraitPath::root(T1));
    assert_eq!(request.paths[0].requested_version, Some(DataVersion(7)));
    assert_eq!(request.paths[1].requested_version, None);
    assert_eq!(h.client.state(), ClientState::Subscribing);
    assert_eq!(h.client.ref_count(), 2);
}

#[test]
fn subscribe_twice_is_invalid_state() {
    let mut h = Harness::new();
    h.subscribe();
    assert!(matches!(
        h.client.initiate_subscription(),
        Err(ClientError::InvalidState(_))
    ));
}

#[test]
fn init_twice_is_invalid_state() {
    let mut h = Harness::new();
    let result = h.client.init(
        Arc::new(h.binding.clone()),
        Arc::new(crate::catalog::MemoryCatalog::new()),
        Box::new(DefaultEventHandler),
        None,
    );
    assert!(matches!(result, Err(ClientError::InvalidState(_))));
}

#[test]
fn liveness_timeout_from_response() {
    let mut h = Harness::new();
    h.establish_with_timeout(Some(30));

    assert_eq!(h.client.liveness_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(
        h.timers.remaining(TimerKind::Subscription),
        Some(Duration::from_secs(30))
    );
}

#[test]
fn response_timeout_above_maximum_is_malformed() {
    let mut h = no_retry();
    let exchange = h.subscribe();
    h.respond(exchange, Some(MAX_TIMEOUT_SECS + 1));

    let terminations = h.recorder.terminations();
    assert_eq!(terminations.len(), 1);
    assert!(matches!(
        terminations[0],
        (Some(ClientError::MalformedMessage(_)), false)
    ));
    assert_eq!(h.client.state(), ClientState::Initialized);
}

#[test]
fn exchange_start_tunes_response_timeout() {
    let mut h = Harness::new();
    h.recorder.set_exchange_timeout(Duration::from_secs(3));
    h.subscribe();

    assert_eq!(
        h.binding.last_sent().unwrap().response_timeout,
        Duration::from_secs(3)
    );
}

#[test]
fn directive_from_exchange_start_ignored() {
    let mut h = Harness::new();
    h.recorder
        .direct_once(EventId::ExchangeStart, Directive::AbortSubscription);
    h.subscribe();
    assert_eq!(h.client.state(), ClientState::Subscribing);
}

#[test]
fn pending_binding_sends_once_ready() {
    let mut h = Harness::new();
    h.binding.set_prepare_pending(true);
    h.client.initiate_subscription().unwrap();

    assert!(h.binding.sent_messages().is_empty());
    assert_eq!(h.client.state(), ClientState::Subscribing);

    h.binding.complete_prepare();
    h.client.on_binding_event(BindingEvent::Ready);

    let sent = h.binding.last_sent().unwrap();
    assert!(matches!(sent.message, Message::SubscribeRequest(_)));
    assert_eq!(h.binding.prepare_calls(), 1);
}

#[test]
fn binding_prepare_failure_terminates() {
    let mut h = no_retry();
    h.binding.fail_next_prepare("no route");
    h.client.initiate_subscription().unwrap();

    assert_eq!(
        h.recorder.terminations(),
        vec![(
            Some(ClientError::Binding(BindingError::PrepareFailed(
                "no route".into()
            ))),
            false
        )]
    );
    assert_eq!(h.client.state(), ClientState::Initialized);
}

#[test]
fn binding_failure_while_established_terminates() {
    let mut h = no_retry();
    h.establish();
    h.client
        .on_binding_event(BindingEvent::Failed(BindingError::Failed("reset".into())));

    assert_eq!(h.recorder.terminations().len(), 1);
    assert_eq!(h.client.state(), ClientState::Initialized);
}

#[test]
fn inverted_timeout_bounds_rejected() {
    let mut h = no_retry();
    h.recorder.set_params(SubscribeRequestParams {
        paths: vec![TraitPath::root(T1)],
        timeout_sec_min: Some(60),
        timeout_sec_max: Some(10),
        ..SubscribeRequestParams::default()
    });
    h.client.initiate_subscription().unwrap();

    let terminations = h.recorder.terminations();
    assert!(matches!(
        terminations[..],
        [(Some(ClientError::ConfigurationInvalid(_)), false)]
    ));
    assert_eq!(h.binding.aborted_exchanges(), vec![ExchangeId(1)]);
    assert_eq!(h.client.ref_count(), 1);
}

#[test]
fn unknown_trait_in_request_rejected() {
    let mut h = no_retry();
    h.recorder.set_params(SubscribeRequestParams {
        paths: vec![TraitPath::root(TraitDataHandle(99))],
        ..SubscribeRequestParams::default()
    });
    h.client.initiate_subscription().unwrap();

    assert!(matches!(
        h.recorder.terminations()[..],
        [(Some(ClientError::ConfigurationInvalid(_)), false)]
    ));
}

#[test]
fn exchange_allocation_failure_terminates() {
    let mut h = no_retry();
    h.binding.complete_prepare();
    h.binding.fail_next_allocate();
    h.client.initiate_subscription().unwrap();

    assert_eq!(
        h.recorder.terminations(),
        vec![(
            Some(ClientError::Binding(BindingError::ExchangeExhausted)),
            false
        )]
    );
    assert_eq!(h.client.ref_count(), 1);
}

#[test]
fn rejected_subscription_reports_status() {
    let mut h = no_retry();
    let exchange = h.subscribe();
    let busy = StatusReport::new(PROFILE_COMMON, common::BUSY);
    h.client
        .on_message(exchange, Message::StatusReport(busy.clone()));

    assert_eq!(
        h.recorder.terminations(),
        vec![(Some(ClientError::PeerRejected { status: busy }), false)]
    );
    assert_eq!(h.binding.aborted_exchanges(), vec![exchange]);
}

#[test]
fn unexpected_message_while_subscribing_is_malformed() {
    let mut h = no_retry();
    let exchange = h.subscribe();
    h.client.on_message(
        exchange,
        Message::UpdateResponse(UpdateResponse {
            statuses: Vec::new(),
            versions: Vec::new(),
        }),
    );

    assert!(matches!(
        h.recorder.terminations()[..],
        [(Some(ClientError::MalformedMessage(_)), false)]
    ));
}

#[test]
fn send_error_after_send_terminates() {
    let mut h = no_retry();
    let exchange = h.subscribe();
    h.client
        .on_send_error(exchange, BindingError::SendFailed("reset".into()));

    assert!(matches!(
        h.recorder.terminations()[..],
        [(Some(ClientError::TransportFailure(_)), false)]
    ));
}

// =============================================================================
// Timeouts and resubscribe
// =============================================================================

#[test]
fn subscribing_inactivity_timeout_without_retry() {
    let mut h = no_retry();
    let exchange = h.subscribe();
    h.advance(Duration::from_secs(30));

    assert_eq!(
        h.recorder.terminations(),
        vec![(Some(ClientError::Timeout), false)]
    );
    assert_eq!(h.client.state(), ClientState::Initialized);
    assert_eq!(h.client.config(), ClientConfig::Down);
    assert_eq!(h.binding.aborted_exchanges(), vec![exchange]);
    assert_eq!(h.client.ref_count(), 1);
}

#[test]
fn zero_inactivity_timeout_disables_timer() {
    let mut config = Config::default();
    config.client.inactivity_timeout_during_subscribing_ms = 0;
    let mut h = Harness::with_config(config);
    h.subscribe();

    assert!(!h.timers.is_armed(TimerKind::Subscription));
}

#[test]
fn timeout_with_retry_resubscribes_after_holdoff() {
    let mut h = Harness::new();
    h.subscribe();
    h.advance(Duration::from_secs(30));

    assert_eq!(
        h.recorder.terminations(),
        vec![(Some(ClientError::Timeout), true)]
    );
    assert!(h.client.is_in_resubscribe_holdoff());
    assert_eq!(
        h.timers.remaining(TimerKind::Subscription),
        Some(Duration::from_secs(1))
    );

    h.advance(Duration::from_secs(1));
    assert_eq!(h.client.state(), ClientState::Subscribing);
    assert_eq!(h.recorder.count(&Seen::PrepareNeeded(1)), 1);
    assert_eq!(h.binding.last_sent().unwrap().exchange, ExchangeId(2));
}

#[test]
fn retry_count_grows_and_resets_after_success() {
    let mut h = Harness::new();
    h.subscribe();
    for attempt in 0..3u32 {
        let exchange = h.binding.last_sent().unwrap().exchange;
        h.client.on_response_timeout(exchange);
        assert_eq!(
            h.timers.remaining(TimerKind::Subscription),
            Some(Duration::from_secs(1 << attempt))
        );
        h.advance(Duration::from_secs(1 << attempt));
    }
    let prepares: Vec<_> = h
        .recorder
        .seen()
        .into_iter()
        .filter(|seen| matches!(seen, Seen::PrepareNeeded(_)))
        .collect();
    assert_eq!(
        prepares,
        vec![
            Seen::PrepareNeeded(0),
            Seen::PrepareNeeded(1),
            Seen::PrepareNeeded(2),
            Seen::PrepareNeeded(3),
        ]
    );

    let exchange = h.binding.last_sent().unwrap().exchange;
    h.respond(exchange, Some(10));
    assert!(h.client.is_established());

    // liveness loss now starts again from the first interval
    h.advance(Duration::from_secs(10));
    assert!(h.client.is_in_resubscribe_holdoff());
    assert_eq!(
        h.timers.remaining(TimerKind::Subscription),
        Some(Duration::from_secs(1))
    );
}

#[test]
fn custom_policy_sees_reason_and_count() {
    let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut h = Harness::new();
    let seen = Arc::clone(&attempts);
    h.client.enable_resubscribe(move |attempt: &ResubscribeAttempt| {
        seen.lock().unwrap().push(*attempt);
        Duration::from_millis(250)
    });
    let exchange = h.subscribe();
    h.client.on_response_timeout(exchange);

    assert_eq!(
        attempts.lock().unwrap()[..],
        [ResubscribeAttempt {
            reason: FailureKind::Timeout,
            retry_count: 0,
            request_type: RequestType::Subscription,
        }]
    );
    assert_eq!(
        h.timers.remaining(TimerKind::Subscription),
        Some(Duration::from_millis(250))
    );
}

#[test]
fn reset_resubscribe_in_holdoff_subscribes_now() {
    let mut h = Harness::new();
    let exchange = h.subscribe();
    h.client.on_response_timeout(exchange);
    assert!(h.client.is_in_resubscribe_holdoff());

    h.client.reset_resubscribe();
    assert_eq!(h.client.state(), ClientState::Subscribing);
    assert_eq!(h.recorder.count(&Seen::PrepareNeeded(0)), 2);
}

#[test]
fn liveness_expiry_terminates() {
    let mut h = no_retry();
    h.establish_with_timeout(Some(10));
    h.advance(Duration::from_secs(9));
    assert!(h.client.is_established());

    h.advance(Duration::from_secs(1));
    assert_eq!(
        h.recorder.terminations(),
        vec![(Some(ClientError::Timeout), false)]
    );
}

#[test]
fn notification_postpones_liveness() {
    let mut h = no_retry();
    h.establish_with_timeout(Some(10));
    h.advance(Duration::from_secs(6));
    h.notify(vec![element(TraitPath::new(T3, fixture::h(2)), 2, &[1])]);

    h.advance(Duration::from_secs(6));
    assert!(h.client.is_established());

    h.advance(Duration::from_secs(4));
    assert!(!h.client.is_established());
    assert_eq!(h.recorder.terminations().len(), 1);
}

#[test]
fn indicated_activity_moves_window() {
    let mut h = no_retry();
    h.establish_with_timeout(Some(10));
    h.advance(Duration::from_secs(8));
    h.client.indicate_activity();

    // the timer fires at 10s and re-arms for the rest of the window
    h.advance(Duration::from_secs(2));
    assert!(h.client.is_established());
    assert_eq!(
        h.timers.remaining(TimerKind::Subscription),
        Some(Duration::from_secs(8))
    );
    assert!(h.recorder.seen().contains(&Seen::Activity));
}

// =============================================================================
// Notifications
// =============================================================================

#[test]
fn notification_applied_and_acknowledged() {
    let mut h = Harness::new();
    h.establish();
    let exchange = h.notify(vec![element(TraitPath::new(T3, fixture::h(2)), 5, &[9])]);

    assert_eq!(h.sink3.value(fixture::h(2)), Some(vec![9]));
    assert_eq!(h.sink3.version(), Some(DataVersion(5)));

    let (sent_on, status, expect_response) = last_status(&h);
    assert_eq!(sent_on, exchange);
    assert!(status.is_success());
    assert!(!expect_response);
    assert!(h.binding.closed_exchanges().contains(&exchange));
    assert_eq!(h.client.state(), ClientState::EstablishedIdle);

    let seen = h.recorder.seen();
    let request = seen.iter().position(|s| *s == Seen::NotificationRequest);
    let processed = seen.iter().position(|s| *s == Seen::NotificationProcessed);
    assert!(request.unwrap() < processed.unwrap());
    assert_eq!(h.client.ref_count(), 1);
}

#[test]
fn partial_change_sets_version_on_last_element() {
    let mut h = Harness::new();
    h.establish();
    let mut first = element(TraitPath::new(T3, fixture::h(2)), 4, &[1]);
    first.is_partial_change = true;
    let second = element(TraitPath::new(T3, fixture::h(3)), 4, &[2]);

    h.notify(vec![first]);
    assert_eq!(h.sink3.version(), None);
    h.notify(vec![second]);
    assert_eq!(h.sink3.version(), Some(DataVersion(4)));
}

#[test]
fn partial_change_interrupted_by_other_trait_is_malformed() {
    let mut h = no_retry();
    h.establish();
    let mut first = element(TraitPath::new(T3, fixture::h(2)), 4, &[1]);
    first.is_partial_change = true;
    let intruder = element(TraitPath::new(T1, fixture::h(2)), 8, &[2]);
    h.notify(vec![first, intruder]);

    let (_, status, _) = last_status(&h);
    assert_eq!(
        status,
        StatusReport::new(PROFILE_COMMON, common::BAD_REQUEST)
    );
    assert!(matches!(
        h.recorder.terminations()[..],
        [(Some(ClientError::MalformedMessage(_)), false)]
    ));
}

#[test]
fn notification_events_reported() {
    let mut h = Harness::new();
    h.establish();
    let exchange = h.binding.open_peer_exchange();
    h.client.on_peer_request(
        exchange,
        Message::NotificationRequest(NotificationRequest {
            subscription_id: SUBSCRIPTION,
            data_list: Vec::new(),
            events: vec![EventRecord {
                source_id: 1,
                importance: 1,
                event_id: 10,
                data: vec![0xEE],
            }],
        }),
    );

    assert!(h.recorder.seen().contains(&Seen::Events(1)));
}

#[test]
fn notification_for_other_subscription_rejected() {
    let mut h = Harness::new();
    h.establish();
    let exchange = h.binding.open_peer_exchange();
    h.client.on_peer_request(
        exchange,
        Message::NotificationRequest(NotificationRequest {
            subscription_id: SubscriptionId(1),
            data_list: vec![element(TraitPath::new(T3, fixture::h(2)), 5, &[9])],
            events: Vec::new(),
        }),
    );

    let (_, status, _) = last_status(&h);
    assert_eq!(status, StatusReport::new(PROFILE_WDM, wdm::INVALID_SUBSCRIPTION));
    assert_eq!(h.sink3.value(fixture::h(2)), None);
    assert!(h.client.is_established());
}

#[test]
fn notification_before_established_unexpected() {
    let mut h = Harness::new();
    h.subscribe();
    h.notify(vec![element(TraitPath::new(T3, fixture::h(2)), 5, &[9])]);

    let (_, status, _) = last_status(&h);
    assert_eq!(
        status,
        StatusReport::new(PROFILE_COMMON, common::UNEXPECTED_MESSAGE)
    );
}

#[test]
fn notification_while_subscribing_primes_data() {
    let mut h = Harness::new();
    let exchange = h.subscribe();
    h.client.on_message(
        exchange,
        Message::NotificationRequest(NotificationRequest {
            subscription_id: SUBSCRIPTION,
            data_list: vec![element(TraitPath::new(T3, fixture::h(2)), 3, &[7])],
            events: Vec::new(),
        }),
    );

    assert_eq!(h.client.state(), ClientState::SubscribingIdAssigned);
    assert_eq!(h.sink3.version(), Some(DataVersion(3)));
    let (sent_on, status, expect_response) = last_status(&h);
    assert_eq!(sent_on, exchange);
    assert!(status.is_success());
    assert!(expect_response);
    assert!(h.recorder.seen().contains(&Seen::NotificationProcessed));

    h.respond(exchange, None);
    assert!(h.client.is_established());
}

#[test]
fn unsupported_peer_request_answered() {
    let mut h = Harness::new();
    h.establish();
    let exchange = h.binding.open_peer_exchange();
    h.client.on_peer_request(
        exchange,
        Message::SubscribeResponse(SubscribeResponse {
            subscription_id: SUBSCRIPTION,
            timeout_sec: None,
        }),
    );

    let (_, status, _) = last_status(&h);
    assert_eq!(
        status,
        StatusReport::new(PROFILE_COMMON, common::UNSUPPORTED_MESSAGE)
    );
    assert!(h.client.is_established());
}

// =============================================================================
// Ending
// =============================================================================

#[cfg(feature = "subscription-cancel")]
#[test]
fn end_subscription_sends_cancel_then_terminates() {
    let mut h = Harness::new();
    h.establish();
    h.client.end_subscription().unwrap();

    assert_eq!(h.client.state(), ClientState::Canceling);
    let sent = h.binding.last_sent().unwrap();
    assert_eq!(
        sent.message,
        Message::SubscribeCancelRequest(SubscribeCancelRequest {
            subscription_id: SUBSCRIPTION
        })
    );

    h.client
        .on_message(sent.exchange, Message::StatusReport(StatusReport::success()));
    assert_eq!(h.recorder.terminations(), vec![(None, false)]);
    assert_eq!(h.client.state(), ClientState::Initialized);
    assert_eq!(h.binding.closed_exchanges().last(), Some(&sent.exchange));
    assert_eq!(h.client.ref_count(), 1);
}

#[cfg(feature = "subscription-cancel")]
#[test]
fn cancel_without_answer_times_out() {
    let mut h = Harness::new();
    h.establish();
    h.client.end_subscription().unwrap();
    let exchange = h.binding.last_sent().unwrap().exchange;
    h.client.on_response_timeout(exchange);

    assert_eq!(
        h.recorder.terminations(),
        vec![(Some(ClientError::Timeout), false)]
    );
}

#[test]
fn end_subscription_before_id_aborts() {
    let mut h = Harness::new();
    let exchange = h.subscribe();
    h.client.end_subscription().unwrap();

    assert_eq!(h.client.state(), ClientState::Initialized);
    assert!(h.recorder.terminations().is_empty());
    assert_eq!(h.binding.aborted_exchanges(), vec![exchange]);
}

#[test]
fn end_subscription_in_holdoff_aborts() {
    let mut h = Harness::new();
    let exchange = h.subscribe();
    h.client.on_response_timeout(exchange);
    h.recorder.take();

    h.client.end_subscription().unwrap();
    assert_eq!(h.client.state(), ClientState::Initialized);
    assert!(!h.timers.is_armed(TimerKind::Subscription));
    assert!(h.recorder.seen().is_empty());
}

#[test]
fn end_subscription_when_idle_is_invalid() {
    let mut h = Harness::new();
    assert!(matches!(
        h.client.end_subscription(),
        Err(ClientError::InvalidState(_))
    ));
}

#[test]
fn abort_is_silent_and_stale_response_ignored() {
    let mut h = Harness::new();
    let exchange = h.subscribe();
    h.recorder.take();
    h.client.abort_subscription();

    assert_eq!(h.client.state(), ClientState::Initialized);
    assert!(h.recorder.seen().is_empty());
    assert_eq!(h.binding.aborted_exchanges(), vec![exchange]);

    h.respond(exchange, None);
    assert_eq!(h.client.state(), ClientState::Initialized);
    assert!(h.recorder.seen().is_empty());
}

#[test]
fn peer_cancel_terminates_without_retry() {
    let mut h = Harness::new();
    h.establish();
    let exchange = h.binding.open_peer_exchange();
    h.client.on_peer_request(
        exchange,
        Message::SubscribeCancelRequest(SubscribeCancelRequest {
            subscription_id: SUBSCRIPTION,
        }),
    );

    let (sent_on, status, _) = last_status(&h);
    assert_eq!(sent_on, exchange);
    assert!(status.is_success());
    assert_eq!(h.recorder.terminations(), vec![(None, false)]);
    assert_eq!(h.client.state(), ClientState::Initialized);
}

#[test]
fn sinks_told_of_termination() {
    let mut h = no_retry();
    h.establish_with_timeout(Some(5));
    h.advance(Duration::from_secs(5));

    assert_eq!(h.sink1.terminations(), 1);
    assert_eq!(h.sink3.terminations(), 1);
}

#[test]
fn free_from_terminated_callback() {
    let mut h = no_retry();
    h.recorder
        .direct_once(EventId::SubscriptionTerminated, Directive::Free);
    let exchange = h.subscribe();
    h.client.on_response_timeout(exchange);

    assert!(h.client.is_free());
    assert_eq!(h.client.ref_count(), 0);
    assert_eq!(h.recorder.terminations().len(), 1);
}

#[test]
fn free_ignored_from_activity_callback() {
    let mut h = Harness::new();
    h.establish();
    h.recorder
        .direct_once(EventId::SubscriptionActivity, Directive::Free);
    h.notify(vec![element(TraitPath::new(T3, fixture::h(2)), 5, &[9])]);

    assert!(h.client.is_established());
    assert_eq!(h.client.ref_count(), 1);
}

#[test]
fn abort_from_notification_callback_aborts_exchange() {
    let mut h = Harness::new();
    h.establish();
    h.recorder
        .direct_once(EventId::NotificationRequest, Directive::AbortSubscription);
    let exchange = h.notify(vec![element(TraitPath::new(T3, fixture::h(2)), 5, &[9])]);

    assert_eq!(h.client.state(), ClientState::Initialized);
    assert!(h.binding.aborted_exchanges().contains(&exchange));
    assert_eq!(h.sink3.value(fixture::h(2)), None);
}

#[test]
fn free_returns_client_to_pool_state() {
    let mut h = Harness::new();
    h.establish();
    h.client.free();

    assert!(h.client.is_free());
    assert_eq!(h.client.ref_count(), 0);
    assert!(h.client.binding().is_none());
    assert!(!h.timers.is_armed(TimerKind::Subscription));
}

// =============================================================================
// Counter-subscription
// =============================================================================

#[test]
fn counter_subscription_established_without_request() {
    let mut h = Harness::new();
    h.client
        .initiate_counter_subscription(SubscriptionId(9), Some(30))
        .unwrap();

    assert!(h.client.is_established());
    assert_eq!(h.client.config(), ClientConfig::CounterSubscriber);
    assert_eq!(h.client.liveness_timeout(), Some(Duration::from_secs(30)));
    assert!(h.binding.sent_messages().is_empty());
    assert_eq!(h.recorder.seen(), vec![Seen::Established(SubscriptionId(9))]);

    // the peer drives resubscription, so liveness loss does not retry
    h.advance(Duration::from_secs(30));
    assert_eq!(
        h.recorder.terminations(),
        vec![(Some(ClientError::Timeout), false)]
    );
}

#[test]
fn counter_subscription_uses_default_liveness() {
    let mut config = Config::default();
    config.client.default_liveness_timeout_secs = Some(45);
    let mut h = Harness::with_config(config);
    h.client
        .initiate_counter_subscription(SubscriptionId(9), None)
        .unwrap();

    assert_eq!(h.client.liveness_timeout(), Some(Duration::from_secs(45)));
}

#[test]
fn counter_subscription_rejects_oversized_timeout() {
    let mut h = Harness::new();
    let result = h
        .client
        .initiate_counter_subscription(SubscriptionId(9), Some(MAX_TIMEOUT_SECS + 1));

    assert!(matches!(result, Err(ClientError::ConfigurationInvalid(_))));
    assert_eq!(h.client.state(), ClientState::Initialized);
}
