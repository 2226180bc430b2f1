//! Error handling and edge case tests.

use tickertape::{
    AttemptId, BrokerError, BrokerHandle, BrokerSubId, Client, ClientConfig, ClientEvent,
    ConnectionState, KeyRecord, Listener, RecordingTransport, SubscriptionHandle,
    SubscriptionRequest, SubscriptionState, TickerError, TransportCall, TransportError,
    TransportEvent,
};

const CHAT: &str = "TICKERTAPE == \"Chat\"";

fn connected() -> (Client, RecordingTransport) {
    let transport = RecordingTransport::new();
    let client = Client::new(ClientConfig::new("elvin://localhost"), transport.clone()).unwrap();
    client.start();
    client.handle_event(TransportEvent::ConnectResult {
        attempt: AttemptId(1),
        result: Ok(BrokerHandle(1)),
    });
    transport.take_calls();
    (client, transport)
}

fn subscribe(client: &Client, expression: &str) -> SubscriptionHandle {
    client
        .subscribe(SubscriptionRequest::new(expression, Listener::new(|_| {})))
        .unwrap()
}

fn single_add(transport: &RecordingTransport) -> tickertape::RequestId {
    match transport.take_calls().as_slice() {
        [TransportCall::Add { request, .. }] => *request,
        other => panic!("expected one add, got {:?}", other),
    }
}

// --- Configuration Errors ---

#[test]
fn test_invalid_backoff_config() {
    let config = ClientConfig::new("elvin://localhost").with_backoff_factor(1);
    let result = Client::new(config, RecordingTransport::new());
    assert!(matches!(result, Err(TickerError::Config(_))));

    let config = ClientConfig::new("elvin://localhost")
        .with_initial_retry_delay_ms(5000)
        .with_max_retry_delay_ms(1000);
    assert!(Client::new(config, RecordingTransport::new()).is_err());
}

#[test]
fn test_duplicate_key_names_rejected() {
    let (client, _transport) = connected();
    let record = KeyRecord {
        name: "ops".to_string(),
        is_private: true,
        data: b"secret".to_vec(),
    };
    let result = client.reload_keys(vec![record.clone(), record]);
    assert!(matches!(result, Err(TickerError::KeyExists(_))));
    assert!(client.key_table().is_empty());
}

// --- Subscription Errors ---

#[test]
fn test_invalid_expression_is_immediate() {
    let (client, transport) = connected();
    let result = client.subscribe(SubscriptionRequest::new(
        "TICKERTAPE == \"Chat",
        Listener::new(|_| {}),
    ));
    assert!(matches!(result, Err(TickerError::InvalidExpression { .. })));
    assert!(transport.calls().is_empty());
    assert!(client.subscriptions().is_empty());
}

#[test]
fn test_invalid_update_leaves_subscription_alone() {
    let (client, transport) = connected();
    let handle = subscribe(&client, CHAT);
    transport.take_calls();

    let result = client.update_from(
        handle,
        SubscriptionRequest::new("(", Listener::new(|_| {})),
    );
    assert!(result.is_err());
    assert_eq!(client.subscription_info(handle).unwrap().expression, CHAT);
    assert!(transport.calls().is_empty());
}

#[test]
fn test_double_unsubscribe() {
    let (client, _transport) = connected();
    let handle = subscribe(&client, CHAT);
    client.unsubscribe(handle).unwrap();
    assert!(matches!(
        client.unsubscribe(handle),
        Err(TickerError::UnknownSubscription(_))
    ));
}

#[test]
fn test_no_orphan_when_unsubscribed_before_ack() {
    let (client, transport) = connected();
    let handle = subscribe(&client, CHAT);
    let add = single_add(&transport);

    client.unsubscribe(handle).unwrap();
    assert!(transport.calls().is_empty());
    assert_eq!(
        client.subscriptions()[0].state,
        SubscriptionState::PendingDelete
    );

    client.handle_event(TransportEvent::SubscriptionAdded {
        request: add,
        result: Ok(BrokerSubId(12)),
    });
    let delete = match transport.take_calls().as_slice() {
        [TransportCall::Delete {
            request,
            subscription: BrokerSubId(12),
            ..
        }] => *request,
        other => panic!("expected one delete, got {:?}", other),
    };

    // Late notifications for the released subscription go nowhere.
    client.handle_event(TransportEvent::Notification {
        subscription: BrokerSubId(12),
        notification: tickertape::Notification::new(),
    });

    client.handle_event(TransportEvent::SubscriptionDeleted {
        request: delete,
        result: Ok(()),
    });
    assert!(client.subscriptions().is_empty());
}

#[test]
fn test_refused_delete_is_forgotten() {
    let (client, transport) = connected();
    let handle = subscribe(&client, CHAT);
    let add = single_add(&transport);
    client.handle_event(TransportEvent::SubscriptionAdded {
        request: add,
        result: Ok(BrokerSubId(3)),
    });
    client.unsubscribe(handle).unwrap();
    let delete = match transport.take_calls().as_slice() {
        [TransportCall::Delete { request, .. }] => *request,
        other => panic!("expected one delete, got {:?}", other),
    };

    client.handle_event(TransportEvent::SubscriptionDeleted {
        request: delete,
        result: Err(BrokerError::new(4, "no such subscription")),
    });
    assert!(client.subscriptions().is_empty());
}

#[test]
fn test_rejected_modify_waits_for_next_change() {
    let (client, transport) = connected();
    let events = client.events();
    let _ = events.try_recv();

    let handle = subscribe(&client, CHAT);
    let add = single_add(&transport);
    client.handle_event(TransportEvent::SubscriptionAdded {
        request: add,
        result: Ok(BrokerSubId(3)),
    });

    let lunch = "TICKERTAPE == \"Lunch\"";
    client
        .update_from(handle, SubscriptionRequest::new(lunch, Listener::new(|_| {})))
        .unwrap();
    let modify = match transport.take_calls().as_slice() {
        [TransportCall::Modify { request, .. }] => *request,
        other => panic!("expected one modify, got {:?}", other),
    };
    client.handle_event(TransportEvent::SubscriptionModified {
        request: modify,
        result: Err(BrokerError::new(2, "parse error")),
    });

    assert!(matches!(
        events.try_recv(),
        Ok(ClientEvent::SubscriptionRejected { .. })
    ));
    assert!(transport.calls().is_empty());
    let info = client.subscription_info(handle).unwrap();
    assert!(info.rejected);
    assert_eq!(info.broker_id, Some(BrokerSubId(3)));

    // The next change from the caller tries again.
    let coffee = "TICKERTAPE == \"Coffee\"";
    client
        .update_from(handle, SubscriptionRequest::new(coffee, Listener::new(|_| {})))
        .unwrap();
    assert!(matches!(
        transport.take_calls().as_slice(),
        [TransportCall::Modify { .. }]
    ));
}

#[test]
fn test_unknown_acknowledgments_ignored() {
    let (client, transport) = connected();
    client.handle_event(TransportEvent::SubscriptionAdded {
        request: tickertape::RequestId(999),
        result: Ok(BrokerSubId(1)),
    });
    client.handle_event(TransportEvent::Notification {
        subscription: BrokerSubId(1),
        notification: tickertape::Notification::new(),
    });
    client.handle_event(TransportEvent::NotifySent {
        result: Err(BrokerError::new(1, "not connected")),
    });
    assert!(transport.calls().is_empty());
    assert!(client.subscriptions().is_empty());
}

// --- Connection Errors ---

#[test]
fn test_stale_connect_result_is_closed() {
    let transport = RecordingTransport::new();
    let client = Client::new(ClientConfig::new("elvin://localhost"), transport.clone()).unwrap();
    client.start();
    client.disconnect();
    transport.take_calls();

    client.handle_event(TransportEvent::ConnectResult {
        attempt: AttemptId(1),
        result: Ok(BrokerHandle(5)),
    });
    assert_eq!(
        transport.take_calls(),
        vec![TransportCall::Disconnect(BrokerHandle(5))]
    );
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_error_while_not_connected_is_ignored() {
    let transport = RecordingTransport::new();
    let client = Client::new(ClientConfig::new("elvin://localhost"), transport.clone()).unwrap();
    let events = client.events();

    client.handle_event(TransportEvent::ConnectionLost(TransportError::new(
        32,
        "broken pipe",
    )));
    assert!(events.try_recv().is_err());
    assert_eq!(client.state(), ConnectionState::NeverConnected);
    assert!(transport.calls().is_empty());
}

#[test]
fn test_retry_timer_after_connect_is_ignored() {
    let (client, transport) = connected();
    client.handle_event(TransportEvent::RetryTimer);
    assert!(transport.calls().is_empty());
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[test]
fn test_disconnect_is_idempotent() {
    let (client, transport) = connected();
    client.disconnect();
    client.disconnect();
    assert_eq!(
        transport.take_calls(),
        vec![TransportCall::Disconnect(BrokerHandle(1))]
    );
    assert!(!client.send(&tickertape::Notification::new(), &[]));
}
