// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Unit tests for EventHub and ReconnectPolicy

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use mailsession::error::MailError;
    use mailsession::imap::events::{EventHub, EventKind, Listener};
    use mailsession::imap::session::{RawSession, SessionHandle};
    use mailsession::reconnect::{ErrorPredicate, ReconnectPolicy};
    use mailsession::session_manager::SessionManager;

    use crate::mocks::{eventually, same_session, test_config, MockConnector, SessionTemplate};

    fn setup(template: SessionTemplate) -> (Arc<MockConnector>, Arc<SessionManager>, Arc<EventHub>) {
        let connector = MockConnector::new(template);
        let manager = SessionManager::new(connector.clone(), test_config());
        let hub = EventHub::new(Arc::clone(&manager));
        (connector, manager, hub)
    }

    fn counting_listener() -> (Listener, Arc<AtomicU32>) {
        let total = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&total);
        let listener = Listener::new_mail(move |n| {
            counter.fetch_add(n, Ordering::SeqCst);
        });
        (listener, total)
    }

    #[tokio::test]
    async fn test_new_mail_subscriber_gets_initial_count() {
        let (connector, _manager, hub) = setup(SessionTemplate { uids: vec![4, 5, 9], ..Default::default() });
        let (listener, total) = counting_listener();

        let _unsubscriber = hub.subscribe(listener).await.unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 3);

        connector.latest().events().emit_new_mail(2);
        assert_eq!(total.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_empty_mailbox_sends_no_initial_count() {
        let (_connector, _manager, hub) = setup(SessionTemplate::default());
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        hub.subscribe(Listener::new_mail(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches_from_session_and_registry() {
        let (connector, _manager, hub) = setup(SessionTemplate::default());
        let (listener, total) = counting_listener();

        let unsubscriber = hub.subscribe(listener).await.unwrap();
        assert_eq!(unsubscriber.kind(), EventKind::NewMail);
        unsubscriber.unsubscribe();

        connector.latest().events().emit_new_mail(1);
        assert_eq!(total.load(Ordering::SeqCst), 0);
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_nothing_registered() {
        let (connector, _manager, hub) = setup(SessionTemplate::default());
        connector.fail_next(1);

        let result = hub.subscribe(Listener::error(|_| {})).await;

        assert!(matches!(result, Err(MailError::Connection(_))));
        assert!(hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_replays_every_subscriber() {
        let (connector, manager, hub) = setup(SessionTemplate::default());
        let policy = ReconnectPolicy::new(Arc::clone(&manager), Arc::clone(&hub));
        let (listener, total) = counting_listener();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);

        hub.subscribe(listener).await.unwrap();
        hub.subscribe(Listener::error(move |e: &MailError| seen.lock().push(e.clone())))
            .await
            .unwrap();

        policy.reconnect(true).await.unwrap();

        assert_eq!(connector.connect_count(), 2);
        let old = connector.session(0);
        let new = connector.session(1);
        assert!(old.ended.load(Ordering::SeqCst));
        assert!(old.events().is_empty());
        assert_eq!(new.events().len(), 2);

        new.events().emit_new_mail(1);
        new.events().emit_error(&MailError::Parse("x".to_string()));
        assert_eq!(total.load(Ordering::SeqCst), 1);
        assert_eq!(errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_listener_registered_while_disconnected_attaches_on_connect() {
        let (connector, manager, hub) = setup(SessionTemplate::default());
        let (listener, total) = counting_listener();

        let _unsubscriber = hub.register(listener);
        manager.get_session().await.unwrap();

        connector.latest().events().emit_new_mail(4);
        assert_eq!(total.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_socket_timeout_triggers_one_reconnect() {
        let (connector, manager, hub) = setup(SessionTemplate::default());
        let policy = ReconnectPolicy::new(Arc::clone(&manager), Arc::clone(&hub));
        let predicate: ErrorPredicate = Arc::new(|e: &MailError| e.is_socket_timeout());
        policy.on_transient_error(predicate);
        manager.get_session().await.unwrap();

        let first = connector.session(0);
        first.events().emit_error(&MailError::Timeout("read timed out".to_string()));
        first.events().emit_error(&MailError::Timeout("read timed out".to_string()));

        let watched = Arc::clone(&connector);
        assert!(eventually(move || watched.connect_count() == 2).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connector.connect_count(), 2);

        // The replacement is wired for the next timeout too.
        connector.session(1).events().emit_error(&MailError::Timeout("again".to_string()));
        let watched = Arc::clone(&connector);
        assert!(eventually(move || watched.connect_count() == 3).await);
    }

    #[tokio::test]
    async fn test_other_errors_do_not_reconnect() {
        let (connector, manager, hub) = setup(SessionTemplate::default());
        let policy = ReconnectPolicy::new(Arc::clone(&manager), Arc::clone(&hub));
        policy.on_transient_error(Arc::new(|e: &MailError| e.is_socket_timeout()));
        manager.get_session().await.unwrap();

        connector
            .latest()
            .events()
            .emit_error(&MailError::ProtocolCommand("BAD".to_string()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_interval_reconnect_until_cancelled() {
        let (connector, manager, hub) = setup(SessionTemplate::default());
        let policy = ReconnectPolicy::new(Arc::clone(&manager), Arc::clone(&hub));
        manager.get_session().await.unwrap();

        policy.schedule_interval(Duration::from_millis(40));
        assert!(policy.is_scheduled());

        let watched = Arc::clone(&connector);
        assert!(eventually(move || watched.connect_count() >= 3).await);

        policy.cancel();
        assert!(!policy.is_scheduled());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let settled = connector.connect_count();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(connector.connect_count(), settled);
    }

    fn slow_setup() -> (Arc<MockConnector>, Arc<SessionManager>, Arc<ReconnectPolicy>) {
        let connector = MockConnector::with_delay(SessionTemplate::default(), Duration::from_millis(50));
        let manager = SessionManager::new(connector.clone(), test_config());
        let hub = EventHub::new(Arc::clone(&manager));
        let policy = Arc::new(ReconnectPolicy::new(Arc::clone(&manager), hub));
        (connector, manager, policy)
    }

    #[tokio::test]
    async fn test_get_session_during_reconnect_gets_the_replacement() {
        let (connector, manager, policy) = slow_setup();
        manager.get_session().await.unwrap();

        let reconnecting = {
            let policy = Arc::clone(&policy);
            tokio::spawn(async move { policy.reconnect(true).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let session = manager.get_session().await.unwrap();
        let replacement = reconnecting.await.unwrap().unwrap();

        assert_eq!(connector.connect_count(), 2);
        assert!(same_session(&session, &replacement));
        assert!(connector.session(0).ended.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_force_new_session_waits_for_running_reconnect() {
        let (connector, manager, policy) = slow_setup();
        manager.get_session().await.unwrap();

        let reconnecting = {
            let policy = Arc::clone(&policy);
            tokio::spawn(async move { policy.reconnect(true).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let forced = manager.force_new_session().await.unwrap();
        reconnecting.await.unwrap().unwrap();

        assert_eq!(connector.connect_count(), 3);
        assert_eq!(connector.max_concurrent_connects(), 1);
        assert!(same_session(&forced, &manager.get_session().await.unwrap()));
        let latest: SessionHandle = connector.latest();
        assert!(same_session(&forced, &latest));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_subscribe_racing_reconnect_stays_attached() {
        for _ in 0..50 {
            let (connector, manager, hub) = setup(SessionTemplate::default());
            let policy = Arc::new(ReconnectPolicy::new(Arc::clone(&manager), Arc::clone(&hub)));
            manager.get_session().await.unwrap();
            let listener = Listener::error(|_| {});

            let reconnecting = {
                let policy = Arc::clone(&policy);
                tokio::spawn(async move { policy.reconnect(true).await })
            };
            hub.subscribe(listener.clone()).await.unwrap();
            reconnecting.await.unwrap().unwrap();

            assert!(connector.latest().events().contains(&listener));
        }
    }
}
