use super::*;

fn readiness_log(hub: &EventHub) -> Arc<Mutex<Vec<bool>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    hub.on(names::READINESS_CHANGED, move |event| {
        if let HubEvent::ReadinessChanged(ready) = event {
            sink.lock().unwrap().push(*ready);
        }
        Ok(())
    });
    log
}

fn emit(hub: &EventHub, event: HubEvent) {
    hub.emit(event).unwrap();
}

#[test]
fn test_ready_requires_both_flags() {
    let hub = Arc::new(EventHub::new());
    let log = readiness_log(&hub);
    let readiness = ReadinessCoordinator::attach(Arc::clone(&hub));

    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Running));
    assert!(readiness.transport_ready());
    assert!(!readiness.is_ready());

    emit(&hub, HubEvent::ServiceInitialized(true));
    assert!(readiness.is_ready());
    assert_eq!(*log.lock().unwrap(), vec![true]);
}

#[test]
fn test_service_first_then_transport() {
    let hub = Arc::new(EventHub::new());
    let readiness = ReadinessCoordinator::attach(Arc::clone(&hub));

    emit(&hub, HubEvent::ServiceInitialized(true));
    assert!(!readiness.is_ready());
    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Running));
    assert!(readiness.is_ready());
}

#[test]
fn test_either_flag_dropping_clears_readiness() {
    let hub = Arc::new(EventHub::new());
    let log = readiness_log(&hub);
    let readiness = ReadinessCoordinator::attach(Arc::clone(&hub));

    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Running));
    emit(&hub, HubEvent::ServiceInitialized(true));
    emit(&hub, HubEvent::ServiceInitialized(false));
    assert!(!readiness.is_ready());
    assert!(readiness.transport_ready());

    emit(&hub, HubEvent::ServiceInitialized(true));
    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Stopped));
    assert!(!readiness.is_ready());

    assert_eq!(*log.lock().unwrap(), vec![true, false, true, false]);
}

#[test]
fn test_transport_loss_resets_service_flag() {
    let hub = Arc::new(EventHub::new());
    let readiness = ReadinessCoordinator::attach(Arc::clone(&hub));

    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Running));
    emit(&hub, HubEvent::ServiceInitialized(true));
    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Starting));
    assert!(!readiness.service_ready());

    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Running));
    assert!(!readiness.is_ready());
}

#[test]
fn test_repeated_states_do_not_rebroadcast() {
    let hub = Arc::new(EventHub::new());
    let log = readiness_log(&hub);
    let _readiness = ReadinessCoordinator::attach(Arc::clone(&hub));

    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Running));
    emit(&hub, HubEvent::ServiceInitialized(true));
    emit(&hub, HubEvent::ServiceInitialized(true));
    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Running));

    assert_eq!(*log.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn test_watch_receiver_observes_flips() {
    let hub = Arc::new(EventHub::new());
    let readiness = ReadinessCoordinator::attach(Arc::clone(&hub));
    let mut rx = readiness.subscribe();
    assert!(!*rx.borrow());

    emit(&hub, HubEvent::LifecycleChanged(LifecycleState::Running));
    emit(&hub, HubEvent::ServiceInitialized(true));
    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update());
}

#[test]
fn test_drop_detaches_from_hub() {
    let hub = Arc::new(EventHub::new());
    let readiness = ReadinessCoordinator::attach(Arc::clone(&hub));
    assert_eq!(hub.subscriber_count(names::LIFECYCLE_CHANGED), 1);
    drop(readiness);
    assert_eq!(hub.subscriber_count(names::LIFECYCLE_CHANGED), 0);
    assert_eq!(hub.subscriber_count(names::SERVICE_INITIALIZED), 0);
}
