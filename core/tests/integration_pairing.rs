//! Pairing Integration Tests
//!
//! Desktop subscribes, phone claims, desktop is unlocked, driven through a
//! real `TransferHub` with no mail gateway involved.
//!
//! Run with: cargo test --test integration_pairing

use async_trait::async_trait;
use pctransfer_core::dispatch::{MailError, MailSender, OutboundMessage};
use pctransfer_core::{
    ClaimPolicy, ClientCommand, HubConfig, RelayEvent, SessionConfig, SessionState, TransferError,
    TransferHub,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

struct NeverSends;

#[async_trait]
impl MailSender for NeverSends {
    async fn send(&self, _message: OutboundMessage) -> Result<(), MailError> {
        Err(MailError::new("no gateway in pairing tests"))
    }
}

fn test_hub(config: HubConfig) -> TransferHub {
    TransferHub::new(config, Arc::new(NeverSends))
}

#[test]
fn test_scenario_a_unlock_reaches_desktop_once() {
    let hub = test_hub(HubConfig::default());
    assert_ok!(hub.register_session("ab12cd"));

    let (mut desktop, mut rx) = hub.open_connection();
    desktop.handle(ClientCommand::Join {
        room: "ab12cd".to_string(),
    });
    assert_eq!(
        rx.try_recv().unwrap().event,
        RelayEvent::Joined {
            room: "ab12cd".to_string()
        }
    );

    assert_eq!(hub.claim("ab12cd", "s@college.edu").unwrap(), 1);

    let frame = rx.try_recv().expect("unlock delivered");
    assert_eq!(frame.channel.as_deref(), Some("ab12cd"));
    assert_eq!(frame.event, RelayEvent::unlock("s@college.edu"));
    assert!(rx.try_recv().is_err(), "exactly one copy");

    let session = hub.session("ab12cd").unwrap();
    assert_eq!(session.state, SessionState::Claimed);
    assert_eq!(session.claimed_email.as_deref(), Some("s@college.edu"));
}

#[test]
fn test_subscriber_after_claim_sees_nothing() {
    let hub = test_hub(HubConfig::default());
    let id = hub.create_session();

    assert_eq!(hub.claim(&id, "s@college.edu").unwrap(), 0);

    let (mut late, mut rx) = hub.open_connection();
    late.handle(ClientCommand::Join { room: id.clone() });
    assert!(matches!(rx.try_recv().unwrap().event, RelayEvent::Joined { .. }));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_repeat_claims_publish_each_time() {
    let hub = test_hub(HubConfig::default());
    let id = hub.create_session();
    let (mut desktop, mut rx) = hub.open_connection();
    desktop.handle(ClientCommand::Join { room: id.clone() });
    rx.try_recv().unwrap();

    hub.claim(&id, "first@college.edu").unwrap();
    hub.claim(&id, "second@college.edu").unwrap();

    assert_eq!(rx.try_recv().unwrap().event, RelayEvent::unlock("first@college.edu"));
    assert_eq!(rx.try_recv().unwrap().event, RelayEvent::unlock("second@college.edu"));
    assert!(rx.try_recv().is_err());
    assert_eq!(
        hub.session(&id).unwrap().claimed_email.as_deref(),
        Some("second@college.edu")
    );
}

#[test]
fn test_first_wins_policy_blocks_hijack() {
    let hub = test_hub(HubConfig {
        session: SessionConfig {
            claim_policy: ClaimPolicy::FirstWins,
            ..Default::default()
        },
        ..Default::default()
    });
    let id = hub.create_session();
    let (mut desktop, mut rx) = hub.open_connection();
    desktop.handle(ClientCommand::Join { room: id.clone() });
    rx.try_recv().unwrap();

    assert_ok!(hub.claim(&id, "student@college.edu"));
    assert_ok!(hub.claim(&id, "student@college.edu"));
    assert_eq!(
        hub.claim(&id, "attacker@evil.example").unwrap_err(),
        TransferError::AlreadyClaimed
    );

    assert_eq!(rx.try_recv().unwrap().event, RelayEvent::unlock("student@college.edu"));
    assert_eq!(rx.try_recv().unwrap().event, RelayEvent::unlock("student@college.edu"));
    assert_err!(rx.try_recv());
}

#[test]
fn test_claim_unknown_session_is_rejected() {
    let hub = test_hub(HubConfig::default());
    assert_eq!(
        hub.claim("never-created", "s@college.edu").unwrap_err(),
        TransferError::UnknownSession("never-created".to_string())
    );
}

#[test]
fn test_desktop_reload_both_tabs_unlock() {
    let hub = test_hub(HubConfig::default());
    let id = hub.create_session();

    let (mut old_tab, mut old_rx) = hub.open_connection();
    let (mut new_tab, mut new_rx) = hub.open_connection();
    old_tab.handle(ClientCommand::Join { room: id.clone() });
    new_tab.handle(ClientCommand::Join { room: id.clone() });
    old_rx.try_recv().unwrap();
    new_rx.try_recv().unwrap();

    assert_eq!(hub.claim(&id, "s@college.edu").unwrap(), 2);
    assert!(old_rx.try_recv().is_ok());
    assert!(new_rx.try_recv().is_ok());
}

#[test]
fn test_sweep_closes_expired_channels() {
    let hub = test_hub(HubConfig {
        session: SessionConfig {
            idle_ttl_secs: 60,
            absolute_ttl_secs: 0,
            ..Default::default()
        },
        ..Default::default()
    });
    let id = hub.create_session();
    let (mut desktop, _rx) = hub.open_connection();
    desktop.handle(ClientCommand::Join { room: id.clone() });

    assert!(hub.sweep_expired().is_empty());
    assert_eq!(hub.relay().subscriber_count(&id), 1);

    let later = Instant::now() + Duration::from_secs(61);
    assert_eq!(hub.sweep_expired_at(later), vec![id.clone()]);
    assert_eq!(hub.relay().subscriber_count(&id), 0);
    assert!(hub.session(&id).is_none());
    assert_eq!(
        hub.claim(&id, "s@college.edu").unwrap_err(),
        TransferError::UnknownSession(id.clone())
    );
}

#[test]
fn test_disabled_ttls_never_expire() {
    let hub = test_hub(HubConfig {
        session: SessionConfig {
            idle_ttl_secs: 0,
            absolute_ttl_secs: 0,
            ..Default::default()
        },
        ..Default::default()
    });
    let id = hub.create_session();

    let much_later = Instant::now() + Duration::from_secs(365 * 24 * 3600);
    assert!(hub.sweep_expired_at(much_later).is_empty());
    assert!(hub.session(&id).is_some());
}

#[test]
fn test_many_sessions_have_distinct_ids() {
    let hub = test_hub(HubConfig::default());
    let ids: HashSet<String> = (0..5_000).map(|_| hub.create_session()).collect();
    assert_eq!(ids.len(), 5_000);
    assert_eq!(hub.stats().sessions.active, 5_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_across_sessions() {
    let hub = test_hub(HubConfig::default());
    let ids: Vec<String> = (0..64).map(|_| hub.create_session()).collect();

    let mut tasks = Vec::new();
    for (i, id) in ids.iter().cloned().enumerate() {
        let hub = hub.clone();
        tasks.push(tokio::spawn(async move {
            hub.claim(&id, &format!("user{}@college.edu", i)).map(|_| id)
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let id = task.await.unwrap().unwrap();
        assert_eq!(
            hub.session(&id).unwrap().claimed_email,
            Some(format!("user{}@college.edu", i))
        );
    }
    assert_eq!(hub.stats().sessions.claimed, 64);
}

#[test]
fn test_racing_claims_deliver_stored_claim_last() {
    let hub = test_hub(HubConfig::default());

    for round in 0..200 {
        let id = hub.create_session();
        let (mut desktop, mut rx) = hub.open_connection();
        desktop.handle(ClientCommand::Join { room: id.clone() });
        rx.try_recv().unwrap();

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let claimers: Vec<_> = ["alice@college.edu", "bob@college.edu"]
            .into_iter()
            .map(|email| {
                let hub = hub.clone();
                let id = id.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    hub.claim(&id, email)
                })
            })
            .collect();
        for claimer in claimers {
            assert_ok!(claimer.join().unwrap());
        }

        let unlocks: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|frame| match frame.event {
                RelayEvent::UnlockTerminal { email } => Some(email),
                _ => None,
            })
            .collect();
        assert_eq!(unlocks.len(), 2, "round {}", round);
        assert_eq!(
            unlocks.last().cloned(),
            hub.session(&id).unwrap().claimed_email,
            "round {}",
            round
        );
    }
}
