use anyhow::{ensure, Result};
use futures::future::join_all;
use lapse_core::{ExpiringQueue, QueueConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Upper bound on sessions doing work at the same moment
const MAX_IN_FLIGHT: usize = 64;

#[derive(Debug, Clone)]
struct Session {
    user: String,
    opened_at: Instant,
}

struct DemoConfig {
    ttl: Duration,
    sessions: usize,
}

impl DemoConfig {
    fn from_env() -> Self {
        let ttl_ms: u64 = std::env::var("LAPSE_DEMO_TTL_MS")
            .unwrap_or_else(|_| "200".to_string())
            .parse()
            .unwrap_or(200);
        let sessions: usize = std::env::var("LAPSE_DEMO_SESSIONS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .unwrap_or(500);

        Self {
            ttl: Duration::from_millis(ttl_ms),
            sessions,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lapse_session_demo=info,lapse_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DemoConfig::from_env();
    tracing::info!("Lapse session idle-timeout demo");
    tracing::info!("   TTL: {:?}, sessions: {}", config.ttl, config.sessions);
    println!();

    basic_operations(&config).await?;
    every_session_expires(&config).await?;
    activity_keeps_session_alive(&config).await?;
    logout_suppresses_timeout(&config).await?;
    parallel_sessions(&config).await?;

    println!();
    tracing::info!("All scenarios passed");

    Ok(())
}

/// Queue whose expired session ids are delivered on a channel
fn session_queue(
    name: &str,
    ttl: Duration,
) -> (ExpiringQueue<Uuid, Session>, UnboundedReceiver<Uuid>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queue = ExpiringQueue::with_config(
        QueueConfig::default().with_name(name),
        move |id: Uuid, session: Session| {
            tracing::debug!(
                "session {} of {} idle after {:?}",
                id,
                session.user,
                session.opened_at.elapsed()
            );
            let _ = tx.send(id);
        },
        move || ttl,
    );
    (queue, rx)
}

fn drain(rx: &mut UnboundedReceiver<Uuid>) -> Vec<Uuid> {
    let mut expired = Vec::new();
    while let Ok(id) = rx.try_recv() {
        expired.push(id);
    }
    expired
}

fn new_session(user: impl Into<String>) -> Session {
    Session {
        user: user.into(),
        opened_at: Instant::now(),
    }
}

/// PUSH/GET/REMOVE round trip
async fn basic_operations(config: &DemoConfig) -> Result<()> {
    tracing::info!("Scenario: Basic Operations");

    let (sessions, _rx) = session_queue("basic", config.ttl);
    let id = Uuid::new_v4();

    sessions.push(id, new_session("alice"));
    let user = sessions.get_with(&id, |session| session.user.clone());
    ensure!(user.as_deref() == Some("alice"), "session should be found");

    ensure!(sessions.remove(&id), "session should be removed");
    ensure!(!sessions.remove(&id), "second removal should report nothing removed");
    ensure!(sessions.get(&id).is_none(), "session should be gone after removal");

    sessions.push(id, new_session("alice again"));
    let user = sessions.get(&id).map(|session| session.user);
    ensure!(user.as_deref() == Some("alice again"), "re-pushed session should be found");

    tracing::info!("   ✓ Basic operations work correctly");
    Ok(())
}

/// Idle sessions time out in push order, once each
async fn every_session_expires(config: &DemoConfig) -> Result<()> {
    tracing::info!("Scenario: Every Session Expires Once");

    let (sessions, mut rx) = session_queue("expiry", config.ttl);
    let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    for (i, id) in ids.iter().enumerate() {
        sessions.push(*id, new_session(format!("user-{}", i)));
    }

    tracing::info!("   Waiting {:?} for expiration...", config.ttl * 3);
    tokio::time::sleep(config.ttl * 3).await;

    let expired = drain(&mut rx);
    ensure!(expired == ids, "expected {:?}, got {:?}", ids, expired);
    ensure!(sessions.is_empty(), "queue should be empty after expiry");

    tracing::info!("   ✓ {} sessions expired in order", expired.len());
    Ok(())
}

/// Refreshing within every TTL window keeps a session open
async fn activity_keeps_session_alive(config: &DemoConfig) -> Result<()> {
    tracing::info!("Scenario: Activity Keeps Session Alive");

    let (sessions, mut rx) = session_queue("keepalive", config.ttl);
    let active = Uuid::new_v4();
    let idle = Uuid::new_v4();
    sessions.push(active, new_session("active"));
    sessions.push(idle, new_session("idle"));

    let tick = config.ttl / 2;
    for _ in 0..6 {
        tokio::time::sleep(tick).await;
        ensure!(sessions.refresh(&active), "active session vanished");
    }

    ensure!(drain(&mut rx) == vec![idle], "only the idle session should expire");
    ensure!(sessions.contains_key(&active), "active session should survive");
    if let Some(left) = sessions.remaining(&active) {
        tracing::info!("   active session has {:?} left", left);
    }

    tokio::time::sleep(config.ttl * 2).await;
    ensure!(drain(&mut rx) == vec![active], "active session should expire once idle");

    tracing::info!("   ✓ Refresh postpones expiry");
    Ok(())
}

/// Explicit logout never triggers the timeout
async fn logout_suppresses_timeout(config: &DemoConfig) -> Result<()> {
    tracing::info!("Scenario: Logout Suppresses Timeout");

    let (sessions, mut rx) = session_queue("logout", config.ttl);
    let stay = Uuid::new_v4();
    let leave = Uuid::new_v4();
    sessions.push(leave, new_session("leaving"));
    sessions.push(stay, new_session("staying"));

    tokio::time::sleep(config.ttl / 2).await;
    ensure!(sessions.remove(&leave), "logout should find the session");

    tokio::time::sleep(config.ttl * 2).await;
    ensure!(drain(&mut rx) == vec![stay], "logged-out session must not time out");

    tracing::info!("   ✓ Removed sessions never expire");
    Ok(())
}

/// Many sessions opened and touched concurrently all expire exactly once
async fn parallel_sessions(config: &DemoConfig) -> Result<()> {
    tracing::info!("Scenario: Parallel Sessions ({} concurrent)", config.sessions);

    let (sessions, mut rx) = session_queue("parallel", config.ttl);
    let semaphore = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
    let start = Instant::now();

    let tasks: Vec<_> = (0..config.sessions)
        .map(|i| {
            let sessions = sessions.clone();
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await?;
                let id = Uuid::new_v4();
                sessions.push(id, new_session(format!("user-{}", i)));
                tokio::task::yield_now().await;
                sessions.refresh(&id);
                anyhow::Ok(id)
            }
        })
        .collect();

    let opened = join_all(tasks)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    tracing::info!("   Opened {} sessions in {:?}", opened.len(), start.elapsed());

    tokio::time::sleep(config.ttl * 3).await;

    let mut seen: HashMap<Uuid, usize> = HashMap::new();
    for id in drain(&mut rx) {
        *seen.entry(id).or_default() += 1;
    }

    for id in &opened {
        match seen.get(id) {
            Some(1) => {}
            Some(n) => {
                tracing::error!("session {} expired {} times", id, n);
                anyhow::bail!("duplicate expiry");
            }
            None => {
                tracing::error!("session {} never expired", id);
                anyhow::bail!("missing expiry");
            }
        }
    }
    ensure!(seen.len() == opened.len(), "unexpected sessions expired");
    ensure!(sessions.is_empty(), "queue should be empty");

    tracing::info!("   ✓ All {} sessions expired exactly once", opened.len());
    Ok(())
}
