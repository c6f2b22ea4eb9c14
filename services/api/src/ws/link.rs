//! Upstream link supervision: the reconnect state machine and the keepalive heartbeat.

use super::provider::UpstreamCommand;
use std::time::Duration;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Opening,
    Connected,
    Reconnecting,
}

/// What the session should do next about the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    /// Open a new link tagged with `generation`.
    Connect { generation: u64 },
    /// Wait `after`, then report back that the reconnect for `generation` is due.
    ScheduleReconnect { generation: u64, after: Duration },
    /// Stay disconnected.
    GiveUp,
    /// Stale or redundant; nothing to do.
    Ignore,
}

/// Tracks one session's upstream link.
///
/// Every connect attempt gets a fresh generation. Notifications carrying an
/// older generation are ignored, so a duplicate close from a superseded link
/// can never start a second reconnect. Each loss gets a single reconnect
/// attempt after a fixed backoff.
#[derive(Debug)]
pub struct LinkSupervisor {
    state: LinkState,
    generation: u64,
    backoff: Duration,
    reconnect_attempt: bool,
    shut_down: bool,
}

impl LinkSupervisor {
    pub fn new(backoff: Duration) -> Self {
        Self {
            state: LinkState::Disconnected,
            generation: 0,
            backoff,
            reconnect_attempt: false,
            shut_down: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the attempt in progress is a reconnect rather than a first open.
    pub fn is_reconnect_attempt(&self) -> bool {
        self.reconnect_attempt
    }

    pub fn request_open(&mut self) -> LinkAction {
        if self.shut_down || self.state != LinkState::Disconnected {
            return LinkAction::Ignore;
        }
        self.begin_attempt(false)
    }

    fn begin_attempt(&mut self, reconnect: bool) -> LinkAction {
        self.generation += 1;
        self.state = LinkState::Opening;
        self.reconnect_attempt = reconnect;
        LinkAction::Connect {
            generation: self.generation,
        }
    }

    fn is_current(&self, generation: u64, state: LinkState) -> bool {
        !self.shut_down && self.state == state && self.generation == generation
    }

    /// Returns false when the opened link is stale and should be dropped.
    pub fn on_connected(&mut self, generation: u64) -> bool {
        if !self.is_current(generation, LinkState::Opening) {
            return false;
        }
        self.state = LinkState::Connected;
        true
    }

    pub fn on_connect_failed(&mut self, generation: u64) -> LinkAction {
        if !self.is_current(generation, LinkState::Opening) {
            return LinkAction::Ignore;
        }
        self.state = LinkState::Disconnected;
        LinkAction::GiveUp
    }

    pub fn on_link_lost(&mut self, generation: u64, client_open: bool) -> LinkAction {
        if !self.is_current(generation, LinkState::Connected) {
            return LinkAction::Ignore;
        }
        if !client_open {
            self.state = LinkState::Disconnected;
            return LinkAction::GiveUp;
        }
        self.state = LinkState::Reconnecting;
        LinkAction::ScheduleReconnect {
            generation,
            after: self.backoff,
        }
    }

    pub fn on_reconnect_due(&mut self, generation: u64) -> LinkAction {
        if !self.is_current(generation, LinkState::Reconnecting) {
            return LinkAction::Ignore;
        }
        self.begin_attempt(true)
    }

    /// Permanently stops supervision; later notifications are all ignored.
    pub fn shutdown(&mut self) {
        self.shut_down = true;
        self.state = LinkState::Disconnected;
    }
}

/// Periodic `KeepAlive` sender for an open link.
///
/// The task talks to the link's command channel directly, so it keeps the
/// provider's idle timer fed even while the session loop is busy.
#[derive(Debug, Default)]
pub struct Heartbeat {
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, every: Duration, link: mpsc::Sender<UpstreamCommand>) {
        self.disarm();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match link.try_send(UpstreamCommand::KeepAlive) {
                    Ok(()) => debug!("Sent keepalive"),
                    // Audio is flowing; the provider is not idle.
                    Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        }));
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKOFF: Duration = Duration::from_secs(1);

    fn connected() -> LinkSupervisor {
        let mut sup = LinkSupervisor::new(BACKOFF);
        assert_eq!(sup.request_open(), LinkAction::Connect { generation: 1 });
        assert!(sup.on_connected(1));
        sup
    }

    #[test]
    fn test_open_happens_once() {
        let mut sup = LinkSupervisor::new(BACKOFF);
        assert_eq!(sup.request_open(), LinkAction::Connect { generation: 1 });
        assert_eq!(sup.request_open(), LinkAction::Ignore);
        assert_eq!(sup.state(), LinkState::Opening);
        assert!(!sup.is_reconnect_attempt());
    }

    #[test]
    fn test_loss_schedules_exactly_one_reconnect() {
        let mut sup = connected();

        assert_eq!(
            sup.on_link_lost(1, true),
            LinkAction::ScheduleReconnect {
                generation: 1,
                after: BACKOFF
            }
        );
        // A second close for the same link while the reconnect is pending.
        assert_eq!(sup.on_link_lost(1, true), LinkAction::Ignore);
        assert_eq!(sup.state(), LinkState::Reconnecting);

        assert_eq!(sup.on_reconnect_due(1), LinkAction::Connect { generation: 2 });
        assert!(sup.is_reconnect_attempt());
        // A late close from the superseded link during the attempt.
        assert_eq!(sup.on_link_lost(1, true), LinkAction::Ignore);
        assert_eq!(sup.on_reconnect_due(1), LinkAction::Ignore);

        assert!(sup.on_connected(2));
        assert_eq!(sup.state(), LinkState::Connected);
    }

    #[test]
    fn test_failed_reconnect_gives_up() {
        let mut sup = connected();
        sup.on_link_lost(1, true);
        sup.on_reconnect_due(1);

        assert_eq!(sup.on_connect_failed(2), LinkAction::GiveUp);
        assert_eq!(sup.state(), LinkState::Disconnected);
        assert_eq!(sup.on_reconnect_due(2), LinkAction::Ignore);

        // The client can start over.
        assert_eq!(sup.request_open(), LinkAction::Connect { generation: 3 });
    }

    #[test]
    fn test_no_reconnect_once_client_is_gone() {
        let mut sup = connected();
        assert_eq!(sup.on_link_lost(1, false), LinkAction::GiveUp);
        assert_eq!(sup.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_shutdown_ignores_everything() {
        let mut sup = connected();
        sup.shutdown();

        assert_eq!(sup.on_link_lost(1, true), LinkAction::Ignore);
        assert_eq!(sup.request_open(), LinkAction::Ignore);
        assert!(!sup.on_connected(1));
    }

    #[test]
    fn test_stale_open_is_rejected() {
        let mut sup = LinkSupervisor::new(BACKOFF);
        sup.request_open();
        assert!(!sup.on_connected(7));
        assert_eq!(sup.on_connect_failed(7), LinkAction::Ignore);
        assert_eq!(sup.state(), LinkState::Opening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_fires_on_interval() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut heartbeat = Heartbeat::new();
        let start = Instant::now();

        heartbeat.arm(Duration::from_secs(8), tx.clone());

        assert_eq!(rx.recv().await, Some(UpstreamCommand::KeepAlive));
        assert!(start.elapsed() >= Duration::from_secs(8));
        assert!(start.elapsed() < Duration::from_secs(9));
        assert_eq!(rx.recv().await, Some(UpstreamCommand::KeepAlive));
        assert!(start.elapsed() >= Duration::from_secs(16));
        assert!(heartbeat.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_heartbeat_stays_silent() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut heartbeat = Heartbeat::new();

        heartbeat.arm(Duration::from_secs(8), tx.clone());
        tokio::time::sleep(Duration::from_secs(5)).await;
        heartbeat.disarm();
        heartbeat.disarm();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(rx.try_recv().is_err());
        assert!(!heartbeat.is_armed());
    }
}
