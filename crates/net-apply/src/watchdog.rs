//! One-shot waiters for expected kernel notifications

use std::time::Duration;

use tokio::sync::{watch, Mutex};

use pve_network_core::{KernelEvent, MessageKind};

/// Describes the notification a [`Watchdog`] waits for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogFilter {
    kind: Option<MessageKind>,
    ifname: Option<String>,
    index: Option<u32>,
}

impl WatchdogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: MessageKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn ifname(mut self, ifname: impl Into<String>) -> Self {
        self.ifname = Some(ifname.into());
        self
    }

    pub fn index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    pub fn matches(&self, event: &KernelEvent) -> bool {
        if let Some(kind) = self.kind {
            if event.kind() != kind {
                return false;
            }
        }
        if let Some(index) = self.index {
            if event.index() != index {
                return false;
            }
        }
        match &self.ifname {
            Some(ifname) => event.ifname() == Some(ifname.as_str()),
            None => true,
        }
    }
}

/// Handle returned by [`crate::Ipdb::watchdog`]
#[derive(Debug)]
pub struct Watchdog {
    receiver: watch::Receiver<bool>,
}

impl Watchdog {
    pub fn is_set(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for the notification; false on timeout
    pub async fn wait(mut self, timeout: Duration) -> bool {
        let fired = tokio::time::timeout(timeout, self.receiver.wait_for(|fired| *fired)).await;
        matches!(fired, Ok(Ok(_)))
    }
}

/// Registered watchdogs, fed by the notification reader
#[derive(Debug, Default)]
pub(crate) struct WatchdogSet {
    entries: Mutex<Vec<(WatchdogFilter, watch::Sender<bool>)>>,
}

impl WatchdogSet {
    pub(crate) async fn register(&self, filter: WatchdogFilter) -> Watchdog {
        let (sender, receiver) = watch::channel(false);
        self.entries.lock().await.push((filter, sender));
        Watchdog { receiver }
    }

    /// Fire and forget every watchdog matching `event`. Watchdogs whose
    /// handle was dropped are forgotten as well.
    pub(crate) async fn feed(&self, event: &KernelEvent) {
        let mut entries = self.entries.lock().await;
        entries.retain(|(filter, sender)| {
            if sender.is_closed() {
                return false;
            }
            if filter.matches(event) {
                sender.send_replace(true);
                return false;
            }
            true
        });
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pve_network_core::LinkMessage;

    #[tokio::test]
    async fn test_watchdog_fires_once() {
        let set = WatchdogSet::default();
        let watchdog = set
            .register(WatchdogFilter::new().kind(MessageKind::NewLink).ifname("veth0"))
            .await;

        set.feed(&KernelEvent::NewLink(LinkMessage::new(3, "veth1"))).await;
        set.feed(&KernelEvent::DelLink(LinkMessage::new(4, "veth0"))).await;
        assert!(!watchdog.is_set());

        set.feed(&KernelEvent::NewLink(LinkMessage::new(4, "veth0"))).await;
        assert!(watchdog.wait(Duration::from_millis(10)).await);
        assert_eq!(set.len().await, 0);
    }

    #[tokio::test]
    async fn test_dropped_watchdog_is_forgotten() {
        let set = WatchdogSet::default();
        let watchdog = set.register(WatchdogFilter::new().index(9)).await;
        drop(watchdog);
        set.feed(&KernelEvent::NewLink(LinkMessage::new(3, "eth0"))).await;
        assert_eq!(set.len().await, 0);
    }

    #[tokio::test]
    async fn test_timeout() {
        let set = WatchdogSet::default();
        let watchdog = set.register(WatchdogFilter::new().kind(MessageKind::DelLink)).await;
        assert!(!watchdog.wait(Duration::from_millis(10)).await);
    }
}
