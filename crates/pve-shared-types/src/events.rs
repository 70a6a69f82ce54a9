use serde::{Deserialize, Serialize};

use crate::addr::AddrMessage;
use crate::link::LinkMessage;

/// Asynchronous notification received from the kernel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    NewLink(LinkMessage),
    DelLink(LinkMessage),
    NewAddr(AddrMessage),
    DelAddr(AddrMessage),
}

/// Message type of a [`KernelEvent`], used to filter watchdogs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    NewLink,
    DelLink,
    NewAddr,
    DelAddr,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::NewLink => "RTM_NEWLINK",
            MessageKind::DelLink => "RTM_DELLINK",
            MessageKind::NewAddr => "RTM_NEWADDR",
            MessageKind::DelAddr => "RTM_DELADDR",
        };
        f.write_str(name)
    }
}

impl KernelEvent {
    pub fn kind(&self) -> MessageKind {
        match self {
            KernelEvent::NewLink(_) => MessageKind::NewLink,
            KernelEvent::DelLink(_) => MessageKind::DelLink,
            KernelEvent::NewAddr(_) => MessageKind::NewAddr,
            KernelEvent::DelAddr(_) => MessageKind::DelAddr,
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            KernelEvent::NewLink(msg) | KernelEvent::DelLink(msg) => msg.index,
            KernelEvent::NewAddr(msg) | KernelEvent::DelAddr(msg) => msg.index,
        }
    }

    /// Interface name, only present in link messages
    pub fn ifname(&self) -> Option<&str> {
        match self {
            KernelEvent::NewLink(msg) | KernelEvent::DelLink(msg) => msg.ifname(),
            _ => None,
        }
    }
}
