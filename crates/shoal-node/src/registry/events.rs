use shoal_common::ShoalError;

/// Node lifecycle notifications published by the registry.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A node finished its open sequence.
    Ready { name: String, resumed: bool },
    Error { name: String, error: ShoalError },
    /// A node's websocket closed; a reconnect may follow.
    Close {
        name: String,
        code: u16,
        reason: String,
    },
    /// A node was removed from the registry for good.
    Disconnected { name: String, reason: String },
}

impl RegistryEvent {
    pub fn node_name(&self) -> &str {
        match self {
            RegistryEvent::Ready { name, .. }
            | RegistryEvent::Error { name, .. }
            | RegistryEvent::Close { name, .. }
            | RegistryEvent::Disconnected { name, .. } => name,
        }
    }
}
