use lodestone_protocol_packets::Packet;
use lodestone_types::Identifier;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A registered channel callback. Receives the raw channel payload.
pub type ChannelHandler = Box<dyn FnMut(&[u8]) -> anyhow::Result<()> + Send>;

/// Request/response mapping for custom data channels layered over the
/// packet stream.
///
/// Handlers are kept in registration order per channel identifier. A
/// failing handler is logged and skipped; it never prevents the remaining
/// handlers from running and never propagates to the dispatch loop. A
/// login-phase request that no handler accepts produces a rejection packet
/// echoing the message id, so the server learns the channel is
/// unsupported rather than seeing silence.
pub struct ChannelManager {
    handlers: HashMap<Identifier, Vec<(u64, ChannelHandler)>>,
    next_handler_id: u64,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            next_handler_id: 1,
        }
    }

    /// Register a handler for `channel`. Returns an id for [`unregister`].
    ///
    /// [`unregister`]: Self::unregister
    pub fn register(&mut self, channel: Identifier, handler: ChannelHandler) -> u64 {
        let handler_id = self.next_handler_id;
        self.next_handler_id += 1;
        self.handlers
            .entry(channel)
            .or_default()
            .push((handler_id, handler));
        handler_id
    }

    /// Remove one handler by its registration id.
    pub fn unregister(&mut self, channel: &Identifier, handler_id: u64) -> bool {
        let Some(handlers) = self.handlers.get_mut(channel) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != handler_id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.handlers.remove(channel);
        }
        removed
    }

    /// Drop every registration. Called on disconnect.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    /// Run every handler registered for `channel`, isolating failures.
    /// Returns how many handlers accepted the payload.
    pub fn dispatch(&mut self, channel: &Identifier, data: &[u8]) -> usize {
        let Some(handlers) = self.handlers.get_mut(channel) else {
            return 0;
        };
        let mut handled = 0;
        for (handler_id, handler) in handlers.iter_mut() {
            match handler(data) {
                Ok(()) => handled += 1,
                Err(error) => {
                    warn!("channel {} handler #{} failed: {:#}", channel, handler_id, error);
                }
            }
        }
        handled
    }

    /// Login-phase entry point: dispatch, and when nothing handled the
    /// payload, produce the rejection response for `message_id`.
    pub fn handle(
        &mut self,
        message_id: i32,
        channel: &Identifier,
        data: &[u8],
    ) -> Option<Packet> {
        if self.dispatch(channel, data) > 0 {
            return None;
        }
        debug!("rejecting login channel {} (message {})", channel, message_id);
        Some(Packet::LoginChannelResponse {
            message_id,
            data: None,
        })
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The two channel namespaces a session owns. Login channels live only
/// until play starts; play channels until disconnect.
pub struct SessionChannels {
    pub login: ChannelManager,
    pub play: ChannelManager,
}

impl SessionChannels {
    pub fn new() -> Self {
        Self {
            login: ChannelManager::new(),
            play: ChannelManager::new(),
        }
    }

    pub fn clear_all(&mut self) {
        self.login.clear();
        self.play.clear();
    }
}

impl Default for SessionChannels {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_handler(counter: Arc<AtomicUsize>) -> ChannelHandler {
        Box::new(move |_data| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_unregistered_channel_rejects_with_message_id() {
        let mut manager = ChannelManager::new();
        let reply = manager.handle(42, &Identifier::new("lodestone", "nope"), &[1, 2]);
        assert_eq!(
            reply,
            Some(Packet::LoginChannelResponse {
                message_id: 42,
                data: None,
            })
        );
    }

    #[test]
    fn test_handled_channel_does_not_reject() {
        let mut manager = ChannelManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let channel = Identifier::new("lodestone", "hello");
        manager.register(channel.clone(), counting_handler(hits.clone()));

        assert_eq!(manager.handle(7, &channel, b"payload"), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let mut manager = ChannelManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let channel = Identifier::new("lodestone", "flaky");

        manager.register(
            channel.clone(),
            Box::new(|_| anyhow::bail!("broken handler")),
        );
        manager.register(channel.clone(), counting_handler(hits.clone()));

        assert_eq!(manager.dispatch(&channel, &[]), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_all_handlers_failing_rejects() {
        let mut manager = ChannelManager::new();
        let channel = Identifier::new("lodestone", "broken");
        manager.register(channel.clone(), Box::new(|_| anyhow::bail!("no")));
        manager.register(channel.clone(), Box::new(|_| anyhow::bail!("also no")));

        let reply = manager.handle(9, &channel, &[]);
        assert!(matches!(
            reply,
            Some(Packet::LoginChannelResponse { message_id: 9, data: None })
        ));
    }

    #[test]
    fn test_unregister() {
        let mut manager = ChannelManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let channel = Identifier::new("lodestone", "once");
        let id = manager.register(channel.clone(), counting_handler(hits.clone()));

        assert!(manager.unregister(&channel, id));
        assert!(!manager.unregister(&channel, id));
        assert_eq!(manager.dispatch(&channel, &[]), 0);
    }

    #[test]
    fn test_clear_on_disconnect() {
        let mut channels = SessionChannels::new();
        let channel = Identifier::new("lodestone", "state");
        channels.login.register(channel.clone(), Box::new(|_| Ok(())));
        channels.play.register(channel.clone(), Box::new(|_| Ok(())));

        channels.clear_all();
        assert_eq!(channels.login.dispatch(&channel, &[]), 0);
        assert_eq!(channels.play.dispatch(&channel, &[]), 0);
    }
}
