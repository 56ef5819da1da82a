use std::sync::Arc;

use dashmap::DashMap;
use log::info;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Stream ids are client-chosen, so each user gets their own namespace.
type StreamKey = (Uuid, String);

struct Registration {
    key: Uuid,
    token: CancellationToken,
}

/// Client-chosen stream ids mapped to the cancellation handle of the reply
/// they name, so a separate request can stop a running stream.
#[derive(Clone, Default)]
pub struct SseState {
    cancel_tokens: Arc<DashMap<StreamKey, Registration>>,
}

impl SseState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` under `owner`'s `id`. The entry is removed when the
    /// returned guard drops, unless a newer registration replaced it.
    pub fn register_stream(&self, id: String, owner: Uuid, token: CancellationToken) -> StreamRegistration {
        let key = Uuid::new_v4();
        self.cancel_tokens
            .insert((owner, id.clone()), Registration { key, token });
        StreamRegistration {
            state: self.clone(),
            stream: (owner, id),
            key,
        }
    }

    /// Cancels `owner`'s stream `id` if it is still running. Returns whether
    /// anything was cancelled.
    pub fn cancel_stream(&self, id: &str, owner: Uuid) -> bool {
        match self.cancel_tokens.remove(&(owner, id.to_owned())) {
            Some((_, reg)) => {
                info!("Cancelling stream: {id} for user: {owner}");
                reg.token.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn is_registered(&self, id: &str, owner: Uuid) -> bool {
        self.cancel_tokens.contains_key(&(owner, id.to_owned()))
    }
}

/// Keeps a stream id registered for as long as the reply is being served.
pub struct StreamRegistration {
    state: SseState,
    stream: StreamKey,
    key: Uuid,
}

impl Drop for StreamRegistration {
    fn drop(&mut self) {
        let key = self.key;
        self.state
            .cancel_tokens
            .remove_if(&self.stream, |_, reg| reg.key == key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_owner_can_cancel() {
        let state = SseState::new();
        let (owner, stranger) = (Uuid::new_v4(), Uuid::new_v4());
        let token = CancellationToken::new();
        let _reg = state.register_stream("s1".into(), owner, token.clone());

        assert!(!state.cancel_stream("s1", stranger));
        assert!(!token.is_cancelled());
        assert!(state.cancel_stream("s1", owner));
        assert!(token.is_cancelled());
        assert!(!state.cancel_stream("s1", owner));
    }

    #[test]
    fn same_id_from_another_user_does_not_displace_the_first() {
        let state = SseState::new();
        let (alice, mallory) = (Uuid::new_v4(), Uuid::new_v4());
        let alice_token = CancellationToken::new();
        let mallory_token = CancellationToken::new();
        let _a = state.register_stream("chat-1".into(), alice, alice_token.clone());
        let m = state.register_stream("chat-1".into(), mallory, mallory_token.clone());

        assert!(state.cancel_stream("chat-1", alice));
        assert!(alice_token.is_cancelled());
        assert!(!mallory_token.is_cancelled());

        drop(m);
        assert!(!state.is_registered("chat-1", mallory));
        assert!(!state.cancel_stream("chat-1", mallory));
    }

    #[test]
    fn dropping_the_guard_unregisters() {
        let state = SseState::new();
        let owner = Uuid::new_v4();
        let first = state.register_stream("s".into(), owner, CancellationToken::new());
        let second = state.register_stream("s".into(), owner, CancellationToken::new());

        // a stale guard leaves the newer registration alone
        drop(first);
        assert!(state.is_registered("s", owner));
        drop(second);
        assert!(!state.is_registered("s", owner));
    }
}
