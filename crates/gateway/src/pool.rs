//! Object pools for hot allocations.
//!
//! Request/response structs and body buffers churn on every call, so the
//! driver leases them from process-wide pools instead of allocating fresh.
//! A [`Lease`] hands the value back on drop after scrubbing it through
//! [`Reclaim::reclaim`]: primitive fields to their zero values, options to
//! `None`, slices truncated to zero length while keeping capacity up to the
//! per-slot cap. A slice that grew beyond its cap is dropped rather than
//! re-pooled, which keeps a single pathological request from pinning memory.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, OnceLock};

use crate::messages::canonical::{ChatRequest, ChatResponse, ProviderId};

/// Max pooled objects per pool. Excess releases are dropped.
const POOL_SLOTS: usize = 64;

/// Capacity caps applied on release.
pub const CONTENT_BLOCKS_CAP: usize = 64;
pub const TOOLS_CAP: usize = 64;
pub const MESSAGES_CAP: usize = 64;
pub const STOP_SEQUENCES_CAP: usize = 64;
pub const BUFFER_CAP: usize = 32 * 1024;

/// Scrub a pooled value back to its zero state.
///
/// Returns `false` when the value must not be re-pooled (e.g. a buffer that
/// grew past its cap).
pub trait Reclaim {
    fn reclaim(&mut self) -> bool;
}

/// A fixed-capacity pool of reusable values.
pub struct Pool<T> {
    slots: Mutex<Vec<T>>,
}

impl<T: Reclaim + Default> Pool<T> {
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Take a value from the pool, or a fresh default when empty.
    pub fn acquire(&self) -> Lease<'_, T> {
        let value = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop()
            .unwrap_or_default();

        Lease {
            value: Some(value),
            pool: self,
        }
    }

    fn release(&self, mut value: T) {
        if !value.reclaim() {
            return;
        }

        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slots.len() < POOL_SLOTS {
            slots.push(value);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

impl<T: Reclaim + Default> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owning handle to a pooled value. Returns the value on drop.
pub struct Lease<'a, T: Reclaim + Default> {
    value: Option<T>,
    pool: &'a Pool<T>,
}

impl<T: Reclaim + Default> Lease<'_, T> {
    /// Detach the value from the pool; it will not be returned.
    pub fn into_inner(mut self) -> T {
        self.value.take().unwrap_or_default()
    }
}

impl<T: Reclaim + Default> Deref for Lease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value.as_ref().expect("lease value taken")
    }
}

impl<T: Reclaim + Default> DerefMut for Lease<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("lease value taken")
    }
}

impl<T: Reclaim + Default> Drop for Lease<'_, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value);
        }
    }
}

/// Reusable body buffer.
#[derive(Default)]
pub struct BodyBuffer(pub Vec<u8>);

impl Reclaim for BodyBuffer {
    fn reclaim(&mut self) -> bool {
        if self.0.capacity() > BUFFER_CAP {
            return false;
        }
        self.0.clear();
        true
    }
}

impl Deref for BodyBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.0
    }
}

impl DerefMut for BodyBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.0
    }
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self::new(ProviderId::OpenAi, String::new())
    }
}

impl Reclaim for ChatRequest {
    fn reclaim(&mut self) -> bool {
        if self.messages.capacity() > MESSAGES_CAP {
            return false;
        }

        self.provider = ProviderId::OpenAi;
        self.model.clear();
        self.messages.clear();
        self.params = None;
        self.fallbacks = None;
        self.raw_body = None;
        true
    }
}

impl Default for ChatResponse {
    fn default() -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            provider: ProviderId::OpenAi,
            choices: Vec::new(),
            usage: None,
            created: 0,
            extras: Default::default(),
        }
    }
}

impl Reclaim for ChatResponse {
    fn reclaim(&mut self) -> bool {
        if self.choices.capacity() > CONTENT_BLOCKS_CAP {
            return false;
        }

        self.id.clear();
        self.model.clear();
        self.provider = ProviderId::OpenAi;
        self.choices.clear();
        self.usage = None;
        self.created = 0;
        self.extras = Default::default();
        true
    }
}

/// Process-wide pool of request-body buffers.
pub fn body_buffers() -> &'static Pool<BodyBuffer> {
    static POOL: OnceLock<Pool<BodyBuffer>> = OnceLock::new();
    POOL.get_or_init(Pool::new)
}

/// Process-wide pool of canonical chat requests.
pub fn chat_requests() -> &'static Pool<ChatRequest> {
    static POOL: OnceLock<Pool<ChatRequest>> = OnceLock::new();
    POOL.get_or_init(Pool::new)
}

/// Process-wide pool of canonical chat responses.
pub fn chat_responses() -> &'static Pool<ChatResponse> {
    static POOL: OnceLock<Pool<ChatResponse>> = OnceLock::new();
    POOL.get_or_init(Pool::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::canonical::{ChatMessage, ChatRole};

    #[test]
    fn released_request_is_scrubbed() {
        let pool: Pool<ChatRequest> = Pool::new();

        {
            let mut lease = pool.acquire();
            lease.provider = ProviderId::Anthropic;
            lease.model.push_str("claude-3-5-haiku-latest");
            lease.messages.push(ChatMessage::text(ChatRole::User, "hello"));
        }

        let lease = pool.acquire();
        assert_eq!(lease.provider, ProviderId::OpenAi);
        assert!(lease.model.is_empty());
        assert!(lease.messages.is_empty());
        assert!(lease.params.is_none());
    }

    #[test]
    fn scrubbed_slices_keep_capacity_under_cap() {
        let pool: Pool<BodyBuffer> = Pool::new();

        {
            let mut lease = pool.acquire();
            lease.extend_from_slice(&[1u8; 1024]);
        }

        let lease = pool.acquire();
        assert!(lease.is_empty());
        assert!(lease.capacity() >= 1024);
    }

    #[test]
    fn oversized_buffers_are_dropped_not_repooled() {
        let pool: Pool<BodyBuffer> = Pool::new();

        {
            let mut lease = pool.acquire();
            lease.reserve(BUFFER_CAP + 1);
        }

        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn pool_slot_count_is_capped() {
        let pool: Pool<BodyBuffer> = Pool::new();

        let leases: Vec<_> = (0..POOL_SLOTS + 10).map(|_| pool.acquire()).collect();
        drop(leases);

        assert_eq!(pool.len(), POOL_SLOTS);
    }

    #[test]
    fn into_inner_detaches_from_pool() {
        let pool: Pool<BodyBuffer> = Pool::new();

        let lease = pool.acquire();
        let buffer = lease.into_inner();
        drop(buffer);

        assert_eq!(pool.len(), 0);
    }
}
