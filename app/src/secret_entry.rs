use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use zeroize::Zeroizing;

use crate::errors::{EngineError, EngineResult};
use crate::validation::{InputValidator, PIN_LENGTH};

/// A submitted device PIN. Zeroized on drop and redacted from debug output.
pub struct Pin(SecretString);

impl Pin {
    fn new(value: &str) -> Self {
        Self(SecretString::from(value.to_owned()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Pin(<redacted>)")
    }
}

#[cfg(test)]
impl Pin {
    pub(crate) fn for_tests(value: &str) -> Self {
        Self::new(value)
    }
}

/// Why the PIN is being asked for, so the prompt can be labelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecretPurpose {
    Unlock,
    CreateWallet,
}

/// What the presentation layer needs to render an open PIN prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretPrompt {
    pub request_id: u64,
    pub purpose: SecretPurpose,
    pub digits: usize,
}

struct PendingRequest {
    prompt: SecretPrompt,
    resolver: oneshot::Sender<Pin>,
}

/// Owns the single PIN request slot. A request made while another one is
/// active fails with [`EngineError::ConcurrentRequest`]; the active request is untouched.
pub struct SecretEntryCoordinator {
    slot: Mutex<Option<PendingRequest>>,
    next_id: AtomicU64,
    publisher: watch::Sender<Option<SecretPrompt>>,
}

impl SecretEntryCoordinator {
    pub fn new() -> Self {
        let (publisher, _) = watch::channel(None);
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            publisher,
        }
    }

    /// Open a prompt and wait for a valid submission or a cancellation.
    pub async fn request_secret(&self, purpose: SecretPurpose) -> EngineResult<Pin> {
        let (request_id, receiver) = {
            let mut slot = self.slot.lock();
            if let Some(pending) = slot.as_ref() {
                if !pending.resolver.is_closed() {
                    return Err(EngineError::ConcurrentRequest);
                }
                log::debug!(
                    "Discarding abandoned PIN request #{}",
                    pending.prompt.request_id
                );
            }

            let request_id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let prompt = SecretPrompt {
                request_id,
                purpose,
                digits: PIN_LENGTH,
            };
            let (resolver, receiver) = oneshot::channel();
            *slot = Some(PendingRequest {
                prompt: prompt.clone(),
                resolver,
            });
            self.publisher.send_replace(Some(prompt));
            (request_id, receiver)
        };
        log::debug!("PIN request #{} opened for {:?}", request_id, purpose);

        let _release = SlotRelease {
            coordinator: self,
            request_id,
        };
        receiver.await.map_err(|_| EngineError::SecretEntryCancelled)
    }

    /// Hand a raw submission to the waiting request. Invalid input leaves the prompt open.
    pub fn submit(&self, raw: impl Into<String>) -> EngineResult<()> {
        let raw = Zeroizing::new(raw.into());
        let validator = InputValidator::shared()?;

        let pending = {
            let mut slot = self.slot.lock();
            if slot.is_none() {
                return Err(EngineError::NoPendingRequest);
            }
            validator.validate_pin(&raw)?;
            let Some(pending) = slot.take() else {
                return Err(EngineError::NoPendingRequest);
            };
            self.publisher.send_replace(None);
            pending
        };

        let request_id = pending.prompt.request_id;
        if pending.resolver.send(Pin::new(&raw)).is_err() {
            log::debug!("PIN request #{} was abandoned before submission", request_id);
            return Err(EngineError::NoPendingRequest);
        }
        log::debug!("PIN request #{} resolved", request_id);
        Ok(())
    }

    /// Abort the active request; its caller receives `SecretEntryCancelled`.
    pub fn cancel(&self) -> bool {
        let pending = {
            let mut slot = self.slot.lock();
            let pending = slot.take();
            if pending.is_some() {
                self.publisher.send_replace(None);
            }
            pending
        };

        match pending {
            Some(pending) => {
                log::debug!("PIN request #{} cancelled", pending.prompt.request_id);
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn prompt(&self) -> Option<SecretPrompt> {
        self.slot
            .lock()
            .as_ref()
            .map(|pending| pending.prompt.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SecretPrompt>> {
        self.publisher.subscribe()
    }

    /// Resolve once a prompt is open (immediately if one already is).
    pub async fn wait_for_prompt(&self) -> EngineResult<SecretPrompt> {
        let mut receiver = self.publisher.subscribe();
        let prompt = receiver
            .wait_for(|prompt| prompt.is_some())
            .await
            .map_err(|_| EngineError::NoPendingRequest)?;
        prompt.clone().ok_or(EngineError::NoPendingRequest)
    }

    fn release(&self, request_id: u64) {
        let mut slot = self.slot.lock();
        let owned = slot
            .as_ref()
            .map(|pending| pending.prompt.request_id == request_id)
            .unwrap_or(false);
        if owned {
            slot.take();
            self.publisher.send_replace(None);
            log::debug!("PIN request #{} dropped by its caller", request_id);
        }
    }
}

impl Default for SecretEntryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SecretEntryCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SecretEntryCoordinator")
            .field("prompt", &self.prompt())
            .finish()
    }
}

/// Frees the slot if the waiting future goes away without a resolution.
struct SlotRelease<'a> {
    coordinator: &'a SecretEntryCoordinator,
    request_id: u64,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        self.coordinator.release(self.request_id);
    }
}
