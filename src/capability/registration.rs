//! Registration changes and the connected-drop debounce
//!
//! While connected, ModemManager sometimes reports a short loss of
//! registration that recovers within seconds. Such drops are held back for
//! `registration_drop_delay` and discarded if registration comes back first.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Inner, ModemCapability, State};
use crate::types::{ModemState, RegistrationState};

/// A registration drop waiting to be applied
#[derive(Debug)]
pub struct PendingRegistrationChange {
    pub registration_state: RegistrationState,
    pub operator_code: String,
    pub operator_name: String,
    generation: u64,
    handle: JoinHandle<()>,
}

impl PendingRegistrationChange {
    fn cancel(self) {
        self.handle.abort();
    }
}

impl ModemCapability {
    /// Drop any pending deferred change. Returns whether one existed.
    pub(super) fn cancel_pending_registration(&self, state: &mut State) -> bool {
        match state.pending_registration.take() {
            Some(pending) => {
                pending.cancel();
                true
            }
            None => false,
        }
    }

    pub(super) fn on_3gpp_registration_changed(
        &self,
        state: &mut State,
        registration_state: RegistrationState,
        operator_code: String,
        operator_name: String,
    ) {
        debug!(
            "{}: regstate={:?}, opercode={}, opername={}",
            self.inner.path, registration_state, operator_code, operator_name
        );

        let dropping = state.modem_state == ModemState::Connected
            && state.registration_state.is_registered()
            && !registration_state.is_registered();

        if !dropping {
            if self.cancel_pending_registration(state) {
                debug!("{}: cancelled a deferred registration state update", self.inner.path);
                state.delayed_drop_canceled += 1;
            }
            self.inner.handle_3gpp_registration_change(
                state,
                registration_state,
                &operator_code,
                &operator_name,
            );
            return;
        }

        if self.cancel_pending_registration(state) {
            warn!(
                "{}: modem reported consecutive 3GPP registration drops, ignoring earlier notifications",
                self.inner.path
            );
        } else {
            state.delayed_drop_posted += 1;
        }

        state.registration_generation += 1;
        let generation = state.registration_generation;
        let delay = self.inner.config.registration_drop_delay();
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut guard = inner.state.lock().await;
            let state = &mut *guard;
            let current = state
                .pending_registration
                .as_ref()
                .map(|p| p.generation == generation)
                .unwrap_or(false);
            if !current {
                return;
            }
            if let Some(pending) = state.pending_registration.take() {
                inner.handle_3gpp_registration_change(
                    state,
                    pending.registration_state,
                    &pending.operator_code,
                    &pending.operator_name,
                );
            }
        });

        debug!("{}: posted deferred registration state update", self.inner.path);
        state.pending_registration = Some(PendingRegistrationChange {
            registration_state,
            operator_code,
            operator_name,
            generation,
            handle,
        });
    }
}

impl Inner {
    pub(super) fn handle_3gpp_registration_change(
        &self,
        state: &mut State,
        registration_state: RegistrationState,
        operator_code: &str,
        operator_name: &str,
    ) {
        state.registration_state = registration_state;
        state.serving_operator_code = operator_code.to_string();
        state.serving_operator_name = operator_name.to_string();

        if let Some(delegate) = self.delegate() {
            delegate.on_registration_changed(registration_state, operator_code, operator_name);
            if delegate.has_service() {
                delegate.set_roaming_state(Inner::roaming_state_string(state));
            }
        }

        // Registering with a pending ICCID may complete activation.
        self.update_pending_activation_state(state);
    }

    /// Modem state fell below Registered. A mirrored Home or Roaming is
    /// stale at that point; any other registration state is kept.
    pub(super) fn set_unregistered(&self, state: &mut State, searching: bool) {
        if !state.registration_state.is_registered() {
            return;
        }
        let registration_state = if searching {
            RegistrationState::Searching
        } else {
            RegistrationState::Idle
        };
        debug!(
            "{}: modem left registered state, registration now {:?}",
            self.path, registration_state
        );
        let operator_code = state.serving_operator_code.clone();
        let operator_name = state.serving_operator_name.clone();
        self.handle_3gpp_registration_change(state, registration_state, &operator_code, &operator_name);
    }
}
