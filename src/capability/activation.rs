//! Post-payment activation
//!
//! After the user pays on the carrier portal the SIM's ICCID is stored as
//! Pending and the modem is reset. Once the reset has completed the record
//! advances to Activated; once the network confirms the subscription the
//! record is dropped altogether.

use tracing::{debug, error};

use super::{Inner, ModemCapability, State};
use crate::activation_store::{ActivationRecordState, IdentifierType};
use crate::provider::{fill_post_data, OnlinePortal, PortalIdentifiers};
use crate::quirks::mdn_for_portal;
use crate::types::{ActivationState, RegistrationState, SubscriptionState};

/// Digits of `mdn`, everything else dropped
pub(super) fn normalize_mdn(mdn: &str) -> String {
    mdn.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// An MDN is valid once it holds a non-zero digit.
fn is_mdn_valid(mdn: &str) -> bool {
    mdn.chars().any(|c| c != '0')
}

impl Inner {
    pub(super) fn on_sim_identifier_changed(&self, state: &mut State, sim_identifier: &str) {
        state.sim_identifier = sim_identifier.to_string();
        self.update_pending_activation_state(state);
    }

    pub(super) fn on_mdn_changed(&self, state: &mut State, mdn: &str) {
        state.mdn = normalize_mdn(mdn);
        self.update_pending_activation_state(state);
    }

    pub(super) fn on_subscription_state_changed(&self, state: &mut State, code: u32) {
        let Some(subscription) = SubscriptionState::from_wire(code) else {
            error!("{}: unrecognized 3GPP subscription state {}", self.path, code);
            return;
        };
        if subscription == state.subscription_state {
            return;
        }
        debug!("{}: subscription state {:?}", self.path, subscription);
        state.subscription_state = subscription;

        self.update_service_activation_state(state);
        self.update_pending_activation_state(state);
    }

    /// Advance or clear the stored activation record from the mirrored
    /// state. Safe to call any number of times.
    pub(super) fn update_pending_activation_state(&self, state: &mut State) {
        let registered = state.registration_state == RegistrationState::Home;

        // Subscription state is authoritative; without it fall back on the MDN.
        let activated = state.subscription_state.is_activated()
            || (state.subscription_state == SubscriptionState::Unknown
                && is_mdn_valid(&state.mdn));

        if activated && !state.sim_identifier.is_empty() {
            self.store()
                .remove(IdentifierType::Iccid, &state.sim_identifier);
        }

        let Some(service) = self.service_delegate() else {
            return;
        };
        if service.activation_state() == ActivationState::Activated {
            return;
        }
        // Nothing can be decided until the ICCID is known.
        if state.sim_identifier.is_empty() {
            return;
        }

        let record = self
            .store()
            .get(IdentifierType::Iccid, &state.sim_identifier);
        match record {
            ActivationRecordState::Pending => {
                // The ICCID may only just have become available.
                service.set_activation_state(ActivationState::Activating);
                if state.reset_done {
                    debug!("{}: post-payment activation reset complete", self.path);
                    self.store().set(
                        IdentifierType::Iccid,
                        &state.sim_identifier,
                        ActivationRecordState::Activated,
                    );
                }
            }
            ActivationRecordState::Activated => {
                if registered {
                    debug!(
                        "{}: modem has been reset at least once, auto-connecting to refresh the MDN",
                        self.path
                    );
                    service.auto_connect();
                }
            }
            ActivationRecordState::FailureRetry | ActivationRecordState::Unknown => {}
        }
    }

    pub(super) fn is_service_activation_required(&self, state: &State) -> bool {
        if state.subscription_state.is_activated() {
            return false;
        }

        // While activating, trust the local record over network hints.
        if !state.sim_identifier.is_empty()
            && self
                .store()
                .get(IdentifierType::Iccid, &state.sim_identifier)
                != ActivationRecordState::Unknown
        {
            return false;
        }

        if state.subscription_state == SubscriptionState::Unprovisioned {
            return true;
        }

        // Without a payment portal there is no way to activate anyway.
        if !state.home_provider.has_portal() {
            return false;
        }

        !is_mdn_valid(&state.mdn)
    }

    pub(super) fn update_service_activation_state(&self, state: &State) {
        let Some(service) = self.service_delegate() else {
            return;
        };

        let record = self
            .store()
            .get(IdentifierType::Iccid, &state.sim_identifier);
        let activation_state = if matches!(
            state.subscription_state,
            SubscriptionState::Unknown | SubscriptionState::Unprovisioned
        ) && !state.sim_identifier.is_empty()
            && record == ActivationRecordState::Pending
        {
            ActivationState::Activating
        } else if self.is_service_activation_required(state) {
            ActivationState::NotActivated
        } else {
            // Only flip auto-connect on the transition; user profile data may
            // have set it since.
            if service.activation_state() != ActivationState::Activated {
                service.set_auto_connect(true);
            }
            ActivationState::Activated
        };
        service.set_activation_state(activation_state);
    }

    pub(super) fn mdn_for_olp(&self, state: &State) -> String {
        if !state.home_provider.known {
            return state.mdn.clone();
        }
        mdn_for_portal(&state.home_provider.uuid, &state.mdn, state.subscription_state)
    }

    pub(super) fn update_service_olp(&self, state: &State) {
        if !state.home_provider.has_portal() {
            return;
        }
        let Some(service) = self.service_delegate() else {
            return;
        };

        let olp_list = &state.home_provider.olp_list;
        if olp_list.len() > 1 {
            debug!("{}: found multiple online portals, choosing the first", self.path);
        }
        let portal = &olp_list[0];
        let mdn = self.mdn_for_olp(state);
        let ids = PortalIdentifiers {
            iccid: &state.sim_identifier,
            imei: &state.imei,
            imsi: &state.imsi,
            mdn: &mdn,
            min: &state.min,
        };
        service.set_olp(&OnlinePortal {
            url: portal.url.clone(),
            method: portal.method.clone(),
            post_data: fill_post_data(&portal.post_data, &ids),
        });
    }
}

impl ModemCapability {
    /// Record that payment went through and reset the modem so it picks up
    /// the new subscription.
    pub async fn complete_activation(&self) {
        {
            let mut guard = self.lock().await;
            let state = &mut *guard;
            if state.sim_identifier.is_empty() {
                debug!("{}: SIM identifier not available, nothing to do", self.inner.path);
                return;
            }
            let mut store = self.inner.store();
            // A record never moves back from Activated to Pending.
            if store.get(IdentifierType::Iccid, &state.sim_identifier)
                != ActivationRecordState::Activated
            {
                store.set(
                    IdentifierType::Iccid,
                    &state.sim_identifier,
                    ActivationRecordState::Pending,
                );
            }
            drop(store);
            self.inner.update_pending_activation_state(state);
        }

        debug!("{}: resetting modem for activation", self.inner.path);
        match self.reset().await {
            Ok(()) => {
                let mut guard = self.lock().await;
                let state = &mut *guard;
                state.reset_done = true;
                self.inner.update_pending_activation_state(state);
            }
            Err(e) => {
                debug!("{}: failed to reset after activation, try again later: {}", self.inner.path, e);
            }
        }
    }

    pub async fn is_service_activation_required(&self) -> bool {
        let state = self.lock().await;
        self.inner.is_service_activation_required(&state)
    }

    pub async fn update_service_activation_state(&self) {
        let state = self.lock().await;
        self.inner.update_service_activation_state(&state);
    }

    pub async fn update_pending_activation_state(&self) {
        let mut state = self.lock().await;
        self.inner.update_pending_activation_state(&mut state);
    }

    /// MDN as the home carrier's payment portal expects it
    pub async fn mdn_for_olp(&self) -> String {
        let state = self.lock().await;
        self.inner.mdn_for_olp(&state)
    }

    pub async fn update_service_olp(&self) {
        let state = self.lock().await;
        self.inner.update_service_olp(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mdn() {
        assert_eq!(normalize_mdn("+1 (555) 123-4567"), "15551234567");
        assert_eq!(normalize_mdn(""), "");
    }

    #[test]
    fn test_mdn_validity() {
        assert!(!is_mdn_valid(""));
        assert!(!is_mdn_valid("0000000000"));
        assert!(is_mdn_valid("0000000001"));
    }
}
