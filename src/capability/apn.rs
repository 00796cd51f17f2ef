//! APN selection and the connect retry decision

use std::collections::VecDeque;
use tracing::debug;

use super::{Inner, State};
use crate::error::{CellularError, CellularResult};
use crate::property::{PropertyMap, PropertyValue};
use crate::types::ApnInfo;

// Simple.Connect property keys
pub const CONNECT_NUMBER: &str = "number";
pub const CONNECT_ALLOW_ROAMING: &str = "allow-roaming";
pub const CONNECT_APN: &str = "apn";
pub const CONNECT_USER: &str = "user";
pub const CONNECT_PASSWORD: &str = "password";

const PHONE_NUMBER: &str = "*99#";

/// Ordered APNs to try for one connection attempt.
///
/// The head is always the APN currently being tried.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApnTryList {
    entries: VecDeque<ApnInfo>,
}

impl ApnTryList {
    /// Last good APN, then the user's APN, then the provider's list.
    /// Duplicates are kept.
    pub fn build(
        last_good: Option<ApnInfo>,
        user_specified: Option<ApnInfo>,
        provider_apns: &[ApnInfo],
    ) -> Self {
        let mut entries = VecDeque::new();
        entries.extend(last_good);
        entries.extend(user_specified);
        entries.extend(provider_apns.iter().cloned());
        Self { entries }
    }

    pub fn front(&self) -> Option<&ApnInfo> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<ApnInfo> {
        self.entries.pop_front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApnInfo> {
        self.entries.iter()
    }
}

/// Simple.Connect properties for `apn` (none means "let the modem pick").
pub fn connect_properties(apn: Option<&ApnInfo>, allow_roaming: bool) -> PropertyMap {
    let mut properties = PropertyMap::new()
        .with(CONNECT_NUMBER, PropertyValue::String(PHONE_NUMBER.to_string()))
        .with(CONNECT_ALLOW_ROAMING, PropertyValue::Bool(allow_roaming));

    if let Some(apn) = apn {
        debug!("Using APN {}", apn.apn);
        properties.set(CONNECT_APN, PropertyValue::String(apn.apn.clone()));
        if let Some(username) = &apn.username {
            properties.set(CONNECT_USER, PropertyValue::String(username.clone()));
        }
        if let Some(password) = &apn.password {
            properties.set(CONNECT_PASSWORD, PropertyValue::String(password.clone()));
        }
    }
    properties
}

impl Inner {
    fn allow_roaming(&self, state: &State) -> bool {
        state.home_provider.requires_roaming || self.config.allow_roaming
    }

    pub(super) fn fill_connect_properties(&self, state: &State) -> PropertyMap {
        connect_properties(state.apn_try_list.front(), self.allow_roaming(state))
    }

    fn is_retriable_connect_error(&self, state: &State, error: &CellularError) -> bool {
        match error {
            CellularError::InvalidApn(_) => true,
            CellularError::OperationFailed(_) => {
                state.family.quirks().operation_failed_means_invalid_apn
            }
            _ => false,
        }
    }

    /// Digest one Connect reply. Returns the properties for the next
    /// attempt when another APN should be tried.
    pub(super) fn on_connect_reply(
        &self,
        state: &mut State,
        result: &CellularResult<String>,
    ) -> Option<PropertyMap> {
        let Some(service) = self.service_delegate() else {
            // The service went away while Connect was outstanding.
            state.apn_try_list.clear();
            return None;
        };

        match result {
            Err(error) => {
                service.clear_last_good_apn();
                if self.is_retriable_connect_error(state, error) && !state.apn_try_list.is_empty() {
                    state.apn_try_list.pop_front();
                    if !state.apn_try_list.is_empty() {
                        debug!(
                            "{}: Connect failed with invalid APN, {} remaining APNs to try",
                            self.path,
                            state.apn_try_list.len()
                        );
                        return Some(self.fill_connect_properties(state));
                    }
                    debug!("{}: Connect failed, no APNs left to try", self.path);
                }
                None
            }
            Ok(bearer) => {
                if let Some(apn) = state.apn_try_list.front() {
                    service.set_last_good_apn(apn);
                }
                state.apn_try_list.clear();
                debug!("{}: connected bearer {}", self.path, bearer);
                None
            }
        }
    }
}
