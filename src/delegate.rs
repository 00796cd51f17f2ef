//! Owner callbacks
//!
//! The capability does not own its device or service. It reaches them
//! through this trait, held as a weak reference, so a vanished owner simply
//! stops receiving updates.

use crate::provider::OnlinePortal;
use crate::types::{ActivationState, ApnInfo, ModemState, RegistrationState, SimLockStatus};

/// Device/service side of a modem capability
///
/// Methods are called synchronously with the capability state locked, so
/// implementations must not call back into the capability.
pub trait CellularDelegate: Send + Sync {
    // Device notifications

    fn on_modem_state_changed(&self, _old_state: ModemState, _new_state: ModemState) {}

    fn on_registration_changed(
        &self,
        _state: RegistrationState,
        _operator_code: &str,
        _operator_name: &str,
    ) {
    }

    fn on_signal_quality_changed(&self, _quality: u32) {}

    fn on_sim_lock_status_changed(&self, _status: &SimLockStatus) {}

    fn on_technology_family_changed(&self, _family: &str) {}

    /// SIM identity changed; the owner may look up a new home provider.
    fn on_sim_properties_changed(&self, _imsi: &str, _spn: &str, _sim_identifier: &str) {}

    // Service queries and mutations

    /// Whether a service object currently exists for this modem
    fn has_service(&self) -> bool;

    fn activation_state(&self) -> ActivationState;

    fn set_activation_state(&self, state: ActivationState);

    fn set_auto_connect(&self, auto_connect: bool);

    /// Ask the service to connect now if it is allowed to.
    fn auto_connect(&self);

    fn last_good_apn(&self) -> Option<ApnInfo>;

    fn set_last_good_apn(&self, apn: &ApnInfo);

    fn clear_last_good_apn(&self);

    fn user_specified_apn(&self) -> Option<ApnInfo>;

    fn set_network_technology(&self, _technology: &str) {}

    fn set_roaming_state(&self, _roaming_state: &str) {}

    fn set_olp(&self, _portal: &OnlinePortal) {}

    /// Operator name for a MCCMNC code, from the operator database
    fn lookup_operator_name(&self, _mccmnc: &str) -> Option<String> {
        None
    }
}
