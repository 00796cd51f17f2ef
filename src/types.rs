//! Cellular types and wire-code conversions
//!
//! ModemManager reports states as plain integers. Every conversion here is a
//! checked boundary: unrecognized codes map to an explicit `Unknown` variant.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::property::{PropertyMap, PropertyValue};

/// Roaming state strings exposed to the service layer
pub const ROAMING_STATE_HOME: &str = "home";
pub const ROAMING_STATE_ROAMING: &str = "roaming";
pub const ROAMING_STATE_UNKNOWN: &str = "unknown";

/// Network technology strings
pub const NETWORK_TECHNOLOGY_LTE: &str = "LTE";
pub const NETWORK_TECHNOLOGY_EVDO: &str = "EVDO";
pub const NETWORK_TECHNOLOGY_1XRTT: &str = "1xRTT";
pub const NETWORK_TECHNOLOGY_HSPA_PLUS: &str = "HSPA+";
pub const NETWORK_TECHNOLOGY_HSPA: &str = "HSPA";
pub const NETWORK_TECHNOLOGY_UMTS: &str = "UMTS";
pub const NETWORK_TECHNOLOGY_EDGE: &str = "EDGE";
pub const NETWORK_TECHNOLOGY_GPRS: &str = "GPRS";
pub const NETWORK_TECHNOLOGY_GSM: &str = "GSM";

/// Technology family strings
pub const TECHNOLOGY_FAMILY_GSM: &str = "GSM";
pub const TECHNOLOGY_FAMILY_CDMA: &str = "CDMA";

/// SIM lock status property keys
pub const SIM_LOCK_ENABLED_PROPERTY: &str = "LockEnabled";
pub const SIM_LOCK_TYPE_PROPERTY: &str = "LockType";
pub const SIM_LOCK_RETRIES_LEFT_PROPERTY: &str = "RetriesLeft";

/// Retries reported when the modem gives no count at all
pub const UNKNOWN_RETRIES_LEFT: u32 = 999;

/// 3GPP facility lock bit for the SIM
pub const FACILITY_SIM: u32 = 1 << 0;

/// Current-capabilities bit for GSM/UMTS
pub const CAPABILITY_GSM_UMTS: u32 = 1 << 2;

/// Modem top-level state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModemState {
    Failed,
    #[default]
    Unknown,
    Initializing,
    Locked,
    Disabled,
    Disabling,
    Enabling,
    Enabled,
    Searching,
    Registered,
    Disconnecting,
    Connecting,
    Connected,
}

impl ModemState {
    pub fn from_wire(code: i32) -> Self {
        match code {
            -1 => Self::Failed,
            1 => Self::Initializing,
            2 => Self::Locked,
            3 => Self::Disabled,
            4 => Self::Disabling,
            5 => Self::Enabling,
            6 => Self::Enabled,
            7 => Self::Searching,
            8 => Self::Registered,
            9 => Self::Disconnecting,
            10 => Self::Connecting,
            11 => Self::Connected,
            _ => Self::Unknown,
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(
            self,
            Self::Enabled
                | Self::Searching
                | Self::Registered
                | Self::Disconnecting
                | Self::Connecting
                | Self::Connected
        )
    }

    /// Registered or further along (connecting, connected, disconnecting).
    pub fn is_registered(self) -> bool {
        matches!(
            self,
            Self::Registered | Self::Disconnecting | Self::Connecting | Self::Connected
        )
    }
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
            Self::Initializing => "Initializing",
            Self::Locked => "Locked",
            Self::Disabled => "Disabled",
            Self::Disabling => "Disabling",
            Self::Enabling => "Enabling",
            Self::Enabled => "Enabled",
            Self::Searching => "Searching",
            Self::Registered => "Registered",
            Self::Disconnecting => "Disconnecting",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
        };
        f.write_str(s)
    }
}

/// 3GPP registration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegistrationState {
    Idle,
    Home,
    Searching,
    Denied,
    #[default]
    Unknown,
    Roaming,
}

impl RegistrationState {
    pub fn from_wire(code: u32) -> Self {
        match code {
            0 => Self::Idle,
            1 => Self::Home,
            2 => Self::Searching,
            3 => Self::Denied,
            5 => Self::Roaming,
            _ => Self::Unknown,
        }
    }

    pub fn is_registered(self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

/// 3GPP subscription state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscriptionState {
    #[default]
    Unknown,
    Unprovisioned,
    Provisioned,
    OutOfData,
}

impl SubscriptionState {
    /// Returns `None` for codes ModemManager does not define.
    pub fn from_wire(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Unprovisioned),
            2 => Some(Self::Provisioned),
            3 => Some(Self::OutOfData),
            _ => None,
        }
    }

    pub fn is_activated(self) -> bool {
        matches!(self, Self::Provisioned | Self::OutOfData)
    }
}

/// Access technology bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccessTechnologies(pub u32);

impl AccessTechnologies {
    pub const UNKNOWN: u32 = 0;
    pub const POTS: u32 = 1 << 0;
    pub const GSM: u32 = 1 << 1;
    pub const GSM_COMPACT: u32 = 1 << 2;
    pub const GPRS: u32 = 1 << 3;
    pub const EDGE: u32 = 1 << 4;
    pub const UMTS: u32 = 1 << 5;
    pub const HSDPA: u32 = 1 << 6;
    pub const HSUPA: u32 = 1 << 7;
    pub const HSPA: u32 = 1 << 8;
    pub const HSPA_PLUS: u32 = 1 << 9;
    pub const ONE_X_RTT: u32 = 1 << 10;
    pub const EVDO0: u32 = 1 << 11;
    pub const EVDOA: u32 = 1 << 12;
    pub const EVDOB: u32 = 1 << 13;
    pub const LTE: u32 = 1 << 14;

    const GSM_FAMILY: u32 = Self::LTE
        | Self::HSPA_PLUS
        | Self::HSPA
        | Self::HSUPA
        | Self::HSDPA
        | Self::UMTS
        | Self::EDGE
        | Self::GPRS
        | Self::GSM_COMPACT
        | Self::GSM;
    const CDMA_FAMILY: u32 = Self::EVDO0 | Self::EVDOA | Self::EVDOB | Self::ONE_X_RTT;

    fn has(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    /// Highest-speed technology present, or "" when none is known.
    pub fn network_technology(self) -> &'static str {
        if self.has(Self::LTE) {
            NETWORK_TECHNOLOGY_LTE
        } else if self.has(Self::EVDO0 | Self::EVDOA | Self::EVDOB) {
            NETWORK_TECHNOLOGY_EVDO
        } else if self.has(Self::ONE_X_RTT) {
            NETWORK_TECHNOLOGY_1XRTT
        } else if self.has(Self::HSPA_PLUS) {
            NETWORK_TECHNOLOGY_HSPA_PLUS
        } else if self.has(Self::HSPA | Self::HSUPA | Self::HSDPA) {
            NETWORK_TECHNOLOGY_HSPA
        } else if self.has(Self::UMTS) {
            NETWORK_TECHNOLOGY_UMTS
        } else if self.has(Self::EDGE) {
            NETWORK_TECHNOLOGY_EDGE
        } else if self.has(Self::GPRS) {
            NETWORK_TECHNOLOGY_GPRS
        } else if self.has(Self::GSM_COMPACT | Self::GSM) {
            NETWORK_TECHNOLOGY_GSM
        } else {
            ""
        }
    }

    pub fn technology_family(self) -> &'static str {
        if self.has(Self::GSM_FAMILY) {
            TECHNOLOGY_FAMILY_GSM
        } else if self.has(Self::CDMA_FAMILY) {
            TECHNOLOGY_FAMILY_CDMA
        } else {
            ""
        }
    }
}

/// SIM / device lock type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockType {
    #[default]
    Unknown,
    None,
    SimPin,
    SimPin2,
    SimPuk,
    SimPuk2,
    /// Network / service-provider personalization locks (PH-*)
    Personalization(u32),
}

impl LockType {
    pub fn from_wire(code: u32) -> Self {
        match code {
            1 => Self::None,
            2 => Self::SimPin,
            3 => Self::SimPin2,
            4 => Self::SimPuk,
            5 => Self::SimPuk2,
            6..=16 => Self::Personalization(code),
            _ => Self::Unknown,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::None => 1,
            Self::SimPin => 2,
            Self::SimPin2 => 3,
            Self::SimPuk => 4,
            Self::SimPuk2 => 5,
            Self::Personalization(code) => code,
        }
    }

    /// A lock that currently blocks SIM access
    pub fn is_locked(self) -> bool {
        !matches!(self, Self::None | Self::Unknown)
    }

    fn property_name(self) -> &'static str {
        match self {
            Self::SimPin => "sim-pin",
            Self::SimPuk => "sim-puk",
            _ => "",
        }
    }
}

/// SIM lock status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimLockStatus {
    pub lock_type: LockType,
    pub enabled: bool,
    pub retries_left: u32,
}

impl Default for SimLockStatus {
    fn default() -> Self {
        Self {
            lock_type: LockType::Unknown,
            enabled: false,
            retries_left: 0,
        }
    }
}

impl SimLockStatus {
    /// Structured form for the derived `SIMLockStatus` property.
    pub fn to_property(&self) -> PropertyMap {
        let mut status = PropertyMap::new();
        status.set(SIM_LOCK_ENABLED_PROPERTY, PropertyValue::Bool(self.enabled));
        status.set(
            SIM_LOCK_TYPE_PROPERTY,
            PropertyValue::String(self.lock_type.property_name().to_string()),
        );
        status.set(SIM_LOCK_RETRIES_LEFT_PROPERTY, PropertyValue::Uint(self.retries_left));
        status
    }
}

/// Modem power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Off,
    Low,
    On,
}

impl PowerState {
    pub fn to_wire(self) -> u32 {
        match self {
            Self::Off => 1,
            Self::Low => 2,
            Self::On => 3,
        }
    }
}

/// Activation state shown on the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationState {
    NotActivated,
    Activating,
    Activated,
    PartiallyActivated,
    #[default]
    Unknown,
}

impl ActivationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotActivated => "not-activated",
            Self::Activating => "activating",
            Self::Activated => "activated",
            Self::PartiallyActivated => "partially-activated",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One APN entry to try when connecting
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApnInfo {
    pub apn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ApnInfo {
    pub fn new(apn: &str) -> Self {
        Self {
            apn: apn.to_string(),
            username: None,
            password: None,
        }
    }
}

/// Network availability reported in scan results (3GPP TS 27.007 7.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkAvailability {
    Unknown,
    Available,
    Current,
    Forbidden,
}

impl NetworkAvailability {
    pub fn from_wire(code: u32) -> Self {
        match code {
            1 => Self::Available,
            2 => Self::Current,
            3 => Self::Forbidden,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Available => "available",
            Self::Current => "current",
            Self::Forbidden => "forbidden",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modem_state_checked_conversion() {
        assert_eq!(ModemState::from_wire(11), ModemState::Connected);
        assert_eq!(ModemState::from_wire(3), ModemState::Disabled);
        assert_eq!(ModemState::from_wire(-1), ModemState::Failed);
        assert_eq!(ModemState::from_wire(42), ModemState::Unknown);
        assert_eq!(ModemState::from_wire(-7), ModemState::Unknown);
    }

    #[test]
    fn test_registration_collapse() {
        assert!(RegistrationState::from_wire(1).is_registered());
        assert!(RegistrationState::from_wire(5).is_registered());
        assert!(!RegistrationState::from_wire(2).is_registered());
        assert!(!RegistrationState::from_wire(3).is_registered());
        assert_eq!(RegistrationState::from_wire(99), RegistrationState::Unknown);
    }

    #[test]
    fn test_subscription_state_rejects_out_of_range() {
        assert_eq!(SubscriptionState::from_wire(2), Some(SubscriptionState::Provisioned));
        assert_eq!(SubscriptionState::from_wire(7), None);
    }

    #[test]
    fn test_access_technology_strings() {
        let lte_and_umts = AccessTechnologies(AccessTechnologies::LTE | AccessTechnologies::UMTS);
        assert_eq!(lte_and_umts.network_technology(), NETWORK_TECHNOLOGY_LTE);
        assert_eq!(lte_and_umts.technology_family(), TECHNOLOGY_FAMILY_GSM);

        let evdo = AccessTechnologies(AccessTechnologies::EVDOA);
        assert_eq!(evdo.network_technology(), NETWORK_TECHNOLOGY_EVDO);
        assert_eq!(evdo.technology_family(), TECHNOLOGY_FAMILY_CDMA);

        let hsdpa = AccessTechnologies(AccessTechnologies::HSDPA);
        assert_eq!(hsdpa.network_technology(), NETWORK_TECHNOLOGY_HSPA);

        assert_eq!(AccessTechnologies::default().network_technology(), "");
        assert_eq!(AccessTechnologies::default().technology_family(), "");
    }

    #[test]
    fn test_sim_lock_status_property() {
        let status = SimLockStatus {
            lock_type: LockType::SimPuk,
            enabled: true,
            retries_left: 10,
        };
        let prop = status.to_property();
        assert_eq!(prop.get_bool(SIM_LOCK_ENABLED_PROPERTY), Some(true));
        assert_eq!(prop.get_string(SIM_LOCK_TYPE_PROPERTY), Some("sim-puk"));
        assert_eq!(prop.get_uint(SIM_LOCK_RETRIES_LEFT_PROPERTY), Some(10));

        let pin2 = SimLockStatus {
            lock_type: LockType::SimPin2,
            ..status
        };
        assert_eq!(pin2.to_property().get_string(SIM_LOCK_TYPE_PROPERTY), Some(""));
    }

    #[test]
    fn test_lock_type_round_trip_codes() {
        assert_eq!(LockType::from_wire(2), LockType::SimPin);
        assert_eq!(LockType::from_wire(9), LockType::Personalization(9));
        assert_eq!(LockType::from_wire(9).to_wire(), 9);
        assert_eq!(LockType::from_wire(100), LockType::Unknown);
        assert!(!LockType::None.is_locked());
        assert!(LockType::SimPin.is_locked());
    }
}
