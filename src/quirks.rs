//! Firmware and carrier quirks
//!
//! A few modem families and one carrier need special handling. They are
//! looked up here once, by normalized identifier, so the capability only ever
//! asks "does this family need X" at the decision point.

use crate::types::SubscriptionState;

/// ModemManager plugin names with known quirks
const PLUGIN_ALTAIR_LTE: &str = "Altair LTE";
const PLUGIN_NOVATEL_LTE: &str = "Novatel LTE";

/// Provider uuid of Verizon Wireless in the mobile provider database
pub const VZW_PROVIDER_UUID: &str = "c83d6597-dc91-4d48-a3a7-d86b80123751";

/// Length of a Verizon MDN as expected by its payment portal
const VZW_MDN_LENGTH: usize = 10;

/// Modem family, keyed by the ModemManager plugin name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModemFamily {
    AltairLte,
    NovatelLte,
    #[default]
    Generic,
}

/// Behaviour differences of one family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FamilyQuirks {
    /// Reported access technology is meaningless; always show LTE
    pub forces_lte_technology: bool,
    /// Delete the active bearer before disabling the modem
    pub delete_bearer_before_disable: bool,
    /// Generic "operation failed" on connect stands in for "invalid APN"
    pub operation_failed_means_invalid_apn: bool,
}

const GENERIC_QUIRKS: FamilyQuirks = FamilyQuirks {
    forces_lte_technology: false,
    delete_bearer_before_disable: false,
    operation_failed_means_invalid_apn: false,
};

const QUIRK_TABLE: &[(ModemFamily, FamilyQuirks)] = &[
    (
        ModemFamily::AltairLte,
        FamilyQuirks {
            forces_lte_technology: false,
            delete_bearer_before_disable: true,
            operation_failed_means_invalid_apn: false,
        },
    ),
    (
        ModemFamily::NovatelLte,
        FamilyQuirks {
            forces_lte_technology: true,
            delete_bearer_before_disable: false,
            operation_failed_means_invalid_apn: true,
        },
    ),
];

impl ModemFamily {
    pub fn from_plugin(plugin: &str) -> Self {
        match plugin.trim() {
            PLUGIN_ALTAIR_LTE => Self::AltairLte,
            PLUGIN_NOVATEL_LTE => Self::NovatelLte,
            _ => Self::Generic,
        }
    }

    pub fn quirks(self) -> FamilyQuirks {
        QUIRK_TABLE
            .iter()
            .find(|(family, _)| *family == self)
            .map(|(_, quirks)| *quirks)
            .unwrap_or(GENERIC_QUIRKS)
    }
}

/// MDN as the carrier's payment portal expects it.
///
/// Only Verizon rewrites the number; every other provider gets it unchanged.
pub fn mdn_for_portal(provider_uuid: &str, mdn: &str, subscription: SubscriptionState) -> String {
    if provider_uuid != VZW_PROVIDER_UUID {
        return mdn.to_string();
    }

    if subscription == SubscriptionState::Unprovisioned || mdn.is_empty() {
        return "0".repeat(VZW_MDN_LENGTH);
    }
    let len = mdn.chars().count();
    mdn.chars().skip(len.saturating_sub(VZW_MDN_LENGTH)).collect()
}
