//! Home provider metadata
//!
//! The operator database lives outside this crate. Whoever owns the modem
//! looks up the SIM's home carrier and hands the result to the capability.

use serde::{Deserialize, Serialize};

use crate::types::ApnInfo;

/// One carrier online payment portal (OLP)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnlinePortal {
    pub url: String,
    /// HTTP method, usually "POST"
    pub method: String,
    /// Body template with `${...}` placeholders
    pub post_data: String,
}

impl OnlinePortal {
    pub fn new(url: &str, method: &str, post_data: &str) -> Self {
        Self {
            url: url.to_string(),
            method: method.to_string(),
            post_data: post_data.to_string(),
        }
    }
}

/// Values substituted into an OLP body
#[derive(Debug, Clone, Default)]
pub struct PortalIdentifiers<'a> {
    pub iccid: &'a str,
    pub imei: &'a str,
    pub imsi: &'a str,
    pub mdn: &'a str,
    pub min: &'a str,
}

/// Expand the placeholders of an OLP body template.
pub fn fill_post_data(template: &str, ids: &PortalIdentifiers<'_>) -> String {
    template
        .replace("${iccid}", ids.iccid)
        .replace("${imei}", ids.imei)
        .replace("${imsi}", ids.imsi)
        .replace("${mdn}", ids.mdn)
        .replace("${min}", ids.min)
}

/// Home carrier of the inserted SIM
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HomeProvider {
    /// Whether the operator database recognized the SIM
    pub known: bool,
    pub uuid: String,
    pub operator_name: String,
    #[serde(default)]
    pub apn_list: Vec<ApnInfo>,
    #[serde(default)]
    pub olp_list: Vec<OnlinePortal>,
    /// Carrier only offers data while roaming (MVNOs riding another network)
    #[serde(default)]
    pub requires_roaming: bool,
}

impl HomeProvider {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn has_portal(&self) -> bool {
        self.known && !self.olp_list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_post_data() {
        let ids = PortalIdentifiers {
            iccid: "8901",
            imei: "3520",
            imsi: "3104",
            mdn: "0000000000",
            min: "5551234567",
        };
        let body = fill_post_data("iccid=${iccid}&imei=${imei}&imsi=${imsi}&mdn=${mdn}&min=${min}", &ids);
        assert_eq!(body, "iccid=8901&imei=3520&imsi=3104&mdn=0000000000&min=5551234567");
    }

    #[test]
    fn test_unknown_template_tokens_are_left_alone() {
        let body = fill_post_data("x=${esn}", &PortalIdentifiers::default());
        assert_eq!(body, "x=${esn}");
    }

    #[test]
    fn test_portal_requires_known_provider() {
        let mut provider = HomeProvider::unknown();
        provider.olp_list.push(OnlinePortal::new("https://pay.example.com", "POST", ""));
        assert!(!provider.has_portal());
        provider.known = true;
        assert!(provider.has_portal());
    }
}
