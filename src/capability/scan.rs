//! 3GPP network scan

use std::collections::BTreeMap;
use tracing::debug;

use super::ModemCapability;
use crate::error::CellularResult;
use crate::property::PropertyMap;
use crate::types::{AccessTechnologies, NetworkAvailability};

// Keys of one ModemManager scan result
const SCAN_STATUS: &str = "status";
const SCAN_OPERATOR_LONG: &str = "operator-long";
const SCAN_OPERATOR_SHORT: &str = "operator-short";
const SCAN_OPERATOR_CODE: &str = "operator-code";
const SCAN_ACCESS_TECHNOLOGY: &str = "access-technology";

// Keys of a parsed network entry
pub const NETWORK_STATUS: &str = "status";
pub const NETWORK_TECHNOLOGY: &str = "technology";
pub const NETWORK_LONG_NAME: &str = "long_name";
pub const NETWORK_SHORT_NAME: &str = "short_name";
pub const NETWORK_ID: &str = "network_id";

/// One found network as string properties
pub type ScanResult = BTreeMap<String, String>;

/// Convert a raw scan entry. `lookup_name` resolves a MCCMNC to an operator
/// name when the modem gave no long name.
pub fn parse_scan_result<F>(result: &PropertyMap, lookup_name: F) -> ScanResult
where
    F: Fn(&str) -> Option<String>,
{
    let mut parsed = ScanResult::new();

    if let Some(status) = result.get_uint(SCAN_STATUS) {
        parsed.insert(
            NETWORK_STATUS.to_string(),
            NetworkAvailability::from_wire(status).as_str().to_string(),
        );
    }
    if let Some(technology) = result.get_uint(SCAN_ACCESS_TECHNOLOGY) {
        parsed.insert(
            NETWORK_TECHNOLOGY.to_string(),
            AccessTechnologies(technology).network_technology().to_string(),
        );
    }
    if let Some(name) = result.get_string(SCAN_OPERATOR_LONG) {
        parsed.insert(NETWORK_LONG_NAME.to_string(), name.to_string());
    }
    if let Some(name) = result.get_string(SCAN_OPERATOR_SHORT) {
        parsed.insert(NETWORK_SHORT_NAME.to_string(), name.to_string());
    }
    if let Some(code) = result.get_string(SCAN_OPERATOR_CODE) {
        parsed.insert(NETWORK_ID.to_string(), code.to_string());
    }

    let missing_long_name = parsed
        .get(NETWORK_LONG_NAME)
        .map(|name| name.is_empty())
        .unwrap_or(true);
    if missing_long_name {
        let looked_up = parsed
            .get(NETWORK_ID)
            .and_then(|code| lookup_name(code))
            .filter(|name| !name.is_empty());
        if let Some(name) = looked_up {
            parsed.insert(NETWORK_LONG_NAME.to_string(), name);
        }
    }
    parsed
}

impl ModemCapability {
    /// Scan for available networks.
    pub async fn scan(&self) -> CellularResult<Vec<ScanResult>> {
        let proxies = self.proxies().await?;
        if !self.lock().await.scanning_supported {
            debug!("{}: scan requested on a modem without GSM/UMTS", self.inner.path);
        }

        let results = proxies
            .modem_3gpp
            .scan(self.inner.config.timeouts.scan())
            .await?;

        let delegate = self.inner.delegate();
        let found = results
            .iter()
            .map(|result| {
                parse_scan_result(result, |code| {
                    delegate.as_ref().and_then(|d| d.lookup_operator_name(code))
                })
            })
            .collect::<Vec<_>>();
        debug!("{}: scan found {} networks", self.inner.path, found.len());
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyValue;

    #[test]
    fn test_parse_full_result() {
        let raw = PropertyMap::new()
            .with(SCAN_STATUS, PropertyValue::Uint(2))
            .with(SCAN_ACCESS_TECHNOLOGY, PropertyValue::Uint(AccessTechnologies::LTE))
            .with(SCAN_OPERATOR_LONG, PropertyValue::String("Example Wireless".into()))
            .with(SCAN_OPERATOR_SHORT, PropertyValue::String("ExW".into()))
            .with(SCAN_OPERATOR_CODE, PropertyValue::String("310260".into()));

        let parsed = parse_scan_result(&raw, |_| Some("unused".to_string()));
        assert_eq!(parsed[NETWORK_STATUS], "current");
        assert_eq!(parsed[NETWORK_TECHNOLOGY], "LTE");
        assert_eq!(parsed[NETWORK_LONG_NAME], "Example Wireless");
        assert_eq!(parsed[NETWORK_SHORT_NAME], "ExW");
        assert_eq!(parsed[NETWORK_ID], "310260");
    }

    #[test]
    fn test_long_name_backfilled_from_lookup() {
        let raw = PropertyMap::new()
            .with(SCAN_STATUS, PropertyValue::Uint(1))
            .with(SCAN_OPERATOR_CODE, PropertyValue::String("311480".into()));
        let parsed = parse_scan_result(&raw, |code| {
            (code == "311480").then(|| "Verizon Wireless".to_string())
        });
        assert_eq!(parsed[NETWORK_LONG_NAME], "Verizon Wireless");
        assert_eq!(parsed[NETWORK_STATUS], "available");
    }

    #[test]
    fn test_out_of_range_status_is_unknown() {
        let raw = PropertyMap::new().with(SCAN_STATUS, PropertyValue::Uint(17));
        let parsed = parse_scan_result(&raw, |_| None);
        assert_eq!(parsed[NETWORK_STATUS], "unknown");
        assert!(!parsed.contains_key(NETWORK_LONG_NAME));
    }
}
