//! Data bearer inspection
//!
//! A `BearerInfo` is a throwaway snapshot of one remote bearer object. The
//! capability builds a fresh one for every bearer path each time it
//! recomputes the active bearer and drops it once it has looked at it.

use crate::property::PropertyMap;
use crate::proxy::{ProxyFactory, MM_DBUS_INTERFACE_BEARER};
use serde::Serialize;
use tracing::debug;

/// Bearer property names
pub const BEARER_PROPERTY_CONNECTED: &str = "Connected";
pub const BEARER_PROPERTY_INTERFACE: &str = "Interface";
pub const BEARER_PROPERTY_IP4_CONFIG: &str = "Ip4Config";
pub const BEARER_PROPERTY_IP6_CONFIG: &str = "Ip6Config";

const IP_CONFIG_METHOD: &str = "method";
const IP_CONFIG_ADDRESS: &str = "address";
const IP_CONFIG_GATEWAY: &str = "gateway";
const IP_CONFIG_PREFIX: &str = "prefix";
const IP_CONFIG_DNS: [&str; 3] = ["dns1", "dns2", "dns3"];

/// How the bearer's IP parameters are obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum IpConfigMethod {
    #[default]
    Unknown,
    Ppp,
    Static,
    Dhcp,
}

impl IpConfigMethod {
    fn from_wire(code: u32) -> Self {
        match code {
            1 => Self::Ppp,
            2 => Self::Static,
            3 => Self::Dhcp,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IpAddressFamily {
    V4,
    V6,
}

impl IpAddressFamily {
    pub fn max_prefix(self) -> u32 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }
}

/// Static IP parameters extracted from a bearer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpConfigProperties {
    pub address_family: IpAddressFamily,
    pub address: String,
    pub gateway: String,
    pub subnet_prefix: u32,
    pub dns_servers: Vec<String>,
}

/// Snapshot of one remote bearer
#[derive(Debug, Clone)]
pub struct BearerInfo {
    path: String,
    service: String,
    connected: bool,
    data_interface: String,
    ipv4_method: IpConfigMethod,
    ipv4_properties: Option<IpConfigProperties>,
    ipv6_method: IpConfigMethod,
    ipv6_properties: Option<IpConfigProperties>,
}

impl BearerInfo {
    pub fn new(path: &str, service: &str) -> Self {
        Self {
            path: path.to_string(),
            service: service.to_string(),
            connected: false,
            data_interface: String::new(),
            ipv4_method: IpConfigMethod::Unknown,
            ipv4_properties: None,
            ipv6_method: IpConfigMethod::Unknown,
            ipv6_properties: None,
        }
    }

    /// Fetch and process all bearer properties.
    ///
    /// Returns false when the remote bearer is gone; callers skip it.
    pub async fn initialize(&mut self, factory: &dyn ProxyFactory) -> bool {
        let proxy = match factory.create_properties_proxy(&self.path, &self.service) {
            Ok(proxy) => proxy,
            Err(e) => {
                debug!("Bearer {}: failed to create properties proxy: {}", self.path, e);
                return false;
            }
        };

        self.reset();

        let properties = proxy.get_all(MM_DBUS_INTERFACE_BEARER).await;
        if properties.is_empty() {
            debug!("Bearer {}: no properties, object has vanished", self.path);
            return false;
        }

        self.on_properties_changed(MM_DBUS_INTERFACE_BEARER, &properties, &[]);
        true
    }

    /// Apply a property change from the bearer interface.
    pub fn on_properties_changed(
        &mut self,
        interface: &str,
        changed: &PropertyMap,
        _invalidated: &[String],
    ) {
        if interface != MM_DBUS_INTERFACE_BEARER {
            return;
        }

        if let Some(connected) = changed.get_bool(BEARER_PROPERTY_CONNECTED) {
            self.connected = connected;
        }
        if let Some(name) = changed.get_string(BEARER_PROPERTY_INTERFACE) {
            self.data_interface = name.to_string();
        }
        if let Some(config) = changed.get_map(BEARER_PROPERTY_IP4_CONFIG) {
            let (method, properties) = parse_ip_config(config, IpAddressFamily::V4);
            self.ipv4_method = method;
            self.ipv4_properties = properties;
        }
        if let Some(config) = changed.get_map(BEARER_PROPERTY_IP6_CONFIG) {
            let (method, properties) = parse_ip_config(config, IpAddressFamily::V6);
            self.ipv6_method = method;
            self.ipv6_properties = properties;
        }
    }

    /// Clear everything learned from the remote object.
    pub fn reset(&mut self) {
        self.connected = false;
        self.data_interface.clear();
        self.ipv4_method = IpConfigMethod::Unknown;
        self.ipv4_properties = None;
        self.ipv6_method = IpConfigMethod::Unknown;
        self.ipv6_properties = None;
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn data_interface(&self) -> &str {
        &self.data_interface
    }

    pub fn ipv4_config_method(&self) -> IpConfigMethod {
        self.ipv4_method
    }

    pub fn ipv4_config_properties(&self) -> Option<&IpConfigProperties> {
        self.ipv4_properties.as_ref()
    }

    pub fn ipv6_config_method(&self) -> IpConfigMethod {
        self.ipv6_method
    }

    pub fn ipv6_config_properties(&self) -> Option<&IpConfigProperties> {
        self.ipv6_properties.as_ref()
    }
}

fn parse_ip_config(
    config: &PropertyMap,
    family: IpAddressFamily,
) -> (IpConfigMethod, Option<IpConfigProperties>) {
    let method = config
        .get_uint(IP_CONFIG_METHOD)
        .map(IpConfigMethod::from_wire)
        .unwrap_or_default();

    if method != IpConfigMethod::Static {
        return (method, None);
    }

    // A static config without both address and gateway is unusable.
    let (Some(address), Some(gateway)) = (
        config.get_string(IP_CONFIG_ADDRESS),
        config.get_string(IP_CONFIG_GATEWAY),
    ) else {
        return (IpConfigMethod::Unknown, None);
    };

    let subnet_prefix = config
        .get_uint(IP_CONFIG_PREFIX)
        .unwrap_or_else(|| family.max_prefix());

    let dns_servers = IP_CONFIG_DNS
        .iter()
        .filter_map(|key| config.get_string(key))
        .map(str::to_string)
        .collect();

    (
        IpConfigMethod::Static,
        Some(IpConfigProperties {
            address_family: family,
            address: address.to_string(),
            gateway: gateway.to_string(),
            subnet_prefix,
            dns_servers,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CellularError, CellularResult};
    use crate::property::PropertyValue;
    use crate::proxy::{
        Modem3gppProxy, ModemProxy, ModemSimpleProxy, PropertiesProxy, SimProxy,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn string(s: &str) -> PropertyValue {
        PropertyValue::String(s.to_string())
    }

    fn static_v4() -> PropertyMap {
        PropertyMap::new()
            .with("method", PropertyValue::Uint(2))
            .with("address", string("10.10.0.2"))
            .with("gateway", string("10.10.0.1"))
            .with("dns1", string("8.8.8.8"))
            .with("dns3", string("1.1.1.1"))
    }

    #[test]
    fn test_static_without_prefix_uses_family_maximum() {
        let mut bearer = BearerInfo::new("/bearer/0", "svc");
        let changed = PropertyMap::new()
            .with(BEARER_PROPERTY_IP4_CONFIG, PropertyValue::Map(static_v4()))
            .with(
                BEARER_PROPERTY_IP6_CONFIG,
                PropertyValue::Map(
                    PropertyMap::new()
                        .with("method", PropertyValue::Uint(2))
                        .with("address", string("2001:db8::2"))
                        .with("gateway", string("2001:db8::1")),
                ),
            );
        bearer.on_properties_changed(MM_DBUS_INTERFACE_BEARER, &changed, &[]);

        let v4 = bearer.ipv4_config_properties().unwrap();
        assert_eq!(bearer.ipv4_config_method(), IpConfigMethod::Static);
        assert_eq!(v4.subnet_prefix, 32);
        assert_eq!(v4.dns_servers, vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()]);

        let v6 = bearer.ipv6_config_properties().unwrap();
        assert_eq!(v6.subnet_prefix, 128);
        assert_eq!(v6.address_family, IpAddressFamily::V6);
        assert!(v6.dns_servers.is_empty());
    }

    #[test]
    fn test_static_prefix_is_honored() {
        let mut bearer = BearerInfo::new("/bearer/0", "svc");
        let config = static_v4().with("prefix", PropertyValue::Uint(24));
        let changed = PropertyMap::new().with(BEARER_PROPERTY_IP4_CONFIG, PropertyValue::Map(config));
        bearer.on_properties_changed(MM_DBUS_INTERFACE_BEARER, &changed, &[]);
        assert_eq!(bearer.ipv4_config_properties().unwrap().subnet_prefix, 24);
    }

    #[test]
    fn test_incomplete_static_is_demoted() {
        for missing in ["address", "gateway"] {
            let mut config = static_v4();
            config.remove(missing);
            let mut bearer = BearerInfo::new("/bearer/0", "svc");
            let changed =
                PropertyMap::new().with(BEARER_PROPERTY_IP4_CONFIG, PropertyValue::Map(config));
            bearer.on_properties_changed(MM_DBUS_INTERFACE_BEARER, &changed, &[]);
            assert_eq!(bearer.ipv4_config_method(), IpConfigMethod::Unknown);
            assert!(bearer.ipv4_config_properties().is_none());
        }
    }

    #[test]
    fn test_methods_and_connection_fields() {
        let mut bearer = BearerInfo::new("/bearer/0", "svc");
        let changed = PropertyMap::new()
            .with(BEARER_PROPERTY_CONNECTED, PropertyValue::Bool(true))
            .with(BEARER_PROPERTY_INTERFACE, string("wwan0"))
            .with(
                BEARER_PROPERTY_IP4_CONFIG,
                PropertyValue::Map(PropertyMap::new().with("method", PropertyValue::Uint(3))),
            )
            .with(BEARER_PROPERTY_IP6_CONFIG, PropertyValue::Map(PropertyMap::new()));
        bearer.on_properties_changed(MM_DBUS_INTERFACE_BEARER, &changed, &[]);

        assert!(bearer.connected());
        assert_eq!(bearer.data_interface(), "wwan0");
        assert_eq!(bearer.ipv4_config_method(), IpConfigMethod::Dhcp);
        assert!(bearer.ipv4_config_properties().is_none());
        assert_eq!(bearer.ipv6_config_method(), IpConfigMethod::Unknown);
    }

    #[test]
    fn test_other_interface_ignored() {
        let mut bearer = BearerInfo::new("/bearer/0", "svc");
        let changed = PropertyMap::new().with(BEARER_PROPERTY_CONNECTED, PropertyValue::Bool(true));
        bearer.on_properties_changed("org.freedesktop.ModemManager1.Modem", &changed, &[]);
        assert!(!bearer.connected());
    }

    #[test]
    fn test_reset_clears_stale_fields() {
        let mut bearer = BearerInfo::new("/bearer/0", "svc");
        let changed = PropertyMap::new()
            .with(BEARER_PROPERTY_CONNECTED, PropertyValue::Bool(true))
            .with(BEARER_PROPERTY_INTERFACE, string("wwan0"))
            .with(BEARER_PROPERTY_IP4_CONFIG, PropertyValue::Map(static_v4()));
        bearer.on_properties_changed(MM_DBUS_INTERFACE_BEARER, &changed, &[]);
        bearer.reset();

        assert!(!bearer.connected());
        assert_eq!(bearer.data_interface(), "");
        assert_eq!(bearer.ipv4_config_method(), IpConfigMethod::Unknown);
        assert!(bearer.ipv4_config_properties().is_none());
    }

    struct StaticProperties(PropertyMap);

    #[async_trait]
    impl PropertiesProxy for StaticProperties {
        async fn get_all(&self, _interface: &str) -> PropertyMap {
            self.0.clone()
        }
    }

    /// Factory that only knows about bearer property bags.
    struct BearerFactory {
        bearers: HashMap<String, PropertyMap>,
    }

    impl ProxyFactory for BearerFactory {
        fn create_properties_proxy(
            &self,
            path: &str,
            _service: &str,
        ) -> CellularResult<Arc<dyn PropertiesProxy>> {
            self.bearers
                .get(path)
                .map(|props| Arc::new(StaticProperties(props.clone())) as Arc<dyn PropertiesProxy>)
                .ok_or_else(|| CellularError::NotFound(path.to_string()))
        }

        fn create_modem_proxy(&self, _path: &str, _service: &str) -> Arc<dyn ModemProxy> {
            unimplemented!()
        }

        fn create_modem_3gpp_proxy(&self, _path: &str, _service: &str) -> Arc<dyn Modem3gppProxy> {
            unimplemented!()
        }

        fn create_modem_simple_proxy(
            &self,
            _path: &str,
            _service: &str,
        ) -> Arc<dyn ModemSimpleProxy> {
            unimplemented!()
        }

        fn create_sim_proxy(&self, _path: &str, _service: &str) -> Arc<dyn SimProxy> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_initialize_soft_fails() {
        let mut bearers = HashMap::new();
        bearers.insert("/bearer/empty".to_string(), PropertyMap::new());
        bearers.insert(
            "/bearer/up".to_string(),
            PropertyMap::new().with(BEARER_PROPERTY_CONNECTED, PropertyValue::Bool(true)),
        );
        let factory = BearerFactory { bearers };

        let mut missing = BearerInfo::new("/bearer/missing", "svc");
        assert!(!missing.initialize(&factory).await);

        let mut empty = BearerInfo::new("/bearer/empty", "svc");
        assert!(!empty.initialize(&factory).await);

        let mut up = BearerInfo::new("/bearer/up", "svc");
        assert!(up.initialize(&factory).await);
        assert!(up.connected());
    }
}
