//! ModemManager over D-Bus
//!
//! Implements the proxy traits on a zbus `Connection` with plain method
//! calls, and turns ModemManager's `PropertiesChanged` and ObjectManager
//! signals into streams the daemon routes to its capabilities.

pub mod values;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use zbus::message::Type as MessageType;
use zbus::{Connection, MatchRule, MessageStream};
use zvariant::{ObjectPath, OwnedObjectPath, OwnedValue};

use crate::error::{CellularError, CellularResult};
use crate::property::PropertyMap;
use crate::proxy::{
    with_timeout, Modem3gppProxy, ModemProxy, ModemSimpleProxy, PropertiesProxy, ProxyFactory,
    SimProxy, MM_DBUS_INTERFACE_MODEM, MM_DBUS_INTERFACE_MODEM_3GPP,
    MM_DBUS_INTERFACE_MODEM_SIMPLE, MM_DBUS_INTERFACE_SIM, MM_DBUS_PATH, MM_DBUS_SERVICE,
};
use crate::types::PowerState;

const DBUS_INTERFACE_PROPERTIES: &str = "org.freedesktop.DBus.Properties";
const DBUS_INTERFACE_OBJECT_MANAGER: &str = "org.freedesktop.DBus.ObjectManager";

/// Timeout for calls the capability does not configure
const GET_ALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Managed objects as returned by GetManagedObjects
type ManagedObjects = HashMap<OwnedObjectPath, HashMap<String, HashMap<String, OwnedValue>>>;

fn object_path(path: &str) -> CellularResult<ObjectPath<'_>> {
    ObjectPath::try_from(path)
        .map_err(|e| CellularError::InvalidArguments(format!("Invalid object path {}: {}", path, e)))
}

/// One remote object on the modem service
#[derive(Clone)]
struct RemoteObject {
    connection: Connection,
    service: String,
    path: String,
}

impl RemoteObject {
    fn new(connection: &Connection, path: &str, service: &str) -> Self {
        Self {
            connection: connection.clone(),
            service: service.to_string(),
            path: path.to_string(),
        }
    }

    /// Call a D-Bus method
    async fn call_method<B, R>(
        &self,
        interface: &str,
        method: &str,
        body: &B,
        timeout: Duration,
    ) -> CellularResult<R>
    where
        B: serde::ser::Serialize + zvariant::DynamicType,
        R: serde::de::DeserializeOwned + zvariant::Type,
    {
        let call = async {
            let reply = self
                .connection
                .call_method(
                    Some(self.service.as_str()),
                    self.path.as_str(),
                    Some(interface),
                    method,
                    body,
                )
                .await?;
            let value = reply.body().deserialize::<R>()?;
            Ok::<R, CellularError>(value)
        };
        with_timeout(method, timeout, call).await
    }
}

struct MmProperties(RemoteObject);

#[async_trait]
impl PropertiesProxy for MmProperties {
    async fn get_all(&self, interface: &str) -> PropertyMap {
        let result: CellularResult<HashMap<String, OwnedValue>> = self
            .0
            .call_method(DBUS_INTERFACE_PROPERTIES, "GetAll", &(interface,), GET_ALL_TIMEOUT)
            .await;
        match result {
            Ok(values) => values::property_map(&values),
            Err(e) => {
                debug!("{}: GetAll({}) failed: {}", self.0.path, interface, e);
                PropertyMap::new()
            }
        }
    }
}

struct MmModem(RemoteObject);

#[async_trait]
impl ModemProxy for MmModem {
    async fn enable(&self, enable: bool, timeout: Duration) -> CellularResult<()> {
        self.0
            .call_method(MM_DBUS_INTERFACE_MODEM, "Enable", &(enable,), timeout)
            .await
    }

    async fn delete_bearer(&self, bearer: &str, timeout: Duration) -> CellularResult<()> {
        let bearer = object_path(bearer)?;
        self.0
            .call_method(MM_DBUS_INTERFACE_MODEM, "DeleteBearer", &(bearer,), timeout)
            .await
    }

    async fn reset(&self, timeout: Duration) -> CellularResult<()> {
        self.0
            .call_method(MM_DBUS_INTERFACE_MODEM, "Reset", &(), timeout)
            .await
    }

    async fn set_power_state(&self, state: PowerState, timeout: Duration) -> CellularResult<()> {
        self.0
            .call_method(
                MM_DBUS_INTERFACE_MODEM,
                "SetPowerState",
                &(state.to_wire(),),
                timeout,
            )
            .await
    }
}

struct MmModem3gpp(RemoteObject);

#[async_trait]
impl Modem3gppProxy for MmModem3gpp {
    async fn register(&self, operator_id: &str, timeout: Duration) -> CellularResult<()> {
        self.0
            .call_method(MM_DBUS_INTERFACE_MODEM_3GPP, "Register", &(operator_id,), timeout)
            .await
    }

    async fn scan(&self, timeout: Duration) -> CellularResult<Vec<PropertyMap>> {
        let results: Vec<HashMap<String, OwnedValue>> = self
            .0
            .call_method(MM_DBUS_INTERFACE_MODEM_3GPP, "Scan", &(), timeout)
            .await?;
        Ok(results.iter().map(values::property_map).collect())
    }
}

struct MmModemSimple(RemoteObject);

#[async_trait]
impl ModemSimpleProxy for MmModemSimple {
    async fn connect(&self, properties: &PropertyMap, timeout: Duration) -> CellularResult<String> {
        let bearer: OwnedObjectPath = self
            .0
            .call_method(
                MM_DBUS_INTERFACE_MODEM_SIMPLE,
                "Connect",
                &(values::to_dict(properties),),
                timeout,
            )
            .await?;
        Ok(bearer.to_string())
    }

    async fn disconnect(&self, bearer: &str, timeout: Duration) -> CellularResult<()> {
        let bearer = object_path(bearer)?;
        self.0
            .call_method(MM_DBUS_INTERFACE_MODEM_SIMPLE, "Disconnect", &(bearer,), timeout)
            .await
    }
}

struct MmSim(RemoteObject);

#[async_trait]
impl SimProxy for MmSim {
    async fn enable_pin(&self, pin: &str, enabled: bool, timeout: Duration) -> CellularResult<()> {
        self.0
            .call_method(MM_DBUS_INTERFACE_SIM, "EnablePin", &(pin, enabled), timeout)
            .await
    }

    async fn send_pin(&self, pin: &str, timeout: Duration) -> CellularResult<()> {
        self.0
            .call_method(MM_DBUS_INTERFACE_SIM, "SendPin", &(pin,), timeout)
            .await
    }

    async fn send_puk(&self, puk: &str, pin: &str, timeout: Duration) -> CellularResult<()> {
        self.0
            .call_method(MM_DBUS_INTERFACE_SIM, "SendPuk", &(puk, pin), timeout)
            .await
    }

    async fn change_pin(&self, old_pin: &str, new_pin: &str, timeout: Duration) -> CellularResult<()> {
        self.0
            .call_method(MM_DBUS_INTERFACE_SIM, "ChangePin", &(old_pin, new_pin), timeout)
            .await
    }
}

/// Proxy factory backed by one bus connection
#[derive(Clone)]
pub struct MmProxyFactory {
    connection: Connection,
}

impl MmProxyFactory {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Connect to the system bus.
    pub async fn system() -> CellularResult<Self> {
        let connection = Connection::system()
            .await
            .map_err(|e| CellularError::Ipc(format!("Failed to connect to D-Bus: {}", e)))?;
        Ok(Self::new(connection))
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn remote(&self, path: &str, service: &str) -> RemoteObject {
        RemoteObject::new(&self.connection, path, service)
    }
}

impl ProxyFactory for MmProxyFactory {
    fn create_properties_proxy(
        &self,
        path: &str,
        service: &str,
    ) -> CellularResult<Arc<dyn PropertiesProxy>> {
        object_path(path)?;
        Ok(Arc::new(MmProperties(self.remote(path, service))))
    }

    fn create_modem_proxy(&self, path: &str, service: &str) -> Arc<dyn ModemProxy> {
        Arc::new(MmModem(self.remote(path, service)))
    }

    fn create_modem_3gpp_proxy(&self, path: &str, service: &str) -> Arc<dyn Modem3gppProxy> {
        Arc::new(MmModem3gpp(self.remote(path, service)))
    }

    fn create_modem_simple_proxy(&self, path: &str, service: &str) -> Arc<dyn ModemSimpleProxy> {
        Arc::new(MmModemSimple(self.remote(path, service)))
    }

    fn create_sim_proxy(&self, path: &str, service: &str) -> Arc<dyn SimProxy> {
        Arc::new(MmSim(self.remote(path, service)))
    }
}

/// Object paths of every modem ModemManager currently exports.
pub async fn discover_modems(connection: &Connection) -> CellularResult<Vec<String>> {
    let manager = RemoteObject::new(connection, MM_DBUS_PATH, MM_DBUS_SERVICE);
    let objects: ManagedObjects = manager
        .call_method(DBUS_INTERFACE_OBJECT_MANAGER, "GetManagedObjects", &(), GET_ALL_TIMEOUT)
        .await?;

    let mut modems: Vec<String> = objects
        .into_iter()
        .filter(|(_, interfaces)| interfaces.contains_key(MM_DBUS_INTERFACE_MODEM))
        .map(|(path, _)| path.to_string())
        .collect();
    modems.sort();
    debug!("Found {} modems", modems.len());
    Ok(modems)
}

/// A `PropertiesChanged` signal from the modem service
#[derive(Debug, Clone)]
pub struct PropertiesChanged {
    pub path: String,
    pub interface: String,
    pub changed: PropertyMap,
    pub invalidated: Vec<String>,
}

/// Stream of property changes on every ModemManager object.
pub async fn properties_changed(
    connection: &Connection,
) -> CellularResult<BoxStream<'static, PropertiesChanged>> {
    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender(MM_DBUS_SERVICE)?
        .interface(DBUS_INTERFACE_PROPERTIES)?
        .member("PropertiesChanged")?
        .path_namespace(MM_DBUS_PATH)?
        .build();

    let stream = MessageStream::for_match_rule(rule, connection, None).await?;
    let changes = stream.filter_map(|message| async move {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed signal: {}", e);
                return None;
            }
        };
        let path = message.header().path()?.to_string();
        let body: (String, HashMap<String, OwnedValue>, Vec<String>) =
            match message.body().deserialize() {
                Ok(body) => body,
                Err(e) => {
                    warn!("{}: undecodable PropertiesChanged: {}", path, e);
                    return None;
                }
            };
        let (interface, changed, invalidated) = body;
        Some(PropertiesChanged {
            path,
            interface,
            changed: values::property_map(&changed),
            invalidated,
        })
    });
    Ok(changes.boxed())
}

/// A modem object appearing on or vanishing from the modem service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfacesChanged {
    ModemAdded(String),
    ModemRemoved(String),
}

/// Classifies an ObjectManager signal. Only objects gaining or losing the
/// modem interface count; SIMs and bearers come and go with their modem.
fn modem_change<'a>(
    member: &str,
    path: &str,
    mut interfaces: impl Iterator<Item = &'a str>,
) -> Option<InterfacesChanged> {
    if !interfaces.any(|interface| interface == MM_DBUS_INTERFACE_MODEM) {
        return None;
    }
    match member {
        "InterfacesAdded" => Some(InterfacesChanged::ModemAdded(path.to_string())),
        "InterfacesRemoved" => Some(InterfacesChanged::ModemRemoved(path.to_string())),
        _ => None,
    }
}

/// Stream of modems added to or removed from ModemManager.
pub async fn interfaces_changed(
    connection: &Connection,
) -> CellularResult<BoxStream<'static, InterfacesChanged>> {
    let rule = MatchRule::builder()
        .msg_type(MessageType::Signal)
        .sender(MM_DBUS_SERVICE)?
        .interface(DBUS_INTERFACE_OBJECT_MANAGER)?
        .path(MM_DBUS_PATH)?
        .build();

    let stream = MessageStream::for_match_rule(rule, connection, None).await?;
    let changes = stream.filter_map(|message| async move {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed signal: {}", e);
                return None;
            }
        };
        let header = message.header();
        let member = header.member()?.to_string();
        let body = message.body();
        match member.as_str() {
            "InterfacesAdded" => {
                let (path, interfaces): (
                    OwnedObjectPath,
                    HashMap<String, HashMap<String, OwnedValue>>,
                ) = match body.deserialize() {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Undecodable InterfacesAdded: {}", e);
                        return None;
                    }
                };
                modem_change(&member, path.as_str(), interfaces.keys().map(String::as_str))
            }
            "InterfacesRemoved" => {
                let (path, interfaces): (OwnedObjectPath, Vec<String>) = match body.deserialize() {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Undecodable InterfacesRemoved: {}", e);
                        return None;
                    }
                };
                modem_change(&member, path.as_str(), interfaces.iter().map(String::as_str))
            }
            _ => None,
        }
    });
    Ok(changes.boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::MM_DBUS_INTERFACE_BEARER;

    const MODEM: &str = "/org/freedesktop/ModemManager1/Modem/0";

    #[test]
    fn test_modem_added_and_removed() {
        let interfaces = [DBUS_INTERFACE_PROPERTIES, MM_DBUS_INTERFACE_MODEM];
        assert_eq!(
            modem_change("InterfacesAdded", MODEM, interfaces.iter().copied()),
            Some(InterfacesChanged::ModemAdded(MODEM.to_string()))
        );
        assert_eq!(
            modem_change("InterfacesRemoved", MODEM, interfaces.iter().copied()),
            Some(InterfacesChanged::ModemRemoved(MODEM.to_string()))
        );
    }

    #[test]
    fn test_non_modem_objects_are_ignored() {
        let bearer = "/org/freedesktop/ModemManager1/Bearer/3";
        assert_eq!(
            modem_change("InterfacesAdded", bearer, [MM_DBUS_INTERFACE_BEARER].into_iter()),
            None
        );
        assert_eq!(
            modem_change("InterfacesRemoved", MODEM, [MM_DBUS_INTERFACE_MODEM_3GPP].into_iter()),
            None
        );
    }
}
