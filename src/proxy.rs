//! Remote interface abstractions
//!
//! The capability never talks to the bus directly. It drives these traits,
//! which the D-Bus adapter (`mm_dbus`) implements for ModemManager and the
//! test suite implements with scripted fakes.
//!
//! Every call carries an explicit timeout. An expired timeout is reported as
//! `CellularError::Timeout` through the same result path as any other
//! failure.

use crate::error::{CellularError, CellularResult};
use crate::property::PropertyMap;
use crate::types::PowerState;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// ModemManager D-Bus service name
pub const MM_DBUS_SERVICE: &str = "org.freedesktop.ModemManager1";
/// ModemManager root object path
pub const MM_DBUS_PATH: &str = "/org/freedesktop/ModemManager1";

/// Remote interface names
pub const MM_DBUS_INTERFACE_MODEM: &str = "org.freedesktop.ModemManager1.Modem";
pub const MM_DBUS_INTERFACE_MODEM_3GPP: &str = "org.freedesktop.ModemManager1.Modem.Modem3gpp";
pub const MM_DBUS_INTERFACE_MODEM_SIMPLE: &str = "org.freedesktop.ModemManager1.Modem.Simple";
pub const MM_DBUS_INTERFACE_SIM: &str = "org.freedesktop.ModemManager1.Sim";
pub const MM_DBUS_INTERFACE_BEARER: &str = "org.freedesktop.ModemManager1.Bearer";

/// Path meaning "no object" / "all bearers"
pub const ROOT_PATH: &str = "/";

/// Run a remote call with a deadline.
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> CellularResult<T>
where
    F: Future<Output = CellularResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CellularError::Timeout(format!(
            "{} did not complete within {} ms",
            operation,
            timeout.as_millis()
        ))),
    }
}

/// org.freedesktop.DBus.Properties on one remote object
#[async_trait]
pub trait PropertiesProxy: Send + Sync {
    /// All properties of `interface`. Empty when the object has vanished.
    async fn get_all(&self, interface: &str) -> PropertyMap;
}

/// org.freedesktop.ModemManager1.Modem
#[async_trait]
pub trait ModemProxy: Send + Sync {
    async fn enable(&self, enable: bool, timeout: Duration) -> CellularResult<()>;

    async fn delete_bearer(&self, bearer: &str, timeout: Duration) -> CellularResult<()>;

    async fn reset(&self, timeout: Duration) -> CellularResult<()>;

    async fn set_power_state(&self, state: PowerState, timeout: Duration) -> CellularResult<()>;
}

/// org.freedesktop.ModemManager1.Modem.Modem3gpp
#[async_trait]
pub trait Modem3gppProxy: Send + Sync {
    /// Register on `operator_id`, or automatically when it is empty.
    async fn register(&self, operator_id: &str, timeout: Duration) -> CellularResult<()>;

    async fn scan(&self, timeout: Duration) -> CellularResult<Vec<PropertyMap>>;
}

/// org.freedesktop.ModemManager1.Modem.Simple
#[async_trait]
pub trait ModemSimpleProxy: Send + Sync {
    /// Connect and return the object path of the connected bearer.
    async fn connect(&self, properties: &PropertyMap, timeout: Duration) -> CellularResult<String>;

    async fn disconnect(&self, bearer: &str, timeout: Duration) -> CellularResult<()>;
}

/// org.freedesktop.ModemManager1.Sim
#[async_trait]
pub trait SimProxy: Send + Sync {
    async fn enable_pin(&self, pin: &str, enabled: bool, timeout: Duration) -> CellularResult<()>;

    async fn send_pin(&self, pin: &str, timeout: Duration) -> CellularResult<()>;

    async fn send_puk(&self, puk: &str, pin: &str, timeout: Duration) -> CellularResult<()>;

    async fn change_pin(&self, old_pin: &str, new_pin: &str, timeout: Duration) -> CellularResult<()>;
}

/// Creates proxies for remote objects (the control interface).
pub trait ProxyFactory: Send + Sync {
    fn create_properties_proxy(
        &self,
        path: &str,
        service: &str,
    ) -> CellularResult<Arc<dyn PropertiesProxy>>;

    fn create_modem_proxy(&self, path: &str, service: &str) -> Arc<dyn ModemProxy>;

    fn create_modem_3gpp_proxy(&self, path: &str, service: &str) -> Arc<dyn Modem3gppProxy>;

    fn create_modem_simple_proxy(&self, path: &str, service: &str) -> Arc<dyn ModemSimpleProxy>;

    fn create_sim_proxy(&self, path: &str, service: &str) -> Arc<dyn SimProxy>;
}
