//! cellctl - Cellular Modem Control Library
//!
//! Async control plane for ModemManager-driven cellular modems:
//! - Modem capability state machine (enable, register, connect, reset)
//! - Bearer and IP configuration extraction
//! - Persistent post-payment activation records
//! - Carrier portal (OLP) and per-modem-family quirks
//!
//! Remote access goes through the traits in [`proxy`]; [`mm_dbus`] implements
//! them over the system bus.

pub mod error;
pub mod config;
pub mod types;
pub mod property;
pub mod proxy;
pub mod bearer;
pub mod activation_store;
pub mod quirks;
pub mod provider;
pub mod delegate;
pub mod capability;
pub mod mm_dbus;

// Re-export commonly used types
pub use error::{CellularError, CellularResult};
pub use config::CellularConfig;
pub use types::{
    AccessTechnologies, ActivationState, ApnInfo, LockType, ModemState, RegistrationState,
    SimLockStatus, SubscriptionState,
};
pub use property::{PropertyMap, PropertyValue};
pub use proxy::ProxyFactory;
pub use bearer::{BearerInfo, IpConfigMethod, IpConfigProperties};
pub use activation_store::{
    ActivationRecordState, ActivationStore, IdentifierType, SharedActivationStore,
};
pub use provider::{HomeProvider, OnlinePortal};
pub use delegate::CellularDelegate;
pub use capability::ModemCapability;
pub use mm_dbus::MmProxyFactory;
