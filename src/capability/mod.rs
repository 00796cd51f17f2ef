//! Modem capability
//!
//! One `ModemCapability` exists per ModemManager modem object. It mirrors
//! the remote modem, 3GPP and SIM properties, drives the enable / register /
//! connect lifecycle, and carries post-payment activation across resets.
//!
//! The handle is cheap to clone. All mutable state sits behind one async
//! mutex which is never held across a remote call, so every continuation
//! sees the state as the previous step left it.

mod activation;
mod apn;
mod registration;
mod scan;


pub use apn::{connect_properties, ApnTryList};
pub use registration::PendingRegistrationChange;
pub use scan::{parse_scan_result, ScanResult};

use futures::future::BoxFuture;
use std::sync::{Arc, MutexGuard, PoisonError, Weak};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::activation_store::{ActivationStore, SharedActivationStore};
use crate::bearer::BearerInfo;
use crate::config::CellularConfig;
use crate::delegate::CellularDelegate;
use crate::error::{CellularError, CellularResult};
use crate::property::PropertyMap;
use crate::provider::HomeProvider;
use crate::proxy::{
    Modem3gppProxy, ModemProxy, ModemSimpleProxy, ProxyFactory, SimProxy,
    MM_DBUS_INTERFACE_MODEM, MM_DBUS_INTERFACE_MODEM_3GPP, MM_DBUS_INTERFACE_SIM, ROOT_PATH,
};
use crate::quirks::ModemFamily;
use crate::types::{
    AccessTechnologies, LockType, ModemState, PowerState, RegistrationState,
    SimLockStatus, SubscriptionState, CAPABILITY_GSM_UMTS, FACILITY_SIM,
    ROAMING_STATE_HOME, ROAMING_STATE_ROAMING, ROAMING_STATE_UNKNOWN, UNKNOWN_RETRIES_LEFT,
};

// org.freedesktop.ModemManager1.Modem properties
const MODEM_PROPERTY_BEARERS: &str = "Bearers";
const MODEM_PROPERTY_STATE: &str = "State";
const MODEM_PROPERTY_SIM: &str = "Sim";
const MODEM_PROPERTY_SUPPORTED_CAPABILITIES: &str = "SupportedCapabilities";
const MODEM_PROPERTY_CURRENT_CAPABILITIES: &str = "CurrentCapabilities";
const MODEM_PROPERTY_MANUFACTURER: &str = "Manufacturer";
const MODEM_PROPERTY_MODEL: &str = "Model";
const MODEM_PROPERTY_PLUGIN: &str = "Plugin";
const MODEM_PROPERTY_REVISION: &str = "Revision";
const MODEM_PROPERTY_UNLOCK_REQUIRED: &str = "UnlockRequired";
const MODEM_PROPERTY_UNLOCK_RETRIES: &str = "UnlockRetries";
const MODEM_PROPERTY_ACCESS_TECHNOLOGIES: &str = "AccessTechnologies";
const MODEM_PROPERTY_SIGNAL_QUALITY: &str = "SignalQuality";
const MODEM_PROPERTY_OWN_NUMBERS: &str = "OwnNumbers";

// org.freedesktop.ModemManager1.Modem.Modem3gpp properties
const MODEM_3GPP_PROPERTY_IMEI: &str = "Imei";
const MODEM_3GPP_PROPERTY_REGISTRATION_STATE: &str = "RegistrationState";
const MODEM_3GPP_PROPERTY_OPERATOR_CODE: &str = "OperatorCode";
const MODEM_3GPP_PROPERTY_OPERATOR_NAME: &str = "OperatorName";
const MODEM_3GPP_PROPERTY_SUBSCRIPTION_STATE: &str = "SubscriptionState";
const MODEM_3GPP_PROPERTY_ENABLED_FACILITY_LOCKS: &str = "EnabledFacilityLocks";

// org.freedesktop.ModemManager1.Sim properties
const SIM_PROPERTY_SIM_IDENTIFIER: &str = "SimIdentifier";
const SIM_PROPERTY_IMSI: &str = "Imsi";
const SIM_PROPERTY_OPERATOR_IDENTIFIER: &str = "OperatorIdentifier";
const SIM_PROPERTY_OPERATOR_NAME: &str = "OperatorName";

/// Modem, 3GPP and simple-connect proxies, created and released together
pub(crate) struct ModemProxies {
    modem: Arc<dyn ModemProxy>,
    modem_3gpp: Arc<dyn Modem3gppProxy>,
    modem_simple: Arc<dyn ModemSimpleProxy>,
}

/// One-shot enable that waits for the modem to reach Disabled
#[derive(Debug, Default)]
pub(crate) enum DeferredEnable {
    #[default]
    Empty,
    /// The caller of the deferred enable is waiting on the receiver
    Armed(oneshot::Sender<CellularResult<()>>),
    Consumed,
}

impl DeferredEnable {
    /// Arm a fresh deferred enable. A previous occupant is dropped, which
    /// resolves its waiter with `Cancelled`.
    fn arm(&mut self) -> oneshot::Receiver<CellularResult<()>> {
        let (sender, receiver) = oneshot::channel();
        *self = DeferredEnable::Armed(sender);
        receiver
    }

    fn clear(&mut self) {
        *self = DeferredEnable::Empty;
    }

    fn take(&mut self) -> Option<oneshot::Sender<CellularResult<()>>> {
        match std::mem::replace(self, DeferredEnable::Consumed) {
            DeferredEnable::Armed(sender) => Some(sender),
            other => {
                *self = other;
                None
            }
        }
    }

    fn is_armed(&self) -> bool {
        matches!(self, DeferredEnable::Armed(_))
    }
}

/// Mirrored modem state
#[derive(Default)]
pub(crate) struct State {
    proxies: Option<Arc<ModemProxies>>,
    sim_proxy: Option<Arc<dyn SimProxy>>,
    deferred_enable: DeferredEnable,

    pending_registration: Option<PendingRegistrationChange>,
    registration_generation: u64,
    delayed_drop_posted: u32,
    delayed_drop_canceled: u32,

    apn_try_list: ApnTryList,
    resetting: bool,
    reset_done: bool,
    desired_network: String,
    selected_network: String,

    modem_state: ModemState,
    registration_state: RegistrationState,
    subscription_state: SubscriptionState,
    access_technologies: AccessTechnologies,
    signal_quality: u32,

    bearer_paths: Vec<String>,
    active_bearer: Option<BearerInfo>,

    supported_capabilities: Vec<u32>,
    current_capabilities: u32,
    scanning_supported: bool,
    manufacturer: String,
    model_id: String,
    plugin: String,
    family: ModemFamily,
    firmware_revision: String,

    sim_path: String,
    sim_present: bool,
    sim_lock_status: SimLockStatus,
    sim_identifier: String,
    sim_operator_id: String,
    spn: String,
    imsi: String,
    imei: String,
    mdn: String,
    min: String,

    serving_operator_code: String,
    serving_operator_name: String,
    home_provider: HomeProvider,
}

pub(crate) struct Inner {
    path: String,
    service: String,
    factory: Arc<dyn ProxyFactory>,
    config: CellularConfig,
    store: SharedActivationStore,
    delegate: Weak<dyn CellularDelegate>,
    state: Mutex<State>,
}

impl Inner {
    fn delegate(&self) -> Option<Arc<dyn CellularDelegate>> {
        self.delegate.upgrade()
    }

    /// The owner, only while it has a service object
    fn service_delegate(&self) -> Option<Arc<dyn CellularDelegate>> {
        self.delegate().filter(|d| d.has_service())
    }

    fn store(&self) -> MutexGuard<'_, ActivationStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn network_technology_string(&self, state: &State) -> &'static str {
        if state.family.quirks().forces_lte_technology {
            return crate::types::NETWORK_TECHNOLOGY_LTE;
        }
        state.access_technologies.network_technology()
    }

    fn roaming_state_string(state: &State) -> &'static str {
        match state.registration_state {
            RegistrationState::Home => ROAMING_STATE_HOME,
            RegistrationState::Roaming => ROAMING_STATE_ROAMING,
            _ => ROAMING_STATE_UNKNOWN,
        }
    }

    fn on_lock_type_changed(&self, state: &mut State, lock_type: LockType) {
        debug!("{}: lock type {:?}", self.path, lock_type);
        state.sim_lock_status.lock_type = lock_type;
        // EnabledFacilityLocks lives on the 3GPP interface, which is absent
        // while the modem is locked.
        if lock_type.is_locked() && !state.sim_lock_status.enabled {
            state.sim_lock_status.enabled = true;
        }
    }

    fn on_lock_retries_changed(
        &self,
        state: &mut State,
        retries: &std::collections::HashMap<u32, u32>,
    ) {
        let current = state.sim_lock_status.lock_type.to_wire();
        state.sim_lock_status.retries_left = retries
            .get(&current)
            .copied()
            .or_else(|| {
                retries
                    .iter()
                    .min_by_key(|(lock, _)| **lock)
                    .map(|(_, count)| *count)
            })
            .unwrap_or(UNKNOWN_RETRIES_LEFT);
    }

    fn on_access_technologies_changed(&self, state: &mut State, technologies: u32) {
        if state.access_technologies.0 == technologies {
            return;
        }
        let old_family = state.access_technologies.technology_family();
        state.access_technologies = AccessTechnologies(technologies);
        let new_family = state.access_technologies.technology_family();

        let delegate = self.delegate();
        if new_family != old_family {
            if let Some(delegate) = &delegate {
                delegate.on_technology_family_changed(new_family);
            }
        }
        if let Some(delegate) = delegate.filter(|d| d.has_service()) {
            delegate.set_network_technology(self.network_technology_string(state));
        }
    }

    fn on_sim_properties_changed(&self, state: &mut State, properties: &PropertyMap) {
        let mut identity_changed = false;
        if let Some(id) = properties.get_string(SIM_PROPERTY_SIM_IDENTIFIER) {
            self.on_sim_identifier_changed(state, id);
            identity_changed = true;
        }
        if let Some(operator_id) = properties.get_string(SIM_PROPERTY_OPERATOR_IDENTIFIER) {
            debug!("{}: SIM operator id '{}'", self.path, operator_id);
            state.sim_operator_id = operator_id.to_string();
            identity_changed = true;
        }
        if let Some(spn) = properties.get_string(SIM_PROPERTY_OPERATOR_NAME) {
            state.spn = spn.to_string();
            identity_changed = true;
        }
        if let Some(imsi) = properties.get_string(SIM_PROPERTY_IMSI) {
            state.imsi = imsi.to_string();
            identity_changed = true;
        }

        if identity_changed {
            if let Some(delegate) = self.delegate() {
                delegate.on_sim_properties_changed(&state.imsi, &state.spn, &state.sim_identifier);
            }
        }
    }

    fn release_proxies(&self, state: &mut State) {
        debug!("{}: releasing proxies", self.path);
        state.proxies = None;
        state.sim_proxy = None;
    }
}

fn is_valid_sim_path(sim_path: &str) -> bool {
    !sim_path.is_empty() && sim_path != ROOT_PATH
}

/// State machine for one ModemManager modem
#[derive(Clone)]
pub struct ModemCapability {
    inner: Arc<Inner>,
}

impl ModemCapability {
    pub fn new(
        path: &str,
        service: &str,
        factory: Arc<dyn ProxyFactory>,
        store: SharedActivationStore,
        delegate: Weak<dyn CellularDelegate>,
        config: &CellularConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.to_string(),
                service: service.to_string(),
                factory,
                config: config.clone(),
                store,
                delegate,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Modem object path
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    async fn lock(&self) -> tokio::sync::MutexGuard<'_, State> {
        self.inner.state.lock().await
    }

    async fn proxies(&self) -> CellularResult<Arc<ModemProxies>> {
        self.lock().await.proxies.clone().ok_or_else(|| {
            CellularError::NotFound(format!("{}: modem proxies not initialized", self.inner.path))
        })
    }

    async fn sim_proxy(&self) -> CellularResult<Arc<dyn SimProxy>> {
        self.lock()
            .await
            .sim_proxy
            .clone()
            .ok_or_else(|| CellularError::NotFound(format!("{}: no SIM", self.inner.path)))
    }

    fn init_proxies(&self, state: &mut State) {
        let factory = &self.inner.factory;
        let (path, service) = (self.inner.path.as_str(), self.inner.service.as_str());
        state.proxies = Some(Arc::new(ModemProxies {
            modem: factory.create_modem_proxy(path, service),
            modem_3gpp: factory.create_modem_3gpp_proxy(path, service),
            modem_simple: factory.create_modem_simple_proxy(path, service),
        }));
    }

    // Lifecycle

    /// Create the proxies and enable the modem, deferring while it is busy.
    pub async fn start_modem(&self) -> CellularResult<()> {
        debug!("{}: StartModem", self.inner.path);
        {
            let mut state = self.lock().await;
            self.init_proxies(&mut state);
            state.deferred_enable.clear();
        }
        self.enable_modem(true).await
    }

    /// Enable the modem.
    ///
    /// With `deferrable`, a "wrong state" refusal parks the call until the
    /// modem reports Disabled and then retries once, non-deferrably. The
    /// returned future resolves with the outcome of that retry.
    pub async fn enable_modem(&self, deferrable: bool) -> CellularResult<()> {
        debug!("{}: EnableModem(deferrable={})", self.inner.path, deferrable);
        let proxies = self.proxies().await?;

        match proxies
            .modem
            .enable(true, self.inner.config.timeouts.enable())
            .await
        {
            Ok(()) => {
                self.get_properties().await;
                info!("{}: modem enabled", self.inner.path);
                Ok(())
            }
            Err(e) if deferrable && e.is_wrong_state() => {
                debug!("{}: deferring enable until the modem is disabled", self.inner.path);
                let receiver = self.lock().await.deferred_enable.arm();
                match receiver.await {
                    Ok(result) => result,
                    Err(_) => Err(CellularError::Cancelled(format!(
                        "{}: deferred enable discarded",
                        self.inner.path
                    ))),
                }
            }
            Err(e) => {
                warn!("{}: enable failed: {}", self.inner.path, e);
                Err(e)
            }
        }
    }

    fn run_deferred_enable(
        &self,
        sender: oneshot::Sender<CellularResult<()>>,
    ) -> BoxFuture<'static, ()> {
        let capability = self.clone();
        Box::pin(async move {
            let result = capability.enable_modem(false).await;
            // The waiter may have been dropped; nothing else to notify.
            let _ = sender.send(result);
        })
    }

    /// Disable the modem, power it down and release the proxies.
    pub async fn stop_modem(&self) -> CellularResult<()> {
        debug!("{}: StopModem", self.inner.path);
        let (proxies, delete_bearer) = {
            let mut state = self.lock().await;
            if self.cancel_pending_registration(&mut state) {
                debug!("{}: cancelled delayed deregister", self.inner.path);
            }
            state.deferred_enable.clear();
            let proxies = state.proxies.clone().ok_or_else(|| {
                CellularError::NotFound(format!("{}: modem proxies not initialized", self.inner.path))
            })?;
            let delete_bearer = if state.family.quirks().delete_bearer_before_disable {
                state.active_bearer.as_ref().map(|b| b.path().to_string())
            } else {
                None
            };
            (proxies, delete_bearer)
        };

        let timeouts = &self.inner.config.timeouts;
        if let Some(bearer) = delete_bearer {
            // Disable removes whatever is left, so the outcome does not matter.
            if let Err(e) = proxies
                .modem
                .delete_bearer(&bearer, timeouts.default_timeout())
                .await
            {
                debug!("{}: ignoring DeleteBearer failure: {}", self.inner.path, e);
            }
        }

        proxies.modem.enable(false, timeouts.enable()).await?;

        if let Err(e) = proxies
            .modem
            .set_power_state(PowerState::Low, timeouts.set_power_state())
            .await
        {
            warn!("{}: ignoring SetPowerState failure: {}", self.inner.path, e);
        }

        let mut state = self.lock().await;
        self.inner.release_proxies(&mut state);
        info!("{}: modem stopped", self.inner.path);
        Ok(())
    }

    /// Fill in connect properties from a freshly built APN try list.
    pub async fn setup_connect_properties(&self) -> PropertyMap {
        let mut guard = self.lock().await;
        let state = &mut *guard;
        let delegate = self.inner.delegate();
        let last_good = delegate.as_ref().and_then(|d| d.last_good_apn());
        let user_specified = delegate.as_ref().and_then(|d| d.user_specified_apn());
        state.apn_try_list =
            ApnTryList::build(last_good, user_specified, &state.home_provider.apn_list);
        self.inner.fill_connect_properties(state)
    }

    /// Simple-connect, walking the APN try list on retriable failures.
    ///
    /// Returns the connected bearer path. Intermediate failures are not
    /// reported; only the last one is, once no APN is left to try.
    pub async fn connect(&self, properties: PropertyMap) -> CellularResult<String> {
        let mut properties = properties;
        loop {
            let proxies = self.proxies().await?;
            debug!("{}: Connect", self.inner.path);
            let result = proxies
                .modem_simple
                .connect(&properties, self.inner.config.timeouts.connect())
                .await;

            let mut state = self.lock().await;
            if let Some(next) = self.inner.on_connect_reply(&mut state, &result) {
                properties = next;
                continue;
            }
            self.inner.update_pending_activation_state(&mut state);
            return result;
        }
    }

    pub async fn connect_with_apn_retry(&self) -> CellularResult<String> {
        let properties = self.setup_connect_properties().await;
        self.connect(properties).await
    }

    /// Disconnect every bearer.
    pub async fn disconnect(&self) -> CellularResult<()> {
        let simple = self
            .lock()
            .await
            .proxies
            .as_ref()
            .map(|p| p.modem_simple.clone());
        let Some(simple) = simple else {
            debug!("{}: no modem proxies, nothing to disconnect", self.inner.path);
            return Ok(());
        };
        debug!("{}: Disconnect all bearers", self.inner.path);
        simple
            .disconnect(ROOT_PATH, self.inner.config.timeouts.disconnect())
            .await
    }

    /// Register on the selected network, or automatically when none is set.
    pub async fn register(&self) -> CellularResult<()> {
        let network = self.lock().await.selected_network.clone();
        self.register_with_fallback(network).await
    }

    /// Register on `network_id`, falling back to automatic once on failure.
    pub async fn register_on_network(&self, network_id: &str) -> CellularResult<()> {
        self.lock().await.desired_network = network_id.to_string();
        self.register_with_fallback(network_id.to_string()).await
    }

    async fn register_with_fallback(&self, network: String) -> CellularResult<()> {
        let mut network = network;
        loop {
            let proxies = self.proxies().await?;
            debug!("{}: Register \"{}\"", self.inner.path, network);
            let result = proxies
                .modem_3gpp
                .register(&network, self.inner.config.timeouts.register())
                .await;

            let mut state = self.lock().await;
            match result {
                Ok(()) => {
                    let desired = std::mem::take(&mut state.desired_network);
                    state.selected_network = desired;
                    return Ok(());
                }
                Err(e) if !state.desired_network.is_empty() => {
                    info!(
                        "{}: couldn't register on selected network ({}), trying home network",
                        self.inner.path, e
                    );
                    state.desired_network.clear();
                    state.selected_network.clear();
                    network = state.selected_network.clone();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Reset the modem. A second call while one is outstanding is refused.
    pub async fn reset(&self) -> CellularResult<()> {
        let proxies = {
            let mut state = self.lock().await;
            if state.resetting {
                return Err(CellularError::InProgress("Already resetting".to_string()));
            }
            let proxies = state.proxies.clone().ok_or_else(|| {
                CellularError::NotFound(format!("{}: modem proxies not initialized", self.inner.path))
            })?;
            state.resetting = true;
            proxies
        };

        debug!("{}: Reset", self.inner.path);
        let result = proxies.modem.reset(self.inner.config.timeouts.reset()).await;
        self.lock().await.resetting = false;
        result
    }

    // SIM pass-throughs

    pub async fn require_pin(&self, pin: &str, require: bool) -> CellularResult<()> {
        let sim = self.sim_proxy().await?;
        sim.enable_pin(pin, require, self.inner.config.timeouts.default_timeout())
            .await
    }

    pub async fn enter_pin(&self, pin: &str) -> CellularResult<()> {
        debug!("{}: EnterPIN", self.inner.path);
        let sim = self.sim_proxy().await?;
        sim.send_pin(pin, self.inner.config.timeouts.enter_pin()).await
    }

    pub async fn unblock_pin(&self, unblock_code: &str, pin: &str) -> CellularResult<()> {
        let sim = self.sim_proxy().await?;
        sim.send_puk(unblock_code, pin, self.inner.config.timeouts.default_timeout())
            .await
    }

    pub async fn change_pin(&self, old_pin: &str, new_pin: &str) -> CellularResult<()> {
        let sim = self.sim_proxy().await?;
        sim.change_pin(old_pin, new_pin, self.inner.config.timeouts.default_timeout())
            .await
    }

    // Property handling

    /// Entry point for PropertiesChanged on the modem, 3GPP and SIM objects.
    pub async fn on_properties_changed(
        &self,
        interface: &str,
        changed: &PropertyMap,
        _invalidated: &[String],
    ) {
        debug!("{}: properties changed on {}", self.inner.path, interface);
        match interface {
            MM_DBUS_INTERFACE_MODEM => self.on_modem_properties_changed(changed).await,
            MM_DBUS_INTERFACE_MODEM_3GPP => self.on_modem_3gpp_properties_changed(changed).await,
            MM_DBUS_INTERFACE_SIM => {
                let mut state = self.lock().await;
                self.inner.on_sim_properties_changed(&mut state, changed);
            }
            _ => {}
        }
    }

    async fn get_properties(&self) {
        let proxy = match self
            .inner
            .factory
            .create_properties_proxy(&self.inner.path, &self.inner.service)
        {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!("{}: cannot read modem properties: {}", self.inner.path, e);
                return;
            }
        };

        let modem = proxy.get_all(MM_DBUS_INTERFACE_MODEM).await;
        self.on_modem_properties_changed(&modem).await;
        let modem_3gpp = proxy.get_all(MM_DBUS_INTERFACE_MODEM_3GPP).await;
        self.on_modem_3gpp_properties_changed(&modem_3gpp).await;
    }

    async fn on_modem_properties_changed(&self, properties: &PropertyMap) {
        // Bearers first: a Connected state selects the active bearer from them.
        if let Some(bearers) = properties.get_object_paths(MODEM_PROPERTY_BEARERS) {
            self.lock().await.bearer_paths = bearers.to_vec();
        }

        if let Some(code) = properties.get_int(MODEM_PROPERTY_STATE) {
            self.on_modem_state_changed(ModemState::from_wire(code)).await;
        }

        if let Some(sim_path) = properties.get_object_path(MODEM_PROPERTY_SIM) {
            self.on_sim_path_changed(sim_path).await;
        }

        let lock_status_changed = {
            let mut guard = self.lock().await;
            let state = &mut *guard;

            if let Some(capabilities) = properties.get_uints(MODEM_PROPERTY_SUPPORTED_CAPABILITIES) {
                state.supported_capabilities = capabilities.to_vec();
            }
            if let Some(current) = properties.get_uint(MODEM_PROPERTY_CURRENT_CAPABILITIES) {
                state.current_capabilities = current;
                state.scanning_supported = current & CAPABILITY_GSM_UMTS != 0;
            }
            if let Some(manufacturer) = properties.get_string(MODEM_PROPERTY_MANUFACTURER) {
                state.manufacturer = manufacturer.to_string();
            }
            if let Some(model) = properties.get_string(MODEM_PROPERTY_MODEL) {
                state.model_id = model.to_string();
            }
            if let Some(plugin) = properties.get_string(MODEM_PROPERTY_PLUGIN) {
                state.plugin = plugin.to_string();
                state.family = ModemFamily::from_plugin(plugin);
            }
            if let Some(revision) = properties.get_string(MODEM_PROPERTY_REVISION) {
                state.firmware_revision = revision.to_string();
            }

            let mut lock_status_changed = false;
            if let Some(code) = properties.get_uint(MODEM_PROPERTY_UNLOCK_REQUIRED) {
                self.inner.on_lock_type_changed(state, LockType::from_wire(code));
                lock_status_changed = true;
            }
            if let Some(retries) = properties.get_lock_retries(MODEM_PROPERTY_UNLOCK_RETRIES) {
                self.inner.on_lock_retries_changed(state, retries);
                lock_status_changed = true;
            }
            lock_status_changed
        };

        if lock_status_changed {
            self.on_sim_lock_status_changed().await;
        }

        let mut guard = self.lock().await;
        let state = &mut *guard;
        if let Some(technologies) = properties.get_uint(MODEM_PROPERTY_ACCESS_TECHNOLOGIES) {
            self.inner.on_access_technologies_changed(state, technologies);
        }
        if let Some((quality, _recent)) = properties.get_signal_quality(MODEM_PROPERTY_SIGNAL_QUALITY) {
            state.signal_quality = quality;
            if let Some(delegate) = self.inner.delegate() {
                delegate.on_signal_quality_changed(quality);
            }
        }
        if let Some(numbers) = properties.get_strings(MODEM_PROPERTY_OWN_NUMBERS) {
            let mdn = numbers.first().map(String::as_str).unwrap_or("");
            self.inner.on_mdn_changed(state, mdn);
        }
    }

    async fn on_modem_state_changed(&self, new_state: ModemState) {
        if new_state == ModemState::Connected {
            // ModemManager publishes the bearers before reporting Connected.
            self.update_active_bearer().await;
        }

        let deferred = {
            let mut state = self.lock().await;
            let old_state = std::mem::replace(&mut state.modem_state, new_state);
            if old_state != new_state {
                info!("{}: modem state {} -> {}", self.inner.path, old_state, new_state);
                if let Some(delegate) = self.inner.delegate() {
                    delegate.on_modem_state_changed(old_state, new_state);
                }
            }
            if old_state.is_registered() && !new_state.is_registered() {
                self.inner
                    .set_unregistered(&mut state, new_state == ModemState::Searching);
            }
            if new_state == ModemState::Disabled {
                state.deferred_enable.take()
            } else {
                None
            }
        };

        if let Some(sender) = deferred {
            debug!("{}: enabling modem after deferring", self.inner.path);
            tokio::spawn(self.run_deferred_enable(sender));
        }
    }

    async fn on_sim_path_changed(&self, sim_path: &str) {
        let valid = {
            let mut guard = self.lock().await;
            let state = &mut *guard;
            if state.sim_path == sim_path {
                return;
            }

            let valid = is_valid_sim_path(sim_path);
            state.sim_path = sim_path.to_string();
            state.sim_proxy = valid.then(|| {
                self.inner
                    .factory
                    .create_sim_proxy(sim_path, &self.inner.service)
            });
            state.sim_present = valid;

            if !valid {
                debug!("{}: SIM removed", self.inner.path);
                state.imsi.clear();
                state.spn.clear();
                self.inner.on_sim_identifier_changed(state, "");
                state.sim_operator_id.clear();
                state.home_provider = HomeProvider::unknown();
            }
            valid
        };

        if valid {
            self.refresh_sim_properties(sim_path).await;
        }
    }

    async fn refresh_sim_properties(&self, sim_path: &str) {
        let proxy = match self
            .inner
            .factory
            .create_properties_proxy(sim_path, &self.inner.service)
        {
            Ok(proxy) => proxy,
            Err(e) => {
                warn!("{}: cannot read SIM properties: {}", self.inner.path, e);
                return;
            }
        };
        let properties = proxy.get_all(MM_DBUS_INTERFACE_SIM).await;
        let mut state = self.lock().await;
        self.inner.on_sim_properties_changed(&mut state, &properties);
    }

    async fn on_sim_lock_status_changed(&self) {
        let refresh = {
            let state = self.lock().await;
            if let Some(delegate) = self.inner.delegate() {
                delegate.on_sim_lock_status_changed(&state.sim_lock_status);
            }
            // An unlocked SIM may now expose carrier data (IMSI, SPN) it hid before.
            let unlocked = !state.sim_lock_status.lock_type.is_locked();
            (unlocked && is_valid_sim_path(&state.sim_path)).then(|| state.sim_path.clone())
        };
        if let Some(sim_path) = refresh {
            self.refresh_sim_properties(&sim_path).await;
        }
    }

    async fn on_modem_3gpp_properties_changed(&self, properties: &PropertyMap) {
        let lock_status_changed = {
            let mut guard = self.lock().await;
            let state = &mut *guard;

            if let Some(imei) = properties.get_string(MODEM_3GPP_PROPERTY_IMEI) {
                state.imei = imei.to_string();
            }

            // Registration state and operator arrive as one change.
            let mut registration = state.registration_state;
            let mut operator_code = state.serving_operator_code.clone();
            let mut operator_name = state.serving_operator_name.clone();
            let mut registration_changed = false;
            if let Some(code) = properties.get_uint(MODEM_3GPP_PROPERTY_REGISTRATION_STATE) {
                registration = RegistrationState::from_wire(code);
                registration_changed = true;
            }
            if let Some(code) = properties.get_string(MODEM_3GPP_PROPERTY_OPERATOR_CODE) {
                operator_code = code.to_string();
                registration_changed = true;
            }
            if let Some(name) = properties.get_string(MODEM_3GPP_PROPERTY_OPERATOR_NAME) {
                operator_name = name.to_string();
                registration_changed = true;
            }
            if registration_changed {
                self.on_3gpp_registration_changed(state, registration, operator_code, operator_name);
            }

            if let Some(code) = properties.get_uint(MODEM_3GPP_PROPERTY_SUBSCRIPTION_STATE) {
                self.inner.on_subscription_state_changed(state, code);
            }

            match properties.get_uint(MODEM_3GPP_PROPERTY_ENABLED_FACILITY_LOCKS) {
                Some(locks) => {
                    let sim_enabled = locks & FACILITY_SIM != 0;
                    let changed = state.sim_lock_status.enabled != sim_enabled;
                    state.sim_lock_status.enabled = sim_enabled;
                    changed
                }
                None => false,
            }
        };

        if lock_status_changed {
            self.on_sim_lock_status_changed().await;
        }
    }

    /// Recompute the active bearer from the reported bearer paths.
    ///
    /// # Panics
    ///
    /// Panics when more than one bearer reports itself connected.
    pub async fn update_active_bearer(&self) {
        let paths = {
            let mut state = self.lock().await;
            state.active_bearer = None;
            state.bearer_paths.clone()
        };

        let mut active: Option<BearerInfo> = None;
        for path in paths {
            let mut bearer = BearerInfo::new(&path, &self.inner.service);
            // The bearer may vanish before ModemManager updates Bearers.
            if !bearer.initialize(self.inner.factory.as_ref()).await {
                continue;
            }
            if !bearer.connected() {
                continue;
            }
            debug!("{}: found active bearer \"{}\"", self.inner.path, path);
            assert!(active.is_none(), "Found more than one active bearer.");
            active = Some(bearer);
        }

        if active.is_none() {
            debug!("{}: no active bearer found", self.inner.path);
        }
        self.lock().await.active_bearer = active;
    }

    // Accessors

    pub async fn active_bearer(&self) -> Option<BearerInfo> {
        self.lock().await.active_bearer.clone()
    }

    pub async fn modem_state(&self) -> ModemState {
        self.lock().await.modem_state
    }

    pub async fn registration_state(&self) -> RegistrationState {
        self.lock().await.registration_state
    }

    pub async fn subscription_state(&self) -> SubscriptionState {
        self.lock().await.subscription_state
    }

    pub async fn is_registered(&self) -> bool {
        self.lock().await.registration_state.is_registered()
    }

    pub async fn network_technology_string(&self) -> &'static str {
        let state = self.lock().await;
        self.inner.network_technology_string(&state)
    }

    pub async fn roaming_state_string(&self) -> &'static str {
        Inner::roaming_state_string(&*self.lock().await)
    }

    /// Technology family ("GSM", "CDMA" or empty)
    pub async fn type_string(&self) -> &'static str {
        self.lock().await.access_technologies.technology_family()
    }

    pub async fn sim_lock_status(&self) -> SimLockStatus {
        self.lock().await.sim_lock_status
    }

    /// `SIMLockStatus` derived property
    pub async fn sim_lock_status_property(&self) -> PropertyMap {
        self.lock().await.sim_lock_status.to_property()
    }

    pub async fn scanning_supported(&self) -> bool {
        self.lock().await.scanning_supported
    }

    pub async fn signal_quality(&self) -> u32 {
        self.lock().await.signal_quality
    }

    pub async fn sim_present(&self) -> bool {
        self.lock().await.sim_present
    }

    /// (supported capability sets, current capabilities) bitmasks
    pub async fn capabilities(&self) -> (Vec<u32>, u32) {
        let state = self.lock().await;
        (state.supported_capabilities.clone(), state.current_capabilities)
    }

    /// Object path of the current SIM, empty or "/" without one
    pub async fn sim_path(&self) -> String {
        self.lock().await.sim_path.clone()
    }

    pub async fn sim_identifier(&self) -> String {
        self.lock().await.sim_identifier.clone()
    }

    pub async fn imsi(&self) -> String {
        self.lock().await.imsi.clone()
    }

    pub async fn mdn(&self) -> String {
        self.lock().await.mdn.clone()
    }

    pub async fn selected_network(&self) -> String {
        self.lock().await.selected_network.clone()
    }

    pub async fn serving_operator(&self) -> (String, String) {
        let state = self.lock().await;
        (state.serving_operator_code.clone(), state.serving_operator_name.clone())
    }

    /// Manufacturer, model, plugin and firmware revision
    pub async fn hardware_info(&self) -> (String, String, String, String) {
        let state = self.lock().await;
        (
            state.manufacturer.clone(),
            state.model_id.clone(),
            state.plugin.clone(),
            state.firmware_revision.clone(),
        )
    }

    /// (posted, canceled) counts of deferred registration drops
    pub async fn delayed_drop_counts(&self) -> (u32, u32) {
        let state = self.lock().await;
        (state.delayed_drop_posted, state.delayed_drop_canceled)
    }

    /// Install the home carrier found for the current SIM.
    pub async fn set_home_provider(&self, provider: HomeProvider) {
        let mut state = self.lock().await;
        debug!(
            "{}: home provider '{}' (known={})",
            self.inner.path, provider.operator_name, provider.known
        );
        state.home_provider = provider;
    }

    /// Prime a newly created service from the mirrored state.
    pub async fn on_service_created(&self) {
        let mut guard = self.lock().await;
        let state = &mut *guard;
        self.inner.update_service_activation_state(state);
        if let Some(delegate) = self.inner.service_delegate() {
            delegate.set_network_technology(self.inner.network_technology_string(state));
            delegate.set_roaming_state(Inner::roaming_state_string(state));
        }
    }

    #[cfg(test)]
    pub(crate) async fn deferred_enable_armed(&self) -> bool {
        self.lock().await.deferred_enable.is_armed()
    }

    #[cfg(test)]
    pub(crate) async fn apn_try_list(&self) -> ApnTryList {
        self.lock().await.apn_try_list.clone()
    }
}

impl std::fmt::Debug for ModemCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModemCapability")
            .field("path", &self.inner.path)
            .field("service", &self.inner.service)
            .finish()
    }
}
