//! cellctld - Cellular Control Daemon
//!
//! Drives every ModemManager modem through enable, registration and
//! connection, keeping post-payment activation records in the profile
//! directory.

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use libcellctl::activation_store::{ActivationStore, SharedActivationStore};
use libcellctl::capability::ModemCapability;
use libcellctl::config::CellularConfig;
use libcellctl::delegate::CellularDelegate;
use libcellctl::mm_dbus::{self, InterfacesChanged, MmProxyFactory, PropertiesChanged};
use libcellctl::provider::OnlinePortal;
use libcellctl::proxy::{
    ProxyFactory, MM_DBUS_INTERFACE_BEARER, MM_DBUS_INTERFACE_SIM, MM_DBUS_SERVICE,
};
use libcellctl::types::{ActivationState, ApnInfo, ModemState, RegistrationState, SimLockStatus};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cellctld")]
#[command(author = "cellctl contributors")]
#[command(version)]
#[command(about = "Cellular Control Daemon - drives ModemManager modems and carrier activation", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/etc/cellctl/cellctl.toml")]
    config: PathBuf,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

/// Requests from delegates that need the capability itself
#[derive(Debug)]
enum DaemonEvent {
    AutoConnect(String),
}

#[derive(Debug)]
struct ServiceState {
    activation_state: ActivationState,
    auto_connect: bool,
    last_good_apn: Option<ApnInfo>,
    user_apn: Option<ApnInfo>,
}

/// Service object of one modem
struct ModemService {
    path: String,
    events: mpsc::UnboundedSender<DaemonEvent>,
    state: Mutex<ServiceState>,
}

impl ModemService {
    fn new(path: &str, events: mpsc::UnboundedSender<DaemonEvent>) -> Self {
        Self {
            path: path.to_string(),
            events,
            state: Mutex::new(ServiceState {
                activation_state: ActivationState::Unknown,
                auto_connect: false,
                last_good_apn: None,
                user_apn: None,
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CellularDelegate for ModemService {
    fn on_modem_state_changed(&self, old_state: ModemState, new_state: ModemState) {
        debug!("{}: device sees modem {} -> {}", self.path, old_state, new_state);
    }

    fn on_registration_changed(&self, state: RegistrationState, operator_code: &str, operator_name: &str) {
        info!(
            "{}: registration {:?} on '{}' ({})",
            self.path, state, operator_name, operator_code
        );
    }

    fn on_sim_lock_status_changed(&self, status: &SimLockStatus) {
        info!(
            "{}: SIM lock {:?} enabled={} retries={}",
            self.path, status.lock_type, status.enabled, status.retries_left
        );
    }

    fn on_sim_properties_changed(&self, imsi: &str, spn: &str, sim_identifier: &str) {
        debug!("{}: SIM imsi={} spn='{}' iccid={}", self.path, imsi, spn, sim_identifier);
    }

    fn has_service(&self) -> bool {
        true
    }

    fn activation_state(&self) -> ActivationState {
        self.state().activation_state
    }

    fn set_activation_state(&self, state: ActivationState) {
        let mut service = self.state();
        if service.activation_state != state {
            info!("{}: activation state {}", self.path, state);
            service.activation_state = state;
        }
    }

    fn set_auto_connect(&self, auto_connect: bool) {
        self.state().auto_connect = auto_connect;
    }

    fn auto_connect(&self) {
        if !self.state().auto_connect {
            return;
        }
        if self.events.send(DaemonEvent::AutoConnect(self.path.clone())).is_err() {
            debug!("{}: daemon is shutting down, not connecting", self.path);
        }
    }

    fn last_good_apn(&self) -> Option<ApnInfo> {
        self.state().last_good_apn.clone()
    }

    fn set_last_good_apn(&self, apn: &ApnInfo) {
        self.state().last_good_apn = Some(apn.clone());
    }

    fn clear_last_good_apn(&self) {
        self.state().last_good_apn = None;
    }

    fn user_specified_apn(&self) -> Option<ApnInfo> {
        self.state().user_apn.clone()
    }

    fn set_network_technology(&self, technology: &str) {
        debug!("{}: network technology '{}'", self.path, technology);
    }

    fn set_roaming_state(&self, roaming_state: &str) {
        debug!("{}: roaming state {}", self.path, roaming_state);
    }

    fn set_olp(&self, portal: &OnlinePortal) {
        info!("{}: payment portal {} {}", self.path, portal.method, portal.url);
    }
}

struct Modem {
    capability: ModemCapability,
    // Keeps the capability's weak delegate alive.
    _service: Arc<ModemService>,
}

/// Everything a new modem's capability is built from
struct ModemContext {
    factory: Arc<dyn ProxyFactory>,
    store: SharedActivationStore,
    events: mpsc::UnboundedSender<DaemonEvent>,
    config: CellularConfig,
}

impl ModemContext {
    /// Builds the capability and service for `path` and starts the modem in
    /// the background.
    async fn add_modem(&self, path: &str) -> Modem {
        let service = Arc::new(ModemService::new(path, self.events.clone()));
        let delegate: Weak<dyn CellularDelegate> = Arc::downgrade(&service) as Weak<dyn CellularDelegate>;
        let capability = ModemCapability::new(
            path,
            MM_DBUS_SERVICE,
            self.factory.clone(),
            self.store.clone(),
            delegate,
            &self.config,
        );
        capability.on_service_created().await;

        let starting = capability.clone();
        tokio::spawn(async move {
            match starting.start_modem().await {
                Ok(()) => info!("{}: modem started", starting.path()),
                Err(e) => error!("{}: failed to start modem: {}", starting.path(), e),
            }
        });

        Modem {
            capability,
            _service: service,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = load_config(&args)?;
    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(&args);

    info!("Starting Cellular Control Daemon (cellctld)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    config
        .ensure_directories()
        .context("Cannot prepare storage directory")?;
    let mut store = ActivationStore::new();
    if !store.open(&config.paths.storage_dir) {
        warn!(
            "Activation store in {} unavailable, activation progress will not persist",
            config.paths.storage_dir.display()
        );
    }
    let store = store.shared();

    let factory = MmProxyFactory::system().await?;
    let connection = factory.connection().clone();
    let mut changes = mm_dbus::properties_changed(&connection)
        .await
        .context("Cannot subscribe to ModemManager property changes")?;
    let mut hotplug = mm_dbus::interfaces_changed(&connection)
        .await
        .context("Cannot subscribe to ModemManager object changes")?;
    let factory: Arc<dyn ProxyFactory> = Arc::new(factory);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let context = ModemContext {
        factory,
        store,
        events: events_tx,
        config,
    };
    let mut modems: HashMap<String, Modem> = HashMap::new();

    let paths = match mm_dbus::discover_modems(&connection).await {
        Ok(paths) => paths,
        Err(e) => {
            warn!("Modem discovery failed: {}", e);
            Vec::new()
        }
    };
    for path in paths {
        let modem = context.add_modem(&path).await;
        modems.insert(path, modem);
    }
    info!("Managing {} modems", modems.len());

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            change = changes.next() => {
                match change {
                    Some(change) => route_change(&modems, change).await,
                    None => {
                        warn!("ModemManager signal stream ended");
                        break;
                    }
                }
            }
            change = hotplug.next() => {
                match change {
                    Some(change) => handle_interfaces_change(&context, &mut modems, change).await,
                    None => {
                        warn!("ModemManager object stream ended");
                        break;
                    }
                }
            }
            Some(event) = events_rx.recv() => handle_event(&modems, event),
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Signal handler error: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down Cellular Control Daemon...");
    for (path, modem) in &modems {
        if let Err(e) = modem.capability.stop_modem().await {
            warn!("{}: error stopping modem: {}", path, e);
        }
    }
    info!("Cellular Control Daemon stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CellularConfig> {
    if args.config.exists() {
        CellularConfig::load(&args.config)
            .with_context(|| format!("Cannot load {}", args.config.display()))
    } else {
        Ok(CellularConfig::default())
    }
}

async fn route_change(modems: &HashMap<String, Modem>, change: PropertiesChanged) {
    let PropertiesChanged {
        path,
        interface,
        changed,
        invalidated,
    } = change;

    if let Some(modem) = modems.get(&path) {
        modem
            .capability
            .on_properties_changed(&interface, &changed, &invalidated)
            .await;
        return;
    }

    match interface.as_str() {
        MM_DBUS_INTERFACE_SIM => {
            for modem in modems.values() {
                if modem.capability.sim_path().await == path {
                    modem
                        .capability
                        .on_properties_changed(&interface, &changed, &invalidated)
                        .await;
                }
            }
        }
        MM_DBUS_INTERFACE_BEARER => {
            for modem in modems.values() {
                modem.capability.update_active_bearer().await;
            }
        }
        _ => debug!("Ignoring change on {} ({})", path, interface),
    }
}

async fn handle_interfaces_change(
    context: &ModemContext,
    modems: &mut HashMap<String, Modem>,
    change: InterfacesChanged,
) {
    match change {
        InterfacesChanged::ModemAdded(path) => {
            if modems.contains_key(&path) {
                debug!("{}: modem already managed", path);
                return;
            }
            info!("{}: modem appeared", path);
            let modem = context.add_modem(&path).await;
            modems.insert(path, modem);
        }
        InterfacesChanged::ModemRemoved(path) => {
            let Some(modem) = modems.remove(&path) else {
                return;
            };
            info!("{}: modem vanished", path);
            // Cancels the debounce and any deferred enable; the remote calls
            // fail against the vanished object and are only logged.
            tokio::spawn(async move {
                if let Err(e) = modem.capability.stop_modem().await {
                    debug!("{}: stop after vanish: {}", path, e);
                }
            });
        }
    }
}

fn handle_event(modems: &HashMap<String, Modem>, event: DaemonEvent) {
    match event {
        DaemonEvent::AutoConnect(path) => {
            let Some(modem) = modems.get(&path) else {
                return;
            };
            let capability = modem.capability.clone();
            tokio::spawn(async move {
                match capability.connect_with_apn_retry().await {
                    Ok(bearer) => info!("{}: connected via {}", capability.path(), bearer),
                    Err(e) => warn!("{}: auto-connect failed: {}", capability.path(), e),
                }
            });
        }
    }
}

fn init_logging(args: &Args) {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cellctld={},libcellctl={}", log_level, log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(atty::is(atty::Stream::Stdout))
        .init();
}

/// Resolves on SIGTERM or SIGINT. SIGHUP is logged and ignored.
async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    return Ok(());
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                    return Ok(());
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, configuration reload requires a restart");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, initiating graceful shutdown");
        Ok(())
    }
}
