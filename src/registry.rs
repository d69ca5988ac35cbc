//! Driver plugin registry and device matching.
//!
//! Each vendor driver registers a [`DriverPlugin`]: a declarative
//! [`DeviceMatcher`] for the advertisements it claims, and a factory
//! that builds the driver over a transport. Matching is literal and
//! case-sensitive; the first registered plugin that matches wins, so
//! registration order is the tiebreak for overlapping matchers.

use std::sync::Arc;

use tracing::debug;

use crate::ble::scanner::DiscoveredDevice;
use crate::ble::transport::Transport;
use crate::drivers::{
    AcaiaDriver, BookooDriver, DecentDriver, DifluidDriver, EclairDriver, EurekaDriver,
    FelicitaDriver, ScaleDriver, TimemoreDriver, VariaDriver,
};
use crate::error::{Error, Result};

/// Predicate over a discovered device's advertisement.
///
/// Kept declarative so a registry can be inspected and tested without
/// instantiating drivers. All string comparisons are literal and
/// case-sensitive; manufacturer data is matched against its lowercase
/// hex rendering.
#[derive(Debug, Clone)]
pub enum DeviceMatcher {
    /// Advertised name starts with the literal.
    NamePrefix(&'static str),
    /// Advertised name contains the literal.
    NameContains(&'static str),
    /// No advertised name at all.
    NameIsEmpty,
    /// Hex-rendered manufacturer data starts with the literal.
    ManufacturerHexPrefix(&'static str),
    /// Hex-rendered manufacturer data contains the literal.
    ManufacturerHexContains(&'static str),
    /// At least one inner matcher matches.
    AnyOf(Vec<DeviceMatcher>),
    /// Every inner matcher matches.
    AllOf(Vec<DeviceMatcher>),
}

impl DeviceMatcher {
    /// Evaluate the matcher against a device.
    pub fn matches(&self, device: &DiscoveredDevice) -> bool {
        match self {
            DeviceMatcher::NamePrefix(prefix) => device.name.starts_with(prefix),
            DeviceMatcher::NameContains(needle) => device.name.contains(needle),
            DeviceMatcher::NameIsEmpty => device.name.is_empty(),
            DeviceMatcher::ManufacturerHexPrefix(prefix) => {
                device.manufacturer_data_hex().starts_with(prefix)
            }
            DeviceMatcher::ManufacturerHexContains(needle) => {
                device.manufacturer_data_hex().contains(needle)
            }
            DeviceMatcher::AnyOf(matchers) => matchers.iter().any(|m| m.matches(device)),
            DeviceMatcher::AllOf(matchers) => matchers.iter().all(|m| m.matches(device)),
        }
    }
}

/// Builds a driver for a matched device.
pub type DriverFactory =
    fn(&DiscoveredDevice, Arc<dyn Transport>) -> Box<dyn ScaleDriver>;

/// One vendor driver's registration.
pub struct DriverPlugin {
    /// Stable identifier, also used as the driver's log prefix.
    pub id: &'static str,
    /// Advertisement predicate.
    pub matcher: DeviceMatcher,
    /// Driver constructor.
    pub factory: DriverFactory,
}

/// Ordered collection of driver plugins.
pub struct DriverRegistry {
    plugins: Vec<DriverPlugin>,
}

impl DriverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// A registry with every built-in vendor plugin registered.
    pub fn with_default_plugins() -> Self {
        let mut registry = Self::new();

        registry.register(DriverPlugin {
            id: "acaia",
            matcher: DeviceMatcher::AnyOf(vec![
                DeviceMatcher::NamePrefix("ACAIA"),
                DeviceMatcher::NamePrefix("PYXIS"),
                DeviceMatcher::NamePrefix("LUNAR"),
                DeviceMatcher::NamePrefix("PEARL"),
                DeviceMatcher::NamePrefix("PROCH"),
                DeviceMatcher::NamePrefix("UMBRA"),
            ]),
            factory: |device, transport| Box::new(AcaiaDriver::new(device, transport)),
        });

        registry.register(DriverPlugin {
            id: "bookoo",
            matcher: DeviceMatcher::AnyOf(vec![
                DeviceMatcher::NamePrefix("BOOKO_SC"),
                DeviceMatcher::NamePrefix("BOOKOO"),
            ]),
            factory: |_, transport| Box::new(BookooDriver::new(transport)),
        });

        registry.register(DriverPlugin {
            id: "decent",
            matcher: DeviceMatcher::NamePrefix("Decent Scale"),
            factory: |_, transport| Box::new(DecentDriver::new(transport)),
        });

        registry.register(DriverPlugin {
            id: "difluid",
            matcher: DeviceMatcher::NamePrefix("Mb"),
            factory: |_, transport| Box::new(DifluidDriver::new(transport)),
        });

        registry.register(DriverPlugin {
            id: "eclair",
            matcher: DeviceMatcher::NamePrefix("ECLAIR-"),
            factory: |_, transport| Box::new(EclairDriver::new(transport)),
        });

        // Eureka scales often advertise no name at all; they are picked
        // out by their manufacturer data instead.
        registry.register(DriverPlugin {
            id: "eureka",
            matcher: DeviceMatcher::AnyOf(vec![
                DeviceMatcher::NamePrefix("CFS-9002"),
                DeviceMatcher::AllOf(vec![
                    DeviceMatcher::NameIsEmpty,
                    DeviceMatcher::AnyOf(vec![
                        DeviceMatcher::ManufacturerHexContains("a6bc"),
                        DeviceMatcher::ManufacturerHexPrefix("042"),
                    ]),
                ]),
            ]),
            factory: |_, transport| Box::new(EurekaDriver::new(transport)),
        });

        registry.register(DriverPlugin {
            id: "felicita",
            matcher: DeviceMatcher::NamePrefix("FELICITA"),
            factory: |_, transport| Box::new(FelicitaDriver::new(transport)),
        });

        registry.register(DriverPlugin {
            id: "timemore",
            matcher: DeviceMatcher::NamePrefix("Timemore Scale"),
            factory: |_, transport| Box::new(TimemoreDriver::new(transport)),
        });

        registry.register(DriverPlugin {
            id: "varia",
            matcher: DeviceMatcher::AnyOf(vec![
                DeviceMatcher::NamePrefix("AKU MINI SCALE"),
                DeviceMatcher::NamePrefix("VARIA AKU"),
                DeviceMatcher::NamePrefix("Varia AKU"),
            ]),
            factory: |_, transport| Box::new(VariaDriver::new(transport)),
        });

        registry
    }

    /// Register a plugin. Later registrations lose ties to earlier ones.
    pub fn register(&mut self, plugin: DriverPlugin) {
        debug!("Registering driver plugin: {}", plugin.id);
        self.plugins.push(plugin);
    }

    /// First registered plugin whose matcher claims the device.
    pub fn find_plugin_for(&self, device: &DiscoveredDevice) -> Option<&DriverPlugin> {
        self.plugins.iter().find(|p| p.matcher.matches(device))
    }

    /// Whether any registered plugin claims the device.
    pub fn is_supported(&self, device: &DiscoveredDevice) -> bool {
        self.find_plugin_for(device).is_some()
    }

    /// Build a driver for the device over the given transport.
    pub fn create(
        &self,
        device: &DiscoveredDevice,
        transport: Arc<dyn Transport>,
    ) -> Result<Box<dyn ScaleDriver>> {
        match self.find_plugin_for(device) {
            Some(plugin) => {
                debug!(
                    "Creating {} driver for {} [{}]",
                    plugin.id, device.name, device.address
                );
                Ok((plugin.factory)(device, transport))
            }
            None => Err(Error::NoDriverFound {
                name: device.name.clone(),
                address: device.address.clone(),
            }),
        }
    }

    /// Registered plugins, in registration order.
    pub fn plugins(&self) -> &[DriverPlugin] {
        &self.plugins
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_default_plugins()
    }
}
