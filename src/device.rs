use log::debug;
use pnet::datalink;
use pnet::datalink::NetworkInterface;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use strum::IntoEnumIterator;
use strum_macros::Display;
use strum_macros::EnumIter;

use crate::Result;
use crate::error::PcaptureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, Serialize, Deserialize)]
pub enum DeviceFlag {
    Up,
    Loopback,
    Broadcast,
    PointToPoint,
    Multicast,
}

impl DeviceFlag {
    fn is_set(&self, interface: &NetworkInterface) -> bool {
        match self {
            DeviceFlag::Up => interface.is_up(),
            DeviceFlag::Loopback => interface.is_loopback(),
            DeviceFlag::Broadcast => interface.is_broadcast(),
            DeviceFlag::PointToPoint => interface.is_point_to_point(),
            DeviceFlag::Multicast => interface.is_multicast(),
        }
    }
}

/// One capturable device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    /// Empty when the platform has no description for the device.
    pub description: String,
    pub index: u32,
    pub flags: Vec<DeviceFlag>,
    /// Raw platform flags.
    pub flags_int: u32,
    pub addresses: Vec<String>,
    pub mac: Option<String>,
}

impl From<&NetworkInterface> for DeviceDescriptor {
    fn from(interface: &NetworkInterface) -> Self {
        let flags = DeviceFlag::iter().filter(|f| f.is_set(interface)).collect();
        DeviceDescriptor {
            name: interface.name.clone(),
            description: interface.description.clone(),
            index: interface.index,
            flags,
            flags_int: interface.flags as u32,
            addresses: interface.ips.iter().map(|ip| ip.to_string()).collect(),
            mac: interface.mac.map(|m| m.to_string()),
        }
    }
}

/// Source of the platform's interface list.
pub trait DeviceProvider {
    fn interfaces(&self) -> std::io::Result<Vec<NetworkInterface>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PnetDevices;

impl DeviceProvider for PnetDevices {
    fn interfaces(&self) -> std::io::Result<Vec<NetworkInterface>> {
        Ok(datalink::interfaces())
    }
}

/// Every device that can be captured from, keyed by name.
/// ```rust,no_run
/// use pcapio::find_all_devices;
///
/// fn main() {
///     let devices = find_all_devices().unwrap();
///     for (name, device) in &devices {
///         println!("{} {:?} {:?}", name, device.flags, device.addresses);
///     }
/// }
/// ```
pub fn find_all_devices() -> Result<BTreeMap<String, DeviceDescriptor>> {
    find_all_devices_from(&PnetDevices)
}

pub fn find_all_devices_from<P: DeviceProvider + ?Sized>(
    provider: &P,
) -> Result<BTreeMap<String, DeviceDescriptor>> {
    let interfaces = match provider.interfaces() {
        Ok(i) => i,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(PcaptureError::Permission {
                e: format!("listing devices: {}", e),
            });
        }
        Err(e) => return Err(e.into()),
    };
    let devices: BTreeMap<String, DeviceDescriptor> = interfaces
        .iter()
        .map(|i| (i.name.clone(), DeviceDescriptor::from(i)))
        .collect();
    debug!("found {} devices", devices.len());
    Ok(devices)
}
