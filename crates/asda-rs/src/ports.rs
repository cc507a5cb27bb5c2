use serialport::{available_ports, SerialPortInfo, SerialPortType};

/// A serial port with a short human readable description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortListing {
    pub name: String,
    pub description: String,
    pub is_usb: bool,
}

fn describe(info: &SerialPortInfo) -> PortListing {
    let (description, is_usb) = match &info.port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial adapter");
            (format!("{} [{:04x}:{:04x}]", product, usb.vid, usb.pid), true)
        }
        SerialPortType::PciPort => ("PCI serial port".to_string(), false),
        SerialPortType::BluetoothPort => ("Bluetooth serial port".to_string(), false),
        SerialPortType::Unknown => ("serial port".to_string(), false),
    };
    PortListing {
        name: info.port_name.clone(),
        description,
        is_usb,
    }
}

/// Lists every serial port the OS reports, USB-RS485 adapters first.
///
/// Enumeration errors yield an empty list.
pub fn list_ports() -> Vec<PortListing> {
    let mut ports: Vec<PortListing> = available_ports()
        .unwrap_or_default()
        .iter()
        .map(describe)
        .collect();
    ports.sort_by_key(|port| !port.is_usb);
    ports
}

/// Name of the first USB serial adapter, used when the configured port is "auto".
pub fn first_usb_adapter() -> Option<String> {
    list_ports()
        .into_iter()
        .find(|port| port.is_usb)
        .map(|port| port.name)
}
