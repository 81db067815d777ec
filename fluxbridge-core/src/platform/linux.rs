use crate::device::SerialPort;
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const TTY_CLASS: &str = "/sys/class/tty";

/// Kernel name prefixes of USB serial adapters and CDC-ACM devices (Arduino
/// boards and similar).
const PORT_PREFIXES: &[&str] = &["ttyUSB", "ttyACM"];

/// Helper to read a sysfs attribute as a trimmed string.
fn read_sys_file(path: &Path) -> io::Result<String> {
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Name of the kernel driver bound to a tty's backing device.
fn driver_name(device_dir: &Path) -> Option<String> {
    fs::read_link(device_dir.join("driver"))
        .ok()?
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

/// Walks up from the tty's backing device until a USB device node with
/// vendor and product attributes is found.
fn usb_id(device_dir: &Path) -> Option<(u16, u16)> {
    let resolved = fs::canonicalize(device_dir).ok()?;
    resolved.ancestors().take(4).find_map(|dir| {
        let vendor = read_sys_file(&dir.join("idVendor")).ok()?;
        let product = read_sys_file(&dir.join("idProduct")).ok()?;
        Some((
            u16::from_str_radix(&vendor, 16).ok()?,
            u16::from_str_radix(&product, 16).ok()?,
        ))
    })
}

fn is_candidate(name: &str) -> bool {
    PORT_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Scans for serial ports a drive interface could be attached to on a Linux
/// system.
///
/// This function discovers ports by iterating through `/sys/class/tty`. The
/// filtering logic is as follows:
/// 1.  Keep only USB serial adapters (`ttyUSB*`) and CDC-ACM devices (`ttyACM*`).
/// 2.  Skip entries without a `device` link, which are virtual terminals.
///
/// # Returns
///
/// The discovered [`SerialPort`]s sorted by name, or an error if
/// `/sys/class/tty` cannot be read.
pub fn get_serial_ports() -> Result<Vec<SerialPort>> {
    let class_dir =
        fs::read_dir(TTY_CLASS).with_context(|| format!("Could not read {TTY_CLASS}."))?;

    let mut ports: Vec<SerialPort> = class_dir
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_candidate(&name) {
                return None;
            }

            let device_dir = entry.path().join("device");
            if !device_dir.exists() {
                return None;
            }

            Some(SerialPort {
                path: PathBuf::from("/dev/").join(&name),
                driver: driver_name(&device_dir),
                usb_id: usb_id(&device_dir),
                name,
            })
        })
        .collect();

    ports.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_usb_and_acm_ttys_are_candidates() {
        assert!(is_candidate("ttyUSB0"));
        assert!(is_candidate("ttyACM12"));
        assert!(!is_candidate("ttyS0"));
        assert!(!is_candidate("tty1"));
        assert!(!is_candidate("console"));
    }

    #[test]
    fn usb_id_is_found_in_a_parent_directory() {
        let root = tempfile::tempdir().unwrap();
        let usb_device = root.path().join("1-1");
        let tty_device = usb_device.join("1-1:1.0").join("ttyUSB0");
        fs::create_dir_all(&tty_device).unwrap();
        fs::write(usb_device.join("idVendor"), "0403\n").unwrap();
        fs::write(usb_device.join("idProduct"), "6001\n").unwrap();

        assert_eq!(usb_id(&tty_device), Some((0x0403, 0x6001)));
        assert_eq!(driver_name(&tty_device), None);
    }
}
