use std::fmt;
use std::path::PathBuf;

/// A serial port that may have a drive interface attached.
///
/// Populated by the platform-specific discovery functions in the
/// [`crate::platform`] module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialPort {
    /// The system path to the port (e.g., `/dev/ttyUSB0` or `COM3`).
    pub path: PathBuf,
    /// The kernel-provided name of the port (e.g., "ttyUSB0").
    pub name: String,
    /// The kernel driver bound to the adapter, if known (e.g., "ftdi_sio").
    pub driver: Option<String>,
    /// USB vendor and product id of the adapter, if it is a USB device.
    pub usb_id: Option<(u16, u16)>,
}

impl fmt::Display for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<15}", self.path.display())?;
        if let Some((vendor, product)) = self.usb_id {
            write!(f, " [{vendor:04x}:{product:04x}]")?;
        }
        if let Some(driver) = &self.driver {
            write!(f, " {driver}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_known_details() {
        let port = SerialPort {
            path: PathBuf::from("/dev/ttyUSB0"),
            name: "ttyUSB0".into(),
            driver: Some("ftdi_sio".into()),
            usb_id: Some((0x0403, 0x6001)),
        };
        assert_eq!(port.to_string(), "/dev/ttyUSB0    [0403:6001] ftdi_sio");

        let bare = SerialPort {
            driver: None,
            usb_id: None,
            ..port
        };
        assert_eq!(bare.to_string().trim_end(), "/dev/ttyUSB0");
    }
}
