use crate::device::SerialPort;
use anyhow::{Result, bail};

/// Scans for serial ports on a Windows system.
///
/// # Errors
///
/// Always fails for now; enter the `COMx` port name directly instead.
pub fn get_serial_ports() -> Result<Vec<SerialPort>> {
    // TODO: Enumerate COM ports through SetupDiGetClassDevsW with the
    // GUID_DEVINTERFACE_COMPORT interface class.
    bail!("Serial port discovery is not yet implemented on Windows.")
}
