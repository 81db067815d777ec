//! The boundary to the drive interface hardware.
//!
//! The byte-level protocol lives outside this crate. A transport only has to
//! open a port, report the interface's firmware version and close again; the
//! format engine built on top of it does the actual track I/O.
use std::fmt;
use std::ops::{Deref, DerefMut};
use thiserror::Error;

/// Firmware version reported by the drive interface.
///
/// Ordering is by major then minor version, so capability checks read as
/// plain comparisons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn at_least(self, required: FirmwareVersion) -> bool {
        self >= required
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The port could not be opened. Carries whatever the transport reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{detail}")]
pub struct TransportError {
    pub detail: String,
}

impl TransportError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Connection to a drive interface on a serial port.
pub trait DeviceTransport: Send {
    /// Opens the interface on `port`.
    fn open(&mut self, port: &str) -> Result<(), TransportError>;

    /// Firmware version of the opened interface. Only meaningful after a
    /// successful [`DeviceTransport::open`].
    fn firmware_version(&mut self) -> FirmwareVersion;

    fn close(&mut self);
}

/// An opened transport that is closed again when dropped.
///
/// Whatever path the worker leaves by, the port is released exactly once.
/// A transport that failed to open is never wrapped and so never closed.
pub struct OpenSession<T: DeviceTransport + ?Sized> {
    inner: Box<T>,
}

impl<T: DeviceTransport + ?Sized> OpenSession<T> {
    /// Opens `transport` on `port`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if the port cannot be opened. The
    /// transport is dropped without being closed.
    pub fn open(mut transport: Box<T>, port: &str) -> Result<Self, TransportError> {
        transport.open(port)?;
        Ok(Self { inner: transport })
    }
}

impl<T: DeviceTransport + ?Sized> Deref for OpenSession<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: DeviceTransport + ?Sized> DerefMut for OpenSession<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: DeviceTransport + ?Sized> Drop for OpenSession<T> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn versions_compare_major_then_minor() {
        let v1_9 = FirmwareVersion::new(1, 9);
        assert!(FirmwareVersion::new(2, 0).at_least(v1_9));
        assert!(FirmwareVersion::new(1, 9).at_least(v1_9));
        assert!(!FirmwareVersion::new(1, 8).at_least(v1_9));
        assert!(!FirmwareVersion::new(0, 12).at_least(v1_9));
        assert_eq!(v1_9.to_string(), "1.9");
    }

    struct Recorder {
        fail_open: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl DeviceTransport for Recorder {
        fn open(&mut self, _port: &str) -> Result<(), TransportError> {
            self.calls.lock().unwrap().push("open");
            if self.fail_open {
                Err(TransportError::new("port busy"))
            } else {
                Ok(())
            }
        }

        fn firmware_version(&mut self) -> FirmwareVersion {
            FirmwareVersion::new(1, 9)
        }

        fn close(&mut self) {
            self.calls.lock().unwrap().push("close");
        }
    }

    #[test]
    fn session_closes_on_drop() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        {
            let transport = Box::new(Recorder {
                fail_open: false,
                calls: calls.clone(),
            });
            let mut session = OpenSession::open(transport, "/dev/ttyUSB0").unwrap();
            assert_eq!(session.firmware_version(), FirmwareVersion::new(1, 9));
        }
        assert_eq!(*calls.lock().unwrap(), ["open", "close"]);
    }

    #[test]
    fn failed_open_is_not_closed() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let transport = Box::new(Recorder {
            fail_open: true,
            calls: calls.clone(),
        });
        let err = OpenSession::open(transport, "/dev/ttyUSB0").err().unwrap();
        assert_eq!(err.detail, "port busy");
        assert_eq!(*calls.lock().unwrap(), ["open"]);
    }
}
