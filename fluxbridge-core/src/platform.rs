//! Provides platform-specific functionality.
//!
//! This module contains the logic for interacting with the operating system to
//! discover serial ports a drive interface may be attached to.
//!
//! It uses conditional compilation (`#[cfg]`) to expose the correct
//! implementation for the target OS. Each submodule exposes the same public
//! API, so front-ends can list ports without caring about the platform.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;

#[cfg(target_os = "windows")]
mod windows;
#[cfg(target_os = "windows")]
pub use self::windows::*;
