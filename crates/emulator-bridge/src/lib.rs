//! Android Emulator Bridge
//!
//! Manages Android Virtual Devices (AVDs), emulator processes and the ADB
//! commands used to drive a throwaway device through a test run.

pub mod avd;
pub mod emulator;
pub mod adb;
pub mod device;
pub mod boot;

pub use avd::{AvdManager, AvdError, ImageRegistry};
pub use emulator::{
    EmulatorLauncher, EmulatorProcess, EmulatorOptions, EmulatorError,
    DeviceSupervisor, DeviceProcess, ProcessStatus,
};
pub use adb::{AdbClient, AdbError, BootProbe, DeviceControl};
pub use device::{DeviceSerial, DeviceSpec, ImageSelector, PortError};
pub use boot::{BootDeadline, BootPoller, BootState};

use rand::Rng;

/// Emulator console port range; both ends are usable
pub const EMULATOR_PORT_RANGE: std::ops::RangeInclusive<u16> = 5554..=5584;

/// Check that a console port is even and inside [`EMULATOR_PORT_RANGE`]
pub fn validate_port(port: u16) -> Result<(), PortError> {
    if !EMULATOR_PORT_RANGE.contains(&port) {
        return Err(PortError::OutOfRange(port));
    }
    if port % 2 != 0 {
        return Err(PortError::Odd(port));
    }
    Ok(())
}

/// Pick a random even console port
pub fn random_emulator_port() -> u16 {
    let slots = (EMULATOR_PORT_RANGE.end() - EMULATOR_PORT_RANGE.start()) / 2;
    let slot = rand::thread_rng().gen_range(0..=slots);
    EMULATOR_PORT_RANGE.start() + slot * 2
}
