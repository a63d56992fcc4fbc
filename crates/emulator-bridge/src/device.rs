//! Device Identity
//!
//! What a throwaway device is made of and how it is addressed once running.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Port validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("port {0} is outside the emulator console range 5554-5584")]
    OutOfRange(u16),
    #[error("port {0} is odd; emulator console ports must be even")]
    Odd(u16),
}

/// ADB serial of a running emulator, always `emulator-<port>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceSerial(String);

impl DeviceSerial {
    /// Derive the serial from a console port
    pub fn from_port(port: u16) -> Self {
        Self(format!("emulator-{}", port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// System image selection for a new AVD
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSelector {
    /// System image package, e.g. `system-images;android-34;google_apis;x86_64`
    pub package: String,
    /// ABI to use when the image ships more than one
    pub abi: Option<String>,
    /// System image tag, e.g. `google_apis`
    pub tag: Option<String>,
    /// Extra `avdmanager create avd` arguments
    pub options: Vec<String>,
}

/// Everything needed to create and launch one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// AVD name
    pub name: String,
    pub image: ImageSelector,
    /// Console port; ADB uses `port + 1`
    pub port: u16,
    /// Show the emulator window
    pub visible: bool,
    /// GPU mode passed to `-gpu`
    pub gpu: Option<String>,
    /// Extra emulator command line arguments
    pub emulator_args: Vec<String>,
}

impl DeviceSpec {
    pub fn serial(&self) -> DeviceSerial {
        DeviceSerial::from_port(self.port)
    }

    /// Validate the console port before anything is spawned
    pub fn validate(&self) -> Result<(), PortError> {
        crate::validate_port(self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_from_port() {
        let serial = DeviceSerial::from_port(5556);
        assert_eq!(serial.as_str(), "emulator-5556");
        assert_eq!(serial.to_string(), "emulator-5556");
    }

    #[test]
    fn test_spec_validation() {
        let mut spec = DeviceSpec {
            name: "ci".into(),
            image: ImageSelector::default(),
            port: 5554,
            visible: false,
            gpu: None,
            emulator_args: Vec::new(),
        };
        assert!(spec.validate().is_ok());
        assert_eq!(spec.serial(), DeviceSerial::from_port(5554));

        spec.port = 5557;
        assert_eq!(spec.validate(), Err(PortError::Odd(5557)));
    }
}
