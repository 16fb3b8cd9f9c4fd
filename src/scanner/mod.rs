//! BLE scanner abstraction for beacon advertisements.
//!
//! This module provides a trait-based abstraction over different Bluetooth
//! scanning backends. Backends only acquire raw advertisement payloads
//! together with the sender address and signal strength; all decoding happens
//! in the pipeline.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::bt_addr::BtAddr;
use crate::packet::FrameKind;
use thiserror::Error;
use tokio::sync::mpsc;

/// A raw advertisement received from a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Address of the sending device
    pub addr: BtAddr,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Advertising data payload (LTV elements)
    pub payload: Vec<u8>,
}

/// Convenience alias for received advertisements or scan errors.
pub type AdvertisementResult = Result<Advertisement, ScanError>;

/// Channel buffer size for advertisement results.
pub const ADVERTISEMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Scan interval and window are expressed in 0.625 ms units on the HCI level.
const MS_FRACTION_DIVIDER: f64 = 0.625;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Malformed data received from the Bluetooth controller
    #[error("Invalid advertising report: {0}")]
    InvalidReport(String),
    /// Scan parameters outside the supported range
    #[error("Invalid scan parameters: {0}")]
    InvalidParameters(String),
    /// Backend not available (not compiled in)
    #[allow(dead_code)]
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
            #[cfg(not(any(feature = "bluer", feature = "hci")))]
            _ => unreachable!("Backend enum has no variants when no backend features are enabled"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            #[cfg(feature = "bluer")]
            "bluer" | "bluez" => Ok(Backend::Bluer),
            #[cfg(feature = "hci")]
            "hci" | "raw" => Ok(Backend::Hci),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// LE scan type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanType {
    /// Listen only, never request scan responses
    #[default]
    Passive,
    /// Request scan responses from advertisers
    Active,
}

/// Bluetooth address type used by the scanner itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressType {
    /// Use the device MAC address
    #[default]
    Public,
    /// Generate a random address for scanning
    Random,
}

/// LE scan parameters passed to the controller.
///
/// Interval and window must be within 2.5 ms and 10240 ms; equal interval and
/// window means the controller scans continuously.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanParameters {
    pub scan_type: ScanType,
    pub interval_ms: f64,
    pub window_ms: f64,
    pub address_type: AddressType,
    pub filter_duplicates: bool,
}

impl Default for ScanParameters {
    fn default() -> Self {
        ScanParameters {
            scan_type: ScanType::Passive,
            interval_ms: 10.0,
            window_ms: 10.0,
            address_type: AddressType::Public,
            filter_duplicates: false,
        }
    }
}

impl ScanParameters {
    /// Convert interval and window to HCI 0.625 ms units, validating range.
    pub fn to_hci_units(&self) -> Result<(u16, u16), ScanError> {
        let interval = Self::ms_to_units("interval", self.interval_ms)?;
        let window = Self::ms_to_units("window", self.window_ms)?;
        Ok((interval, window))
    }

    /// Validate the parameters without using them.
    pub fn validate(&self) -> Result<(), ScanError> {
        self.to_hci_units().map(|_| ())
    }

    fn ms_to_units(name: &str, ms: f64) -> Result<u16, ScanError> {
        let fractions = ms / MS_FRACTION_DIVIDER;
        if !(f64::from(0x0004u16)..=f64::from(0x4000u16)).contains(&fractions) {
            return Err(ScanError::InvalidParameters(format!(
                "scan {} of {} ms not in range 2.5 ms to 10240 ms",
                name, ms
            )));
        }
        Ok(fractions as u16)
    }
}

/// Scanner configuration shared by all backends.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// LE scan parameters
    pub parameters: ScanParameters,
    /// Frame families of interest; used to derive controller-side advertising
    /// monitor patterns where the backend supports them. Empty means all.
    pub kinds: Vec<FrameKind>,
}

/// Start scanning for beacon advertisements using the specified backend.
///
/// This is the main entry point for creating a scanner. It dispatches to the
/// appropriate backend implementation based on the `backend` parameter.
///
/// # Arguments
/// * `backend` - The scanner backend to use
/// * `config` - Scan parameters and frame families of interest
///
/// # Returns
/// A receiver for raw advertisements (or scan errors).
pub async fn start_scan(
    backend: Backend,
    config: ScanConfig,
) -> Result<mpsc::Receiver<AdvertisementResult>, ScanError> {
    config.parameters.validate()?;
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan(config).await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan(config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_backend_from_str() {
        assert_eq!(Backend::from_str("bluer").unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("bluez").unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("hci").unwrap(), Backend::Hci);
        assert_eq!(Backend::from_str("raw").unwrap(), Backend::Hci);
        assert!(Backend::from_str("invalid").is_err());
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(format!("{}", Backend::Bluer), "bluer");
        assert_eq!(format!("{}", Backend::Hci), "hci");
    }

    #[test]
    fn test_scan_parameters_default_valid() {
        let (interval, window) = ScanParameters::default().to_hci_units().unwrap();
        assert_eq!(interval, 16); // 10 ms in 0.625 ms units
        assert_eq!(window, 16);
    }

    #[test]
    fn test_scan_parameters_range() {
        let mut params = ScanParameters::default();

        params.interval_ms = 2.5;
        assert!(params.validate().is_ok());

        params.interval_ms = 10240.0;
        assert!(params.validate().is_ok());

        params.interval_ms = 2.0;
        assert!(matches!(
            params.validate(),
            Err(ScanError::InvalidParameters(_))
        ));

        params.interval_ms = 10241.0;
        assert!(matches!(
            params.validate(),
            Err(ScanError::InvalidParameters(_))
        ));

        params.interval_ms = 10.0;
        params.window_ms = 0.0;
        assert!(matches!(
            params.validate(),
            Err(ScanError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::InvalidParameters("scan interval of 2 ms not in range".to_string());
        assert_eq!(
            format!("{}", err),
            "Invalid scan parameters: scan interval of 2 ms not in range"
        );
    }
}
