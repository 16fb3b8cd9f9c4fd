//! Raw HCI socket backend for beacon scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{ADVERTISEMENT_CHANNEL_BUFFER_SIZE, Advertisement, AdvertisementResult, AddressType,
            ScanConfig, ScanError, ScanType};
use crate::bt_addr::BtAddr;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_SCAN_ACTIVE: u8 = 0x01;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;
const LE_RANDOM_ADDRESS: u8 = 0x01;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// LE Set Scan Parameters command
#[repr(C, packed)]
struct LeSetScanParametersCmd {
    scan_type: u8,
    interval: u16,
    window: u16,
    own_address_type: u8,
    filter_policy: u8,
}

/// LE Set Scan Enable command
#[repr(C, packed)]
struct LeSetScanEnableCmd {
    enable: u8,
    filter_dup: u8,
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(0x01); // HCI command packet type
    packet.push((opcode & 0xFF) as u8);
    packet.push((opcode >> 8) as u8);
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // Create a raw Bluetooth HCI socket using libc directly
    // since nix doesn't support BTPROTO_HCI
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Set HCI socket filter
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Configure LE scanning from the given scan parameters
fn configure_le_scan(fd: &OwnedFd, config: &ScanConfig) -> Result<(), ScanError> {
    let (interval, window) = config.parameters.to_hci_units()?;

    let params = LeSetScanParametersCmd {
        scan_type: match config.parameters.scan_type {
            ScanType::Passive => LE_SCAN_PASSIVE,
            ScanType::Active => LE_SCAN_ACTIVE,
        },
        interval,
        window,
        own_address_type: match config.parameters.address_type {
            AddressType::Public => LE_PUBLIC_ADDRESS,
            AddressType::Random => LE_RANDOM_ADDRESS,
        },
        filter_policy: FILTER_POLICY_ACCEPT_ALL,
    };

    let params_bytes = unsafe {
        std::slice::from_raw_parts(
            &params as *const LeSetScanParametersCmd as *const u8,
            mem::size_of::<LeSetScanParametersCmd>(),
        )
    };

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, params_bytes);
    send_hci_command(fd, &packet)?;

    // Enable scanning
    let enable = LeSetScanEnableCmd {
        enable: 0x01,
        filter_dup: config.parameters.filter_duplicates as u8,
    };

    let enable_bytes = unsafe {
        std::slice::from_raw_parts(
            &enable as *const LeSetScanEnableCmd as *const u8,
            mem::size_of::<LeSetScanEnableCmd>(),
        )
    };

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, enable_bytes);
    send_hci_command(fd, &packet)?;

    Ok(())
}

/// Parse an LE advertising report into a raw advertisement.
///
/// Report layout after the 4-byte HCI header: number of reports, event type,
/// address type, 6-byte address (little-endian), data length, data, RSSI.
fn parse_advertising_report(data: &[u8]) -> Option<AdvertisementResult> {
    // Minimum size for an advertising report
    if data.len() < 12 {
        return Some(Err(ScanError::InvalidReport(
            "Advertising report too short".into(),
        )));
    }

    // Skip HCI header (1 byte packet type + 1 byte event code + 1 byte param len + 1 byte subevent)
    let report = &data[4..];

    // Number of reports; we process the first one
    let num_reports = report[0] as usize;
    if num_reports == 0 {
        return None;
    }

    // Skip: num_reports(1) + event_type(1) + addr_type(1)
    if report.len() < 10 {
        return None;
    }

    // Extract address (6 bytes, in reverse order)
    let mut addr = [0u8; 6];
    addr.copy_from_slice(&report[3..9]);
    addr.reverse(); // HCI uses little-endian address

    let data_len = report[9] as usize;
    if report.len() < 10 + data_len + 1 {
        return Some(Err(ScanError::InvalidReport(
            "Advertising report data overruns the event".into(),
        )));
    }

    let payload = report[10..10 + data_len].to_vec();
    let rssi = i16::from(report[10 + data_len] as i8);

    Some(Ok(Advertisement {
        addr: BtAddr(addr),
        rssi,
        payload,
    }))
}

/// Start scanning for beacon advertisements using raw HCI sockets.
///
/// This function opens a raw HCI socket, configures LE scanning with the
/// given parameters, and forwards advertising reports. Received
/// advertisements are sent through the returned channel. Runs indefinitely
/// until interrupted.
///
/// # Returns
/// A receiver for raw advertisements (or scan errors).
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan(
    config: ScanConfig,
) -> Result<mpsc::Receiver<AdvertisementResult>, ScanError> {
    // Open and configure HCI socket for receiving events
    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, 0)?; // Bind to hci0 to receive advertising events
    set_hci_filter(&fd)?;

    // We need a separate socket for sending commands (bound to specific device)
    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, 0)?; // Bind to hci0
    configure_le_scan(&cmd_fd, &config)?;

    let (tx, rx) = mpsc::channel(ADVERTISEMENT_CHANNEL_BUFFER_SIZE);

    // Wrap in AsyncFd for async I/O
    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    // Spawn a task to read and process HCI events
    tokio::spawn(async move {
        let _cmd_fd = cmd_fd; // Keep command socket alive
        let mut buf = [0u8; 258]; // Max HCI event size

        loop {
            // Wait for the socket to be readable
            let mut guard = match async_fd.readable().await {
                Ok(guard) => guard,
                Err(_) => break,
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,  // EOF or empty read
                    Ok(Err(_)) => break, // Read error
                    Err(_) => break,     // WouldBlock - no more data
                };

                // Check if this is an LE advertising report
                if n >= 4
                    && buf[0] == HCI_EVENT_PKT
                    && buf[1] == EVT_LE_META_EVENT
                    && buf[3] == EVT_LE_ADVERTISING_REPORT
                    && let Some(result) = parse_advertising_report(&buf[..n])
                {
                    let _ = tx.send(result).await;
                }
            }
        }
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a full HCI advertising report event around a payload.
    fn report_event(addr: [u8; 6], payload: &[u8], rssi: i8) -> Vec<u8> {
        let mut event = vec![
            HCI_EVENT_PKT,
            EVT_LE_META_EVENT,
            (payload.len() + 11) as u8,   // parameter length
            EVT_LE_ADVERTISING_REPORT,
            0x01, // one report
            0x00, // event type
            0x00, // address type
        ];
        let mut reversed = addr;
        reversed.reverse();
        event.extend_from_slice(&reversed);
        event.push(payload.len() as u8);
        event.extend_from_slice(payload);
        event.push(rssi as u8);
        event
    }

    #[test]
    fn test_parse_advertising_report() {
        let payload = [0x02, 0x01, 0x06, 0x03, 0x03, 0xaa, 0xfe];
        let event = report_event([0x1c, 0xd6, 0xcd, 0xef, 0x94, 0x35], &payload, -35);

        let advertisement = parse_advertising_report(&event).unwrap().unwrap();
        assert_eq!(
            advertisement.addr,
            BtAddr([0x1c, 0xd6, 0xcd, 0xef, 0x94, 0x35])
        );
        assert_eq!(advertisement.rssi, -35);
        assert_eq!(advertisement.payload, payload);
    }

    #[test]
    fn test_parse_advertising_report_too_short() {
        let result = parse_advertising_report(&[HCI_EVENT_PKT, EVT_LE_META_EVENT]).unwrap();
        assert!(matches!(result, Err(ScanError::InvalidReport(_))));
    }

    #[test]
    fn test_parse_advertising_report_data_overrun() {
        let payload = [0x02, 0x01, 0x06];
        let mut event = report_event([0x1c, 0xd6, 0xcd, 0xef, 0x94, 0x35], &payload, -35);
        // claim more data than the event carries
        event[13] = 0x20;
        let result = parse_advertising_report(&event).unwrap();
        assert!(matches!(result, Err(ScanError::InvalidReport(_))));
    }

    #[test]
    fn test_parse_advertising_report_zero_reports() {
        let payload = [0x02, 0x01, 0x06, 0x03, 0x03, 0xaa, 0xfe, 0x00, 0x00, 0x00];
        let mut event = report_event([0x1c, 0xd6, 0xcd, 0xef, 0x94, 0x35], &payload, -35);
        event[4] = 0x00;
        assert!(parse_advertising_report(&event).is_none());
    }

    #[test]
    fn test_hci_command_packet() {
        let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);
        // opcode 0x200C little-endian after the packet type
        assert_eq!(packet, vec![0x01, 0x0C, 0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_hci_filter_masks() {
        let mut filter = HciFilter::new();
        filter.set_ptype(HCI_EVENT_PKT);
        filter.set_event(EVT_LE_META_EVENT);
        assert_eq!(filter.type_mask, 1 << 4);
        assert_eq!(filter.event_mask[1], 1 << (0x3E - 32));
    }
}
