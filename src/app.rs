//! Core application runner (business logic) for `beacon-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit
//! codes so it can be tested deterministically with an injected scanner and
//! injected output streams.

use crate::filters::DeviceFilter;
use crate::output::OutputFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use crate::packet::FrameKind;
use crate::pipeline::{BeaconEvent, BeaconPipeline};
use crate::scanner::{AdvertisementResult, Backend, ScanConfig, ScanError, ScanParameters,
                     ScanType};
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "beacon_advertisement")]
    pub influxdb_measurement: String,

    /// Only report advertisements from matching devices. Repeatable;
    /// a device matches when any one filter matches completely.
    /// Format: --device-filter namespace=12345678901234678901
    /// or --device-filter bt_addr=aa:bb:cc:dd:ee:ff
    #[arg(long = "device-filter", value_parser = crate::filters::parse_device_filter, value_name = "FILTER")]
    pub device_filters: Vec<DeviceFilter>,

    /// Only report frames of the given kinds. Repeatable.
    #[arg(long = "packet-filter", value_enum, value_name = "KIND")]
    pub packet_filters: Vec<FrameKind>,

    /// Verbose output, print scan errors to stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// LE scan interval in milliseconds (2.5-10240)
    #[arg(long, default_value_t = 10.0)]
    pub scan_interval_ms: f64,

    /// LE scan window in milliseconds (2.5-10240)
    #[arg(long, default_value_t = 10.0)]
    pub scan_window_ms: f64,

    /// Use active scanning (request scan responses)
    #[arg(long)]
    pub active: bool,

    /// Let the controller suppress duplicate advertisements
    #[arg(long)]
    pub filter_duplicates: bool,
}

impl Options {
    fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            parameters: ScanParameters {
                scan_type: if self.active {
                    ScanType::Active
                } else {
                    ScanType::Passive
                },
                interval_ms: self.scan_interval_ms,
                window_ms: self.scan_window_ms,
                filter_duplicates: self.filter_duplicates,
                ..ScanParameters::default()
            },
            kinds: self.packet_filters.clone(),
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
        config: ScanConfig,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<AdvertisementResult>, ScanError>> + Send + '_>,
    >;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
        config: ScanConfig,
    ) -> Pin<
        Box<dyn Future<Output = Result<mpsc::Receiver<AdvertisementResult>, ScanError>> + Send + '_>,
    > {
        Box::pin(async move { crate::scanner::start_scan(backend, config).await })
    }
}

fn write_event(
    formatter: &dyn OutputFormatter,
    event: &BeaconEvent,
    out: &mut dyn Write,
) -> io::Result<()> {
    let line = formatter.format(event);
    writeln!(out, "{line}")
}

/// Run the core processing loop, writing formatted events to `out` and
/// verbose errors to `err`.
///
/// Each received advertisement passes through the decode pipeline exactly
/// once; accepted events are formatted and written as one line each. Scan
/// errors are written to `err` only when `options.verbose` is true.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<(), RunError> {
    let formatter = InfluxDbFormatter::new(options.influxdb_measurement.clone());
    let mut pipeline =
        BeaconPipeline::new(options.device_filters.clone(), options.packet_filters.clone());

    let mut advertisements = scanner
        .start_scan(options.backend, options.scan_config())
        .await?;

    while let Some(result) = advertisements.recv().await {
        match result {
            Ok(advertisement) => {
                if let Some(event) = pipeline.process(
                    &advertisement.payload,
                    advertisement.addr,
                    advertisement.rssi,
                ) {
                    write_event(&formatter, &event, out)?;
                }
            }
            Err(scan_err) => {
                if options.verbose {
                    writeln!(err, "{scan_err}")?;
                }
            }
        }
    }

    Ok(())
}
