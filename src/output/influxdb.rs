//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::packet::{BeaconFrame, PropertyValue};
use crate::pipeline::BeaconEvent;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::String(s) => write!(f, "\"{s}\""),
            FieldValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(time) = data_point.timestamp {
        let nanos = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("Time went backwards")
            .as_nanos();
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.measurement)?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// InfluxDB line protocol formatter for beacon events.
///
/// The device address and frame kind become tags; frame fields and the
/// received signal strength become fields.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    /// Create a new InfluxDB formatter.
    ///
    /// # Arguments
    /// * `measurement_name` - The measurement name to use in the line protocol
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, event: &BeaconEvent) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("mac".to_string(), event.addr.to_string());
        tags.insert("frame".to_string(), event.frame.kind().to_string());
        tags
    }

    /// Build the field set for InfluxDB line protocol.
    ///
    /// Only includes fields that have values (absent sensor readings are
    /// omitted).
    fn field_set(&self, event: &BeaconEvent) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert("rssi".to_string(), FieldValue::Integer(event.rssi.into()));

        macro_rules! add {
            ($name:literal, $value:expr) => {
                fields.insert($name.to_string(), $value);
            };
        }
        macro_rules! add_opt {
            ($name:literal, $value:expr, $ctor:expr) => {
                if let Some(v) = $value {
                    fields.insert($name.to_string(), $ctor(v));
                }
            };
        }

        match &event.frame {
            BeaconFrame::EddystoneUid(frame) => {
                add!("tx_power", FieldValue::Integer(frame.tx_power.into()));
                add!("namespace", FieldValue::String(frame.namespace.clone()));
                add!("instance", FieldValue::String(frame.instance.clone()));
            }
            BeaconFrame::EddystoneUrl(frame) => {
                add!("tx_power", FieldValue::Integer(frame.tx_power.into()));
                add!("url", FieldValue::String(frame.url.clone()));
            }
            BeaconFrame::EddystoneTlm(frame) => {
                add!("voltage", FieldValue::Integer(frame.voltage.into()));
                add!("temperature", FieldValue::Integer(frame.temperature.into()));
                add!(
                    "advertising_count",
                    FieldValue::Integer(frame.advertising_count.into())
                );
                add!(
                    "seconds_since_boot",
                    FieldValue::Integer(frame.seconds_since_boot.into())
                );
            }
            BeaconFrame::EddystoneEncryptedTlm(frame) => {
                add!(
                    "encrypted_data",
                    FieldValue::String(hex::encode(frame.encrypted_data))
                );
                add!("salt", FieldValue::Integer(frame.salt.into()));
                add!("mic", FieldValue::Integer(frame.mic.into()));
            }
            BeaconFrame::EddystoneEid(frame) => {
                add!("tx_power", FieldValue::Integer(frame.tx_power.into()));
                add!("eid", FieldValue::String(hex::encode(frame.eid)));
            }
            BeaconFrame::IBeacon(frame) => {
                add!("tx_power", FieldValue::Integer(frame.tx_power.into()));
                add!("uuid", FieldValue::String(frame.uuid.clone()));
                add!("major", FieldValue::Integer(frame.major.into()));
                add!("minor", FieldValue::Integer(frame.minor.into()));
            }
            BeaconFrame::EstimoteTelemetryA(frame) => {
                add!("identifier", FieldValue::String(frame.identifier.clone()));
                let (x, y, z) = frame.acceleration;
                add!("acceleration_x", FieldValue::Float(x));
                add!("acceleration_y", FieldValue::Float(y));
                add!("acceleration_z", FieldValue::Float(z));
                add!("is_moving", FieldValue::Boolean(frame.is_moving));
                add!(
                    "current_motion_state",
                    FieldValue::Integer(frame.current_motion_state.into())
                );
                add!(
                    "previous_motion_state",
                    FieldValue::Integer(frame.previous_motion_state.into())
                );
                add_opt!("pressure", frame.pressure, FieldValue::Float);
            }
            BeaconFrame::EstimoteTelemetryB(frame) => {
                add!("identifier", FieldValue::String(frame.identifier.clone()));
                add!("temperature", FieldValue::Float(frame.temperature));
                add!("uptime", FieldValue::Integer(frame.uptime.into()));
                add_opt!("ambient_light", frame.ambient_light, FieldValue::Float);
                if let Some((x, y, z)) = frame.magnetic_field {
                    add!("magnetic_field_x", FieldValue::Float(x));
                    add!("magnetic_field_y", FieldValue::Float(y));
                    add!("magnetic_field_z", FieldValue::Float(z));
                }
                add_opt!("voltage", frame.voltage, |v: u16| FieldValue::Integer(
                    v.into()
                ));
                add_opt!("battery_level", frame.battery_level, |v: u8| {
                    FieldValue::Integer(v.into())
                });
            }
            BeaconFrame::EstimoteNearable(frame) => {
                add!("identifier", FieldValue::String(frame.identifier.clone()));
                add!("temperature", FieldValue::Float(frame.temperature));
                add!("is_moving", FieldValue::Boolean(frame.is_moving));
            }
            BeaconFrame::CjMonitor(frame) => {
                add!("name", FieldValue::String(frame.name.clone()));
                add!("temperature", FieldValue::Float(frame.temperature));
                add!("humidity", FieldValue::Integer(frame.humidity.into()));
                add!("light", FieldValue::Float(frame.light));
            }
            BeaconFrame::ExposureNotification(frame) => {
                add!("identifier", FieldValue::String(frame.identifier.clone()));
                add!(
                    "encrypted_metadata",
                    FieldValue::String(hex::encode(frame.encrypted_metadata))
                );
            }
        }

        // Identity-omitting frames (TLM, URL, EID) carry the identity resolved
        // from the correlation cache, if a UID frame was seen for the address
        if event.frame.own_properties().is_none()
            && let Some(properties) = &event.properties
        {
            for (name, value) in properties.iter() {
                let field = match value {
                    PropertyValue::Text(text) => FieldValue::String(text.clone()),
                    PropertyValue::Int(num) => FieldValue::Integer(*num),
                    PropertyValue::Float(num) => FieldValue::Float(*num),
                    PropertyValue::Bool(flag) => FieldValue::Boolean(*flag),
                };
                fields.insert((*name).to_string(), field);
            }
        }

        fields
    }

    fn to_data_point(&self, event: &BeaconEvent, timestamp: Option<SystemTime>) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(event),
            field_set: self.field_set(event),
            timestamp,
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, event: &BeaconEvent) -> String {
        format!("{}", self.to_data_point(event, Some(SystemTime::now())))
    }
}
