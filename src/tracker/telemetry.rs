use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::Range;
use std::str::FromStr;

use anyhow::anyhow;
use serde_json::json;

use crate::messaging::envelope::Payload;
use crate::orbit::geo::GeoPoint;
use crate::util::clock::{local_datetime_string, unix_now_secs};
use crate::util::random::Random;

const LAT_LONG_STEP: f64 = 0.001;
const HEART_RATE_STEP: f64 = 0.5;
const BODY_TEMPERATURE_STEP: f64 = 0.1;

fn walk<R: Random>(value: f64, step: f64, bounds: &Range<f64>) -> f64 {
    (value + R::gen_f64_range(-step..step)).clamp(bounds.start, bounds.end)
}

/// What distinguishes one kind of tracked animal from another: plausible vital ranges, and
///  optionally a simulated value of its own (e.g. a bird's height).
pub trait TelemetryExtension: Debug + Send + 'static {
    fn default_device_name(&self) -> &'static str;

    fn heart_rate_range(&self) -> Range<f64>;
    fn body_temperature_range(&self) -> Range<f64>;

    /// advances the extension's own values by one step and adds them to the payload
    fn step<R: Random>(&mut self, payload: &mut Payload);

    /// relative to sea level, negative below
    fn altitude_km(&self) -> f64;
}

#[derive(Debug, Clone)]
pub struct Bird {
    pub height_m: f64,
}
impl Bird {
    const HEIGHT_BOUNDS: Range<f64> = 0.0..11000.0;

    pub fn new<R: Random>() -> Bird {
        Bird { height_m: R::gen_f64_range(0.0..9000.0) }
    }
}
impl TelemetryExtension for Bird {
    fn default_device_name(&self) -> &'static str {
        "BirdTrackerDevice"
    }
    fn heart_rate_range(&self) -> Range<f64> {
        100.0..600.0
    }
    fn body_temperature_range(&self) -> Range<f64> {
        39.0..43.0
    }

    fn step<R: Random>(&mut self, payload: &mut Payload) {
        self.height_m = walk::<R>(self.height_m, 5.0, &Self::HEIGHT_BOUNDS);
        payload.insert("height".to_string(), json!(self.height_m));
    }

    fn altitude_km(&self) -> f64 {
        self.height_m / 1000.0
    }
}

#[derive(Debug, Clone)]
pub struct Marine {
    pub depth_m: f64,
}
impl Marine {
    const DEPTH_BOUNDS: Range<f64> = 0.0..11000.0;

    pub fn new<R: Random>() -> Marine {
        Marine { depth_m: R::gen_f64_range(Self::DEPTH_BOUNDS) }
    }
}
impl TelemetryExtension for Marine {
    fn default_device_name(&self) -> &'static str {
        "MarineAnimalTrackerDevice"
    }
    fn heart_rate_range(&self) -> Range<f64> {
        20.0..40.0
    }
    fn body_temperature_range(&self) -> Range<f64> {
        36.0..39.0
    }

    fn step<R: Random>(&mut self, payload: &mut Payload) {
        self.depth_m = walk::<R>(self.depth_m, 1.0, &Self::DEPTH_BOUNDS);
        payload.insert("depth".to_string(), json!(self.depth_m));
    }

    fn altitude_km(&self) -> f64 {
        -self.depth_m / 1000.0
    }
}

#[derive(Debug, Clone)]
pub struct Terrestrial;
impl TelemetryExtension for Terrestrial {
    fn default_device_name(&self) -> &'static str {
        "TerrestrialAnimalTrackerDevice"
    }
    fn heart_rate_range(&self) -> Range<f64> {
        20.0..90.0
    }
    fn body_temperature_range(&self) -> Range<f64> {
        36.0..39.0
    }

    fn step<R: Random>(&mut self, _payload: &mut Payload) {
    }

    fn altitude_km(&self) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TrackerKind {
    Bird,
    Marine,
    Terrestrial,
}

impl FromStr for TrackerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bird" => Ok(TrackerKind::Bird),
            "marine" => Ok(TrackerKind::Marine),
            "terrestrial" => Ok(TrackerKind::Terrestrial),
            other => Err(anyhow!("unknown tracker kind {:?} - expected bird, marine or terrestrial", other)),
        }
    }
}


/// Simulated sensor readings of one tracked animal: bounded random walks of its position and
///  vitals, plus whatever the extension adds.
pub struct TelemetryProducer<X: TelemetryExtension, R: Random> {
    device_name: String,
    extension: X,
    latitude: f64,
    longitude: f64,
    heart_rate: f64,
    body_temperature: f64,
    message_order: u64,
    _random: PhantomData<R>,
}

impl <X: TelemetryExtension, R: Random> TelemetryProducer<X, R> {
    pub fn new(device_name: Option<String>, extension: X) -> TelemetryProducer<X, R> {
        TelemetryProducer {
            device_name: device_name.unwrap_or_else(|| extension.default_device_name().to_string()),
            latitude: R::gen_f64_range(-90.0..90.0),
            longitude: R::gen_f64_range(-180.0..180.0),
            heart_rate: R::gen_f64_range(extension.heart_rate_range()),
            body_temperature: R::gen_f64_range(extension.body_temperature_range()),
            extension,
            message_order: 0,
            _random: Default::default(),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude, self.extension.altitude_km())
    }

    /// advances every simulated value by one step and returns the resulting payload
    pub fn sample(&mut self) -> Payload {
        self.latitude = walk::<R>(self.latitude, LAT_LONG_STEP, &(-90.0..90.0));
        self.longitude = walk::<R>(self.longitude, LAT_LONG_STEP, &(-180.0..180.0));
        self.heart_rate = walk::<R>(self.heart_rate, HEART_RATE_STEP, &self.extension.heart_rate_range());
        self.body_temperature = walk::<R>(self.body_temperature, BODY_TEMPERATURE_STEP, &self.extension.body_temperature_range());
        self.message_order += 1;

        let mut payload = Payload::new();
        payload.insert("message_order".to_string(), json!(self.message_order));
        payload.insert("datetime".to_string(), json!(local_datetime_string()));
        payload.insert("device_name".to_string(), json!(self.device_name));
        payload.insert("latitude".to_string(), json!(self.latitude));
        payload.insert("longitude".to_string(), json!(self.longitude));
        payload.insert("heart_rate".to_string(), json!(self.heart_rate));
        payload.insert("body_temperature".to_string(), json!(self.body_temperature));
        payload.insert("timestamp".to_string(), json!(unix_now_secs()));

        self.extension.step::<R>(&mut payload);
        payload
    }
}
