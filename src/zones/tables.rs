use crate::zones::Zone;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Measurement shown on the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    #[serde(alias = "pm2.5")]
    Pm25,
    Pm10,
    Aqi,
    Co2,
    Temperature,
    Humidity,
    Pressure,
    Noise,
}

const AQI_GREEN: &str = "#00e400";
const AQI_YELLOW: &str = "#ffff00";
const AQI_ORANGE: &str = "#ff7e00";
const AQI_RED: &str = "#ff0000";
const AQI_PURPLE: &str = "#8f3f97";
const AQI_MAROON: &str = "#7e0023";

const PM25_ZONES: [Zone; 6] = [
    Zone::upto(9.0, AQI_GREEN, "Good"),
    Zone::upto(35.4, AQI_YELLOW, "Moderate"),
    Zone::upto(55.4, AQI_ORANGE, "Unhealthy for sensitive groups"),
    Zone::upto(125.4, AQI_RED, "Unhealthy"),
    Zone::upto(225.4, AQI_PURPLE, "Very unhealthy"),
    Zone::open(AQI_MAROON, "Hazardous"),
];

const PM10_ZONES: [Zone; 6] = [
    Zone::upto(54.0, AQI_GREEN, "Good"),
    Zone::upto(154.0, AQI_YELLOW, "Moderate"),
    Zone::upto(254.0, AQI_ORANGE, "Unhealthy for sensitive groups"),
    Zone::upto(354.0, AQI_RED, "Unhealthy"),
    Zone::upto(424.0, AQI_PURPLE, "Very unhealthy"),
    Zone::open(AQI_MAROON, "Hazardous"),
];

const AQI_ZONES: [Zone; 6] = [
    Zone::upto(50.0, AQI_GREEN, "Good"),
    Zone::upto(100.0, AQI_YELLOW, "Moderate"),
    Zone::upto(150.0, AQI_ORANGE, "Unhealthy for sensitive groups"),
    Zone::upto(200.0, AQI_RED, "Unhealthy"),
    Zone::upto(300.0, AQI_PURPLE, "Very unhealthy"),
    Zone::open(AQI_MAROON, "Hazardous"),
];

const CO2_ZONES: [Zone; 6] = [
    Zone::upto(600.0, "#1a9850", "Excellent"),
    Zone::upto(800.0, "#91cf60", "Good"),
    Zone::upto(1_000.0, "#fee08b", "Moderate"),
    Zone::upto(1_500.0, "#fc8d59", "Poor"),
    Zone::upto(2_000.0, "#d73027", "Very poor"),
    Zone::open("#7f0000", "Hazardous"),
];

const TEMPERATURE_ZONES: [Zone; 5] = [
    Zone::upto(0.0, "#2c7bb6", "Freezing"),
    Zone::upto(10.0, "#abd9e9", "Cold"),
    Zone::upto(20.0, "#a6d96a", "Mild"),
    Zone::upto(28.0, "#fdae61", "Warm"),
    Zone::open("#d7191c", "Hot"),
];

const HUMIDITY_ZONES: [Zone; 3] = [
    Zone::upto(30.0, "#fdae61", "Dry"),
    Zone::upto(60.0, "#a6d96a", "Comfortable"),
    Zone::open("#2c7bb6", "Humid"),
];

const PRESSURE_ZONES: [Zone; 3] = [
    Zone::upto(1_000.0, "#2c7bb6", "Low"),
    Zone::upto(1_025.0, "#a6d96a", "Normal"),
    Zone::open("#fdae61", "High"),
];

const NOISE_ZONES: [Zone; 4] = [
    Zone::upto(45.0, "#1a9850", "Quiet"),
    Zone::upto(60.0, "#fee08b", "Moderate"),
    Zone::upto(75.0, "#fc8d59", "Loud"),
    Zone::open("#d73027", "Very loud"),
];

impl Unit {
    pub const ALL: [Unit; 8] = [
        Unit::Pm25,
        Unit::Pm10,
        Unit::Aqi,
        Unit::Co2,
        Unit::Temperature,
        Unit::Humidity,
        Unit::Pressure,
        Unit::Noise,
    ];

    /// Key of this measurement in readings and API paths.
    pub fn key(self) -> &'static str {
        match self {
            Unit::Pm25 => "pm25",
            Unit::Pm10 => "pm10",
            Unit::Aqi => "aqi",
            Unit::Co2 => "co2",
            Unit::Temperature => "temperature",
            Unit::Humidity => "humidity",
            Unit::Pressure => "pressure",
            Unit::Noise => "noise",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Pm25 | Unit::Pm10 => "µg/m³",
            Unit::Aqi => "",
            Unit::Co2 => "ppm",
            Unit::Temperature => "℃",
            Unit::Humidity => "%",
            Unit::Pressure => "hPa",
            Unit::Noise => "dB",
        }
    }

    pub fn zones(self) -> &'static [Zone] {
        match self {
            Unit::Pm25 => &PM25_ZONES,
            Unit::Pm10 => &PM10_ZONES,
            Unit::Aqi => &AQI_ZONES,
            Unit::Co2 => &CO2_ZONES,
            Unit::Temperature => &TEMPERATURE_ZONES,
            Unit::Humidity => &HUMIDITY_ZONES,
            Unit::Pressure => &PRESSURE_ZONES,
            Unit::Noise => &NOISE_ZONES,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        if matches!(lowered.as_str(), "pm2.5" | "pm2_5") {
            return Ok(Unit::Pm25);
        }
        Unit::ALL
            .into_iter()
            .find(|unit| unit.key() == lowered)
            .ok_or_else(|| format!("unknown unit: {s}"))
    }
}
