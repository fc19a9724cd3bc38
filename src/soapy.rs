//! SoapySDR-backed acquisition. Only built with the `soapy` feature.

use crate::config::{DeviceSettings, Gain};
use crate::types::{LabError, Result, SampleSource, SourceFactory};
use num_complex::Complex32;
use soapysdr::{Device, Direction, RxStream};
use tracing::{debug, info};

const RX_CHANNEL: usize = 0;
const READ_TIMEOUT_US: i64 = 1_000_000;

/// Labels of every device matching `device_args`.
pub fn enumerate_devices(device_args: &str) -> Result<Vec<String>> {
    Ok(soapysdr::enumerate(device_args)?
        .iter()
        .map(|args| args.get("label").unwrap_or("Unnamed device").to_string())
        .collect())
}

pub struct SoapySource {
    device: Device,
    stream: RxStream<Complex32>,
    device_args: String,
    sample_rate_hz: f64,
    center_freq_hz: f64,
    active: bool,
}

impl SoapySource {
    /// Open the first device matching the settings, configure gain and rate, and start streaming.
    pub fn open(settings: &DeviceSettings, sample_rate_hz: f64) -> Result<Self> {
        let labels = enumerate_devices(&settings.args)?;
        let Some(label) = labels.first() else {
            return Err(LabError::Device(format!(
                "no SDR device matches `{}`",
                settings.args
            )));
        };
        info!(message = "Opening SDR device", device = %label, args = %settings.args);

        let device = Device::new(settings.args.as_str())?;
        device.set_sample_rate(Direction::Rx, RX_CHANNEL, sample_rate_hz)?;
        match settings.gain {
            Gain::Auto => device.set_gain_mode(Direction::Rx, RX_CHANNEL, true)?,
            Gain::Db(db) => {
                device.set_gain_mode(Direction::Rx, RX_CHANNEL, false)?;
                device.set_gain(Direction::Rx, RX_CHANNEL, db)?;
            }
        }

        let mut stream = device.rx_stream::<Complex32>(&[RX_CHANNEL])?;
        stream.activate(None)?;

        Ok(Self {
            device,
            stream,
            device_args: settings.args.clone(),
            sample_rate_hz,
            center_freq_hz: 0.0,
            active: true,
        })
    }
}

impl SampleSource for SoapySource {
    fn tune(&mut self, center_freq_hz: f64, sample_rate_hz: f64) -> Result<()> {
        if !self.active {
            return Err(LabError::Device("stream is not active".into()));
        }
        if sample_rate_hz != self.sample_rate_hz {
            self.device
                .set_sample_rate(Direction::Rx, RX_CHANNEL, sample_rate_hz)?;
            self.sample_rate_hz = sample_rate_hz;
        }
        self.device
            .set_frequency(Direction::Rx, RX_CHANNEL, center_freq_hz, "")?;
        self.center_freq_hz = center_freq_hz;
        Ok(())
    }

    fn read(&mut self, sample_count: usize) -> Result<Vec<Complex32>> {
        if !self.active {
            return Err(LabError::Device("stream is not active".into()));
        }
        let mut buffer = vec![Complex32::new(0.0, 0.0); sample_count];
        let mut filled = 0;
        while filled < sample_count {
            let read = self
                .stream
                .read(&mut [&mut buffer[filled..]], READ_TIMEOUT_US)?;
            if read == 0 {
                return Err(LabError::Device(format!(
                    "stream returned no samples at {:.3} MHz",
                    self.center_freq_hz / 1e6
                )));
            }
            filled += read;
        }
        debug!(center_mhz = self.center_freq_hz / 1e6, samples = filled, "Acquired samples");
        Ok(buffer)
    }

    fn deactivate(&mut self) -> Result<()> {
        if self.active {
            self.active = false;
            self.stream.deactivate(None)?;
        }
        Ok(())
    }

    fn device_args(&self) -> &str {
        &self.device_args
    }
}

/// Opens a [`SoapySource`] with fixed device settings for each scan.
pub struct SoapyFactory {
    settings: DeviceSettings,
}

impl SoapyFactory {
    pub fn new(settings: DeviceSettings) -> Self {
        Self { settings }
    }
}

impl SourceFactory for SoapyFactory {
    fn open(&self, sample_rate_hz: f64) -> Result<Box<dyn SampleSource>> {
        Ok(Box::new(SoapySource::open(&self.settings, sample_rate_hz)?))
    }
}
