//! Simulated sensor for running the node without hardware
//!
//! Generates two-channel readings from configurable signal patterns, the
//! way a barometer (temperature + pressure) or a single-channel probe would.
//!
//! # Patterns
//!
//! - [`SignalPattern::Constant`] - Fixed value
//! - [`SignalPattern::Sine`] - Sinusoid with frequency, amplitude and offset
//! - [`SignalPattern::Counter`] - Incrementing counter with wrap-around
//! - [`SignalPattern::Random`] - Uniform values within a range
//! - [`SignalPattern::Sawtooth`] - Linear ramp that resets every period
//! - [`SignalPattern::Square`] - Alternates between `+amplitude` and `-amplitude`
//! - [`SignalPattern::Triangle`] - Symmetric ramp up and down
//!
//! # Example
//!
//! ```ignore
//! use flashlog_rs::sensor::{SignalPattern, SimulatedSensor};
//!
//! let mut sensor = SimulatedSensor::new(SignalPattern::Sine {
//!     frequency: 0.1,
//!     amplitude: 2.0,
//!     offset: 21.0,
//! })
//! .with_second_channel(SignalPattern::Constant(1013.25))
//! .with_noise(0.05);
//!
//! let (temperature, pressure) = sensor.read(elapsed_secs);
//! ```

use crate::config::SensorKind;
use crate::ingest::Sample;

/// Pattern for generating readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    /// Constant value
    Constant(f64),
    /// Sine wave
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Counter that increments
    Counter { step: f64, min: f64, max: f64 },
    /// Random values within range
    Random { min: f64, max: f64 },
    /// Sawtooth wave
    Sawtooth { period: f64, amplitude: f64 },
    /// Square wave
    Square { period: f64, amplitude: f64 },
    /// Triangle wave
    Triangle { period: f64, amplitude: f64 },
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Sine {
            frequency: 0.05,
            amplitude: 2.0,
            offset: 21.0,
        }
    }
}

/// One simulated channel
#[derive(Debug, Clone)]
struct Channel {
    pattern: SignalPattern,
    counter_value: f64,
}

impl Channel {
    fn new(pattern: SignalPattern) -> Self {
        let counter_value = match pattern {
            SignalPattern::Counter { min, step, .. } => min - step,
            _ => 0.0,
        };
        Self {
            pattern,
            counter_value,
        }
    }

    fn generate(&mut self, elapsed_secs: f64, rng: &mut XorShift) -> f64 {
        match self.pattern {
            SignalPattern::Constant(v) => v,
            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * elapsed_secs).sin(),
            SignalPattern::Counter { step, min, max } => {
                self.counter_value += step;
                if self.counter_value > max {
                    self.counter_value = min;
                } else if self.counter_value < min {
                    self.counter_value = max;
                }
                self.counter_value
            }
            SignalPattern::Random { min, max } => min + rng.next_f64() * (max - min),
            SignalPattern::Sawtooth { period, amplitude } => {
                let t = elapsed_secs % period;
                amplitude * (t / period)
            }
            SignalPattern::Square { period, amplitude } => {
                if elapsed_secs % period < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
            SignalPattern::Triangle { period, amplitude } => {
                let t = elapsed_secs % period;
                let half = period / 2.0;
                if t < half {
                    amplitude * (2.0 * t / half - 1.0)
                } else {
                    amplitude * (1.0 - 2.0 * (t - half) / half)
                }
            }
        }
    }
}

/// xorshift64 generator, seedable for reproducible runs
#[derive(Debug, Clone)]
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_f64(&mut self) -> f64 {
        let mut s = self.0;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.0 = s;
        (s as f64) / (u64::MAX as f64)
    }
}

/// Pattern-driven stand-in for a real sensor driver
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    primary: Channel,
    secondary: Option<Channel>,
    noise_amplitude: f64,
    rng: XorShift,
    readings: u64,
}

impl SimulatedSensor {
    /// Single-channel sensor; the second value reads as NaN
    pub fn new(pattern: SignalPattern) -> Self {
        Self {
            primary: Channel::new(pattern),
            secondary: None,
            noise_amplitude: 0.0,
            rng: XorShift::new(12345),
            readings: 0,
        }
    }

    /// Default patterns for a sensor kind
    pub fn for_kind(kind: SensorKind) -> Self {
        match kind {
            SensorKind::I2c => Self::new(SignalPattern::default())
                .with_second_channel(SignalPattern::Sine {
                    frequency: 0.01,
                    amplitude: 1.5,
                    offset: 1013.25,
                })
                .with_noise(0.05),
            SensorKind::OneWire => Self::new(SignalPattern::default()).with_noise(0.1),
            SensorKind::Analog => Self::new(SignalPattern::Triangle {
                period: 20.0,
                amplitude: 1650.0,
            }),
            SensorKind::Digital => Self::new(SignalPattern::Square {
                period: 4.0,
                amplitude: 1.0,
            }),
            SensorKind::Random => Self::new(SignalPattern::Random {
                min: 0.0,
                max: 100.0,
            })
            .with_second_channel(SignalPattern::Random {
                min: 0.0,
                max: 100.0,
            }),
        }
    }

    /// Add a second channel
    pub fn with_second_channel(mut self, pattern: SignalPattern) -> Self {
        self.secondary = Some(Channel::new(pattern));
        self
    }

    /// Add uniform noise of the given amplitude to every reading
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Reseed the random source
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = XorShift::new(seed);
        self
    }

    /// Number of readings taken
    pub fn readings(&self) -> u64 {
        self.readings
    }

    fn noisy(&mut self, value: f64) -> f64 {
        if self.noise_amplitude > 0.0 {
            value + (self.rng.next_f64() - 0.5) * 2.0 * self.noise_amplitude
        } else {
            value
        }
    }

    /// Read both channels at `elapsed_secs` since start
    pub fn read(&mut self, elapsed_secs: f64) -> (f64, f64) {
        self.readings += 1;
        let first = self.primary.generate(elapsed_secs, &mut self.rng);
        let first = self.noisy(first);

        let second = match self.secondary.as_mut() {
            Some(channel) => {
                let v = channel.generate(elapsed_secs, &mut self.rng);
                self.noisy(v)
            }
            None => f64::NAN,
        };
        (first, second)
    }

    /// Read both channels into a sample stamped `timestamp_ms`
    pub fn sample(&mut self, timestamp_ms: u64, elapsed_secs: f64) -> Sample {
        let (v1, v2) = self.read(elapsed_secs);
        Sample::new(timestamp_ms).with(v1).with(v2)
    }
}
