// PCA9685 PWM chip access behind the channel-duty primitive
//
// The register protocol itself lives in the pwm-pca9685 crate; this
// module owns chip bring-up (prescale from frequency, wake) and exposes
// the one primitive the gateway needs: set_channel_duty(channel, duty).

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

use embedded_hal::i2c::I2c;
use pwm_pca9685::{Address, Channel, Pca9685};
use tracing::debug;

/// Internal oscillator of the PCA9685
const OSC_CLOCK_HZ: f64 = 25_000_000.0;

/// Counts per PWM frame (12-bit counter)
pub const COUNTS_PER_FRAME: u16 = 4096;

/// Duty values are 12-bit: 0..=4095 counts high per frame
pub const DUTY_FULL: u16 = 4095;

/// Error types for PWM chip access
#[derive(Debug, thiserror::Error)]
pub enum PwmError {
    #[error("PWM bus error: {0}")]
    Bus(String),

    #[error("channel {0} out of range (0-15)")]
    InvalidChannel(u8),
}

pub type Result<T> = std::result::Result<T, PwmError>;

/// The raw actuation primitive: one 12-bit duty per chip channel.
/// Everything above this trait is chassis-specific channel mapping.
pub trait PwmChip {
    fn set_channel_duty(&mut self, channel: u8, duty: u16) -> Result<()>;

    /// Drive every channel low. Used on every shutdown path.
    fn all_off(&mut self) -> Result<()>;
}

/// Compute the PRE_SCALE register value for a target frame frequency.
pub fn prescale_for(freq_hz: f64) -> u8 {
    let prescale = (OSC_CLOCK_HZ / (COUNTS_PER_FRAME as f64 * freq_hz)).round() - 1.0;
    prescale.clamp(3.0, 255.0) as u8
}

fn channel_from_index(index: u8) -> Result<Channel> {
    let channel = match index {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        other => return Err(PwmError::InvalidChannel(other)),
    };
    Ok(channel)
}

/// PCA9685 chip on an I2C bus.
pub struct Pca9685Chip<I2C> {
    pca: Pca9685<I2C>,
}

impl<I2C, E> Pca9685Chip<I2C>
where
    I2C: I2c<Error = E>,
    E: Debug,
{
    /// Bring the chip up: wake it and program the frame frequency.
    pub fn new(i2c: I2C, address: u8, freq_hz: f64) -> Result<Self> {
        let mut pca =
            Pca9685::new(i2c, Address::from(address)).map_err(|e| PwmError::Bus(format!("{e:?}")))?;
        pca.enable().map_err(|e| PwmError::Bus(format!("{e:?}")))?;
        pca.set_prescale(prescale_for(freq_hz))
            .map_err(|e| PwmError::Bus(format!("{e:?}")))?;
        Ok(Self { pca })
    }

    /// Release the underlying I2C bus.
    pub fn destroy(self) -> I2C {
        self.pca.destroy()
    }
}

impl<I2C, E> PwmChip for Pca9685Chip<I2C>
where
    I2C: I2c<Error = E>,
    E: Debug,
{
    fn set_channel_duty(&mut self, channel: u8, duty: u16) -> Result<()> {
        let ch = channel_from_index(channel)?;
        let duty = duty.min(DUTY_FULL);
        self.pca
            .set_channel_on_off(ch, 0, duty)
            .map_err(|e| PwmError::Bus(format!("{e:?}")))
    }

    fn all_off(&mut self) -> Result<()> {
        self.pca
            .set_channel_full_off(Channel::All)
            .map_err(|e| PwmError::Bus(format!("{e:?}")))
    }
}

/// Recorded chip operation, for simulation and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipOp {
    Duty(u8, u16),
    AllOff,
}

/// In-memory chip used when running without hardware and by the test
/// suites. Tracks the latest duty per channel and optionally journals
/// every operation into a shared log.
#[derive(Debug, Default)]
pub struct SimChip {
    channels: [u16; 16],
    journal: Option<Arc<Mutex<Vec<ChipOp>>>>,
}

impl SimChip {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Arc<Mutex<Vec<ChipOp>>>) -> Self {
        Self {
            channels: [0; 16],
            journal: Some(journal),
        }
    }

    pub fn channel(&self, index: u8) -> u16 {
        self.channels[index as usize]
    }

    fn record(&self, op: ChipOp) {
        if let Some(journal) = &self.journal {
            journal.lock().expect("journal poisoned").push(op);
        }
    }
}

impl PwmChip for SimChip {
    fn set_channel_duty(&mut self, channel: u8, duty: u16) -> Result<()> {
        if channel > 15 {
            return Err(PwmError::InvalidChannel(channel));
        }
        let duty = duty.min(DUTY_FULL);
        debug!("sim pwm: channel {} duty {}", channel, duty);
        self.channels[channel as usize] = duty;
        self.record(ChipOp::Duty(channel, duty));
        Ok(())
    }

    fn all_off(&mut self) -> Result<()> {
        debug!("sim pwm: all channels off");
        self.channels = [0; 16];
        self.record(ChipOp::AllOff);
        Ok(())
    }
}
