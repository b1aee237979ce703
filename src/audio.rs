// Buzzer/audio cue backend.
//
// The playback machinery is an external collaborator; the runtime only
// needs idempotent on/off. The shipped device is a buzzer on a GPIO
// line, driven high while a cue is active.

use embedded_hal::digital::OutputPin;
use tracing::{info, warn};

/// Idempotent cue output. Calling `play` while already playing (or
/// `stop` while silent) is not an error and has no effect.
pub trait AudioBackend {
    fn play(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
}

impl<T: AudioBackend + ?Sized> AudioBackend for Box<T> {
    fn play(&mut self) {
        (**self).play()
    }

    fn stop(&mut self) {
        (**self).stop()
    }

    fn is_playing(&self) -> bool {
        (**self).is_playing()
    }
}

/// Buzzer wired to a GPIO output line.
pub struct GpioBuzzer<P: OutputPin> {
    pin: P,
    playing: bool,
}

impl<P: OutputPin> GpioBuzzer<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            playing: false,
        }
    }

    /// Hand the pin back (lets pin mocks verify their expectations).
    pub fn release(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> AudioBackend for GpioBuzzer<P> {
    fn play(&mut self) {
        if self.playing {
            return;
        }
        info!("Buzzer on");
        // A failed line write only costs the cue, not the drive loop
        if let Err(_e) = self.pin.set_high() {
            warn!("Failed to drive buzzer line high");
            return;
        }
        self.playing = true;
    }

    fn stop(&mut self) {
        if !self.playing {
            return;
        }
        info!("Buzzer off");
        if let Err(_e) = self.pin.set_low() {
            warn!("Failed to drive buzzer line low");
        }
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// No-op backend for dry runs without a buzzer.
#[derive(Debug, Default)]
pub struct NullAudio {
    playing: bool,
}

impl NullAudio {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for NullAudio {
    fn play(&mut self) {
        if !self.playing {
            info!("Cue on (no audio device)");
            self.playing = true;
        }
    }

    fn stop(&mut self) {
        if self.playing {
            info!("Cue off (no audio device)");
            self.playing = false;
        }
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    #[test]
    fn play_and_stop_toggle_the_line_once() {
        let expectations = [
            PinTransaction::set(PinState::High),
            PinTransaction::set(PinState::Low),
        ];
        let pin = PinMock::new(&expectations);
        let mut buzzer = GpioBuzzer::new(pin);

        buzzer.play();
        // Second play must not touch the line again
        buzzer.play();
        assert!(buzzer.is_playing());

        buzzer.stop();
        buzzer.stop();
        assert!(!buzzer.is_playing());

        buzzer.release().done();
    }

    #[test]
    fn stop_when_silent_is_a_no_op() {
        let pin = PinMock::new(&[]);
        let mut buzzer = GpioBuzzer::new(pin);
        buzzer.stop();
        buzzer.release().done();
    }

    #[test]
    fn null_audio_tracks_state() {
        let mut audio = NullAudio::new();
        assert!(!audio.is_playing());
        audio.play();
        audio.play();
        assert!(audio.is_playing());
        audio.stop();
        assert!(!audio.is_playing());
    }
}
