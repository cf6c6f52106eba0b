//! Software OPL chip backends.
//!
//! The measurement core only talks to the [`OplChip`] capability, so any
//! emulator able to take register writes and render frames can be plugged in.

mod channel;
pub mod dbopl;
mod operator;
mod tables;

pub use dbopl::Chip;

/// The narrow surface of an OPL3 chip the measurer drives.
pub trait OplChip: Send {
    /// Resets the chip to power-on state rendering at `rate` Hz.
    fn set_rate(&mut self, rate: u32);

    /// Writes `val` to the 9-bit register address `reg` (0x000..=0x1FF).
    fn write_reg(&mut self, reg: u16, val: u8);

    /// Renders `frames` interleaved stereo frames into `output`, which must
    /// hold at least `frames * 2` samples.
    fn generate(&mut self, output: &mut [i16], frames: usize);
}

impl<C: OplChip + ?Sized> OplChip for Box<C> {
    fn set_rate(&mut self, rate: u32) {
        (**self).set_rate(rate)
    }

    fn write_reg(&mut self, reg: u16, val: u8) {
        (**self).write_reg(reg, val)
    }

    fn generate(&mut self, output: &mut [i16], frames: usize) {
        (**self).generate(output, frames)
    }
}
