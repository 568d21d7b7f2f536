//! Command/response exchanges with the microcontroller
//!
//! Every byte we send is echoed back by the microcontroller; a differing echo
//! means the line corrupted it. Configuration commands additionally answer
//! with a status byte (OK or CPLD_BUSY) and a DONE byte once the CPLD has
//! latched the new value. This layer never retries.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    error::TransactionError,
    protocol::*,
    transport::Transport,
};

/// Sample rate of the ADC in Hz, sets the burst read timeout
const SAMPLE_RATE_HZ: u64 = 25_000;
const MIN_TIMEOUT_MS: u64 = 3_000;
const TIMEOUT_MARGIN_MS: u64 = 500;

pub const MAX_SAMPLES: u32 = 4_000_000;
pub const MAX_DELAY: u32 = 500;
pub const MAX_BYTE_ARG: u32 = 255;
pub const MAX_ATTENUATION: u32 = 31;

/// Read/write timeout that lets a burst of `n_samples` arrive in full
pub fn burst_timeout(n_samples: u32) -> Duration {
    let ms = (1000 * n_samples as u64 + SAMPLE_RATE_HZ - 1) / SAMPLE_RATE_HZ + TIMEOUT_MARGIN_MS;
    Duration::from_millis(ms.max(MIN_TIMEOUT_MS))
}

/// DS1621 thermostat reading. Both bytes are two's complement; the lsb only
/// carries the half degree bit.
pub fn temperature_celsius(lsb: u8, msb: u8) -> f64 {
    msb as i8 as f64 - 0.5 * (lsb as i8) as f64 / 128.0
}

/// 10 bit microcontroller ADC reading in volts
pub fn adc_volts(lsb: u8, msb: u8) -> f64 {
    (msb as f64 * 256.0 + lsb as f64) * V_REF / 1024.0
}

pub(crate) fn check_range(
    field: &'static str,
    value: u32,
    max: u32,
    domain: &'static str,
) -> Result<(), TransactionError> {
    if value > max {
        Err(TransactionError::Argument {
            field,
            value,
            domain,
        })
    } else {
        Ok(())
    }
}

/// Little endian bytes of `value`, truncated to `width`
fn le_bytes(value: u32, width: usize) -> Vec<u8> {
    value.to_le_bytes()[..width].to_vec()
}

/// Transaction layer over a [`Transport`]
pub struct Link<T> {
    transport: T,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send one byte and check its echo
    pub fn write_byte(&mut self, byte: u8) -> Result<(), TransactionError> {
        self.transport.write(&[byte])?;
        let echoed = self.read_byte_for("echo")?;
        if echoed != byte {
            warn!(sent = byte, echoed, "USB transmission problem");
            return Err(TransactionError::Transmission { sent: byte, echoed });
        }
        Ok(())
    }

    /// Send a run of bytes, then check the whole echo. Purges on mismatch.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), TransactionError> {
        self.transport.write(bytes)?;
        let echo = self.transport.read(bytes.len())?;
        for (k, sent) in bytes.iter().enumerate() {
            match echo.get(k) {
                Some(echoed) if echoed == sent => {}
                Some(echoed) => {
                    warn!(sent, echoed, position = k, "USB transmission problem");
                    self.transport.purge()?;
                    return Err(TransactionError::Transmission {
                        sent: *sent,
                        echoed: *echoed,
                    });
                }
                None => {
                    warn!(expected = bytes.len(), received = echo.len(), "Echo cut short");
                    self.transport.purge()?;
                    return Err(TransactionError::NoResponse {
                        waiting_for: "echo",
                    });
                }
            }
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8, TransactionError> {
        self.read_byte_for("response byte")
    }

    fn read_byte_for(&mut self, waiting_for: &'static str) -> Result<u8, TransactionError> {
        match self.transport.read(1)?.first() {
            Some(b) => Ok(*b),
            None => {
                warn!(waiting_for, "No byte read before timeout");
                Err(TransactionError::NoResponse { waiting_for })
            }
        }
    }

    /// One raw read of up to `n` bytes, used for sample bursts
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, TransactionError> {
        Ok(self.transport.read(n)?)
    }

    pub fn purge(&mut self) -> Result<(), TransactionError> {
        Ok(self.transport.purge()?)
    }

    pub fn set_timeouts(&mut self, timeout: Duration) -> Result<(), TransactionError> {
        debug!(?timeout, "Setting transport timeouts");
        Ok(self.transport.set_timeouts(timeout, timeout)?)
    }

    /// Shared shape of every CPLD setting: opcode, argument, OK, DONE
    fn configure(&mut self, opcode: u8, arg: &[u8]) -> Result<(), TransactionError> {
        self.write_byte(opcode)?;
        match arg {
            [single] => self.write_byte(*single)?,
            many => self.write_bytes(many)?,
        }
        let status = self.read_byte_for("CPLD status")?;
        if status == CPLD_BUSY {
            return Err(TransactionError::Busy { opcode });
        }
        if status != OK {
            return Err(TransactionError::Protocol {
                opcode,
                expected: OK,
                actual: status,
            });
        }
        self.expect_done(opcode)
    }

    fn expect_done(&mut self, opcode: u8) -> Result<(), TransactionError> {
        let done = self.read_byte_for("DONE")?;
        if done != DONE {
            return Err(TransactionError::Protocol {
                opcode,
                expected: DONE,
                actual: done,
            });
        }
        Ok(())
    }

    /// Samples per burst (both polarizations). Also resizes the transport
    /// timeouts so the burst fits in one read.
    pub fn set_num_samples(&mut self, n_samples: u32) -> Result<(), TransactionError> {
        if n_samples > MAX_SAMPLES || n_samples % 2 != 0 {
            return Err(TransactionError::Argument {
                field: "n_samples",
                value: n_samples,
                domain: "even, at most 4000000",
            });
        }
        self.configure(SET_NUM_SAMPLES, &le_bytes(n_samples, 3))?;
        let timeout = burst_timeout(n_samples);
        self.set_timeouts(timeout)?;
        info!(n_samples, ?timeout, "Set number of samples");
        Ok(())
    }

    /// Range gate delay in 20 ns clock cycles
    pub fn set_delay(&mut self, delay: u32) -> Result<(), TransactionError> {
        check_range("delay", delay, MAX_DELAY, "0..=500")?;
        self.configure(SET_DELAY, &le_bytes(delay, 2))?;
        info!(delay, "Set delay");
        Ok(())
    }

    pub fn set_pulse_width(&mut self, pulse_width: u32) -> Result<(), TransactionError> {
        check_range("pulse_width", pulse_width, MAX_BYTE_ARG, "0..=255")?;
        self.configure(SET_PW, &le_bytes(pulse_width, 1))?;
        info!(pulse_width, "Set pulse width");
        Ok(())
    }

    /// Delay of the ADC trigger after the RX gate
    pub fn set_adc_delay(&mut self, adc_delay: u32) -> Result<(), TransactionError> {
        check_range("adc_delay", adc_delay, MAX_BYTE_ARG, "0..=255")?;
        self.configure(SET_ADC, &le_bytes(adc_delay, 1))?;
        info!(adc_delay, "Set ADC delay");
        Ok(())
    }

    /// Lead of the polarization switch before TX, in units of 32 clock cycles
    pub fn set_pol_precede(&mut self, pol_precede: u32) -> Result<(), TransactionError> {
        check_range("pol_precede", pol_precede, MAX_BYTE_ARG, "0..=255")?;
        self.configure(SET_POL_PRECEDE, &le_bytes(pol_precede, 1))?;
        info!(pol_precede, "Set pol_precede");
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), TransactionError> {
        self.configure(SET_MODE, &[mode.code()])?;
        info!(%mode, "Set mode");
        Ok(())
    }

    /// Both step attenuators of a band, 1 dB steps
    pub fn set_attenuator(
        &mut self,
        band: Band,
        ch1: u32,
        ch2: u32,
    ) -> Result<(), TransactionError> {
        check_range("attenuator 1", ch1, MAX_ATTENUATION, "0..=31")?;
        check_range("attenuator 2", ch2, MAX_ATTENUATION, "0..=31")?;
        self.configure(band.attenuator_opcode(), &[ch1 as u8, ch2 as u8])?;
        info!(band = band.label(), ch1, ch2, "Set attenuators");
        Ok(())
    }

    /// PLO lock bits as reported by the CPLD
    pub fn get_status(&mut self) -> Result<u8, TransactionError> {
        self.write_byte(GET_STATUS)?;
        let status = self.read_byte_for("CPLD status")?;
        info!(status, "CPLD status");
        Ok(status)
    }

    pub fn get_lock(&mut self) -> Result<u8, TransactionError> {
        self.write_byte(GET_LOCK)?;
        let lock = self.read_byte_for("lock indicators")?;
        self.expect_done(GET_LOCK)?;
        info!(lock, "Lock indicators");
        Ok(lock)
    }

    /// Voltage on microcontroller ADC input 4 to 7
    pub fn get_adc(&mut self, channel: u8) -> Result<f64, TransactionError> {
        if !(4..=7).contains(&channel) {
            return Err(TransactionError::Argument {
                field: "adc channel",
                value: channel as u32,
                domain: "4..=7",
            });
        }
        let opcode = GET_ADC4 + (channel - 4);
        self.write_byte(opcode)?;
        let lsb = self.read_byte_for("ADC lsb")?;
        let msb = self.read_byte_for("ADC msb")?;
        self.expect_done(opcode)?;
        let volts = adc_volts(lsb, msb);
        info!(channel, volts, "ADC reading");
        Ok(volts)
    }

    fn read_temperature(&mut self, opcode: u8) -> Result<f64, TransactionError> {
        self.write_byte(opcode)?;
        let lsb = self.read_byte_for("temperature lsb")?;
        let msb = self.read_byte_for("temperature msb")?;
        Ok(temperature_celsius(lsb, msb))
    }

    pub fn get_case_temp(&mut self) -> Result<f64, TransactionError> {
        let t = self.read_temperature(GET_CASE_TEMP)?;
        info!(celsius = t, "Case temperature");
        Ok(t)
    }

    pub fn get_board_temp(&mut self) -> Result<f64, TransactionError> {
        let t = self.read_temperature(GET_BOARD_TEMP)?;
        info!(celsius = t, "Board temperature");
        Ok(t)
    }

    fn write_setpoint(&mut self, opcode: u8, celsius: u32) -> Result<(), TransactionError> {
        if !(10..=50).contains(&celsius) {
            return Err(TransactionError::Argument {
                field: "temperature",
                value: celsius,
                domain: "10..=50",
            });
        }
        // Whole degrees only; the thermostat's half degree bit is left at zero
        self.write_byte(opcode)?;
        self.write_byte(celsius as u8)
    }

    pub fn set_case_temp(&mut self, celsius: u32) -> Result<(), TransactionError> {
        self.write_setpoint(SET_CASE_TEMP, celsius)?;
        info!(celsius, "Set case temperature");
        Ok(())
    }

    pub fn set_board_temp(&mut self, celsius: u32) -> Result<(), TransactionError> {
        self.write_setpoint(SET_BOARD_TEMP, celsius)?;
        info!(celsius, "Set board temperature");
        Ok(())
    }

    /// Microcontroller resets since the counter was last cleared
    pub fn get_reset_count(&mut self) -> Result<u8, TransactionError> {
        self.write_byte(GET_RESET_COUNT)?;
        let resets = self.read_byte_for("reset count")?;
        info!(resets, "Reset count");
        Ok(resets)
    }

    pub fn set_reset_count(&mut self) -> Result<(), TransactionError> {
        self.write_byte(SET_RESET_COUNT)?;
        info!("Reset count cleared");
        Ok(())
    }

    /// Slow-loop repetition rate in Hz
    pub fn set_loop_freq(&mut self, hz: u32) -> Result<(), TransactionError> {
        let opcode = match hz {
            5 => SET_LOOP_FREQ_5,
            10 => SET_LOOP_FREQ_10,
            20 => SET_LOOP_FREQ_20,
            _ => {
                return Err(TransactionError::Argument {
                    field: "loop frequency",
                    value: hz,
                    domain: "5, 10 or 20 Hz",
                })
            }
        };
        self.write_byte(opcode)?;
        info!(hz, "Set loop frequency");
        Ok(())
    }

    pub fn start_measurement(&mut self) -> Result<(), TransactionError> {
        self.write_byte(START_MSRMNT)
    }

    pub fn start_slow_loop(&mut self) -> Result<(), TransactionError> {
        self.write_byte(START_SLOW_LOOP)
    }

    pub fn stop_slow_loop(&mut self) -> Result<(), TransactionError> {
        self.write_byte(STOP_SLOW_LOOP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn link() -> Link<MockTransport> {
        Link::new(MockTransport::echoing())
    }

    #[test]
    fn test_write_byte_checks_echo() {
        let mut link = link();
        link.write_byte(0x42).unwrap();
        assert_eq!(link.transport().written, vec![0x42]);

        let mut link = Link::new(MockTransport::echoing());
        link.transport.corrupt_echo(0, 0x43);
        match link.write_byte(0x42) {
            Err(TransactionError::Transmission { sent, echoed }) => {
                assert_eq!((sent, echoed), (0x42, 0x43))
            }
            other => panic!("expected transmission error, got {other:?}"),
        }
        // Single byte writes leave recovery to the caller
        assert_eq!(link.transport().purges, 0);
    }

    #[test]
    fn test_write_bytes_purges_on_mismatch() {
        let mut link = link();
        link.transport.corrupt_echo(1, 0x00);
        let err = link.write_bytes(&[0x01, 0x02, 0x03]).unwrap_err();
        assert!(matches!(
            err,
            TransactionError::Transmission {
                sent: 0x02,
                echoed: 0x00
            }
        ));
        assert_eq!(link.transport().purges, 1);
    }

    #[test]
    fn test_read_byte_times_out() {
        let mut link = Link::new(MockTransport::silent());
        assert!(matches!(
            link.read_byte(),
            Err(TransactionError::NoResponse { .. })
        ));
    }

    #[test]
    fn test_set_num_samples_wire_format_and_timeout() {
        let mut link = link();
        link.transport.ack();
        link.set_num_samples(100_000).unwrap();
        assert_eq!(
            link.transport().written,
            vec![SET_NUM_SAMPLES, 0xA0, 0x86, 0x01]
        );
        // 4000 ms of samples plus margin
        let expected = Duration::from_millis(4_500);
        assert_eq!(link.transport().timeouts, vec![(expected, expected)]);
    }

    #[test]
    fn test_small_bursts_keep_minimum_timeout() {
        assert_eq!(burst_timeout(512), Duration::from_millis(3_000));
        assert_eq!(burst_timeout(4_000_000), Duration::from_millis(160_500));
        // Partial milliseconds round up
        assert_eq!(burst_timeout(100_001), Duration::from_millis(4_501));
    }

    #[test]
    fn test_arguments_rejected_without_io() {
        let mut link = link();
        assert!(matches!(
            link.set_num_samples(513),
            Err(TransactionError::Argument { .. })
        ));
        assert!(link.set_num_samples(4_000_002).is_err());
        assert!(link.set_delay(501).is_err());
        assert!(link.set_pulse_width(256).is_err());
        assert!(link.set_adc_delay(256).is_err());
        assert!(link.set_pol_precede(300).is_err());
        assert!(link.set_attenuator(Band::Ghz22, 0, 32).is_err());
        assert!(link.set_attenuator(Band::Ghz35, 32, 0).is_err());
        assert!(link.set_loop_freq(15).is_err());
        assert!(link.set_case_temp(9).is_err());
        assert!(link.get_adc(3).is_err());
        assert!(link.transport().written.is_empty());
    }

    #[test]
    fn test_busy_is_distinct_from_protocol_error() {
        let mut link = link();
        link.transport.reply(&[CPLD_BUSY]);
        assert!(matches!(
            link.set_pulse_width(20),
            Err(TransactionError::Busy { opcode: SET_PW })
        ));

        let mut link = self::link();
        link.transport.reply(&[0x00]);
        assert!(matches!(
            link.set_delay(100),
            Err(TransactionError::Protocol {
                opcode: SET_DELAY,
                expected: OK,
                actual: 0x00
            })
        ));
    }

    #[test]
    fn test_missing_done_is_protocol_error() {
        let mut link = link();
        link.transport.reply(&[OK]).reply(&[OK]);
        assert!(matches!(
            link.set_mode(Mode::CrossPol),
            Err(TransactionError::Protocol {
                opcode: SET_MODE,
                expected: DONE,
                actual: OK
            })
        ));
    }

    #[test]
    fn test_attenuator_pair_is_sent_together() {
        let mut link = link();
        link.transport.ack();
        link.set_attenuator(Band::Ghz35, 31, 7).unwrap();
        assert_eq!(link.transport().written, vec![SET_ATTEN35, 31, 7]);
    }

    #[test]
    fn test_queries_convert_readings() {
        let mut link = link();
        link.transport.reply(&[0x00, 0x02]).reply(&[DONE]);
        // 512 counts of 1024 at 5 V
        assert_eq!(link.get_adc(6).unwrap(), 2.5);
        assert_eq!(link.transport().written, vec![GET_ADC4 + 2]);

        link.transport.reply(&[0x80, 25]);
        assert_eq!(link.get_case_temp().unwrap(), 25.5);

        link.transport.reply(&[0x00, 0xF6]);
        assert_eq!(link.get_board_temp().unwrap(), -10.0);

        link.transport.reply(&[0x03]).reply(&[DONE]);
        assert_eq!(link.get_lock().unwrap(), 3);

        link.transport.reply(&[7]);
        assert_eq!(link.get_reset_count().unwrap(), 7);
    }

    #[test]
    fn test_loop_frequency_opcodes() {
        let mut link = link();
        link.set_loop_freq(5).unwrap();
        link.set_loop_freq(10).unwrap();
        link.set_loop_freq(20).unwrap();
        assert_eq!(
            link.transport().written,
            vec![SET_LOOP_FREQ_5, SET_LOOP_FREQ_10, SET_LOOP_FREQ_20]
        );
    }
}
