//! Linux sysfs PWM backend (`/sys/class/pwm/pwmchip<N>/pwm<M>`).

use std::{
    fs,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::{info, warn};

use super::{ActuatorError, SERVO_PERIOD, ServoPin, ServoPosition};

const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

#[derive(Debug)]
pub struct SysfsPwmPin {
    channel_dir: PathBuf,
}

impl SysfsPwmPin {
    pub fn open(chip: u32, channel: u32) -> Result<Self, ActuatorError> {
        Self::open_at(Path::new(SYSFS_PWM_ROOT), chip, channel)
    }

    /// Export (if needed), configure the 20 ms period, park at rest and enable.
    pub fn open_at(root: &Path, chip: u32, channel: u32) -> Result<Self, ActuatorError> {
        let chip_dir = root.join(format!("pwmchip{chip}"));
        if !chip_dir.is_dir() {
            return Err(ActuatorError::Unavailable(chip_dir.display().to_string()));
        }
        let channel_dir = chip_dir.join(format!("pwm{channel}"));
        if !channel_dir.exists() {
            write_attr(&chip_dir.join("export"), &channel.to_string())?;
            // udev needs a moment to hand the new attributes over
            for _ in 0..20 {
                if channel_dir.join("period").exists() {
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        let mut pin = Self { channel_dir };
        pin.write("period", SERVO_PERIOD.as_nanos())?;
        pin.set_position(ServoPosition::Rest)?;
        pin.write("enable", 1)?;
        info!(channel = %pin.channel_dir.display(), "pwm channel enabled");
        Ok(pin)
    }

    fn write(&mut self, attr: &str, value: impl ToString) -> Result<(), ActuatorError> {
        write_attr(&self.channel_dir.join(attr), &value.to_string())
    }
}

fn write_attr(path: &Path, value: &str) -> Result<(), ActuatorError> {
    fs::write(path, value).map_err(|source| ActuatorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl ServoPin for SysfsPwmPin {
    fn set_position(&mut self, position: ServoPosition) -> Result<(), ActuatorError> {
        self.write("duty_cycle", position.pulse().as_nanos())
    }

    fn describe(&self) -> String {
        self.channel_dir.display().to_string()
    }
}

impl Drop for SysfsPwmPin {
    fn drop(&mut self) {
        if let Err(err) = self.write("enable", 0) {
            warn!(error = %err, "failed to disable pwm channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_chip() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let chan = root.path().join("pwmchip0/pwm0");
        fs::create_dir_all(&chan).unwrap();
        for attr in ["period", "duty_cycle", "enable"] {
            fs::write(chan.join(attr), "0").unwrap();
        }
        root
    }

    fn read(root: &Path, attr: &str) -> String {
        fs::read_to_string(root.join("pwmchip0/pwm0").join(attr)).unwrap()
    }

    #[test]
    fn open_configures_period_rest_and_enable() {
        let root = fake_chip();
        let pin = SysfsPwmPin::open_at(root.path(), 0, 0).unwrap();
        assert_eq!(read(root.path(), "period"), "20000000");
        assert_eq!(read(root.path(), "duty_cycle"), "1500000");
        assert_eq!(read(root.path(), "enable"), "1");
        drop(pin);
        assert_eq!(read(root.path(), "enable"), "0");
    }

    #[test]
    fn positions_map_to_duty_cycles() {
        let root = fake_chip();
        let mut pin = SysfsPwmPin::open_at(root.path(), 0, 0).unwrap();
        pin.set_position(ServoPosition::Extended).unwrap();
        assert_eq!(read(root.path(), "duty_cycle"), "2000000");
        pin.set_position(ServoPosition::Rest).unwrap();
        assert_eq!(read(root.path(), "duty_cycle"), "1500000");
    }

    #[test]
    fn missing_chip_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let err = SysfsPwmPin::open_at(root.path(), 3, 0).unwrap_err();
        assert!(matches!(err, ActuatorError::Unavailable(_)));
    }
}
