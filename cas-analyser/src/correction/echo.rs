//! Sensor echo suppression
//!
//! A strike of a bell that follows that bell's last accepted strike within
//! the echo window is a sensor echo and is dropped.

use cas_common::bells::MAX_BELLS;
use cas_common::Bong;
use tracing::debug;

use super::CorrectionStage;

pub struct SensorEchoStage {
    window_ms: i64,
    last_accepted: [Option<i64>; MAX_BELLS],
}

impl SensorEchoStage {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            last_accepted: [None; MAX_BELLS],
        }
    }
}

impl CorrectionStage for SensorEchoStage {
    fn name(&self) -> &'static str {
        "sensor-echo"
    }

    fn process(&mut self, bong: Bong) -> Vec<Bong> {
        let Some(slot) = (bong.bell as usize)
            .checked_sub(1)
            .and_then(|i| self.last_accepted.get_mut(i))
        else {
            return vec![bong];
        };

        match *slot {
            Some(prev) if bong.time - prev < self.window_ms => {
                debug!(
                    "Dropping echo of bell {} at {}ms ({}ms after previous)",
                    bong.bell,
                    bong.time,
                    bong.time - prev
                );
                Vec::new()
            }
            _ => {
                *slot = Some(bong.time);
                vec![bong]
            }
        }
    }

    fn finish(&mut self) -> Vec<Bong> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cas_common::Stroke;

    #[test]
    fn test_echo_within_window_dropped() {
        let mut stage = SensorEchoStage::new(50);
        assert_eq!(stage.process(Bong::new(3, 1000, Stroke::Unknown)).len(), 1);
        assert!(stage.process(Bong::new(3, 1015, Stroke::Unknown)).is_empty());
    }

    #[test]
    fn test_repeated_echoes_all_dropped() {
        let mut stage = SensorEchoStage::new(50);
        stage.process(Bong::new(2, 1000, Stroke::Unknown));
        for _ in 0..5 {
            assert!(stage.process(Bong::new(2, 1020, Stroke::Unknown)).is_empty());
        }
        // Dropped echoes do not move the reference time
        assert!(stage.process(Bong::new(2, 1049, Stroke::Unknown)).is_empty());
        assert_eq!(stage.process(Bong::new(2, 1050, Stroke::Unknown)).len(), 1);
    }

    #[test]
    fn test_other_bells_unaffected() {
        let mut stage = SensorEchoStage::new(50);
        stage.process(Bong::new(1, 1000, Stroke::Unknown));
        assert_eq!(stage.process(Bong::new(2, 1001, Stroke::Unknown)).len(), 1);
    }
}
