use crate::sweep::{Sample, SampleStatus};

/// Number of trailing samples that must fall in both voltage and power
/// before the sweep is considered past the nose.
pub const PAST_NOSE_WINDOW: usize = 3;

/// Growth applied to the voltage slope when extrapolating past a failed
/// solve on the lower branch.
pub const EXTRAPOLATION_SLOPE_SCALE: f64 = 1.5;

/// Tracks the maximum delivered power of a curve and detects when the
/// sweep has moved onto the lower branch.
#[derive(Debug, Clone)]
pub struct NoseDetector {
    window: usize,
    nose: Option<(usize, f64)>,
    past_nose: bool,
    recent: Vec<(f64, f64, f64)>,
}

impl Default for NoseDetector {
    fn default() -> Self {
        Self::new(PAST_NOSE_WINDOW)
    }
}

impl NoseDetector {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            nose: None,
            past_nose: false,
            recent: Vec::new(),
        }
    }

    /// Classifies the sample recorded at `index`. Returns true when this
    /// sample moved the sweep past the nose.
    pub fn observe(&mut self, index: usize, sample: &Sample) -> bool {
        if sample.status == SampleStatus::Failed {
            return false;
        }
        match self.nose {
            Some((_, p)) if sample.power_mw <= p => {}
            _ => self.nose = Some((index, sample.power_mw)),
        }

        self.recent.push((sample.lambda_mw, sample.power_mw, sample.voltage_pu));
        if self.recent.len() > self.window {
            self.recent.remove(0);
        }
        if self.past_nose || self.recent.len() < self.window {
            return false;
        }
        let falling = self.recent.windows(2).all(|w| {
            let ((l0, p0, v0), (l1, p1, v1)) = (w[0], w[1]);
            l1 > l0 && p1 < p0 && v1 < v0
        });
        if falling {
            log::debug!("past the nose at sample {}", index);
            self.past_nose = true;
        }
        falling
    }

    pub fn nose_index(&self) -> Option<usize> {
        self.nose.map(|(i, _)| i)
    }

    pub fn past_nose(&self) -> bool {
        self.past_nose
    }
}

/// Estimates the operating point at `lambda` from the last two converged
/// samples.
///
/// The voltage follows the recent slope scaled by
/// [`EXTRAPOLATION_SLOPE_SCALE`]. Delivered power follows its own slope but
/// never rises above the last converged value. Returns `None` without two
/// converged samples at distinct transfer levels.
pub fn extrapolate(samples: &[Sample], lambda: f64) -> Option<(f64, f64)> {
    let mut converged = samples
        .iter()
        .rev()
        .filter(|s| s.status == SampleStatus::Converged);
    let last = converged.next()?;
    let prev = converged.next()?;

    let dl = last.lambda_mw - prev.lambda_mw;
    if dl <= 0.0 {
        return None;
    }
    let dv = (last.voltage_pu - prev.voltage_pu) / dl;
    let dp = (last.power_mw - prev.power_mw) / dl;
    let step = lambda - last.lambda_mw;

    let voltage = last.voltage_pu + EXTRAPOLATION_SLOPE_SCALE * dv * step;
    let power = (last.power_mw + dp * step).min(last.power_mw);
    Some((voltage.max(0.0), power))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(step: usize, lambda: f64, power: f64, voltage: f64) -> Sample {
        Sample {
            step,
            lambda_mw: lambda,
            power_mw: power,
            voltage_pu: voltage,
            status: SampleStatus::Converged,
        }
    }

    #[test]
    fn test_nose_is_earliest_maximum() {
        let mut det = NoseDetector::default();
        let samples = [
            sample(0, 0.0, 0.0, 1.0),
            sample(1, 100.0, 90.0, 0.95),
            sample(2, 200.0, 150.0, 0.9),
            sample(3, 300.0, 150.0, 0.8),
            Sample {
                status: SampleStatus::Failed,
                voltage_pu: f64::NAN,
                ..sample(4, 400.0, 400.0, 0.0)
            },
        ];
        for (i, s) in samples.iter().enumerate() {
            det.observe(i, s);
        }
        assert_eq!(det.nose_index(), Some(2));
        assert!(!det.past_nose());
    }

    #[test]
    fn test_past_nose_needs_falling_voltage_and_power() {
        let mut det = NoseDetector::default();
        let samples = [
            sample(0, 0.0, 0.0, 1.0),
            sample(1, 100.0, 95.0, 0.9),
            sample(2, 200.0, 140.0, 0.8),
            sample(3, 300.0, 130.0, 0.7),
            sample(4, 400.0, 120.0, 0.6),
        ];
        let flags: Vec<bool> = samples
            .iter()
            .enumerate()
            .map(|(i, s)| det.observe(i, s))
            .collect();
        assert_eq!(flags, vec![false, false, false, false, true]);
        assert!(det.past_nose());
        assert_eq!(det.nose_index(), Some(2));
    }

    #[test]
    fn test_constant_power_never_past_nose() {
        let mut det = NoseDetector::default();
        for i in 0..10 {
            let l = 50.0 * i as f64;
            det.observe(i, &sample(i, l, l, 1.0 - 0.05 * i as f64));
        }
        assert!(!det.past_nose());
        assert_eq!(det.nose_index(), Some(9));
    }

    #[test]
    fn test_extrapolate() {
        let samples = [sample(3, 300.0, 130.0, 0.7), sample(4, 400.0, 120.0, 0.6)];
        let (v, p) = extrapolate(&samples, 450.0).unwrap();
        assert!((v - 0.525).abs() < 1e-12);
        assert!((p - 115.0).abs() < 1e-12);

        assert_eq!(extrapolate(&samples[..1], 450.0), None);
    }
}
