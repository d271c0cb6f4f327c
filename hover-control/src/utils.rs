use crate::{
    config::{BATTERY_CALIB_ADC, BATTERY_CALIB_CENTIVOLTS},
    timer::Duration,
};

/// Linear map of `input` from one range onto another using integer math
pub fn scale(input: i32, input_start: i32, input_end: i32, output_start: i32, output_end: i32) -> i32 {
    if input_end == input_start {
        return output_start;
    }

    let numerator = (input as i64 - input_start as i64) * (output_end as i64 - output_start as i64);
    (output_start as i64 + numerator / (input_end as i64 - input_start as i64)) as i32
}

pub fn saturate_range<T: PartialOrd>(input: T, min: T, max: T) -> T {
    let mut output = input;

    if output < min {
        output = min;
    }

    if output > max {
        output = max;
    }

    output
}

/// Battery voltage in hundredths of a volt from a raw ADC reading
pub fn battery_centivolts(raw: u16) -> u16 {
    let centivolts = scale(raw as i32, 0, BATTERY_CALIB_ADC as i32, 0, BATTERY_CALIB_CENTIVOLTS as i32);
    saturate_range(centivolts, 0, u16::MAX as i32) as u16
}

/// Hall steps per second, saturated to what the feedback frame can carry
pub fn steps_per_second(steps: i32, interval: Duration) -> i16 {
    let micros = interval.to_micros();
    if micros == 0 {
        return 0;
    }

    let rate = steps as i64 * 1_000_000 / micros as i64;
    saturate_range(rate, i16::MIN as i64, i16::MAX as i64) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_maps_between_ranges() {
        assert_eq!(scale(50, 0, 100, 0, 1000), 500);
        assert_eq!(scale(0, 0, 100, 200, 400), 200);
        assert_eq!(scale(100, 0, 100, 200, 400), 400);
        assert_eq!(scale(5, 5, 5, 7, 9), 7);
    }

    #[test]
    fn saturate_clamps_both_ends() {
        assert_eq!(saturate_range(-3, 0, 10), 0);
        assert_eq!(saturate_range(13, 0, 10), 10);
        assert_eq!(saturate_range(4, 0, 10), 4);
    }

    #[test]
    fn battery_reading_follows_the_calibration_point() {
        assert_eq!(battery_centivolts(BATTERY_CALIB_ADC), BATTERY_CALIB_CENTIVOLTS);
        assert_eq!(battery_centivolts(BATTERY_CALIB_ADC / 2), BATTERY_CALIB_CENTIVOLTS / 2);
        assert_eq!(battery_centivolts(0), 0);
        // 12 bit ADC at full scale stays inside u16
        assert_eq!(battery_centivolts(4095), 10333);
    }

    #[test]
    fn step_rate_over_an_interval() {
        assert_eq!(steps_per_second(90, Duration::millis(500)), 180);
        assert_eq!(steps_per_second(-6, Duration::millis(100)), -60);
        assert_eq!(steps_per_second(7, Duration::micros(0)), 0);
        assert_eq!(steps_per_second(i32::MAX, Duration::millis(1)), i16::MAX);
    }
}
