//! Comfort metrics reported alongside the control loop. None of these feed back
//! into switching decisions.

/// Apparent temperature in °C for `temperature_c` at `relative_humidity` %.
pub fn heat_index(temperature_c: f32, relative_humidity: f32) -> f32 {
    let t = temperature_c * 1.8 + 32.0;
    let rh = relative_humidity;

    let mut index = 0.5 * (t + 61.0 + (t - 68.0) * 1.2 + rh * 0.094);
    let mut adjustment = 0.0;

    if (index + t) / 2.0 >= 80.0 {
        index = -42.379 + 2.049_015_2 * t + 10.143_331 * rh
            - 0.224_755_41 * t * rh
            - 0.006_837_83 * t * t
            - 0.054_817_17 * rh * rh
            + 0.001_228_74 * t * t * rh
            + 0.000_852_82 * t * rh * rh
            - 0.000_001_99 * t * t * rh * rh;

        if (80.0..=112.0).contains(&t) && rh <= 13.0 {
            adjustment = -((13.0 - rh) / 4.0) * ((17.0 - (t - 95.0).abs()) / 17.0).sqrt();
        } else if (80.0..=87.0).contains(&t) && rh >= 85.0 {
            adjustment = ((rh - 85.0) / 10.0) * ((87.0 - t) / 5.0);
        }
    }

    (index + adjustment - 32.0) / 1.8
}

/// Wind chill in °C; `wind_speed` is in m/s.
pub fn wind_chill(temperature_c: f32, wind_speed: f32) -> f32 {
    let v = (wind_speed * 3.6).powf(0.16);
    13.12 + 0.6215 * temperature_c - 11.37 * v + 0.3965 * temperature_c * v
}

/// Air speed in m/s that keeps occupants comfortable at `air_temperature` °C.
pub fn desired_air_speed(air_temperature: f32) -> f32 {
    50.49 - 4.4047 * air_temperature + 0.096_425 * air_temperature.powi(2)
}

pub fn operative_temperature(air_temperature: f32, mean_radiant: f32, air_speed: f32) -> f32 {
    if air_speed < 0.1 {
        return (air_temperature + mean_radiant) / 2.0;
    }
    let weight = (10.0 * air_speed).sqrt();
    (mean_radiant + air_temperature * weight) / (1.0 + weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mild_heat_index_uses_simple_formula() {
        assert!((heat_index(20.0, 50.0) - 19.361).abs() < 0.01);
    }

    #[test]
    fn hot_humid_heat_index_exceeds_air_temperature() {
        assert!(heat_index(32.0, 70.0) > 38.0);
    }

    #[test]
    fn wind_chill_drops_below_air_temperature() {
        assert!((wind_chill(-10.0, 5.0) + 17.45).abs() < 0.05);
    }

    #[test]
    fn still_air_averages_radiant_temperature() {
        assert_eq!(operative_temperature(20.0, 22.0, 0.05), 21.0);
    }

    #[test]
    fn moving_air_weights_air_temperature() {
        let operative = operative_temperature(20.0, 24.0, 0.4);
        assert!(operative > 20.0 && operative < 22.0);
    }
}
