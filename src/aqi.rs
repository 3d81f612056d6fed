//! PM2.5 → AQI conversion.
//!
//! Implements the US EPA piecewise-linear formula over the published PM2.5
//! breakpoint table. Concentrations are truncated to one decimal place before
//! lookup, as the EPA specifies, so that values such as 12.05 fall into a row
//! instead of between rows.

use crate::model::{AqiCategory, AqiValue, InvalidReading};

/// One row of the breakpoint table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub c_lo: f64,
    pub c_hi: f64,
    pub aqi_lo: u16,
    pub aqi_hi: u16,
    pub category: AqiCategory,
}

/// PM2.5 (µg/m³, 24-hour) breakpoints, sorted ascending and contiguous at
/// one-decimal resolution.
pub static PM25_BREAKPOINTS: [Breakpoint; 6] = [
    Breakpoint {
        c_lo: 0.0,
        c_hi: 12.0,
        aqi_lo: 0,
        aqi_hi: 50,
        category: AqiCategory::Good,
    },
    Breakpoint {
        c_lo: 12.1,
        c_hi: 35.4,
        aqi_lo: 51,
        aqi_hi: 100,
        category: AqiCategory::Moderate,
    },
    Breakpoint {
        c_lo: 35.5,
        c_hi: 55.4,
        aqi_lo: 101,
        aqi_hi: 150,
        category: AqiCategory::UnhealthyForSensitiveGroups,
    },
    Breakpoint {
        c_lo: 55.5,
        c_hi: 150.4,
        aqi_lo: 151,
        aqi_hi: 200,
        category: AqiCategory::Unhealthy,
    },
    Breakpoint {
        c_lo: 150.5,
        c_hi: 250.4,
        aqi_lo: 201,
        aqi_hi: 300,
        category: AqiCategory::VeryUnhealthy,
    },
    Breakpoint {
        c_lo: 250.5,
        c_hi: 500.4,
        aqi_lo: 301,
        aqi_hi: 500,
        category: AqiCategory::Hazardous,
    },
];

/// Top of the scale; anything above is clamped.
pub const MAX_CONCENTRATION: f64 = 500.4;

/// Converts a raw PM2.5 concentration to an AQI value and category.
///
/// Above [`MAX_CONCENTRATION`] the result is clamped to 500/Hazardous with
/// `above_scale` set. Negative and non-finite input is rejected.
pub fn convert(concentration: f64) -> Result<AqiValue, InvalidReading> {
    if !concentration.is_finite() {
        return Err(InvalidReading::NotANumber);
    }
    if concentration < 0.0 {
        return Err(InvalidReading::Negative(concentration));
    }

    let c = truncate_tenths(concentration);
    if c > MAX_CONCENTRATION {
        return Ok(AqiValue {
            aqi: 500,
            category: AqiCategory::Hazardous,
            concentration,
            above_scale: true,
        });
    }

    for bp in PM25_BREAKPOINTS.iter() {
        if bp.c_lo <= c && c <= bp.c_hi {
            let slope = f64::from(bp.aqi_hi - bp.aqi_lo) / (bp.c_hi - bp.c_lo);
            let aqi = (slope * (c - bp.c_lo) + f64::from(bp.aqi_lo)).round();
            return Ok(AqiValue {
                aqi: aqi as u16,
                category: bp.category,
                concentration,
                above_scale: false,
            });
        }
    }

    // Unreachable for a contiguous table; clamp rather than panic.
    Ok(AqiValue {
        aqi: 500,
        category: AqiCategory::Hazardous,
        concentration,
        above_scale: true,
    })
}

/// Truncates to one decimal. The epsilon absorbs binary representation error
/// (35.4 * 10.0 is slightly below 354.0).
fn truncate_tenths(c: f64) -> f64 {
    (c * 10.0 + 1e-9).floor() / 10.0
}

/// Category for an already-computed AQI number.
pub fn category_for_aqi(aqi: u16) -> AqiCategory {
    PM25_BREAKPOINTS
        .iter()
        .find(|bp| aqi <= bp.aqi_hi)
        .map(|bp| bp.category)
        .unwrap_or(AqiCategory::Hazardous)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn aqi_of(c: f64) -> (u16, AqiCategory) {
        let v = convert(c).expect("valid concentration");
        (v.aqi, v.category)
    }

    #[test]
    fn test_breakpoint_boundaries_are_inclusive() {
        assert_eq!(aqi_of(12.0), (50, AqiCategory::Good));
        assert_eq!(aqi_of(12.1), (51, AqiCategory::Moderate));
        assert_eq!(aqi_of(35.4), (100, AqiCategory::Moderate));
        assert_eq!(aqi_of(35.5), (101, AqiCategory::UnhealthyForSensitiveGroups));
        assert_eq!(aqi_of(55.4), (150, AqiCategory::UnhealthyForSensitiveGroups));
        assert_eq!(aqi_of(55.5), (151, AqiCategory::Unhealthy));
        assert_eq!(aqi_of(150.5), (201, AqiCategory::VeryUnhealthy));
        assert_eq!(aqi_of(250.5), (301, AqiCategory::Hazardous));
        assert_eq!(aqi_of(500.4), (500, AqiCategory::Hazardous));
    }

    #[test]
    fn test_zero_is_good() {
        assert_eq!(aqi_of(0.0), (0, AqiCategory::Good));
    }

    #[test]
    fn test_interpolates_inside_a_row() {
        // (100 - 51) / (35.4 - 12.1) * (20.0 - 12.1) + 51 = 67.6
        assert_eq!(aqi_of(20.0), (68, AqiCategory::Moderate));
    }

    #[test]
    fn test_values_between_rows_are_truncated_into_lower_row() {
        assert_eq!(aqi_of(12.05), (50, AqiCategory::Good));
        assert_eq!(aqi_of(35.49), (100, AqiCategory::Moderate));
    }

    #[test]
    fn test_conversion_is_idempotent() {
        for c in [0.0, 7.3, 12.1, 48.0, 199.9, 612.0] {
            assert_eq!(convert(c), convert(c));
        }
    }

    #[test]
    fn test_conversion_is_monotonic_across_range() {
        let mut previous = 0u16;
        let mut c = 0.0;
        while c <= MAX_CONCENTRATION {
            let aqi = convert(c).unwrap().aqi;
            assert!(aqi >= previous, "AQI decreased at {}: {} < {}", c, aqi, previous);
            previous = aqi;
            c += 0.05;
        }
    }

    #[test]
    fn test_above_scale_clamps_with_flag() {
        let v = convert(600.0).expect("above scale should not error");
        assert_eq!(v.aqi, 500);
        assert_eq!(v.category, AqiCategory::Hazardous);
        assert!(v.above_scale);
        assert_eq!(v.concentration, 600.0);
        assert!(!convert(500.4).unwrap().above_scale);
    }

    #[test]
    fn test_negative_and_nan_are_rejected() {
        assert_eq!(convert(-0.5), Err(InvalidReading::Negative(-0.5)));
        assert_eq!(convert(f64::NAN), Err(InvalidReading::NotANumber));
        assert_eq!(convert(f64::INFINITY), Err(InvalidReading::NotANumber));
    }

    #[test]
    fn test_table_is_sorted_and_contiguous() {
        for pair in PM25_BREAKPOINTS.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            assert!(lo.c_hi < hi.c_lo);
            assert!(((hi.c_lo - lo.c_hi) - 0.1).abs() < 1e-9);
            assert_eq!(lo.aqi_hi + 1, hi.aqi_lo);
            assert!(lo.category < hi.category);
        }
    }

    #[test]
    fn test_category_for_aqi() {
        assert_eq!(category_for_aqi(0), AqiCategory::Good);
        assert_eq!(category_for_aqi(50), AqiCategory::Good);
        assert_eq!(category_for_aqi(51), AqiCategory::Moderate);
        assert_eq!(category_for_aqi(301), AqiCategory::Hazardous);
        assert_eq!(category_for_aqi(999), AqiCategory::Hazardous);
    }
}
