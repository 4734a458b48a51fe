//! Validation helpers for DTOs.

use validator::ValidationError;

/// Highest rating the matchmaking ladder hands out.
const MAX_RATING: u32 = 10_000;

/// Validates that a skill rating lies on the ladder's scale.
pub fn validate_rating(rating: u32) -> Result<(), ValidationError> {
    if rating == 0 || rating > MAX_RATING {
        let mut err = ValidationError::new("rating_out_of_range");
        err.message = Some(format!("rating must be within 1..={MAX_RATING} (got {rating})").into());
        return Err(err);
    }
    Ok(())
}

/// Validates a desired group size against the sizes the product offers.
pub fn validate_group_size(group_size: u8) -> Result<(), ValidationError> {
    if !(2..=8).contains(&group_size) {
        let mut err = ValidationError::new("group_size_out_of_range");
        err.message = Some(format!("group size must be within 2..=8 (got {group_size})").into());
        return Err(err);
    }
    Ok(())
}

/// Validates a latitude in degrees.
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        let mut err = ValidationError::new("latitude_out_of_range");
        err.message = Some(format!("latitude must be within -90..=90 (got {lat})").into());
        return Err(err);
    }
    Ok(())
}

/// Validates a longitude in degrees.
pub fn validate_longitude(lng: f64) -> Result<(), ValidationError> {
    if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
        let mut err = ValidationError::new("longitude_out_of_range");
        err.message = Some(format!("longitude must be within -180..=180 (got {lng})").into());
        return Err(err);
    }
    Ok(())
}

/// Validates a reported cumulative distance in metres.
pub fn validate_distance(distance: f64) -> Result<(), ValidationError> {
    if !distance.is_finite() || distance < 0.0 {
        let mut err = ValidationError::new("distance_negative");
        err.message = Some("cumulative distance must be a non-negative number".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds() {
        assert!(validate_rating(1).is_ok());
        assert!(validate_rating(10_000).is_ok());
        assert!(validate_rating(0).is_err());
        assert!(validate_rating(10_001).is_err());
    }

    #[test]
    fn group_size_bounds() {
        assert!(validate_group_size(2).is_ok());
        assert!(validate_group_size(8).is_ok());
        assert!(validate_group_size(1).is_err());
        assert!(validate_group_size(9).is_err());
    }

    #[test]
    fn latitude_bounds() {
        assert!(validate_latitude(37.51).is_ok());
        assert!(validate_latitude(-90.0).is_ok());
        assert!(validate_latitude(90.5).is_err());
        assert!(validate_latitude(f64::NAN).is_err());
    }

    #[test]
    fn longitude_bounds() {
        assert!(validate_longitude(127.04).is_ok());
        assert!(validate_longitude(-180.0).is_ok());
        assert!(validate_longitude(181.0).is_err());
    }

    #[test]
    fn distance_bounds() {
        assert!(validate_distance(0.0).is_ok());
        assert!(validate_distance(5_000.0).is_ok());
        assert!(validate_distance(-1.0).is_err());
        assert!(validate_distance(f64::INFINITY).is_err());
    }
}
