//! Field validators for stock primitive inputs
//!
//! Used through `#[validate(custom = "...")]` on the input structs so that a
//! malformed request is rejected before any transaction is opened.

use std::collections::HashSet;

use rust_decimal::Decimal;
use validator::ValidationError;

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Quantities moved by add/remove/transfer/reserve must be positive
pub fn validate_positive_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        Err(invalid("range", "Value must be greater than 0"))
    }
}

/// Unit costs may be zero (free samples) but never negative
pub fn validate_non_negative_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value >= Decimal::ZERO {
        Ok(())
    } else {
        Err(invalid("range", "Value must not be negative"))
    }
}

/// An adjustment that changes nothing is a caller bug
pub fn validate_non_zero_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_zero() {
        Err(invalid("range", "Value must not be zero"))
    } else {
        Ok(())
    }
}

/// Serial numbers must be non-blank and unique within one request
pub fn validate_serial_numbers(serials: &Vec<String>) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(serials.len());
    for serial in serials {
        let serial = serial.trim();
        if serial.is_empty() {
            return Err(invalid("serials", "Serial numbers must not be blank"));
        }
        if !seen.insert(serial) {
            return Err(invalid("serials", "Serial numbers must be unique"));
        }
    }
    Ok(())
}
