// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Validity window arithmetic.
//!
//! The secure element stores certificate dates with hour precision, so
//! issuance times are truncated to the hour before they are signed over.

use std::time::SystemTime;
use x509_cert::der::asn1::{GeneralizedTime, UtcTime};
use x509_cert::der::DateTime;
use x509_cert::time::Time;

use crate::SignerError;

/// First year that RFC 5280 requires to be encoded as GeneralizedTime.
const GENERALIZED_TIME_FROM: u16 = 2050;

/// `now`, truncated to the start of the hour.
pub fn issuance_time(now: SystemTime) -> Result<DateTime, SignerError> {
    let dt = DateTime::from_system_time(now).map_err(SignerError::format)?;
    DateTime::new(dt.year(), dt.month(), dt.day(), dt.hour(), 0, 0)
        .map_err(SignerError::format)
}

fn is_leap(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Move `dt` forward by whole calendar years.
///
/// February 29th becomes February 28th when the target year has no leap day.
pub fn add_years(dt: DateTime, years: u32) -> Result<DateTime, SignerError> {
    let year = u32::from(dt.year())
        .checked_add(years)
        .and_then(|y| u16::try_from(y).ok())
        .ok_or_else(|| {
            SignerError::Format(format!(
                "{years} years after {} is out of range",
                dt.year()
            ))
        })?;
    let day = if dt.month() == 2 && dt.day() == 29 && !is_leap(year) {
        28
    } else {
        dt.day()
    };
    DateTime::new(
        year,
        dt.month(),
        day,
        dt.hour(),
        dt.minutes(),
        dt.seconds(),
    )
    .map_err(SignerError::format)
}

/// Encode `dt` the way RFC 5280 mandates for its year.
pub fn x509_time(dt: DateTime) -> Result<Time, SignerError> {
    if dt.year() < GENERALIZED_TIME_FROM {
        let utc = UtcTime::from_date_time(dt).map_err(SignerError::format)?;
        Ok(Time::UtcTime(utc))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_date_time(dt)))
    }
}
