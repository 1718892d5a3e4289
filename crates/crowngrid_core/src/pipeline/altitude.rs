//! Flight-altitude capture: parse altitudes out of file names and copy
//! them onto observations.

use std::path::Path;

use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;

use crate::pipeline::PipelineResult;
use crate::repo::observation_repo::{ObservationRepository, SqliteObservationRepository};
use crate::repo::survey_repo::{SqliteSurveyRepository, SurveyRepository};

// Altitude token in survey file names: a number followed by a Latin or
// Cyrillic metre marker, `8m`, `8м`, `16 м`, `12.5m` or `12,5м`.
static ALTITUDE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d+)?)\s*[mм]").expect("altitude pattern must compile")
});

/// Extracts the flight altitude in metres from the file name of `path`,
/// accepting both `.` and `,` as the decimal separator.
pub fn altitude_from_filename(path: &str) -> Option<f64> {
    let name = Path::new(path).file_name()?.to_str()?;
    let captures = ALTITUDE_RE.captures(name)?;
    let number = captures.get(1)?.as_str().replace(',', ".");
    number.parse::<f64>().ok()
}

/// Sets `flight_altitude` on every image whose file name carries an
/// altitude token, when the stored value is missing or different.
///
/// Returns the number of updated images.
pub fn fill_flight_altitudes(conn: &mut Connection) -> PipelineResult<usize> {
    let tx = conn.transaction()?;
    let mut updated = 0usize;
    {
        let survey_repo = SqliteSurveyRepository::new(&tx);
        for image in survey_repo.list_images()? {
            let Some(altitude) = altitude_from_filename(&image.path) else {
                continue;
            };
            if image.flight_altitude == Some(altitude) {
                continue;
            }
            survey_repo.set_flight_altitude(image.image_id, altitude)?;
            updated += 1;
            info!(
                "event=fill_altitude module=pipeline status=ok image_id={} altitude={altitude} path={}",
                image.image_id, image.path
            );
        }
    }
    tx.commit()?;

    info!("event=fill_altitude module=pipeline status=ok updated={updated}");
    Ok(updated)
}

/// Copies `flight_altitude` from images onto their observations where
/// `obs_height` is still unset.
///
/// Returns the number of updated observations.
pub fn backfill_observation_heights(conn: &mut Connection) -> PipelineResult<usize> {
    let tx = conn.transaction()?;
    let updated = SqliteObservationRepository::new(&tx).backfill_heights_from_images()?;
    tx.commit()?;

    info!("event=backfill_heights module=pipeline status=ok updated={updated}");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::altitude_from_filename;

    #[test]
    fn parses_integer_altitude() {
        assert_eq!(altitude_from_filename("data/raw/поле_8м.jpg"), Some(8.0));
        assert_eq!(altitude_from_filename("scan 16 м.png"), Some(16.0));
    }

    #[test]
    fn parses_fractional_altitude_with_either_separator() {
        assert_eq!(altitude_from_filename("flight_12.5м_0042.png"), Some(12.5));
        assert_eq!(altitude_from_filename("flight_12,5м_0042.png"), Some(12.5));
    }

    #[test]
    fn accepts_latin_metre_marker() {
        assert_eq!(altitude_from_filename("field_8m.jpg"), Some(8.0));
        assert_eq!(altitude_from_filename("flight_12.5m_0042.png"), Some(12.5));
    }

    #[test]
    fn accepts_uppercase_markers() {
        assert_eq!(altitude_from_filename("DJI_0100_20М.JPG"), Some(20.0));
        assert_eq!(altitude_from_filename("DJI_0100_20M.JPG"), Some(20.0));
    }

    #[test]
    fn ignores_names_without_marker() {
        assert_eq!(altitude_from_filename("DJI_0100.JPG"), None);
        assert_eq!(altitude_from_filename("survey_without_altitude.png"), None);
    }

    #[test]
    fn uses_file_name_not_directory() {
        assert_eq!(altitude_from_filename("облёт_10м/IMG_1.jpg"), None);
    }
}
