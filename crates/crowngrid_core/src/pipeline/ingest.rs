//! Survey image ingest: register raster files found under the raw images
//! directory.

use std::path::Path;

use log::{info, warn};
use rusqlite::Connection;
use walkdir::WalkDir;

use crate::pipeline::PipelineResult;
use crate::repo::survey_repo::{SqliteSurveyRepository, SurveyRepository};

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "tif", "tiff"];

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.iter().any(|known| *known == lower)
        })
        .unwrap_or(false)
}

/// Walks `raw_images_dir` recursively and registers every raster file not
/// yet known to the store. A missing directory imports nothing.
///
/// Returns the number of newly added images.
pub fn import_survey_images(conn: &mut Connection, raw_images_dir: &Path) -> PipelineResult<usize> {
    if !raw_images_dir.exists() {
        warn!(
            "event=import_images module=pipeline status=ok added=0 reason=missing_dir dir={}",
            raw_images_dir.display()
        );
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let mut added = 0usize;
    {
        let survey_repo = SqliteSurveyRepository::new(&tx);
        for entry in WalkDir::new(raw_images_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image_file(path) {
                continue;
            }

            let path_str = path.to_string_lossy();
            match survey_repo.insert_image_if_new(&path_str)? {
                Some(image_id) => {
                    added += 1;
                    info!(
                        "event=import_images module=pipeline status=ok image_id={image_id} path={path_str}"
                    );
                }
                None => {
                    warn!(
                        "event=import_images module=pipeline status=skip reason=duplicate path={path_str}"
                    );
                }
            }
        }
    }
    tx.commit()?;

    info!("event=import_images module=pipeline status=ok added={added}");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_extension_filter_is_case_insensitive() {
        assert!(is_image_file(Path::new("a/b/scan.JPG")));
        assert!(is_image_file(Path::new("scan.tiff")));
        assert!(!is_image_file(Path::new("notes.txt")));
        assert!(!is_image_file(Path::new("no_extension")));
    }
}
