//! Survey repository: imported images, trees, and annotations.

use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::model::survey::{AnnotationId, EllipseAnnotation, ImageId, SurveyImage};
use crate::repo::{RepoError, RepoResult};

const IMAGE_SELECT_SQL: &str = "SELECT
    image_id,
    path,
    flight_altitude
FROM images";

/// One annotation joined with the path of its source image, ready for
/// cropping.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationCrop {
    pub annotation: EllipseAnnotation,
    pub image_path: String,
}

/// Repository interface for the survey-side tables.
pub trait SurveyRepository {
    /// Registers an image path, returning `None` when the path is already
    /// known.
    fn insert_image_if_new(&self, path: &str) -> RepoResult<Option<ImageId>>;
    fn set_flight_altitude(&self, image_id: ImageId, altitude: f64) -> RepoResult<()>;
    /// All imported images, ordered by path.
    fn list_images(&self) -> RepoResult<Vec<SurveyImage>>;
    /// Creates the tree row if missing; a concrete `tree_type` wins over a
    /// previously stored `NULL`.
    fn upsert_tree(&self, tree_id: &str, tree_type: Option<&str>) -> RepoResult<()>;
    fn insert_annotation(&self, annotation: &EllipseAnnotation) -> RepoResult<AnnotationId>;
    /// All annotations joined with their image paths, oldest first.
    fn list_annotation_crops(&self) -> RepoResult<Vec<AnnotationCrop>>;
}

/// SQLite-backed survey repository.
pub struct SqliteSurveyRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSurveyRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl SurveyRepository for SqliteSurveyRepository<'_> {
    fn insert_image_if_new(&self, path: &str) -> RepoResult<Option<ImageId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM images WHERE path = ?1 LIMIT 1;")?;
        if stmt.exists(params![path])? {
            return Ok(None);
        }

        let image_id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO images (image_id, path) VALUES (?1, ?2);",
            params![image_id.to_string(), path],
        )?;
        Ok(Some(image_id))
    }

    fn set_flight_altitude(&self, image_id: ImageId, altitude: f64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE images SET flight_altitude = ?1 WHERE image_id = ?2;",
            params![altitude, image_id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "image",
                id: image_id.to_string(),
            });
        }

        Ok(())
    }

    fn list_images(&self) -> RepoResult<Vec<SurveyImage>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{IMAGE_SELECT_SQL} ORDER BY path ASC;"))?;
        let mut rows = stmt.query([])?;
        let mut images = Vec::new();

        while let Some(row) = rows.next()? {
            images.push(parse_image_row(row)?);
        }

        Ok(images)
    }

    fn upsert_tree(&self, tree_id: &str, tree_type: Option<&str>) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO trees (tree_id, tree_type) VALUES (?1, ?2)
             ON CONFLICT(tree_id) DO UPDATE
             SET tree_type = COALESCE(excluded.tree_type, trees.tree_type);",
            params![tree_id, tree_type],
        )?;
        Ok(())
    }

    fn insert_annotation(&self, annotation: &EllipseAnnotation) -> RepoResult<AnnotationId> {
        self.conn.execute(
            "INSERT INTO annotations (
                annotation_id,
                image_id,
                tree_id,
                x0,
                y0,
                a,
                b,
                theta
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                annotation.annotation_id.to_string(),
                annotation.image_id.to_string(),
                annotation.tree_id.as_str(),
                annotation.x0,
                annotation.y0,
                annotation.a,
                annotation.b,
                annotation.theta,
            ],
        )?;
        Ok(annotation.annotation_id)
    }

    fn list_annotation_crops(&self) -> RepoResult<Vec<AnnotationCrop>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                a.annotation_id,
                a.image_id,
                a.tree_id,
                a.x0,
                a.y0,
                a.a,
                a.b,
                a.theta,
                i.path AS image_path
             FROM annotations a
             JOIN images i ON i.image_id = a.image_id
             ORDER BY a.created_at ASC, a.annotation_id ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut crops = Vec::new();

        while let Some(row) = rows.next()? {
            let annotation = EllipseAnnotation {
                annotation_id: parse_uuid(row, "annotation_id")?,
                image_id: parse_uuid(row, "image_id")?,
                tree_id: row.get("tree_id")?,
                x0: row.get("x0")?,
                y0: row.get("y0")?,
                a: row.get("a")?,
                b: row.get("b")?,
                theta: row.get("theta")?,
            };
            crops.push(AnnotationCrop {
                annotation,
                image_path: row.get("image_path")?,
            });
        }

        Ok(crops)
    }
}

fn parse_image_row(row: &Row<'_>) -> RepoResult<SurveyImage> {
    Ok(SurveyImage {
        image_id: parse_uuid(row, "image_id")?,
        path: row.get("path")?,
        flight_altitude: row.get("flight_altitude")?,
    })
}

pub(crate) fn parse_uuid(row: &Row<'_>, column: &str) -> RepoResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{text}` in {column}")))
}
