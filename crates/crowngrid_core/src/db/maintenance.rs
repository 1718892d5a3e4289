//! Store maintenance: annotation dedup and orphan cleanup.
//!
//! Both operations touch records only. Raster files left behind on disk are
//! out of scope here and reclaimed by external tooling.

use log::info;
use rusqlite::Connection;

use crate::db::DbResult;

/// Deletes duplicate annotations, keeping the newest row per
/// `(image_id, tree_id)`. Rows tied on `created_at` all survive.
///
/// Returns the number of deleted annotations.
pub fn dedup_annotations_keep_latest(conn: &Connection) -> DbResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM annotations
         WHERE annotation_id IN (
             SELECT a.annotation_id
             FROM annotations a
             JOIN (
                 SELECT image_id, tree_id, MAX(created_at) AS max_created
                 FROM annotations
                 GROUP BY image_id, tree_id
             ) latest
               ON a.image_id = latest.image_id
              AND a.tree_id = latest.tree_id
             WHERE a.created_at < latest.max_created
         )",
        [],
    )?;
    info!("event=dedup_annotations module=maintenance status=ok deleted={deleted}");
    Ok(deleted)
}

/// Deletes crown observations whose annotation no longer exists, typically
/// after [`dedup_annotations_keep_latest`] removed superseded annotations.
///
/// Returns the number of deleted observations.
pub fn remove_orphan_observations(conn: &Connection) -> DbResult<usize> {
    let deleted = conn.execute(
        "DELETE FROM crown_observations
         WHERE annotation_id NOT IN (SELECT annotation_id FROM annotations)",
        [],
    )?;
    info!("event=cleanup_observations module=maintenance status=ok deleted={deleted}");
    Ok(deleted)
}
