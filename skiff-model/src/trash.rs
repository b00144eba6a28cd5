use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{TrashId, UserId};

/// Metadata record for one trashed entry. The bytes live at
/// `<dataRoot>/trash/<username>/<id>/<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashItem {
    pub id: TrashId,
    pub owner_id: UserId,
    /// Virtual path the entry occupied before deletion; restore targets it.
    pub original_path: String,
    pub name: String,
    pub size: i64,
    pub is_dir: bool,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TrashStats {
    pub items: i64,
    pub bytes: i64,
}
