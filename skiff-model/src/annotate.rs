use serde::{Deserialize, Serialize};

use crate::ids::UserId;

/// User-supplied description and tags on one path. These are annotations on
/// the tree, not the tree itself: entries may dangle after the file moves
/// and are swept lazily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnnotation {
    pub owner_id: UserId,
    pub path: String,
    pub description: Option<String>,
    /// Stored lowercase; duplicates are collapsed on write.
    pub tags: Vec<String>,
}

impl FileAnnotation {
    pub fn normalized_tags(tags: Vec<String>) -> Vec<String> {
        let mut out: Vec<String> = tags
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_lowercased_and_deduped() {
        let tags = FileAnnotation::normalized_tags(vec![
            " Work ".into(),
            "work".into(),
            "Q3".into(),
            "".into(),
        ]);
        assert_eq!(tags, vec!["q3".to_string(), "work".to_string()]);
    }
}
