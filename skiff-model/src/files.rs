use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which logical subtree a virtual path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    Root,
    Home,
    Shared,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::Root => "root",
            StorageClass::Home => "home",
            StorageClass::Shared => "shared",
        }
    }
}

/// One entry of a directory listing, addressed by canonical virtual path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: i64,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirListing {
    pub path: String,
    pub storage_type: StorageClass,
    pub files: Vec<FileEntry>,
    pub total: usize,
    pub total_size: i64,
}

/// Storage dashboard numbers for one account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UsageReport {
    pub storage_used: i64,
    /// 0 means unlimited.
    pub storage_quota: i64,
    pub trash_used: i64,
    pub trash_items: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Name,
    Size,
    Date,
    Type,
}

impl SortKey {
    pub fn parse(value: &str) -> Self {
        match value {
            "size" => SortKey::Size,
            "date" => SortKey::Date,
            "type" => SortKey::Type,
            _ => SortKey::Name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(value: &str) -> Self {
        match value {
            "desc" => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }
}

/// Sorts a listing in place. Directories always come before files; within
/// each group the requested key and order apply.
pub fn sort_entries(entries: &mut [FileEntry], key: SortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        b.is_dir.cmp(&a.is_dir).then_with(|| {
            let cmp = match key {
                SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
                SortKey::Size => a.size.cmp(&b.size),
                SortKey::Date => a.modified.cmp(&b.modified),
                SortKey::Type => {
                    let ext = |n: &str| {
                        n.rsplit_once('.')
                            .map(|(_, e)| e.to_lowercase())
                            .unwrap_or_default()
                    };
                    ext(&a.name)
                        .cmp(&ext(&b.name))
                        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                }
            };
            match order {
                SortOrder::Asc => cmp,
                SortOrder::Desc => cmp.reverse(),
            }
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool, size: i64) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: format!("/home/{name}"),
            is_dir,
            size,
            modified: None,
        }
    }

    #[test]
    fn directories_sort_before_files_regardless_of_order() {
        let mut entries = vec![
            entry("zzz.txt", false, 10),
            entry("aaa", true, 0),
            entry("bbb.txt", false, 5),
        ];
        sort_entries(&mut entries, SortKey::Name, SortOrder::Desc);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "zzz.txt");
    }

    #[test]
    fn size_sort_is_numeric() {
        let mut entries = vec![
            entry("a.bin", false, 100),
            entry("b.bin", false, 20),
        ];
        sort_entries(&mut entries, SortKey::Size, SortOrder::Asc);
        assert_eq!(entries[0].name, "b.bin");
    }
}
