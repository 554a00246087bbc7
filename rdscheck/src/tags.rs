use std::collections::HashMap;

use aws_sdk_rds::types::Tag;

/// Marker tag identifying snapshots owned by this system. Snapshots
/// without it are never touched.
pub const CREATED_BY: &str = "CreatedBy";
pub const CREATED_BY_VALUE: &str = "rdscheck";

/// Informational origin tag written on copied snapshots.
pub const RDS_INSTANCE: &str = "RDS Instance";

/// The lifecycle state of a snapshot; see [`SnapshotStatus`].
pub const STATUS: &str = "Status";

/// Sticky failure marker; set to `yes` by the alarm handler, never cleared.
pub const CHECKS_FAILED: &str = "ChecksFailed";

/// Origin snapshot tag written on restored instances and subnet groups.
pub const SNAPSHOT: &str = "Snapshot";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tags(HashMap<String, String>);

impl From<Option<Vec<Tag>>> for Tags {
    fn from(tags: Option<Vec<Tag>>) -> Self {
        if let Some(tags) = tags {
            let mut out_map = HashMap::new();
            for tag in tags {
                let Some(key) = tag.key else {
                    continue;
                };
                let Some(value) = tag.value else {
                    continue;
                };
                out_map.insert(key, value);
            }
            Tags(out_map)
        } else {
            Tags::default()
        }
    }
}

impl Tags {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The lifecycle states a snapshot traverses, persisted in the `Status`
/// tag. `Alarm` is reachable from any mid-lifecycle state on failure and
/// drains back through `Clean` so resources are still torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotStatus {
    Ready,
    Restore,
    Modify,
    Verify,
    Clean,
    Tested,
    Alarm,
}

impl SnapshotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotStatus::Ready => "ready",
            SnapshotStatus::Restore => "restore",
            SnapshotStatus::Modify => "modify",
            SnapshotStatus::Verify => "verify",
            SnapshotStatus::Clean => "clean",
            SnapshotStatus::Tested => "tested",
            SnapshotStatus::Alarm => "alarm",
        }
    }

    /// Returns `None` for an empty or unknown status, which callers treat
    /// as a safe no-op.
    pub fn parse(status: &str) -> Option<SnapshotStatus> {
        match status {
            "ready" => Some(SnapshotStatus::Ready),
            "restore" => Some(SnapshotStatus::Restore),
            "modify" => Some(SnapshotStatus::Modify),
            "verify" => Some(SnapshotStatus::Verify),
            "clean" => Some(SnapshotStatus::Clean),
            "tested" => Some(SnapshotStatus::Tested),
            "alarm" => Some(SnapshotStatus::Alarm),
            _ => None,
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in [
            SnapshotStatus::Ready,
            SnapshotStatus::Restore,
            SnapshotStatus::Modify,
            SnapshotStatus::Verify,
            SnapshotStatus::Clean,
            SnapshotStatus::Tested,
            SnapshotStatus::Alarm,
        ] {
            assert_eq!(SnapshotStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_status_parses_to_none() {
        assert_eq!(SnapshotStatus::parse(""), None);
        assert_eq!(SnapshotStatus::parse("testing"), None);
        assert_eq!(SnapshotStatus::parse("READY"), None);
    }

    #[test]
    fn tags_from_sdk_list() {
        let tags = Tags::from(Some(vec![
            Tag::builder().key(CREATED_BY).value(CREATED_BY_VALUE).build(),
            Tag::builder().key(STATUS).value("ready").build(),
            Tag::builder().key("Orphan").build(),
        ]));

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get(CREATED_BY), Some(CREATED_BY_VALUE));
        assert_eq!(tags.get(STATUS), Some("ready"));
        assert_eq!(tags.get("Orphan"), None);
    }

    #[test]
    fn tags_from_none_is_empty() {
        assert!(Tags::from(None).is_empty());
    }
}
