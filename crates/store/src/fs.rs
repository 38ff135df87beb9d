//! Filesystem repository
//!
//! One directory per entity (`<root>/<category>/<name>/`), one file per
//! stamp named `<incrementId>.<encoding>`. Because increment id strings
//! already sort newest-first, the history contract falls out of a plain
//! directory listing plus a sort. Writes go through a dot-prefixed
//! temporary file and a rename; dot-prefixed names are invisible to
//! listings, so readers never observe a half-written stamp.

use accrete_core::{BinaryStamp, Encoding, EntityId, Error, IncrementId, Repository, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Repository backed by one file per stamp
#[derive(Debug, Clone)]
pub struct FsRepository {
    root: PathBuf,
}

impl FsRepository {
    /// A repository rooted at `root`; the directory is created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsRepository { root: root.into() }
    }

    fn entity_dir(&self, entity: &EntityId) -> PathBuf {
        self.root.join(entity.category()).join(entity.name())
    }

    fn stamp_path(&self, entity: &EntityId, increment: &IncrementId, encoding: Encoding) -> PathBuf {
        self.entity_dir(entity)
            .join(format!("{}.{}", increment.as_str(), encoding.as_str()))
    }

    /// All stamp ids present for an entity, unsorted
    async fn list_ids(&self, entity: &EntityId) -> Result<Vec<IncrementId>> {
        let dir = self.entity_dir(entity);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(path = %entry.path().display(), "skipping non-utf8 repository file");
                continue;
            };
            // Dot-prefixed files are in-flight temporaries.
            if name.starts_with('.') {
                continue;
            }
            let Some((stem, extension)) = name.rsplit_once('.') else {
                continue;
            };
            if extension.parse::<Encoding>().is_err() {
                warn!(path = %entry.path().display(), "skipping repository file with unknown encoding");
                continue;
            }
            ids.push(IncrementId::from_raw(stem));
        }
        Ok(ids)
    }
}

#[async_trait]
impl Repository for FsRepository {
    async fn save(&self, stamp: &BinaryStamp) -> Result<()> {
        if stamp.is_empty() {
            return Err(Error::exception("cannot persist an absent stamp"));
        }
        let dir = self.entity_dir(&stamp.entity);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.{}", stamp.increment.as_str(), stamp.encoding.as_str());
        let temp = dir.join(format!(".{file_name}.tmp"));
        let target = dir.join(file_name);

        tokio::fs::write(&temp, &stamp.bytes).await?;
        tokio::fs::rename(&temp, &target).await?;
        Ok(())
    }

    async fn load(&self, entity: &EntityId, increment: &IncrementId) -> Result<BinaryStamp> {
        for encoding in [Encoding::Json, Encoding::MsgPack] {
            let path = self.stamp_path(entity, increment, encoding);
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    return Ok(BinaryStamp::new(
                        entity.clone(),
                        increment.clone(),
                        encoding,
                        bytes,
                    ))
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(Error::NotFound {
            entity: entity.clone(),
            increment: increment.clone(),
        })
    }

    async fn history_before(
        &self,
        entity: &EntityId,
        before: &IncrementId,
        max: usize,
    ) -> Result<Vec<IncrementId>> {
        if before.is_none() {
            return Ok(Vec::new());
        }
        let mut ids = self.list_ids(entity).await?;
        ids.retain(|id| id.as_str() > before.as_str());
        // Ascending raw-string order is newest-first.
        ids.sort();
        ids.truncate(max);
        Ok(ids)
    }

    async fn history_after(&self, entity: &EntityId, after: &IncrementId) -> Result<Vec<IncrementId>> {
        let mut ids = self.list_ids(entity).await?;
        if !after.is_none() {
            ids.retain(|id| id.as_str() < after.as_str());
        }
        // Descending raw-string order is oldest-first.
        ids.sort();
        ids.reverse();
        Ok(ids)
    }
}

/// Check the directory exists and is readable (startup diagnostics)
pub async fn probe(root: &Path) -> Result<()> {
    tokio::fs::create_dir_all(root).await?;
    tokio::fs::read_dir(root).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn entity(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    fn id(offset_secs: i64) -> IncrementId {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap()
            + chrono::Duration::seconds(offset_secs);
        IncrementId::at(at, "tail")
    }

    fn stamp(raw: &str, increment: IncrementId) -> BinaryStamp {
        BinaryStamp::new(entity(raw), increment, Encoding::Json, b"{\"Int\":1}".to_vec())
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let repo = FsRepository::new(dir.path());

        let saved = stamp("user/alice", id(0));
        repo.save(&saved).await.unwrap();

        let loaded = repo.load(&entity("user/alice"), &id(0)).await.unwrap();
        assert_eq!(loaded, saved);

        // One file per stamp under the per-entity directory.
        let file = dir
            .path()
            .join("user")
            .join("alice")
            .join(format!("{}.json", id(0).as_str()));
        assert!(file.exists());
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let repo = FsRepository::new(dir.path());
        let err = repo.load(&entity("user/alice"), &id(0)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn history_honors_before_after_contract() {
        let dir = TempDir::new().unwrap();
        let repo = FsRepository::new(dir.path());
        for offset in [0, 10, 20, 30] {
            repo.save(&stamp("user/alice", id(offset))).await.unwrap();
        }

        let before = repo
            .history_before(&entity("user/alice"), &id(25), 10)
            .await
            .unwrap();
        assert_eq!(before, vec![id(20), id(10), id(0)]);

        let before = repo
            .history_before(&entity("user/alice"), &id(25), 2)
            .await
            .unwrap();
        assert_eq!(before, vec![id(20), id(10)]);

        let after = repo.history_after(&entity("user/alice"), &id(5)).await.unwrap();
        assert_eq!(after, vec![id(10), id(20), id(30)]);

        let all = repo
            .history_after(&entity("user/alice"), &IncrementId::none())
            .await
            .unwrap();
        assert_eq!(all, vec![id(0), id(10), id(20), id(30)]);

        let none = repo
            .history_before(&entity("user/alice"), &IncrementId::none(), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn history_of_unknown_entity_is_empty() {
        let dir = TempDir::new().unwrap();
        let repo = FsRepository::new(dir.path());
        let ids = repo
            .history_after(&entity("user/nobody"), &IncrementId::none())
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn listing_skips_foreign_and_temporary_files() {
        let dir = TempDir::new().unwrap();
        let repo = FsRepository::new(dir.path());
        repo.save(&stamp("user/alice", id(0))).await.unwrap();

        let entity_dir = dir.path().join("user").join("alice");
        std::fs::write(entity_dir.join(".leftover.json.tmp"), b"junk").unwrap();
        std::fs::write(entity_dir.join("notes.txt"), b"junk").unwrap();

        let ids = repo
            .history_after(&entity("user/alice"), &IncrementId::none())
            .await
            .unwrap();
        assert_eq!(ids, vec![id(0)]);
    }

    #[tokio::test]
    async fn encoding_tag_travels_in_the_extension() {
        let dir = TempDir::new().unwrap();
        let repo = FsRepository::new(dir.path());
        let saved = BinaryStamp::new(
            entity("user/alice"),
            id(0),
            Encoding::MsgPack,
            vec![0xcc, 0x07],
        );
        repo.save(&saved).await.unwrap();

        let loaded = repo.load(&entity("user/alice"), &id(0)).await.unwrap();
        assert_eq!(loaded.encoding, Encoding::MsgPack);
        assert_eq!(loaded.bytes, vec![0xcc, 0x07]);
    }
}
