use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use venue_core::{FileId, FileMeta, RoomId};

/// A file change the host library wants reflected in the room index. Wired
/// through [`HostLibrary::on_change`] so the dispatcher can broadcast
/// `INDEX_UPSERT`/`INDEX_REMOVE` when the operator adds or removes files
/// through the (out-of-scope) admin surface.
#[derive(Debug, Clone)]
pub enum LibraryChangeEvent {
    Upserted(Vec<FileMeta>),
    Removed(Vec<FileId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRoomView {
    pub room_id: RoomId,
    pub room_name: String,
    pub locked: bool,
}

/// Read-only facade over the venue operator's admin surface. The core only
/// ever consumes this trait; nothing in `venue-host` depends on how files
/// are uploaded, how the room gets locked, or how the callback is wired up.
#[async_trait]
pub trait HostLibrary: Send + Sync {
    async fn list(&self) -> Vec<FileMeta>;
    async fn get(&self, file_id: &str) -> Option<(FileMeta, PathBuf)>;
    fn is_room_locked(&self) -> bool;
    fn room_view(&self) -> LibraryRoomView;
    fn on_change(&self, callback: ChangeCallback);
}

pub type ChangeCallback = Box<dyn Fn(LibraryChangeEvent) + Send + Sync>;

/// An in-memory, never-persisted host library. With no admin surface wired
/// up this starts out empty and unlocked; tests populate it directly to
/// exercise the host-sourced transfer path without inventing the admin
/// HTTP surface that feeds it in a full deployment.
pub struct StaticHostLibrary {
    room_id: RoomId,
    room_name: String,
    files: RwLock<Vec<(FileMeta, PathBuf)>>,
    locked: RwLock<bool>,
    listeners: RwLock<Vec<ChangeCallback>>,
}

impl StaticHostLibrary {
    #[must_use]
    pub fn new(room_id: RoomId, room_name: String) -> Self {
        Self {
            room_id,
            room_name,
            files: RwLock::new(Vec::new()),
            locked: RwLock::new(false),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Add or replace a host-library file and notify listeners.
    pub fn upsert_file(&self, meta: FileMeta, path: PathBuf) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.retain(|(existing, _)| existing.file_id != meta.file_id);
        files.push((meta.clone(), path));
        drop(files);
        self.notify(LibraryChangeEvent::Upserted(vec![meta]));
    }

    pub fn remove_file(&self, file_id: &str) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.retain(|(existing, _)| existing.file_id != file_id);
        drop(files);
        self.notify(LibraryChangeEvent::Removed(vec![file_id.to_owned()]));
    }

    pub fn set_locked(&self, locked: bool) {
        *self.locked.write().unwrap_or_else(|e| e.into_inner()) = locked;
    }

    fn notify(&self, event: LibraryChangeEvent) {
        for listener in self.listeners.read().unwrap_or_else(|e| e.into_inner()).iter() {
            listener(event.clone());
        }
    }
}

#[async_trait]
impl HostLibrary for StaticHostLibrary {
    async fn list(&self) -> Vec<FileMeta> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(meta, _)| meta.clone())
            .collect()
    }

    async fn get(&self, file_id: &str) -> Option<(FileMeta, PathBuf)> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(meta, _)| meta.file_id == file_id)
            .cloned()
    }

    fn is_room_locked(&self) -> bool {
        *self.locked.read().unwrap_or_else(|e| e.into_inner())
    }

    fn room_view(&self) -> LibraryRoomView {
        LibraryRoomView {
            room_id: self.room_id.clone(),
            room_name: self.room_name.clone(),
            locked: self.is_room_locked(),
        }
    }

    fn on_change(&self, callback: ChangeCallback) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta(file_id: &str) -> FileMeta {
        FileMeta {
            file_id: file_id.to_owned(),
            title: "t".to_owned(),
            artist: None,
            album: None,
            duration_sec: None,
            size_bytes: 4,
            mime_type: "audio/mpeg".to_owned(),
            sha256: "abc".to_owned(),
            owner_peer_id: venue_core::HOST_OWNER_PEER_ID.to_owned(),
            owner_name: "Venue Host".to_owned(),
            added_at_ms: 1,
        }
    }

    #[tokio::test]
    async fn upsert_and_list() {
        let library = StaticHostLibrary::new("default".to_owned(), "Room".to_owned());
        library.upsert_file(sample_meta("H1"), PathBuf::from("/tmp/h1"));
        let files = library.list().await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, "H1");
    }

    #[tokio::test]
    async fn remove_drops_from_list() {
        let library = StaticHostLibrary::new("default".to_owned(), "Room".to_owned());
        library.upsert_file(sample_meta("H1"), PathBuf::from("/tmp/h1"));
        library.remove_file("H1");
        assert!(library.list().await.is_empty());
    }

    #[test]
    fn starts_unlocked() {
        let library = StaticHostLibrary::new("default".to_owned(), "Room".to_owned());
        assert!(!library.is_room_locked());
    }
}
