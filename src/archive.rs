use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Normalize a logical path: lower-case, forward slashes, no leading or
/// trailing separator.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
        .trim_matches('/')
        .to_lowercase()
}

/// Split a logical path into `(folder, name)`. Root-level entries have an empty folder.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

pub fn join_path(folder: &str, name: &str) -> String {
    if folder.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", folder, name)
    }
}

/// Compression settings handed to the container on open and used on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionOptions {
    /// zstd level for packed archives.
    pub level: i32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(usize);

#[derive(Debug, Clone)]
pub struct Entry {
    folder: FolderId,
    name: String,
    data: Vec<u8>,
}

impl Entry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn folder(&self) -> FolderId {
        self.folder
    }
}

#[derive(Debug, Clone)]
pub struct Folder {
    path: String,
    entries: Vec<EntryId>,
    names: HashMap<String, EntryId>,
}

impl Folder {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Folders and entries live in arenas addressed by stable handles. Removal
/// leaves an empty slot and handles are never reused.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    folders: Vec<Option<Folder>>,
    entries: Vec<Option<Entry>>,
    folder_index: HashMap<String, FolderId>,
    options: CompressionOptions,
}

impl Archive {
    pub fn new(options: CompressionOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> CompressionOptions {
        self.options
    }

    /// Add a folder, or return the existing one with the same path.
    pub fn add_folder(&mut self, path: &str) -> FolderId {
        let path = normalize_path(path);
        if let Some(&id) = self.folder_index.get(&path) {
            return id;
        }
        let id = FolderId(self.folders.len());
        self.folders.push(Some(Folder {
            path: path.clone(),
            entries: Vec::new(),
            names: HashMap::new(),
        }));
        self.folder_index.insert(path, id);
        id
    }

    pub fn folder_id(&self, path: &str) -> Option<FolderId> {
        self.folder_index.get(path).copied()
    }

    pub fn folder(&self, id: FolderId) -> Option<&Folder> {
        self.folders.get(id.0).and_then(Option::as_ref)
    }

    /// Live folders in insertion order.
    pub fn folders(&self) -> impl Iterator<Item = (FolderId, &Folder)> + '_ {
        self.folders
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (FolderId(i), f)))
    }

    /// Add an entry to a folder. An entry with the same name is replaced in place
    /// and keeps its handle.
    pub fn add_entry(&mut self, folder: FolderId, name: &str, data: Vec<u8>) -> EntryId {
        let name = name.to_lowercase();
        if let Some(existing) = self.find_in_folder(folder, &name) {
            self.replace_contents(existing, data);
            return existing;
        }

        let id = EntryId(self.entries.len());
        if let Some(Some(f)) = self.folders.get_mut(folder.0) {
            f.entries.push(id);
            f.names.insert(name.clone(), id);
        }
        self.entries.push(Some(Entry { folder, name, data }));
        id
    }

    /// Add an entry by logical path, creating its folder if needed.
    pub fn insert(&mut self, path: &str, data: Vec<u8>) -> EntryId {
        let path = normalize_path(path);
        let (folder, name) = split_path(&path);
        let folder = self.add_folder(folder);
        self.add_entry(folder, name, data)
    }

    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.get(id.0).and_then(Option::as_ref)
    }

    /// Live entries, grouped by folder in folder order.
    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &Entry)> + '_ {
        self.folders()
            .flat_map(|(_, folder)| folder.entries.iter().copied())
            .filter_map(move |id| self.entry(id).map(|e| (id, e)))
    }

    /// Full logical path of an entry.
    pub fn path_of(&self, id: EntryId) -> Option<String> {
        let entry = self.entry(id)?;
        let folder = self.folder(entry.folder)?;
        Some(join_path(&folder.path, &entry.name))
    }

    pub fn find(&self, path: &str) -> Option<EntryId> {
        let (folder, name) = split_path(path);
        self.find_in_folder(self.folder_id(folder)?, name)
    }

    fn find_in_folder(&self, folder: FolderId, name: &str) -> Option<EntryId> {
        self.folder(folder)?.names.get(name).copied()
    }

    /// Replace an entry's content. Returns false if the handle is stale.
    pub fn replace_contents(&mut self, id: EntryId, data: Vec<u8>) -> bool {
        match self.entries.get_mut(id.0) {
            Some(Some(entry)) => {
                entry.data = data;
                true
            }
            _ => false,
        }
    }

    /// Deep-copy an entry to a new logical path.
    pub fn duplicate(&mut self, id: EntryId, new_path: &str) -> Option<EntryId> {
        let data = self.entry(id)?.data.clone();
        Some(self.insert(new_path, data))
    }

    /// Remove every entry for which `predicate(path, entry)` holds. Returns the count removed.
    pub fn remove_entries_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&str, &Entry) -> bool,
    {
        let doomed: Vec<EntryId> = self
            .entries()
            .filter(|&(id, entry)| {
                self.path_of(id)
                    .is_some_and(|path| predicate(&path, entry))
            })
            .map(|(id, _)| id)
            .collect();

        let mut touched = HashSet::new();
        for &id in &doomed {
            if let Some(entry) = self.entries[id.0].take() {
                if let Some(Some(folder)) = self.folders.get_mut(entry.folder.0) {
                    folder.names.remove(&entry.name);
                    touched.insert(entry.folder);
                }
            }
        }

        // One pass per folder.
        let doomed_set: HashSet<EntryId> = doomed.iter().copied().collect();
        for folder in touched {
            if let Some(Some(f)) = self.folders.get_mut(folder.0) {
                f.entries.retain(|e| !doomed_set.contains(e));
            }
        }
        doomed.len()
    }

    /// Drop folders that no longer hold any entry. Returns the count removed.
    pub fn remove_empty_folders(&mut self) -> usize {
        let mut removed = 0;
        for slot in self.folders.iter_mut() {
            if slot.as_ref().is_some_and(Folder::is_empty) {
                if let Some(folder) = slot.take() {
                    self.folder_index.remove(&folder.path);
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn folder_count(&self) -> usize {
        self.folders.iter().filter(|f| f.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Archive {
        let mut archive = Archive::default();
        archive.insert("sound/fx/ui/click.wav", b"click".to_vec());
        archive.insert("sound/fx/ui/hover.wav", b"hover".to_vec());
        archive.insert("textures/rock.dds", b"rock".to_vec());
        archive.insert("readme.txt", b"root".to_vec());
        archive
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("Sound\\FX\\Click.WAV"), "sound/fx/click.wav");
        assert_eq!(normalize_path("/a/b/"), "a/b");
        assert_eq!(split_path("a/b/c.txt"), ("a/b", "c.txt"));
        assert_eq!(split_path("c.txt"), ("", "c.txt"));
    }

    #[test]
    fn test_insert_and_find() {
        let archive = sample();
        assert_eq!(archive.len(), 4);
        assert_eq!(archive.folder_count(), 3);

        let id = archive.find("sound/fx/ui/click.wav").unwrap();
        assert_eq!(archive.entry(id).unwrap().data(), b"click");
        assert_eq!(archive.path_of(id).unwrap(), "sound/fx/ui/click.wav");
        assert_eq!(archive.path_of(archive.find("readme.txt").unwrap()).unwrap(), "readme.txt");
        assert!(archive.find("sound/fx/ui/missing.wav").is_none());
    }

    #[test]
    fn test_add_entry_same_name_replaces() {
        let mut archive = sample();
        let before = archive.find("textures/rock.dds").unwrap();
        let after = archive.insert("Textures\\Rock.dds", b"new rock".to_vec());
        assert_eq!(before, after);
        assert_eq!(archive.len(), 4);
        assert_eq!(archive.entry(after).unwrap().data(), b"new rock");
    }

    #[test]
    fn test_duplicate_is_deep_copy() {
        let mut archive = sample();
        let src = archive.find("textures/rock.dds").unwrap();
        let copy = archive.duplicate(src, "textures/new/stone.dds").unwrap();

        archive.replace_contents(src, b"changed".to_vec());
        assert_eq!(archive.entry(copy).unwrap().data(), b"rock");
        assert!(archive.folder_id("textures/new").is_some());
    }

    #[test]
    fn test_remove_entries_and_empty_folders() {
        let mut archive = sample();
        let kept = archive.find("sound/fx/ui/click.wav").unwrap();

        let removed = archive.remove_entries_where(|path, _| !path.starts_with("sound/"));
        assert_eq!(removed, 2);
        assert_eq!(archive.remove_empty_folders(), 2);

        let paths: Vec<String> = archive
            .entries()
            .map(|(id, _)| archive.path_of(id).unwrap())
            .collect();
        assert_eq!(paths, vec!["sound/fx/ui/click.wav", "sound/fx/ui/hover.wav"]);
        assert_eq!(archive.folder_count(), 1);
        assert!(archive.folder_id("textures").is_none());

        // Surviving handles stay valid.
        assert_eq!(archive.entry(kept).unwrap().name(), "click.wav");
    }

    #[test]
    fn test_large_folder_lookup_and_prune() {
        let mut archive = Archive::default();
        for i in 0..50_000 {
            archive.insert(&format!("sound/voice/npc/line{:05}.ogg", i), vec![1]);
        }
        assert_eq!(archive.len(), 50_000);
        assert_eq!(archive.folder_count(), 1);

        let id = archive.find("sound/voice/npc/line49999.ogg").unwrap();
        assert_eq!(archive.path_of(id).unwrap(), "sound/voice/npc/line49999.ogg");

        let removed = archive.remove_entries_where(|path, _| !path.ends_with("0.ogg"));
        assert_eq!(removed, 45_000);
        assert_eq!(archive.len(), 5_000);
        assert!(archive.find("sound/voice/npc/line00001.ogg").is_none());
        assert!(archive.find("sound/voice/npc/line00010.ogg").is_some());

        // A removed name can be inserted again.
        let again = archive.insert("sound/voice/npc/line00001.ogg", vec![2]);
        assert_eq!(archive.find("sound/voice/npc/line00001.ogg"), Some(again));
        let folder = archive.folder(archive.folder_id("sound/voice/npc").unwrap()).unwrap();
        assert_eq!(folder.len(), 5_001);
    }

    #[test]
    fn test_stale_handle() {
        let mut archive = sample();
        let id = archive.find("readme.txt").unwrap();
        archive.remove_entries_where(|path, _| path == "readme.txt");
        assert!(archive.entry(id).is_none());
        assert!(!archive.replace_contents(id, vec![1]));
    }
}
