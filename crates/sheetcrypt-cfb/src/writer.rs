use std::collections::HashMap;
use std::io::Write;

use crate::directory::{validate_name, DirectoryEntry, ObjectType};
use crate::error::CfbError;
use crate::fat::AllocationTable;
use crate::header::Header;
use crate::layout::{plan, Layout, Placement, StreamLocation, StreamRequest};
use crate::tree::{balance, is_encryption_envelope, ENCRYPTION_ENVELOPE};
use crate::{
    SectorSize, DIFSECT, ENDOFCHAIN, FATSECT, FREESECT, HEADER_DIFAT_SLOTS, HEADER_LEN,
    MINI_SECTOR_SIZE, NOSTREAM,
};

const ROOT_ENTRY_NAME: &str = "Root Entry";

#[derive(Debug)]
enum NodeKind {
    Root,
    Storage,
    Stream { data: Vec<u8>, placement: Placement },
}

#[derive(Debug)]
struct Node {
    name: String,
    path: String,
    kind: NodeKind,
    children: Vec<usize>,
}

/// Builds a compound file in memory.
///
/// Intermediate storages are created on demand: adding `"a/b/c"` creates storages `a` and `a/b`.
/// Sibling names are unique case-insensitively within a storage.
///
/// ```
/// use sheetcrypt_cfb::{CompoundFile, ContainerBuilder};
///
/// let mut builder = ContainerBuilder::new();
/// builder.add_stream("Book", b"hello".to_vec()).unwrap();
/// let bytes = builder.finish().unwrap();
///
/// let file = CompoundFile::parse(&bytes).unwrap();
/// assert_eq!(file.read_stream("Book").unwrap(), b"hello");
/// ```
#[derive(Debug)]
pub struct ContainerBuilder {
    sector_size: SectorSize,
    nodes: Vec<Node>,
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::with_sector_size(SectorSize::default())
    }

    pub fn with_sector_size(sector_size: SectorSize) -> Self {
        Self {
            sector_size,
            nodes: vec![Node {
                name: ROOT_ENTRY_NAME.to_string(),
                path: String::new(),
                kind: NodeKind::Root,
                children: Vec::new(),
            }],
        }
    }

    pub fn sector_size(&self) -> SectorSize {
        self.sector_size
    }

    pub fn add_stream(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<(), CfbError> {
        self.add_stream_with_placement(path, data, Placement::Auto)
    }

    pub fn add_stream_with_placement(
        &mut self,
        path: &str,
        data: impl Into<Vec<u8>>,
        placement: Placement,
    ) -> Result<(), CfbError> {
        let (parent, name) = self.ensure_parent(path)?;
        self.attach(
            parent,
            name,
            NodeKind::Stream {
                data: data.into(),
                placement,
            },
        )?;
        Ok(())
    }

    /// Add an (initially empty) storage. Adding an existing storage is a no-op.
    pub fn add_storage(&mut self, path: &str) -> Result<(), CfbError> {
        let (parent, name) = self.ensure_parent(path)?;
        match self.find_child(parent, name) {
            Some(existing) if matches!(self.nodes[existing].kind, NodeKind::Storage) => Ok(()),
            Some(existing) => Err(CfbError::DuplicateEntry(self.nodes[existing].path.clone())),
            None => self.attach(parent, name, NodeKind::Storage).map(|_| ()),
        }
    }

    fn ensure_parent<'p>(&mut self, path: &'p str) -> Result<(usize, &'p str), CfbError> {
        let trimmed = path.trim_start_matches('/');
        let mut components: Vec<&str> = trimmed.split('/').collect();
        let name = components.pop().unwrap_or_default();
        validate_name(name)?;

        let mut parent = 0;
        for component in components {
            validate_name(component)?;
            parent = match self.find_child(parent, component) {
                Some(existing) => match self.nodes[existing].kind {
                    NodeKind::Storage => existing,
                    _ => {
                        return Err(CfbError::InvalidName {
                            name: path.to_string(),
                            reason: "parent is a stream",
                        })
                    }
                },
                None => self.attach(parent, component, NodeKind::Storage)?,
            };
        }
        Ok((parent, name))
    }

    fn find_child(&self, parent: usize, name: &str) -> Option<usize> {
        let folded = name.to_uppercase();
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self.nodes[child].name.to_uppercase() == folded)
    }

    fn attach(&mut self, parent: usize, name: &str, kind: NodeKind) -> Result<usize, CfbError> {
        let path = if parent == 0 {
            name.to_string()
        } else {
            format!("{}/{}", self.nodes[parent].path, name)
        };
        if self.find_child(parent, name).is_some() {
            return Err(CfbError::DuplicateEntry(path));
        }

        let id = self.nodes.len();
        self.nodes.push(Node {
            name: name.to_string(),
            path,
            kind,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    /// Serialize the container.
    pub fn finish(&self) -> Result<Vec<u8>, CfbError> {
        let order = self.preorder();
        let mut slot_of = vec![0usize; self.nodes.len()];
        for (slot, &node) in order.iter().enumerate() {
            slot_of[node] = slot;
        }

        let streams: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&node| matches!(self.nodes[node].kind, NodeKind::Stream { .. }))
            .collect();
        let requests: Vec<StreamRequest> = streams
            .iter()
            .map(|&node| match &self.nodes[node].kind {
                NodeKind::Stream { data, placement } => StreamRequest {
                    len: data.len() as u64,
                    placement: *placement,
                },
                _ => StreamRequest::new(0),
            })
            .collect();

        let layout = plan(&requests, order.len(), self.sector_size)?;
        log::debug!(
            "planned container: {} entries, {} streams, {} sectors ({} FAT, {} DIFAT)",
            order.len(),
            streams.len(),
            layout.total_sectors,
            layout.fat_sectors.len(),
            layout.difat.count
        );

        let mut location_of: HashMap<usize, StreamLocation> = HashMap::new();
        for (node, location) in streams.iter().zip(&layout.streams) {
            location_of.insert(*node, *location);
        }

        let mut entries = self.directory_entries(&order, &location_of, &layout);
        if is_encryption_envelope(order.iter().map(|&node| self.nodes[node].path.as_str())) {
            self.link_envelope(&order, &mut entries);
        } else {
            self.link_balanced(&order, &slot_of, &mut entries);
        }

        self.emit(&layout, &entries, &streams, &location_of)
    }

    /// Serialize the container into `writer`. Nothing is written if serialization fails.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), CfbError> {
        let bytes = self.finish()?;
        writer.write_all(&bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Root first, then each child (in insertion order) followed by its own subtree.
    fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0usize];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.nodes[node].children.iter().rev());
        }
        order
    }

    fn directory_entries(
        &self,
        order: &[usize],
        location_of: &HashMap<usize, StreamLocation>,
        layout: &Layout,
    ) -> Vec<DirectoryEntry> {
        order
            .iter()
            .map(|&node| {
                let node_ref = &self.nodes[node];
                match &node_ref.kind {
                    NodeKind::Root => {
                        let mut entry = DirectoryEntry::new(&node_ref.name, ObjectType::Root);
                        entry.start_sector = layout.mini_stream.start;
                        entry.size = layout.mini_stream_len;
                        entry
                    }
                    NodeKind::Storage => {
                        let mut entry = DirectoryEntry::new(&node_ref.name, ObjectType::Storage);
                        entry.start_sector = 0;
                        entry.size = 0;
                        entry
                    }
                    NodeKind::Stream { data, .. } => {
                        let mut entry = DirectoryEntry::new(&node_ref.name, ObjectType::Stream);
                        entry.start_sector = location_of
                            .get(&node)
                            .map_or(ENDOFCHAIN, StreamLocation::start_sector);
                        entry.size = data.len() as u64;
                        entry
                    }
                }
            })
            .collect()
    }

    fn link_balanced(&self, order: &[usize], slot_of: &[usize], entries: &mut [DirectoryEntry]) {
        for &node in order {
            let children = &self.nodes[node].children;
            if children.is_empty() {
                continue;
            }
            let names: Vec<&str> = children
                .iter()
                .map(|&child| self.nodes[child].name.as_str())
                .collect();
            let tree = balance(&names);
            let to_slot = |local: Option<usize>| {
                local.map_or(NOSTREAM, |idx| slot_of[children[idx]] as u32)
            };

            for (local, &child) in children.iter().enumerate() {
                let links = tree.links[local];
                let entry = &mut entries[slot_of[child]];
                entry.left_sibling = to_slot(links.left);
                entry.right_sibling = to_slot(links.right);
                entry.color = links.color;
            }
            entries[slot_of[node]].child = to_slot(tree.root);
        }
    }

    fn link_envelope(&self, order: &[usize], entries: &mut [DirectoryEntry]) {
        let slot_by_path: HashMap<&str, u32> = order
            .iter()
            .enumerate()
            .map(|(slot, &node)| (self.nodes[node].path.as_str(), slot as u32))
            .collect();
        let resolve = |path: Option<&str>| {
            path.and_then(|path| slot_by_path.get(path).copied())
                .unwrap_or(NOSTREAM)
        };

        for fixed in ENCRYPTION_ENVELOPE {
            let Some(&slot) = slot_by_path.get(fixed.path) else {
                continue;
            };
            let entry = &mut entries[slot as usize];
            entry.color = fixed.color;
            entry.left_sibling = resolve(fixed.left);
            entry.right_sibling = resolve(fixed.right);
            entry.child = resolve(fixed.child);
        }
    }

    fn emit(
        &self,
        layout: &Layout,
        entries: &[DirectoryEntry],
        streams: &[usize],
        location_of: &HashMap<usize, StreamLocation>,
    ) -> Result<Vec<u8>, CfbError> {
        let sector_len = self.sector_size.bytes();
        let per_sector = self.sector_size.entries_per_sector();
        let file_len = usize::try_from(layout.file_len())
            .map_err(|_| CfbError::TooLarge(format!("{} bytes", layout.file_len())))?;
        let mut out = vec![0u8; file_len];
        let sector_offset = |sector: u32| (sector as usize + 1) * sector_len;

        // FAT.
        let mut fat = AllocationTable::with_len(layout.fat_sectors.len() * per_sector);
        for &sector in &layout.fat_sectors {
            fat.set(sector, FATSECT);
        }
        for sector in layout.difat.sectors() {
            fat.set(sector, DIFSECT);
        }
        for run in [layout.directory, layout.mini_fat, layout.mini_stream] {
            fat.link_run(run.start, run.count);
        }

        // Mini-FAT and mini-stream.
        let mut mini_fat = AllocationTable::with_len(layout.mini_fat.count as usize * per_sector);
        let mut mini_stream = vec![0u8; layout.mini_stream_len as usize];

        for node in streams {
            let NodeKind::Stream { data, .. } = &self.nodes[*node].kind else {
                continue;
            };
            match location_of.get(node) {
                Some(StreamLocation::Mini(run)) => {
                    mini_fat.link_run(run.start, run.count);
                    let offset = run.start as usize * MINI_SECTOR_SIZE;
                    mini_stream[offset..offset + data.len()].copy_from_slice(data);
                }
                Some(StreamLocation::Regular(run)) => {
                    fat.link_run(run.start, run.count);
                    let offset = sector_offset(run.start);
                    out[offset..offset + data.len()].copy_from_slice(data);
                }
                Some(StreamLocation::Empty) | None => {}
            }
        }

        // Directory, padded with unallocated records.
        let mut directory = Vec::with_capacity(layout.directory.count as usize * sector_len);
        for entry in entries {
            entry.encode(&mut directory)?;
        }
        let filler = DirectoryEntry::unallocated();
        while directory.len() < layout.directory.count as usize * sector_len {
            filler.encode(&mut directory)?;
        }

        write_run(&mut out, sector_offset(layout.directory.start), &directory);
        if layout.mini_fat.count > 0 {
            write_run(&mut out, sector_offset(layout.mini_fat.start), &mini_fat.to_le_bytes());
        }
        if layout.mini_stream.count > 0 {
            write_run(&mut out, sector_offset(layout.mini_stream.start), &mini_stream);
        }

        // FAT sectors are not contiguous: sector 0 plus the tail run.
        let fat_bytes = fat.to_le_bytes();
        for (chunk, &sector) in fat_bytes.chunks(sector_len).zip(&layout.fat_sectors) {
            write_run(&mut out, sector_offset(sector), chunk);
        }

        // DIFAT sectors hold the FAT locations the header has no room for.
        let mut header = Header::new(self.sector_size);
        let overflow = layout.fat_sectors.get(HEADER_DIFAT_SLOTS..).unwrap_or_default();
        let difat_sectors: Vec<u32> = layout.difat.sectors().collect();
        for (index, &sector) in difat_sectors.iter().enumerate() {
            let mut slots = vec![FREESECT; per_sector];
            let chunk = overflow
                .chunks(per_sector - 1)
                .nth(index)
                .unwrap_or_default();
            slots[..chunk.len()].copy_from_slice(chunk);
            slots[per_sector - 1] = difat_sectors.get(index + 1).copied().unwrap_or(ENDOFCHAIN);
            let bytes: Vec<u8> = slots.iter().flat_map(|slot| slot.to_le_bytes()).collect();
            write_run(&mut out, sector_offset(sector), &bytes);
        }

        header.directory_sectors = match self.sector_size {
            SectorSize::Legacy512 => 0,
            SectorSize::Large4096 => layout.directory.count,
        };
        header.fat_sectors = layout.fat_sectors.len() as u32;
        header.directory_start = layout.directory.start;
        header.mini_fat_start = layout.mini_fat.start;
        header.mini_fat_sectors = layout.mini_fat.count;
        header.difat_start = layout.difat.start;
        header.difat_sectors = layout.difat.count;
        for (slot, &sector) in header.difat.iter_mut().zip(&layout.fat_sectors) {
            *slot = sector;
        }
        out[..HEADER_LEN].copy_from_slice(&header.to_bytes());

        Ok(out)
    }
}

fn write_run(out: &mut [u8], offset: usize, bytes: &[u8]) {
    out[offset..offset + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{le_u32, Color, CompoundFile};
    use pretty_assertions::assert_eq;

    #[test]
    fn rejects_duplicate_and_case_folded_names() {
        let mut builder = ContainerBuilder::new();
        builder.add_stream("Data", vec![1]).unwrap();
        assert!(matches!(
            builder.add_stream("DATA", vec![2]),
            Err(CfbError::DuplicateEntry(_))
        ));
        assert!(matches!(
            builder.add_stream("Data/inner", vec![2]),
            Err(CfbError::InvalidName { .. })
        ));
    }

    #[test]
    fn intermediate_storages_are_created_once() {
        let mut builder = ContainerBuilder::new();
        builder.add_stream("a/b/one", vec![1]).unwrap();
        builder.add_stream("/a/b/two", vec![2]).unwrap();
        builder.add_storage("a/empty").unwrap();
        builder.add_storage("a/empty").unwrap();

        let paths: Vec<&str> = builder
            .preorder()
            .into_iter()
            .map(|node| builder.nodes[node].path.as_str())
            .collect();
        assert_eq!(paths, vec!["", "a", "a/b", "a/b/one", "a/b/two", "a/empty"]);
    }

    #[test]
    fn header_and_fat_markers() {
        let mut builder = ContainerBuilder::new();
        builder.add_stream("small", vec![7u8; 10]).unwrap();
        builder.add_stream("big", vec![9u8; 5000]).unwrap();
        let bytes = builder.finish().unwrap();

        assert_eq!(&bytes[..8], &crate::SIGNATURE);
        // Three FAT sectors: 0 plus two at the end.
        assert_eq!(le_u32(&bytes, 44), 3);
        assert_eq!(le_u32(&bytes, 76), 0);
        assert_eq!(le_u32(&bytes, 76 + 3 * 4), FREESECT);
        assert_eq!(bytes.len() % 512, 0);

        let file = CompoundFile::parse(&bytes).unwrap();
        assert_eq!(file.fat().get(0), Some(FATSECT));
        assert_eq!(file.fat().count_marker(FATSECT), 3);
        assert_eq!(file.fat().get(1), Some(ENDOFCHAIN));
        assert_eq!(file.read_stream("small").unwrap(), vec![7u8; 10]);
        assert_eq!(file.read_stream("big").unwrap(), vec![9u8; 5000]);
    }

    #[test]
    fn storages_have_zero_start_and_size() {
        let mut builder = ContainerBuilder::new();
        builder.add_stream("dir/file", vec![1, 2, 3]).unwrap();
        let bytes = builder.finish().unwrap();
        let file = CompoundFile::parse(&bytes).unwrap();

        let storage = file.entry("dir").unwrap();
        assert_eq!(storage.object_type, ObjectType::Storage);
        assert_eq!(storage.start_sector, 0);
        assert_eq!(storage.size, 0);
        assert_eq!(file.entries()[0].name, ROOT_ENTRY_NAME);
        assert_eq!(file.entries()[0].size, 1920);
    }

    #[test]
    fn root_without_mini_stream_has_no_start_sector() {
        let mut builder = ContainerBuilder::new();
        builder.add_stream("big", vec![1u8; 4096]).unwrap();
        let bytes = builder.finish().unwrap();
        let file = CompoundFile::parse(&bytes).unwrap();
        let root = &file.entries()[0];
        assert_eq!(root.start_sector, ENDOFCHAIN);
        assert_eq!(root.size, 0);
        assert_eq!(le_u32(&bytes, 60), ENDOFCHAIN);
    }

    #[test]
    fn directory_is_padded_with_unallocated_records() {
        let mut builder = ContainerBuilder::new();
        builder.add_stream("only", vec![1]).unwrap();
        let bytes = builder.finish().unwrap();
        let file = CompoundFile::parse(&bytes).unwrap();
        assert_eq!(file.entries().len(), 4);
        assert!(file.entries()[2..]
            .iter()
            .all(|entry| entry.object_type == ObjectType::Unallocated));
    }

    #[test]
    fn envelope_entries_use_the_fixed_shape() {
        let mut builder = ContainerBuilder::new();
        for fixed in ENCRYPTION_ENVELOPE.iter().skip(1) {
            if fixed.child.is_some() {
                builder.add_storage(fixed.path).unwrap();
            } else {
                builder.add_stream(fixed.path, vec![0u8; 8]).unwrap();
            }
        }
        let bytes = builder.finish().unwrap();
        let file = CompoundFile::parse(&bytes).unwrap();

        let root = &file.entries()[0];
        assert_eq!(root.color, Color::Red);
        let top = &file.entries()[root.child as usize];
        assert_eq!(top.name, "EncryptionInfo");
        assert_eq!(file.entries()[top.left_sibling as usize].name, "\u{6}DataSpaces");
        assert_eq!(file.entries()[top.right_sibling as usize].name, "EncryptedPackage");

        let info = file.entry("\u{6}DataSpaces/DataSpaceInfo").unwrap();
        assert_eq!(file.entries()[info.right_sibling as usize].name, "TransformInfo");
        assert_eq!(
            file.entries()[info.child as usize].name,
            "StrongEncryptionDataSpace"
        );
    }
}
