use crate::common::{CairnError, PageId, Result, PAGE_SIZE};

const MAGIC_NUMBER: u32 = 0x4341_4952; // "CAIR"

const MAGIC_OFFSET: usize = 0;
const RECORD_COUNT_OFFSET: usize = 4;
const RECORDS_OFFSET: usize = 8;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4; // name + root page id
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Mutable view over the header page (page 0), which stores one
/// `(index name -> root page id)` record per named index. Index names are
/// null-padded to 32 bytes.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn init(&mut self) {
        self.data.fill(0);
        self.data[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        self.set_record_count(0);
    }

    pub fn is_valid(&self) -> bool {
        read_u32(self.data, MAGIC_OFFSET) == MAGIC_NUMBER
    }

    pub fn record_count(&self) -> u32 {
        read_u32(self.data, RECORD_COUNT_OFFSET)
    }

    fn set_record_count(&mut self, count: u32) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&count.to_le_bytes());
    }

    pub fn get_root_page_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|index| record_root(self.data, index))
    }

    /// Registers a new index. Fails if the name is already present or the
    /// page is out of record slots.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        assert!(name.len() <= NAME_SIZE, "index name too long");

        if find_record(self.data, name).is_some() {
            return Err(CairnError::IndexAlreadyExists(name.to_string()));
        }

        let count = self.record_count() as usize;
        if count >= MAX_RECORDS {
            return Err(CairnError::HeaderPageFull);
        }

        let offset = record_offset(count);
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.as_u32().to_le_bytes());
        self.set_record_count((count + 1) as u32);
        Ok(())
    }

    /// Rewrites the root page id of an existing index.
    /// Returns false if the index is not registered.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(index) = find_record(self.data, name) else {
            return false;
        };
        let offset = record_offset(index) + NAME_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&root_page_id.as_u32().to_le_bytes());
        true
    }

    /// Unregisters an index, moving the last record into its slot.
    /// Returns false if the index is not registered.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let Some(index) = find_record(self.data, name) else {
            return false;
        };

        let count = self.record_count() as usize;
        if index < count - 1 {
            let last = record_offset(count - 1);
            let hole = record_offset(index);
            self.data.copy_within(last..last + RECORD_SIZE, hole);
        }
        let freed = record_offset(count - 1);
        self.data[freed..freed + RECORD_SIZE].fill(0);
        self.set_record_count((count - 1) as u32);
        true
    }
}

/// Read-only view over the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn is_valid(&self) -> bool {
        read_u32(self.data, MAGIC_OFFSET) == MAGIC_NUMBER
    }

    pub fn record_count(&self) -> u32 {
        read_u32(self.data, RECORD_COUNT_OFFSET)
    }

    pub fn get_root_page_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name).map(|index| record_root(self.data, index))
    }
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
}

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn record_root(data: &[u8], index: usize) -> PageId {
    PageId::new(read_u32(data, record_offset(index) + NAME_SIZE))
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    if name.len() > NAME_SIZE {
        return None;
    }
    let count = read_u32(data, RECORD_COUNT_OFFSET) as usize;
    let mut padded = [0u8; NAME_SIZE];
    padded[..name.len()].copy_from_slice(name.as_bytes());

    (0..count).find(|&i| {
        let offset = record_offset(i);
        data[offset..offset + NAME_SIZE] == padded
    })
}
