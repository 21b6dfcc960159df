//! Base-relation file: append-only record storage plus a scanner.
//!
//! Page access is routed through the buffer pool: pages are pinned
//! while copied in or out, and dirty pages evicted to make room are
//! written back to disk before reuse.

use crate::disk::FileManager;
use crate::record::{Record, RecordId};
use crate::relation::page::RelationPage;
use meridian_buffer::BufferPool;
use meridian_common::page::{PageId, PageNo, PAGE_SIZE};
use meridian_common::Result;
use std::sync::Arc;

/// Append-only file of fixed-width base-relation records.
pub struct RelationFile {
    /// File manager for page I/O.
    files: Arc<FileManager>,
    /// Buffer pool for page caching.
    pool: Arc<BufferPool>,
    /// File ID of the relation file.
    file_id: u32,
    /// Relation name (also the file name).
    name: String,
}

impl RelationFile {
    /// Opens the named relation file, creating it if it does not exist.
    pub fn open(name: &str, files: Arc<FileManager>, pool: Arc<BufferPool>) -> Result<Self> {
        let file_id = files.open(name)?;

        Ok(Self {
            files,
            pool,
            file_id,
            name: name.to_string(),
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file ID of this relation.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the number of pages in the relation.
    pub fn num_pages(&self) -> Result<u32> {
        self.files.num_pages(self.file_id)
    }

    /// Fetches a page through the buffer pool, returning a copy of its bytes.
    fn fetch_page_bytes(&self, page_no: PageNo) -> Result<[u8; PAGE_SIZE]> {
        let page_id = PageId::new(self.file_id, page_no);

        if let Some(frame) = self.pool.fetch_page(page_id) {
            let mut data = [0u8; PAGE_SIZE];
            frame.copy_to(&mut data);
            self.pool.unpin_page(page_id, false);
            return Ok(data);
        }

        let disk_data = self.files.read_page(page_id)?;
        let (frame, evicted) = self.pool.load_page(page_id, &disk_data)?;
        if let Some(evicted_page) = evicted {
            self.files.write_page(evicted_page.page_id, &evicted_page.data)?;
        }

        let mut data = [0u8; PAGE_SIZE];
        frame.copy_to(&mut data);
        self.pool.unpin_page(page_id, false);
        Ok(data)
    }

    /// Writes page bytes through the buffer pool, marking the page dirty.
    fn write_page_bytes(&self, page_no: PageNo, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let page_id = PageId::new(self.file_id, page_no);

        if let Some(frame) = self.pool.fetch_page(page_id) {
            frame.copy_from(data);
            self.pool.unpin_page(page_id, true);
            return Ok(());
        }

        let (_, evicted) = self.pool.load_page(page_id, data)?;
        if let Some(evicted_page) = evicted {
            self.files.write_page(evicted_page.page_id, &evicted_page.data)?;
        }
        self.pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Appends a record to the relation.
    ///
    /// Returns the RecordId of the stored record.
    pub fn append(&self, record: &Record) -> Result<RecordId> {
        let num_pages = self.num_pages()?;

        let (page_no, mut page) = if num_pages == 0 {
            (self.files.allocate_page(self.file_id)?, RelationPage::new())
        } else {
            let page = RelationPage::from_bytes(self.fetch_page_bytes(num_pages)?);
            if page.is_full() {
                (self.files.allocate_page(self.file_id)?, RelationPage::new())
            } else {
                (num_pages, page)
            }
        };

        let slot_no = page.append(record)?;
        self.write_page_bytes(page_no, page.as_bytes())?;

        Ok(RecordId::new(page_no, slot_no))
    }

    /// Returns the total number of records in the relation.
    pub fn record_count(&self) -> Result<u64> {
        let mut total = 0u64;
        for page_no in 1..=self.num_pages()? {
            let page = RelationPage::from_bytes(self.fetch_page_bytes(page_no)?);
            total += page.record_count() as u64;
        }
        Ok(total)
    }

    /// Reads a single record by its ID.
    pub fn get(&self, rid: RecordId) -> Result<Option<Record>> {
        if !rid.is_valid() || rid.page_no > self.num_pages()? {
            return Ok(None);
        }
        let page = RelationPage::from_bytes(self.fetch_page_bytes(rid.page_no)?);
        Ok(page.get(rid.slot_no))
    }

    /// Returns a scanner over all records in page/slot order.
    pub fn scan(&self) -> RelationScan<'_> {
        RelationScan {
            relation: self,
            current_page_no: 0,
            current_page: None,
            next_slot: 1,
        }
    }

    /// Flushes all dirty pages of this relation to disk.
    pub fn flush(&self) -> Result<()> {
        let file_id = self.file_id;
        self.pool.flush_matching(
            |pid| pid.file_id == file_id,
            |pid, data| {
                let mut page = [0u8; PAGE_SIZE];
                page.copy_from_slice(data);
                self.files.write_page(pid, &page)
            },
        )?;
        self.files.flush_file(file_id)
    }
}

/// Iterator over the records of a relation in page/slot order.
///
/// End of relation is signalled by iterator exhaustion; page-level
/// I/O failures surface as `Err` items.
pub struct RelationScan<'a> {
    relation: &'a RelationFile,
    current_page_no: PageNo,
    current_page: Option<RelationPage>,
    next_slot: u16,
}

impl RelationScan<'_> {
    /// Advances to the next page with records, if any.
    fn advance_page(&mut self) -> Result<bool> {
        loop {
            let next_page_no = self.current_page_no + 1;
            if next_page_no > self.relation.num_pages()? {
                self.current_page = None;
                return Ok(false);
            }

            let page = RelationPage::from_bytes(self.relation.fetch_page_bytes(next_page_no)?);
            self.current_page_no = next_page_no;
            self.next_slot = 1;

            if page.record_count() > 0 {
                self.current_page = Some(page);
                return Ok(true);
            }
            // Empty page: keep looking
        }
    }
}

impl Iterator for RelationScan<'_> {
    type Item = Result<(RecordId, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(page) = &self.current_page {
                if let Some(record) = page.get(self.next_slot) {
                    let rid = RecordId::new(self.current_page_no, self.next_slot);
                    self.next_slot += 1;
                    return Some(Ok((rid, record)));
                }
                // Page exhausted, fall through to advance
            }

            match self.advance_page() {
                Ok(true) => continue,
                Ok(false) => return None,
                Err(e) => {
                    self.current_page = None;
                    return Some(Err(e));
                }
            }
        }
    }
}
