//! Fixed-size page storage.
//!
//! Page 0 holds the [`FileHeader`]; every other page holds one [`Page`]
//! wrapped with a CRC32 checksum. Each `read_page` call results in exactly
//! one seek and one read; nothing is preloaded.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::PageId;
use crate::errors::{ErrorKind, PageTreeError, PageTreeResult};

/// Magic number for file format identification ("PTRE")
pub const MAGIC: u32 = 0x5054_5245;

/// File format version
pub const FORMAT_VERSION: u32 = 1;

/// Default block size in bytes
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default cache size in number of pages
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Smallest block size a file may be created with
pub const MIN_BLOCK_SIZE: usize = 128;

/// Bytes of every page taken by the checksum envelope and page tag
pub const PAGE_OVERHEAD: usize = 32;

fn encode<T: Serialize>(value: &T) -> PageTreeResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(value, bincode::config::legacy())?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> PageTreeResult<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
    Ok(value)
}

// ============================================================================
// File Header
// ============================================================================

/// File header stored in page 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    pub next_page_id: PageId,
    pub free_list_head: PageId,
    pub free_page_count: u64,
    /// Node and reserved pages currently in use
    pub node_count: u64,
    /// First page of the metadata chain (0 = no metadata)
    pub metadata_head: PageId,
    pub checksum_enabled: bool,
}

/// Leading fields of the header, readable before the page size is known
#[derive(Deserialize)]
struct HeaderPrefix {
    magic: u32,
    version: u32,
    page_size: u32,
}

impl FileHeader {
    pub fn new(page_size: usize) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            page_size: page_size as u32,
            next_page_id: 1,
            free_list_head: 0,
            free_page_count: 0,
            node_count: 0,
            metadata_head: 0,
            checksum_enabled: true,
        }
    }

    pub fn validate(&self) -> PageTreeResult<()> {
        if self.magic != MAGIC {
            return Err(PageTreeError::new(
                "Invalid file format (bad magic)",
                ErrorKind::Corrupted,
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(PageTreeError::new(
                &format!("Unsupported file format version {}", self.version),
                ErrorKind::Corrupted,
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Pages
// ============================================================================

/// Content of a non-header page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Page {
    /// An encoded node
    Node(Vec<u8>),
    /// An id handed out by `reserve` that has not been written yet
    Reserved,
    /// A page in the free list chain (0 = end of chain)
    Free { next_free: PageId },
    /// A chunk of the metadata blob (0 = last chunk)
    Metadata { next: PageId, bytes: Vec<u8> },
}

/// A page wrapped with a CRC32 checksum for corruption detection
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PageWithChecksum {
    checksum: u32,
    page: Page,
}

impl PageWithChecksum {
    fn new(page: Page, enabled: bool) -> PageTreeResult<Self> {
        let checksum = if enabled { crc32(&encode(&page)?) } else { 0 };
        Ok(Self { checksum, page })
    }

    /// Verify checksum and consume self to return the page
    fn into_page(self, enabled: bool) -> PageTreeResult<Page> {
        if enabled {
            let expected = crc32(&encode(&self.page)?);
            if self.checksum != expected {
                return Err(PageTreeError::new(
                    &format!(
                        "Page checksum mismatch - possible corruption (expected: {:x}, got: {:x})",
                        expected, self.checksum
                    ),
                    ErrorKind::Corrupted,
                ));
            }
        }
        Ok(self.page)
    }
}

/// CRC32-MPEG2
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    const POLY: u32 = 0x04C1_1DB7;

    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }

    crc ^ 0xFFFF_FFFF
}

// ============================================================================
// Storage
// ============================================================================

/// Reads and writes individual pages of a block file.
pub struct Storage {
    file: RwLock<File>,
    path: PathBuf,
    page_size: usize,
    checksums: bool,
}

impl Storage {
    /// Creates (or truncates) a block file with the given page size.
    pub fn create(path: &Path, page_size: usize, checksums: bool) -> PageTreeResult<Self> {
        if page_size < MIN_BLOCK_SIZE {
            return Err(PageTreeError::configuration(&format!(
                "Block size {} is below the minimum of {} bytes",
                page_size, MIN_BLOCK_SIZE
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            page_size,
            checksums,
        })
    }

    /// Opens an existing block file and returns it with its validated header.
    pub fn open(path: &Path) -> PageTreeResult<(Self, FileHeader)> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut prefix = [0u8; 12];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut prefix)?;
        let prefix: HeaderPrefix = decode(&prefix)?;
        if prefix.magic != MAGIC || prefix.version != FORMAT_VERSION {
            return Err(PageTreeError::new(
                "Invalid file format (bad magic)",
                ErrorKind::Corrupted,
            ));
        }

        let mut storage = Self {
            file: RwLock::new(file),
            path: path.to_path_buf(),
            page_size: prefix.page_size as usize,
            checksums: true,
        };
        let header = storage.read_header()?;
        header.validate()?;
        storage.checksums = header.checksum_enabled;
        Ok((storage, header))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Largest node encoding that fits in one page
    pub fn max_payload(&self) -> usize {
        self.page_size - PAGE_OVERHEAD
    }

    pub fn read_header(&self) -> PageTreeResult<FileHeader> {
        let buffer = self.read_raw(0)?;
        decode(&buffer)
    }

    pub fn write_header(&self, header: &FileHeader) -> PageTreeResult<()> {
        let bytes = encode(header)?;
        self.write_raw(0, bytes)
    }

    /// Reads a single page (one seek + one read) and verifies its checksum.
    pub fn read_page(&self, page_id: PageId) -> PageTreeResult<Page> {
        Self::check_page_id(page_id)?;
        let buffer = self.read_raw(page_id)?;
        let wrapped: PageWithChecksum = decode(&buffer)?;
        wrapped.into_page(self.checksums)
    }

    /// Writes a single page with its checksum.
    pub fn write_page(&self, page_id: PageId, page: Page) -> PageTreeResult<()> {
        Self::check_page_id(page_id)?;
        let wrapped = PageWithChecksum::new(page, self.checksums)?;
        let bytes = encode(&wrapped)?;
        self.write_raw(page_id, bytes)
    }

    pub fn sync(&self) -> PageTreeResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn check_page_id(page_id: PageId) -> PageTreeResult<()> {
        if page_id == 0 {
            return Err(PageTreeError::new(
                "Page 0 is reserved for the header",
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn read_raw(&self, page_id: PageId) -> PageTreeResult<Vec<u8>> {
        let offset = page_id * self.page_size as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; self.page_size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_raw(&self, page_id: PageId, mut bytes: Vec<u8>) -> PageTreeResult<()> {
        if bytes.len() > self.page_size {
            return Err(PageTreeError::new(
                &format!(
                    "Page {} too large: {} bytes (max {})",
                    page_id,
                    bytes.len(),
                    self.page_size
                ),
                ErrorKind::InvalidOperation,
            ));
        }
        bytes.resize(self.page_size, 0);

        let offset = page_id * self.page_size as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

// ============================================================================
// Free List Management
// ============================================================================

/// Manages the free page chain for page reuse
pub struct FreeListManager;

impl FreeListManager {
    /// Allocates a page from the free list or appends a new one.
    pub fn allocate_page(storage: &Storage, header: &mut FileHeader) -> PageTreeResult<PageId> {
        if header.free_list_head != 0 {
            let free_page_id = header.free_list_head;
            match storage.read_page(free_page_id)? {
                Page::Free { next_free } => {
                    header.free_list_head = next_free;
                    header.free_page_count = header.free_page_count.saturating_sub(1);
                    Ok(free_page_id)
                }
                other => Err(PageTreeError::new(
                    &format!(
                        "Free list head {} is not a free page: {:?}",
                        free_page_id,
                        std::mem::discriminant(&other)
                    ),
                    ErrorKind::Corrupted,
                )),
            }
        } else {
            let page_id = header.next_page_id;
            header.next_page_id = header.next_page_id.saturating_add(1);
            Ok(page_id)
        }
    }

    /// Frees a page by pushing it on the free list.
    pub fn free_page(
        storage: &Storage,
        header: &mut FileHeader,
        page_id: PageId,
    ) -> PageTreeResult<()> {
        storage.write_page(
            page_id,
            Page::Free {
                next_free: header.free_list_head,
            },
        )?;
        header.free_list_head = page_id;
        header.free_page_count = header.free_page_count.saturating_add(1);
        Ok(())
    }

    /// Writes `bytes` as a chain of metadata pages and returns its head.
    pub fn write_chain(
        storage: &Storage,
        header: &mut FileHeader,
        bytes: &[u8],
    ) -> PageTreeResult<PageId> {
        let chunk_size = storage.max_payload().saturating_sub(16).max(1);
        let chunks: Vec<&[u8]> = bytes.chunks(chunk_size).collect();
        let mut ids = Vec::with_capacity(chunks.len());
        for _ in 0..chunks.len().max(1) {
            ids.push(Self::allocate_page(storage, header)?);
        }
        for (i, id) in ids.iter().enumerate() {
            let next = ids.get(i + 1).copied().unwrap_or(0);
            let chunk = chunks.get(i).map(|c| c.to_vec()).unwrap_or_default();
            storage.write_page(*id, Page::Metadata { next, bytes: chunk })?;
        }
        Ok(ids[0])
    }

    /// Reads a metadata chain starting at `head`.
    pub fn read_chain(storage: &Storage, head: PageId) -> PageTreeResult<Vec<u8>> {
        let mut bytes = Vec::new();
        let mut current = head;
        while current != 0 {
            match storage.read_page(current)? {
                Page::Metadata { next, bytes: chunk } => {
                    bytes.extend_from_slice(&chunk);
                    current = next;
                }
                _ => {
                    return Err(PageTreeError::new(
                        &format!("Page {} is not part of a metadata chain", current),
                        ErrorKind::Corrupted,
                    ))
                }
            }
        }
        Ok(bytes)
    }

    /// Returns every page of the metadata chain at `head` to the free list.
    pub fn free_chain(
        storage: &Storage,
        header: &mut FileHeader,
        head: PageId,
    ) -> PageTreeResult<()> {
        let mut current = head;
        while current != 0 {
            let next = match storage.read_page(current)? {
                Page::Metadata { next, .. } => next,
                _ => 0,
            };
            Self::free_page(storage, header, current)?;
            current = next;
        }
        Ok(())
    }
}
