//! Stateless page-buffer operations (spec.md §4.1). Every write function
//! takes a `page_offset` in `[SIZE_OF_UNDO_PAGE_HEADER, BLCKSZ]` and an
//! `input_offset` — the cumulative bytes of this logical write already
//! placed on earlier pages — and returns how many bytes it placed on
//! *this* page. A caller whose write spills past `BLCKSZ` re-invokes the
//! same function for the next page with `page_offset =
//! SIZE_OF_UNDO_PAGE_HEADER` and `input_offset` advanced by the amount
//! just returned.

use urs_common::{ChunkHeader, Page, UndoPageHeader, UndoRecPtr, BLCKSZ, SIZE_OF_CHUNK_HEADER};

fn bytes_available(page_offset: usize) -> usize {
    BLCKSZ - page_offset
}

/// Writes (the remainder of) a chunk header and its type header,
/// starting at `page_offset` on `page`. On a fresh page, sets
/// `first_chunk`/`continue_chunk` depending on whether this call starts
/// a brand new chunk (`input_offset == 0`) or continues one spilled from
/// the previous page. Always advances `insertion_point`.
pub fn insert_header(
    page: &mut Page,
    page_offset: usize,
    input_offset: usize,
    chunk_header: ChunkHeader,
    type_header: &[u8],
    chunk_start: UndoRecPtr,
) -> usize {
    let mut combined = Vec::with_capacity(SIZE_OF_CHUNK_HEADER + type_header.len());
    combined.extend_from_slice(&chunk_header.to_bytes());
    combined.extend_from_slice(type_header);

    let total = combined.len();
    let remaining = total - input_offset;
    let avail = bytes_available(page_offset);
    let n = remaining.min(avail);

    page[page_offset..page_offset + n].copy_from_slice(&combined[input_offset..input_offset + n]);

    let mut hdr = UndoPageHeader::read(page);
    if hdr.is_new_page() {
        if input_offset == 0 {
            hdr.first_chunk = page_offset as u16;
            hdr.continue_chunk = UndoRecPtr::INVALID;
        } else {
            hdr.first_chunk = 0;
            hdr.continue_chunk = chunk_start;
        }
    }
    hdr.insertion_point = (page_offset + n) as u16;
    hdr.write(page);

    n
}

/// Writes (the remainder of) a caller record. Never touches
/// `first_chunk`; on a fresh page that does not itself start a chunk, it
/// must still set `continue_chunk` so the page can be located from its
/// header alone.
pub fn insert_record(
    page: &mut Page,
    page_offset: usize,
    input_offset: usize,
    data: &[u8],
    chunk_start: UndoRecPtr,
) -> usize {
    let remaining = data.len() - input_offset;
    let avail = bytes_available(page_offset);
    let n = remaining.min(avail);

    page[page_offset..page_offset + n].copy_from_slice(&data[input_offset..input_offset + n]);

    let mut hdr = UndoPageHeader::read(page);
    if hdr.is_new_page() {
        hdr.continue_chunk = chunk_start;
    }
    hdr.insertion_point = (page_offset + n) as u16;
    hdr.write(page);

    n
}

/// Overwrites bytes in place without moving `insertion_point` — used
/// only for the chunk header's `size` field at close time, which may
/// straddle the boundary between two pages.
pub fn overwrite(page: &mut Page, page_offset: usize, input_offset: usize, data: &[u8]) -> usize {
    let remaining = data.len() - input_offset;
    let avail = bytes_available(page_offset);
    let n = remaining.min(avail);
    page[page_offset..page_offset + n].copy_from_slice(&data[input_offset..input_offset + n]);
    n
}

/// How many header+type-header bytes `insert_header` would place on a
/// page at `page_offset`, without touching the page. Used during replay
/// when the target page is already current (FPI-restored or discarded).
pub fn skip_header(page_offset: usize, input_offset: usize, total_header_len: usize) -> usize {
    let remaining = total_header_len - input_offset;
    remaining.min(bytes_available(page_offset))
}

pub fn skip_record(page_offset: usize, input_offset: usize, size: usize) -> usize {
    let remaining = size - input_offset;
    remaining.min(bytes_available(page_offset))
}

pub fn skip_overwrite(page_offset: usize, input_offset: usize, size: usize) -> usize {
    skip_record(page_offset, input_offset, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use urs_common::{empty_page, UndoRsType, SIZE_OF_UNDO_PAGE_HEADER};

    fn header(size: u64) -> ChunkHeader {
        ChunkHeader {
            size,
            previous_chunk: UndoRecPtr::INVALID,
            rs_type: UndoRsType::TRANSACTION,
        }
    }

    #[test]
    fn insert_header_on_fresh_page_sets_first_chunk() {
        let mut page = empty_page();
        UndoPageHeader::fresh().write(&mut page);
        let type_header = [1u8; 8];
        let n = insert_header(
            &mut page,
            SIZE_OF_UNDO_PAGE_HEADER,
            0,
            header(0),
            &type_header,
            UndoRecPtr::new(0, SIZE_OF_UNDO_PAGE_HEADER as u64),
        );
        assert_eq!(n, SIZE_OF_CHUNK_HEADER + 8);
        let hdr = UndoPageHeader::read(&page);
        assert_eq!(hdr.first_chunk, SIZE_OF_UNDO_PAGE_HEADER as u16);
        assert!(!hdr.continue_chunk.is_valid());
        assert_eq!(hdr.insertion_point as usize, SIZE_OF_UNDO_PAGE_HEADER + n);
    }

    #[test]
    fn insert_record_then_close_matches_scenario_one() {
        // Scenario 1 from spec.md §8.
        let mut page = empty_page();
        UndoPageHeader::fresh().write(&mut page);
        let chunk_start = UndoRecPtr::new(0, SIZE_OF_UNDO_PAGE_HEADER as u64);
        let type_header = [0u8; 8];
        let hdr_n = insert_header(
            &mut page,
            SIZE_OF_UNDO_PAGE_HEADER,
            0,
            header(0),
            &type_header,
            chunk_start,
        );
        let data = vec![0xAB; 64];
        let rec_n = insert_record(
            &mut page,
            SIZE_OF_UNDO_PAGE_HEADER + hdr_n,
            0,
            &data,
            chunk_start,
        );
        assert_eq!(rec_n, 64);
        let hdr = UndoPageHeader::read(&page);
        assert_eq!(hdr.insertion_point, 108);

        let close_bytes = 96u64.to_le_bytes();
        let written = overwrite(&mut page, SIZE_OF_UNDO_PAGE_HEADER, 0, &close_bytes);
        assert_eq!(written, 8);
        assert_eq!(&page[SIZE_OF_UNDO_PAGE_HEADER..SIZE_OF_UNDO_PAGE_HEADER + 8], &close_bytes);
        // insertion_point is untouched by overwrite.
        assert_eq!(UndoPageHeader::read(&page).insertion_point, 108);
    }

    #[test]
    fn overwrite_straddles_two_pages_like_scenario_two() {
        let mut page_n = empty_page();
        let mut hdr = UndoPageHeader::fresh();
        hdr.first_chunk = 8187;
        hdr.insertion_point = 8192;
        hdr.write(&mut page_n);

        let mut page_n1 = empty_page();
        UndoPageHeader::fresh().write(&mut page_n1);

        let size_bytes = 12345u64.to_le_bytes();
        let first = overwrite(&mut page_n, 8187, 0, &size_bytes);
        assert_eq!(first, 5);
        let second = overwrite(&mut page_n1, SIZE_OF_UNDO_PAGE_HEADER, first, &size_bytes);
        assert_eq!(second, 3);

        let mut reconstructed = [0u8; 8];
        reconstructed[0..5].copy_from_slice(&page_n[8187..8192]);
        reconstructed[5..8].copy_from_slice(&page_n1[SIZE_OF_UNDO_PAGE_HEADER..SIZE_OF_UNDO_PAGE_HEADER + 3]);
        assert_eq!(u64::from_le_bytes(reconstructed), 12345);
    }

    #[test]
    fn skip_header_matches_insert_header_byte_counts() {
        let mut page = empty_page();
        UndoPageHeader::fresh().write(&mut page);
        let type_header = [0u8; 8];
        let n = insert_header(
            &mut page,
            SIZE_OF_UNDO_PAGE_HEADER,
            0,
            header(0),
            &type_header,
            UndoRecPtr::new(0, SIZE_OF_UNDO_PAGE_HEADER as u64),
        );
        let skipped = skip_header(SIZE_OF_UNDO_PAGE_HEADER, 0, SIZE_OF_CHUNK_HEADER + 8);
        assert_eq!(n, skipped);
    }
}
