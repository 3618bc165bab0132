use bytes::{BufMut, BytesMut};

/// Parsed view over a single ISOBMFF box inside a parent byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BoxView {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) fourcc: [u8; 4],
    pub(crate) body_start: usize,
}

impl BoxView {
    pub(crate) fn body<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.body_start..self.end]
    }
}

/// Read a box header: returns `(total_box_size, fourcc, header_size)`.
///
/// Handles 32-bit size, 64-bit extended size (`size == 1`),
/// and box-extends-to-EOF (`size == 0`).
pub(crate) fn read_box_header(data: &[u8]) -> Option<(usize, [u8; 4], usize)> {
    if data.len() < 8 {
        return None;
    }
    let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let fourcc = [data[4], data[5], data[6], data[7]];
    match size {
        0 => Some((data.len(), fourcc, 8)),
        1 => {
            let ext: [u8; 8] = data.get(8..16)?.try_into().ok()?;
            Some((u64::from_be_bytes(ext) as usize, fourcc, 16))
        }
        size => Some((size as usize, fourcc, 8)),
    }
}

/// Parse a single box located at `offset` within `[0..end)`.
pub(crate) fn box_at(data: &[u8], offset: usize, end: usize) -> Option<BoxView> {
    if offset >= end {
        return None;
    }
    let (size, fourcc, header_size) = read_box_header(&data[offset..end])?;
    if size < header_size || offset + size > end {
        return None;
    }
    Some(BoxView {
        start: offset,
        end: offset + size,
        fourcc,
        body_start: offset + header_size,
    })
}

/// Iterates the sibling boxes inside `[start..end)`, stopping at the first
/// malformed header.
pub(crate) fn children(data: &[u8], start: usize, end: usize) -> impl Iterator<Item = BoxView> + '_ {
    let mut offset = start;
    std::iter::from_fn(move || {
        let view = box_at(data, offset, end)?;
        offset = view.end;
        Some(view)
    })
}

/// Find the first child box with the given FourCC inside `[start..end)`.
pub(crate) fn find_first_box(data: &[u8], start: usize, end: usize, target: [u8; 4]) -> Option<BoxView> {
    children(data, start, end).find(|view| view.fourcc == target)
}

/// Follows a path of nested boxes starting inside `parent`.
pub(crate) fn find_path(data: &[u8], parent: BoxView, path: &[[u8; 4]]) -> Option<BoxView> {
    path.iter().try_fold(parent, |current, fourcc| {
        find_first_box(data, current.body_start, current.end, *fourcc)
    })
}

/// Appends a box whose body is produced by `body`, patching its size afterwards.
pub(crate) fn write_box(out: &mut BytesMut, fourcc: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = out.len();
    out.put_u32(0);
    out.put_slice(fourcc);
    body(out);
    let size = (out.len() - start) as u32;
    out[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Appends a full box (version + 24-bit flags header).
pub(crate) fn write_full_box(
    out: &mut BytesMut,
    fourcc: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut BytesMut),
) {
    write_box(out, fourcc, |out| {
        out.put_u32((u32::from(version) << 24) | (flags & 0x00FF_FFFF));
        body(out);
    });
}
