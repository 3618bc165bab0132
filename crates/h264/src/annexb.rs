use byteorder::{BigEndian, WriteBytesExt};

/// Iterator over the NAL units of an Annex B byte stream.
///
/// Yields NAL payloads without start codes. Trailing zero bytes before the
/// next start code are treated as part of a 4-byte start code.
pub struct AnnexBNalIter<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Returns an iterator over the NAL units in `data`.
pub fn iter_nal_units(data: &[u8]) -> AnnexBNalIter<'_> {
    let pos = find_start_code(data, 0).map_or(data.len(), |(_, end)| end);
    AnnexBNalIter { data, pos }
}

/// Finds the next `00 00 01` at or after `from`, returning (start, end).
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            match data[i + 2] {
                1 => return Some((i, i + 3)),
                0 => i += 1,
                _ => i += 3,
            }
        } else {
            i += 1;
        }
    }
    None
}

impl<'a> Iterator for AnnexBNalIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let (mut end, next) = match find_start_code(self.data, start) {
                Some((code_start, code_end)) => (code_start, code_end),
                None => (self.data.len(), self.data.len()),
            };
            self.pos = next;
            while end > start && self.data[end - 1] == 0 {
                end -= 1;
            }
            if end > start {
                return Some(&self.data[start..end]);
            }
        }
        None
    }
}

/// Converts an Annex B access unit to 4-byte length-prefixed NAL units,
/// dropping parameter sets and delimiters.
pub fn annexb_to_length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    for nal in iter_nal_units(data) {
        if crate::NalUnitType::from_header(nal[0]).is_out_of_band() {
            continue;
        }
        // Writing into a Vec cannot fail.
        let _ = out.write_u32::<BigEndian>(nal.len() as u32);
        out.extend_from_slice(nal);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_three_and_four_byte_start_codes() {
        let data = [
            0, 0, 0, 1, 0x09, 0xF0, // AUD
            0, 0, 1, 0x67, 0x42, 0x00, // SPS
            0, 0, 0, 1, 0x65, 0x88, 0x84, // IDR
        ];
        let nals: Vec<&[u8]> = iter_nal_units(&data).collect();
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0], &[0x09, 0xF0]);
        assert_eq!(nals[1], &[0x67, 0x42]);
        assert_eq!(nals[2], &[0x65, 0x88, 0x84]);
    }

    #[test]
    fn skips_leading_garbage_and_empty_units() {
        let data = [0xAA, 0, 0, 1, 0, 0, 1, 0x41, 0x9A];
        let nals: Vec<&[u8]> = iter_nal_units(&data).collect();
        assert_eq!(nals, vec![&[0x41u8, 0x9A][..]]);
    }

    #[test]
    fn length_prefixing_drops_parameter_sets() {
        let data = [
            0, 0, 0, 1, 0x09, 0xF0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x68, 0xCE, 0, 0, 1, 0x65,
            0x11, 0x22,
        ];
        assert_eq!(
            annexb_to_length_prefixed(&data),
            vec![0, 0, 0, 3, 0x65, 0x11, 0x22]
        );
    }
}
