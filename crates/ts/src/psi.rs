//! Program Specific Information: the PAT and PMT tables.

use crate::{Result, StreamType, TsError};

const TABLE_ID_PAT: u8 = 0x00;
const TABLE_ID_PMT: u8 = 0x02;

/// Returns the section body between the 3-byte header and the CRC.
fn section_body<'a>(section: &'a [u8], table: &'static str, table_id: u8) -> Result<&'a [u8]> {
    if section.len() < 3 {
        return Err(TsError::section(table, "header cut short"));
    }
    if section[0] != table_id {
        return Err(TsError::section(
            table,
            format!("unexpected table id 0x{:02x}", section[0]),
        ));
    }
    let section_length = (usize::from(section[1] & 0x0F) << 8) | usize::from(section[2]);
    let end = 3 + section_length;
    if end > section.len() {
        return Err(TsError::section(
            table,
            format!("section length {section_length} exceeds {} available bytes", section.len() - 3),
        ));
    }
    if section_length < 9 {
        return Err(TsError::section(table, "section too short"));
    }
    Ok(&section[3..end - 4])
}

/// Total section size declared by a section header, if enough bytes are present.
pub(crate) fn declared_section_size(section: &[u8]) -> Option<usize> {
    (section.len() >= 3).then(|| 3 + ((usize::from(section[1] & 0x0F) << 8) | usize::from(section[2])))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Program Association Table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub version: u8,
    pub programs: Vec<PatProgram>,
}

impl Pat {
    pub fn parse(section: &[u8]) -> Result<Self> {
        let body = section_body(section, "PAT", TABLE_ID_PAT)?;
        let version = (body[2] >> 1) & 0x1F;
        let programs = body[5..]
            .chunks_exact(4)
            .map(|entry| PatProgram {
                program_number: u16::from_be_bytes([entry[0], entry[1]]),
                pmt_pid: u16::from_be_bytes([entry[2] & 0x1F, entry[3]]),
            })
            .filter(|program| program.program_number != 0)
            .collect();
        Ok(Self { version, programs })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: StreamType,
    pub pid: u16,
}

/// Program Map Table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmt {
    pub program_number: u16,
    pub version: u8,
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    pub fn parse(section: &[u8]) -> Result<Self> {
        let body = section_body(section, "PMT", TABLE_ID_PMT)?;
        if body.len() < 9 {
            return Err(TsError::section("PMT", "missing program info"));
        }
        let program_number = u16::from_be_bytes([body[0], body[1]]);
        let version = (body[2] >> 1) & 0x1F;
        let pcr_pid = u16::from_be_bytes([body[5] & 0x1F, body[6]]);
        let program_info_length = usize::from(u16::from_be_bytes([body[7] & 0x0F, body[8]]));

        let mut pos = 9 + program_info_length;
        let mut streams = Vec::new();
        while pos + 5 <= body.len() {
            let stream_type = StreamType::from(body[pos]);
            let pid = u16::from_be_bytes([body[pos + 1] & 0x1F, body[pos + 2]]);
            let es_info_length =
                usize::from(u16::from_be_bytes([body[pos + 3] & 0x0F, body[pos + 4]]));
            streams.push(PmtStream { stream_type, pid });
            pos += 5 + es_info_length;
        }
        if pos > body.len() {
            return Err(TsError::section("PMT", "stream entry overruns section"));
        }

        Ok(Self {
            program_number,
            version,
            pcr_pid,
            streams,
        })
    }
}
