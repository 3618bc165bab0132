use std::io::{self, Read};

use bytes_util::BitReader;
use expgolomb::BitReaderExpGolombExt;

/// The subset of a sequence parameter set needed to describe a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma: u8,
    pub bit_depth_chroma: u8,
    width: u32,
    height: u32,
}

const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

impl Sps {
    /// Parses an SPS NAL unit (header byte included) that may still contain
    /// emulation prevention bytes.
    pub fn parse_with_emulation_prevention<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        let rbsp = strip_emulation_prevention(&raw);
        Self::parse_rbsp(&rbsp)
    }

    fn parse_rbsp(data: &[u8]) -> io::Result<Self> {
        if data.len() < 4 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "SPS too short"));
        }
        if data[0] & 0x1F != 7 {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not an SPS NAL unit"));
        }
        let profile_idc = data[1];
        let constraint_flags = data[2];
        let level_idc = data[3];

        let mut bits = BitReader::new(&data[4..]);
        bits.read_exp_golomb()?; // seq_parameter_set_id

        let mut chroma_format_idc = 1u8;
        let mut separate_colour_plane = false;
        let mut bit_depth_luma = 8u8;
        let mut bit_depth_chroma = 8u8;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = bits.read_exp_golomb()? as u8;
            if chroma_format_idc == 3 {
                separate_colour_plane = bits.read_bit()?;
            }
            bit_depth_luma = bits.read_exp_golomb()? as u8 + 8;
            bit_depth_chroma = bits.read_exp_golomb()? as u8 + 8;
            bits.read_bit()?; // qpprime_y_zero_transform_bypass_flag
            if bits.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if bits.read_bit()? {
                        skip_scaling_list(&mut bits, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        bits.read_exp_golomb()?; // log2_max_frame_num_minus4
        match bits.read_exp_golomb()? {
            0 => {
                bits.read_exp_golomb()?; // log2_max_pic_order_cnt_lsb_minus4
            }
            1 => {
                bits.read_bit()?;
                bits.read_signed_exp_golomb()?;
                bits.read_signed_exp_golomb()?;
                let cycle = bits.read_exp_golomb()?;
                for _ in 0..cycle {
                    bits.read_signed_exp_golomb()?;
                }
            }
            _ => {}
        }
        bits.read_exp_golomb()?; // max_num_ref_frames
        bits.read_bit()?; // gaps_in_frame_num_value_allowed_flag

        let width_in_mbs = bits.read_exp_golomb()? + 1;
        let height_in_map_units = bits.read_exp_golomb()? + 1;
        let frame_mbs_only = bits.read_bit()?;
        if !frame_mbs_only {
            bits.read_bit()?; // mb_adaptive_frame_field_flag
        }
        bits.read_bit()?; // direct_8x8_inference_flag

        let field_factor = if frame_mbs_only { 1 } else { 2 };
        let (crop_unit_x, crop_unit_y) = if chroma_format_idc == 0 || separate_colour_plane {
            (1, field_factor)
        } else {
            let sub_width = if chroma_format_idc == 3 { 1 } else { 2 };
            let sub_height = if chroma_format_idc == 1 { 2 } else { 1 };
            (sub_width, sub_height * field_factor)
        };

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if bits.read_bit()? {
            crop_left = bits.read_exp_golomb()?;
            crop_right = bits.read_exp_golomb()?;
            crop_top = bits.read_exp_golomb()?;
            crop_bottom = bits.read_exp_golomb()?;
        }

        let full_width = width_in_mbs * 16;
        let full_height = field_factor * height_in_map_units * 16;
        let width = full_width.saturating_sub(crop_unit_x * (crop_left + crop_right));
        let height = full_height.saturating_sub(crop_unit_y * (crop_top + crop_bottom));

        Ok(Self {
            profile_idc,
            constraint_flags,
            level_idc,
            chroma_format_idc,
            bit_depth_luma,
            bit_depth_chroma,
            width: width as u32,
            height: height as u32,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

fn skip_scaling_list<R: Read>(bits: &mut BitReader<R>, size: usize) -> io::Result<()> {
    let mut last = 8i64;
    let mut next = 8i64;
    for _ in 0..size {
        if next != 0 {
            let delta = bits.read_signed_exp_golomb()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// Removes `00 00 03` emulation prevention bytes.
fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}
