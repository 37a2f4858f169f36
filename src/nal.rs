//! Annex B NAL unit scanning
//!
//! Used to flag keyframe packets and to inventory the sequence header.
//! The encoder output itself is passed through untouched.

/// NAL unit type of an IDR slice
pub const NAL_IDR: u8 = 5;
/// NAL unit type of a sequence parameter set
pub const NAL_SPS: u8 = 7;
/// NAL unit type of a picture parameter set
pub const NAL_PPS: u8 = 8;

/// One NAL unit located in an Annex B buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// Low five bits of the NAL header
    pub nal_type: u8,
    /// The unit including its start code
    pub bytes: &'a [u8],
}

/// Length of the start code at `i`, if one begins there
fn start_code_at(data: &[u8], i: usize) -> Option<usize> {
    if data[i..].starts_with(&[0x00, 0x00, 0x00, 0x01]) {
        Some(4)
    } else if data[i..].starts_with(&[0x00, 0x00, 0x01]) {
        Some(3)
    } else {
        None
    }
}

/// Iterator over the NAL units of an Annex B buffer
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = NalUnit<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.data;

        // Find start code
        let (start, code_len) = loop {
            if self.pos >= data.len() {
                return None;
            }
            if let Some(len) = start_code_at(data, self.pos) {
                break (self.pos, len);
            }
            self.pos += 1;
        };

        let header = start + code_len;
        if header >= data.len() {
            self.pos = data.len();
            return None;
        }

        // Find next start code
        let mut end = data.len();
        let mut j = header + 1;
        while j + 2 < data.len() {
            if start_code_at(data, j).is_some() {
                end = j;
                break;
            }
            j += 1;
        }
        self.pos = end;

        Some(NalUnit {
            nal_type: data[header] & 0x1F,
            bytes: &data[start..end],
        })
    }
}

/// Iterate over the NAL units in `data`
pub fn nal_units(data: &[u8]) -> NalUnits<'_> {
    NalUnits { data, pos: 0 }
}

/// True if `data` carries an IDR slice
pub fn contains_idr(data: &[u8]) -> bool {
    nal_units(data).any(|nal| nal.nal_type == NAL_IDR)
}

/// Extract the SPS and PPS units (with start codes) from `data`
pub fn parameter_sets(data: &[u8]) -> Option<Vec<u8>> {
    let mut sps_pps = Vec::new();
    for nal in nal_units(data).filter(|n| n.nal_type == NAL_SPS || n.nal_type == NAL_PPS) {
        sps_pps.extend_from_slice(nal.bytes);
    }

    if sps_pps.is_empty() {
        None
    } else {
        Some(sps_pps)
    }
}
