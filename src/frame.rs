//! Planar input frames and pixel-format descriptors
//!
//! A [`Frame`] is owned by the caller and is only ever read by the encoder.
//! The [`PixelFormatDescriptor`] says how the frame's components map onto
//! planes and how far chroma is subsampled, which is all the repacker needs.

use serde::{Deserialize, Serialize};

use crate::error::{VencError, VencResult};

/// Maximum number of planes or components in any supported format
pub const MAX_PLANES: usize = 4;

/// Video pixel formats known to the frame layer
///
/// Only [`PixelFormat::Yuv420p`] and [`PixelFormat::Rgba`] are accepted by
/// the hardware; the others exist so callers get a typed rejection at
/// configuration time instead of a garbled picture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, three planes
    Yuv420p,
    /// Semi-planar YUV 4:2:0, Y plane plus one interleaved UV plane
    Nv12,
    /// Planar YUV 4:2:2
    Yuv422p,
    /// Planar YUV 4:4:4
    Yuv444p,
    /// Packed RGBA, 32bpp, single plane
    Rgba,
    /// Packed BGRA, 32bpp, single plane
    Bgra,
}

const THREE_PLANES: &[ComponentDescriptor] = &[
    ComponentDescriptor { plane: 0 },
    ComponentDescriptor { plane: 1 },
    ComponentDescriptor { plane: 2 },
];

const LUMA_AND_CHROMA: &[ComponentDescriptor] = &[
    ComponentDescriptor { plane: 0 },
    ComponentDescriptor { plane: 1 },
    ComponentDescriptor { plane: 1 },
];

const PACKED: &[ComponentDescriptor] = &[
    ComponentDescriptor { plane: 0 },
    ComponentDescriptor { plane: 0 },
    ComponentDescriptor { plane: 0 },
    ComponentDescriptor { plane: 0 },
];

impl PixelFormat {
    /// Layout descriptor for this format
    pub fn descriptor(self) -> PixelFormatDescriptor {
        match self {
            Self::Yuv420p => PixelFormatDescriptor {
                components: THREE_PLANES,
                log2_chroma_w: 1,
                log2_chroma_h: 1,
                sample_bytes: [1, 1, 1, 0],
            },
            Self::Nv12 => PixelFormatDescriptor {
                components: LUMA_AND_CHROMA,
                log2_chroma_w: 1,
                log2_chroma_h: 1,
                sample_bytes: [1, 2, 0, 0],
            },
            Self::Yuv422p => PixelFormatDescriptor {
                components: THREE_PLANES,
                log2_chroma_w: 1,
                log2_chroma_h: 0,
                sample_bytes: [1, 1, 1, 0],
            },
            Self::Yuv444p => PixelFormatDescriptor {
                components: THREE_PLANES,
                log2_chroma_w: 0,
                log2_chroma_h: 0,
                sample_bytes: [1, 1, 1, 0],
            },
            Self::Rgba | Self::Bgra => PixelFormatDescriptor {
                components: PACKED,
                log2_chroma_w: 0,
                log2_chroma_h: 0,
                sample_bytes: [4, 0, 0, 0],
            },
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Yuv420p => "yuv420p",
            Self::Nv12 => "nv12",
            Self::Yuv422p => "yuv422p",
            Self::Yuv444p => "yuv444p",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
        };
        f.write_str(name)
    }
}

/// Where one colour component lives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComponentDescriptor {
    /// Index of the plane holding this component
    pub plane: usize,
}

/// Component-to-plane layout and chroma subsampling of a pixel format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormatDescriptor {
    /// One entry per colour component, in component order
    pub components: &'static [ComponentDescriptor],
    /// Horizontal chroma subsampling shift
    pub log2_chroma_w: u8,
    /// Vertical chroma subsampling shift
    pub log2_chroma_h: u8,
    /// Bytes per horizontal sample position, per plane (0 = plane absent)
    pub sample_bytes: [u8; MAX_PLANES],
}

impl PixelFormatDescriptor {
    /// Presence map of the four possible planes
    pub fn planes_present(&self) -> [bool; MAX_PLANES] {
        let mut present = [false; MAX_PLANES];
        for comp in self.components {
            if comp.plane < MAX_PLANES {
                present[comp.plane] = true;
            }
        }
        present
    }

    /// Number of distinct planes used by the format
    pub fn plane_count(&self) -> usize {
        self.planes_present().iter().filter(|p| **p).count()
    }

    /// Number of distinct chroma planes (planes 1..4) in use
    pub fn chroma_plane_count(&self) -> usize {
        self.planes_present()[1..].iter().filter(|p| **p).count()
    }

    /// Height in rows of the given plane for a frame of `height` rows
    ///
    /// Planes 1 and 2 are vertically subsampled; the result rounds up.
    pub fn plane_height(&self, plane: usize, height: u32) -> usize {
        let shift = if plane == 1 || plane == 2 {
            self.log2_chroma_h
        } else {
            0
        };
        ((height as usize) + (1 << shift) - 1) >> shift
    }

    /// Minimum bytes per row of the given plane for a frame of `width` pixels
    pub fn plane_row_bytes(&self, plane: usize, width: u32) -> usize {
        let shift = if plane == 1 || plane == 2 {
            self.log2_chroma_w
        } else {
            0
        };
        let samples = ((width as usize) + (1 << shift) - 1) >> shift;
        samples * self.sample_bytes[plane.min(MAX_PLANES - 1)] as usize
    }
}

/// One image plane with its own row stride
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plane {
    /// Plane bytes, at least `rows × stride` long
    pub data: Vec<u8>,
    /// Distance in bytes between the starts of consecutive rows
    pub stride: usize,
}

impl Plane {
    /// Create a plane from raw bytes and a stride
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }
}

/// Raw input picture
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel format of `planes`
    pub format: PixelFormat,
    /// Planes in plane-index order
    pub planes: Vec<Plane>,
}

impl Frame {
    /// Create a frame from existing planes
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self {
            width,
            height,
            format,
            planes,
        }
    }

    /// Allocate a frame with tightly packed planes filled with `fill`
    pub fn filled(format: PixelFormat, width: u32, height: u32, fill: u8) -> Self {
        let desc = format.descriptor();
        let planes = (0..desc.plane_count())
            .map(|plane| {
                let stride = desc.plane_row_bytes(plane, width);
                let rows = desc.plane_height(plane, height);
                Plane::new(vec![fill; stride * rows], stride)
            })
            .collect();

        Self::new(width, height, format, planes)
    }

    /// Build a tightly packed frame from one contiguous buffer
    ///
    /// Planes are taken back-to-back, as in a raw `.yuv` file.
    pub fn from_packed(
        format: PixelFormat,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> VencResult<Self> {
        let desc = format.descriptor();
        let mut offset = 0;
        let mut planes = Vec::with_capacity(desc.plane_count());

        for plane in 0..desc.plane_count() {
            let stride = desc.plane_row_bytes(plane, width);
            let size = stride * desc.plane_height(plane, height);
            let bytes = data.get(offset..offset + size).ok_or_else(|| {
                VencError::InvalidFrame(format!(
                    "packed {} buffer of {} bytes ends inside plane {}",
                    format,
                    data.len(),
                    plane
                ))
            })?;
            planes.push(Plane::new(bytes.to_vec(), stride));
            offset += size;
        }

        Ok(Self::new(width, height, format, planes))
    }

    /// Total bytes of a tightly packed frame with this geometry
    pub fn packed_size(format: PixelFormat, width: u32, height: u32) -> usize {
        let desc = format.descriptor();
        (0..desc.plane_count())
            .map(|plane| desc.plane_row_bytes(plane, width) * desc.plane_height(plane, height))
            .sum()
    }

    /// Check that every plane the format needs is present and long enough
    pub fn validate(&self) -> VencResult<()> {
        let desc = self.format.descriptor();
        let present = desc.planes_present();

        for (plane, _) in present.iter().enumerate().filter(|(_, p)| **p) {
            let Some(p) = self.planes.get(plane) else {
                return Err(VencError::InvalidFrame(format!(
                    "{} frame is missing plane {}",
                    self.format, plane
                )));
            };

            let row_bytes = desc.plane_row_bytes(plane, self.width);
            if p.stride < row_bytes {
                return Err(VencError::InvalidFrame(format!(
                    "plane {} stride {} shorter than row of {} bytes",
                    plane, p.stride, row_bytes
                )));
            }

            let needed = desc.plane_height(plane, self.height) * p.stride;
            if p.data.len() < needed {
                return Err(VencError::InvalidFrame(format!(
                    "plane {} holds {} bytes, needs {}",
                    plane,
                    p.data.len(),
                    needed
                )));
            }
        }

        Ok(())
    }
}
