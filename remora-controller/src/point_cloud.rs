use crate::frame_store::Frame;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra as na;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    #[error("cloud file not found: {path:?}")]
    FileNotFound { path: PathBuf },
    #[error("error while accessing cloud file")]
    IoError(#[from] std::io::Error),
    #[error("malformed cloud header: {0}")]
    MalformedHeader(String),
    #[error("malformed wire payload: {0}")]
    MalformedWire(String),
}

type Result<T> = std::result::Result<T, CloudError>;

const FIELDS_LINE: &str = "fields x y z nx ny nz r g b";

#[derive(Debug, Clone, PartialEq)]
pub struct PointSample {
    pub position: na::Vector3<f32>,
    /// unit surface normal at the sample
    pub normal: na::Vector3<f32>,
    pub color: [u8; 3],
}

impl PointSample {
    pub fn new(position: na::Vector3<f32>, normal: na::Vector3<f32>, color: [u8; 3]) -> PointSample {
        PointSample {
            position,
            normal,
            color,
        }
    }
}

/// Ordered point samples plus the frame they are expressed in.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    frame: Frame,
    samples: Vec<PointSample>,
}

impl PointCloud {
    pub fn new(frame: Frame) -> PointCloud {
        PointCloud {
            frame,
            samples: Vec::new(),
        }
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn samples(&self) -> &[PointSample] {
        &self.samples
    }

    pub fn push(&mut self, sample: PointSample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Write the cloud as ASCII: a vertex count, the declared field order,
    /// then one whitespace-separated line per point with 6-decimal floats
    /// and bare u8 colors.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "vertices {}", self.samples.len())?;
        writeln!(writer, "{}", FIELDS_LINE)?;
        for sample in &self.samples {
            writeln!(
                writer,
                "{:.6} {:.6} {:.6} {:.6} {:.6} {:.6} {} {} {}",
                sample.position.x,
                sample.position.y,
                sample.position.z,
                sample.normal.x,
                sample.normal.y,
                sample.normal.z,
                sample.color[0],
                sample.color[1],
                sample.color[2],
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Load a cloud saved by [`PointCloud::save`].
    ///
    /// Reads up to the declared vertex count or EOF, whichever comes first.
    /// Lines with fewer than nine tokens are skipped silently.
    pub fn load(path: &Path, frame: Frame) -> Result<PointCloud> {
        let file = File::open(path).map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                CloudError::FileNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                CloudError::IoError(error)
            }
        })?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header = lines
            .next()
            .ok_or_else(|| CloudError::MalformedHeader("empty file".to_owned()))??;
        let mut tokens = header.split_whitespace();
        if tokens.next() != Some("vertices") {
            return Err(CloudError::MalformedHeader(header.clone()));
        }
        let count: usize = tokens
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or_else(|| CloudError::MalformedHeader(header.clone()))?;

        let fields = lines
            .next()
            .ok_or_else(|| CloudError::MalformedHeader("missing fields line".to_owned()))??;
        if !fields.starts_with("fields") {
            return Err(CloudError::MalformedHeader(fields));
        }

        let mut cloud = PointCloud::new(frame);
        for line in lines.take(count) {
            let line = line?;
            if let Some(sample) = parse_sample_line(&line) {
                cloud.push(sample);
            }
        }
        Ok(cloud)
    }

    /// Encode the cloud to the binary format the registration service
    /// consumes: a frame tag, field flags, a point count and little-endian
    /// floats, optionally followed by normals and colors per point.
    pub fn encode_wire(&self, with_normals: bool, with_colors: bool) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8 + self.samples.len() * 27);
        payload.push(self.frame.wire_tag());
        let mut flags = 0u8;
        if with_normals {
            flags |= 0b01;
        }
        if with_colors {
            flags |= 0b10;
        }
        payload.push(flags);
        // writes into a Vec cannot fail
        payload
            .write_u32::<LittleEndian>(self.samples.len() as u32)
            .unwrap();
        for sample in &self.samples {
            payload.write_f32::<LittleEndian>(sample.position.x).unwrap();
            payload.write_f32::<LittleEndian>(sample.position.y).unwrap();
            payload.write_f32::<LittleEndian>(sample.position.z).unwrap();
            if with_normals {
                payload.write_f32::<LittleEndian>(sample.normal.x).unwrap();
                payload.write_f32::<LittleEndian>(sample.normal.y).unwrap();
                payload.write_f32::<LittleEndian>(sample.normal.z).unwrap();
            }
            if with_colors {
                payload.extend_from_slice(&sample.color);
            }
        }
        payload
    }

    /// Decode a payload produced by [`PointCloud::encode_wire`].
    pub fn decode_wire(payload: &[u8]) -> Result<PointCloud> {
        let mut reader = payload;
        let tag = reader
            .read_u8()
            .map_err(|_| CloudError::MalformedWire("missing frame tag".to_owned()))?;
        let frame = Frame::from_wire_tag(tag)
            .ok_or_else(|| CloudError::MalformedWire(format!("unknown frame tag {}", tag)))?;
        let flags = reader
            .read_u8()
            .map_err(|_| CloudError::MalformedWire("missing flags".to_owned()))?;
        let with_normals = flags & 0b01 != 0;
        let with_colors = flags & 0b10 != 0;
        let count = reader
            .read_u32::<LittleEndian>()
            .map_err(|_| CloudError::MalformedWire("missing count".to_owned()))?;

        let mut cloud = PointCloud::new(frame);
        for _ in 0..count {
            let mut position = [0.0f32; 3];
            for slot in &mut position {
                *slot = reader
                    .read_f32::<LittleEndian>()
                    .map_err(|_| CloudError::MalformedWire("truncated point".to_owned()))?;
            }
            let mut normal = [0.0f32; 3];
            if with_normals {
                for slot in &mut normal {
                    *slot = reader
                        .read_f32::<LittleEndian>()
                        .map_err(|_| CloudError::MalformedWire("truncated normal".to_owned()))?;
                }
            }
            let mut color = [0u8; 3];
            if with_colors {
                reader
                    .read_exact(&mut color)
                    .map_err(|_| CloudError::MalformedWire("truncated color".to_owned()))?;
            }
            cloud.push(PointSample::new(
                na::Vector3::new(position[0], position[1], position[2]),
                na::Vector3::new(normal[0], normal[1], normal[2]),
                color,
            ));
        }
        Ok(cloud)
    }
}

fn parse_sample_line(line: &str) -> Option<PointSample> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 9 {
        return None;
    }
    let mut floats = [0.0f32; 6];
    for (slot, token) in floats.iter_mut().zip(tokens.iter()) {
        *slot = token.parse().ok()?;
    }
    let mut color = [0u8; 3];
    for (slot, token) in color.iter_mut().zip(tokens[6..9].iter()) {
        *slot = token.parse().ok()?;
    }
    Some(PointSample::new(
        na::Vector3::new(floats[0], floats[1], floats[2]),
        na::Vector3::new(floats[3], floats[4], floats[5]),
        color,
    ))
}
