//! Triangle meshes decoded from backend mesh payloads

use base64::Engine;
use thiserror::Error;

use cm_protocol::{BoundingBox, MeshData, Vec3};

use super::math::{add, ray_triangle, scale, triangle_normal};

/// Size of a binary STL header plus triangle count
const STL_HEADER_LEN: usize = 84;
/// Size of one binary STL triangle record
const STL_TRIANGLE_LEN: usize = 50;

/// Reasons a mesh payload cannot be rendered
#[derive(Debug, Error)]
pub enum MeshDecodeError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Unsupported mesh format: {0}")]
    UnsupportedFormat(String),

    #[error("Truncated STL: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid ASCII STL: {0}")]
    Ascii(String),

    #[error("Mesh has no triangles")]
    Empty,

    #[error("Mesh contains non-finite coordinates")]
    NonFinite,
}

/// Indexed triangle mesh
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
}

/// Nearest intersection of a ray with a mesh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub triangle: usize,
    pub distance: f64,
    pub point: Vec3,
    pub normal: Vec3,
}

impl Mesh {
    pub fn empty() -> Self {
        Self {
            vertices: Vec::new(),
            triangles: Vec::new(),
        }
    }

    /// Decode a base64 mesh payload
    pub fn decode(data: &MeshData) -> Result<Self, MeshDecodeError> {
        if !data.format.eq_ignore_ascii_case("stl") {
            return Err(MeshDecodeError::UnsupportedFormat(data.format.clone()));
        }
        let bytes = base64::engine::general_purpose::STANDARD.decode(data.data_base64.trim())?;
        Self::from_stl(&bytes)
    }

    /// Parse binary or ASCII STL
    pub fn from_stl(bytes: &[u8]) -> Result<Self, MeshDecodeError> {
        let mesh = if let Some(count) = binary_triangle_count(bytes) {
            Self::from_binary_stl(bytes, count)
        } else if looks_like_ascii(bytes) {
            Self::from_ascii_stl(bytes)?
        } else if bytes.len() < STL_HEADER_LEN {
            return Err(MeshDecodeError::Truncated {
                expected: STL_HEADER_LEN,
                actual: bytes.len(),
            });
        } else {
            let count = read_u32(bytes, 80) as usize;
            return Err(MeshDecodeError::Truncated {
                expected: STL_HEADER_LEN.saturating_add(count.saturating_mul(STL_TRIANGLE_LEN)),
                actual: bytes.len(),
            });
        };

        if mesh.triangles.is_empty() {
            return Err(MeshDecodeError::Empty);
        }
        if mesh.vertices.iter().flatten().any(|c| !c.is_finite()) {
            return Err(MeshDecodeError::NonFinite);
        }
        Ok(mesh)
    }

    fn from_binary_stl(bytes: &[u8], count: usize) -> Self {
        let mut mesh = Self::with_capacity(count);
        for i in 0..count {
            // Skip the stored normal; it is recomputed from the winding
            let base = STL_HEADER_LEN + i * STL_TRIANGLE_LEN + 12;
            let corner = |k: usize| -> Vec3 {
                let at = base + k * 12;
                [
                    read_f32(bytes, at) as f64,
                    read_f32(bytes, at + 4) as f64,
                    read_f32(bytes, at + 8) as f64,
                ]
            };
            mesh.push_triangle([corner(0), corner(1), corner(2)]);
        }
        mesh
    }

    fn from_ascii_stl(bytes: &[u8]) -> Result<Self, MeshDecodeError> {
        let text = std::str::from_utf8(bytes).map_err(|e| MeshDecodeError::Ascii(e.to_string()))?;

        let mut corners = Vec::new();
        let mut tokens = text.split_whitespace();
        while let Some(token) = tokens.next() {
            if token != "vertex" {
                continue;
            }
            let mut v = [0.0; 3];
            for c in &mut v {
                let raw = tokens
                    .next()
                    .ok_or_else(|| MeshDecodeError::Ascii("vertex with missing coordinate".into()))?;
                *c = raw
                    .parse()
                    .map_err(|_| MeshDecodeError::Ascii(format!("bad coordinate {:?}", raw)))?;
            }
            corners.push(v);
        }

        if corners.len() % 3 != 0 {
            return Err(MeshDecodeError::Ascii(format!(
                "{} vertices do not form whole triangles",
                corners.len()
            )));
        }

        let mut mesh = Self::with_capacity(corners.len() / 3);
        for tri in corners.chunks_exact(3) {
            mesh.push_triangle([tri[0], tri[1], tri[2]]);
        }
        Ok(mesh)
    }

    /// Axis-aligned box mesh with outward-facing triangles
    pub fn cuboid(bounds: &BoundingBox) -> Self {
        let (lo, hi) = (bounds.min, bounds.max);
        let vertices = (0..8)
            .map(|i| {
                [
                    if i & 1 == 0 { lo[0] } else { hi[0] },
                    if i & 2 == 0 { lo[1] } else { hi[1] },
                    if i & 4 == 0 { lo[2] } else { hi[2] },
                ]
            })
            .collect();

        Self {
            vertices,
            triangles: vec![
                [0, 2, 1],
                [1, 2, 3],
                [4, 5, 6],
                [5, 7, 6],
                [0, 1, 4],
                [1, 5, 4],
                [2, 6, 3],
                [3, 6, 7],
                [0, 4, 2],
                [2, 4, 6],
                [1, 3, 5],
                [3, 7, 5],
            ],
        }
    }

    fn with_capacity(triangles: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(triangles * 3),
            triangles: Vec::with_capacity(triangles),
        }
    }

    fn push_triangle(&mut self, corners: [Vec3; 3]) {
        let first = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&corners);
        self.triangles.push([first, first + 1, first + 2]);
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Corners of triangle `index`
    pub fn triangle(&self, index: usize) -> Option<[Vec3; 3]> {
        let tri = self.triangles.get(index)?;
        Some([
            *self.vertices.get(tri[0] as usize)?,
            *self.vertices.get(tri[1] as usize)?,
            *self.vertices.get(tri[2] as usize)?,
        ])
    }

    /// Single-triangle mesh of triangle `index`
    pub fn extract_triangle(&self, index: usize) -> Option<Self> {
        let corners = self.triangle(index)?;
        let mut mesh = Self::with_capacity(1);
        mesh.push_triangle(corners);
        Some(mesh)
    }

    /// Extent of the referenced vertices
    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::from_points(self.vertices.iter())
    }

    /// Nearest triangle hit by the ray
    pub fn raycast(&self, origin: Vec3, dir: Vec3) -> Option<RayHit> {
        let mut nearest: Option<RayHit> = None;
        for index in 0..self.triangles.len() {
            let Some(corners) = self.triangle(index) else {
                continue;
            };
            let Some(t) = ray_triangle(origin, dir, corners) else {
                continue;
            };
            if nearest.map_or(true, |hit| t < hit.distance) {
                nearest = Some(RayHit {
                    triangle: index,
                    distance: t,
                    point: add(origin, scale(dir, t)),
                    normal: triangle_normal(corners[0], corners[1], corners[2]),
                });
            }
        }
        nearest
    }

    /// Encode as binary STL
    pub fn to_binary_stl(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(STL_HEADER_LEN + self.triangles.len() * STL_TRIANGLE_LEN);

        let mut header = [0u8; 80];
        let name = b"cm2";
        header[..name.len()].copy_from_slice(name);
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&(self.triangles.len() as u32).to_le_bytes());

        for index in 0..self.triangles.len() {
            let Some([a, b, c]) = self.triangle(index) else {
                continue;
            };
            push_f32_triplet(&mut bytes, triangle_normal(a, b, c));
            push_f32_triplet(&mut bytes, a);
            push_f32_triplet(&mut bytes, b);
            push_f32_triplet(&mut bytes, c);
            bytes.extend_from_slice(&0u16.to_le_bytes());
        }

        bytes
    }
}

/// Triangle count when `bytes` has exactly the size of a binary STL
fn binary_triangle_count(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < STL_HEADER_LEN {
        return None;
    }
    let count = read_u32(bytes, 80) as usize;
    let expected = count
        .checked_mul(STL_TRIANGLE_LEN)?
        .checked_add(STL_HEADER_LEN)?;
    (expected == bytes.len()).then_some(count)
}

fn looks_like_ascii(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(b"solid")
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[inline]
fn push_f32_triplet(bytes: &mut Vec<u8>, value: Vec3) {
    bytes.extend_from_slice(&(value[0] as f32).to_le_bytes());
    bytes.extend_from_slice(&(value[1] as f32).to_le_bytes());
    bytes.extend_from_slice(&(value[2] as f32).to_le_bytes());
}
