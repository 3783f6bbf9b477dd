//! # STL Codec
//!
//! Decodes STL files, binary or ASCII, into a deduplicated [`IndexedMesh`]
//! and serializes meshes back out as binary STL.
//!
//! ## Format Detection
//!
//! A file is binary exactly when the little-endian triangle count at offset
//! 80 is consistent with the file size: `80 + 4 + 50 * count == len`. ASCII
//! files that happen to start with "solid" but fail this size check are
//! parsed as text; binary files with a "solid" header still parse as binary.
//!
//! ## Deduplication
//!
//! Vertices are merged under a six-decimal textual key, so the emitted
//! vertex table is stable across platforms and re-encodings. Triangle order
//! is the order of appearance in the file.
//!
//! Output is always binary: an 80-byte tagged header, the triangle count,
//! and per triangle a computed unit normal, three vertices, and two zeroed
//! attribute bytes.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::{IndexedMesh, MeshBuilder};

/// Fixed header size: 80 tag bytes plus the 4-byte triangle count.
pub const BINARY_HEADER_SIZE: usize = 84;

/// Bytes per binary triangle record: normal, three vertices, attributes.
pub const BINARY_TRIANGLE_SIZE: usize = 50;

/// ASCII tag written into the 80-byte header of encoded files.
pub const HEADER_TAG: &[u8] = b"printsplit binary stl";

/// Codec failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid STL: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decodes STL bytes, auto-detecting the variant.
pub fn decode(bytes: &[u8]) -> Result<IndexedMesh, CodecError> {
    if is_binary(bytes) {
        decode_binary(bytes)
    } else {
        decode_ascii(bytes)
    }
}

/// Binary detection by the size invariant.
pub fn is_binary(bytes: &[u8]) -> bool {
    if bytes.len() < BINARY_HEADER_SIZE {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    count
        .checked_mul(BINARY_TRIANGLE_SIZE)
        .and_then(|n| n.checked_add(BINARY_HEADER_SIZE))
        == Some(bytes.len())
}

fn decode_binary(bytes: &[u8]) -> Result<IndexedMesh, CodecError> {
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]);
    let mut cursor = Cursor::new(&bytes[BINARY_HEADER_SIZE..]);
    let mut builder = MeshBuilder::new();

    for _ in 0..count {
        // 12-byte facet normal, ignored; normals are recomputed on encode.
        let mut normal = [0u8; 12];
        cursor.read_exact(&mut normal)?;

        let mut indices = [0u32; 3];
        for slot in &mut indices {
            let x = cursor.read_f32::<LittleEndian>()?;
            let y = cursor.read_f32::<LittleEndian>()?;
            let z = cursor.read_f32::<LittleEndian>()?;
            *slot = builder.add_vertex([x, y, z]);
        }
        builder.add_triangle(indices);

        let mut attributes = [0u8; 2];
        cursor.read_exact(&mut attributes)?;
    }

    Ok(builder.finish())
}

fn decode_ascii(bytes: &[u8]) -> Result<IndexedMesh, CodecError> {
    let text = String::from_utf8_lossy(bytes);
    let mut builder = MeshBuilder::new();
    let mut pending: Vec<u32> = Vec::with_capacity(3);

    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower.starts_with("vertex") {
            let coords: Result<Vec<f32>, _> = trimmed
                .split_whitespace()
                .skip(1)
                .map(str::parse::<f32>)
                .collect();
            let coords = coords.map_err(|_| {
                CodecError::InvalidFormat(format!(
                    "line {}: vertex with non-numeric coordinates",
                    line_no + 1
                ))
            })?;
            if coords.len() != 3 {
                return Err(CodecError::InvalidFormat(format!(
                    "line {}: vertex with {} coordinates, expected 3",
                    line_no + 1,
                    coords.len()
                )));
            }
            pending.push(builder.add_vertex([coords[0], coords[1], coords[2]]));
        } else if lower.starts_with("endfacet") {
            if pending.len() != 3 {
                return Err(CodecError::InvalidFormat(format!(
                    "line {}: facet closed with {} vertices",
                    line_no + 1,
                    pending.len()
                )));
            }
            builder.add_triangle([pending[0], pending[1], pending[2]]);
            pending.clear();
        }
    }

    Ok(builder.finish())
}

/// Serializes a mesh as binary STL into `writer`.
pub fn encode_into<W: Write>(mesh: &IndexedMesh, writer: &mut W) -> Result<(), CodecError> {
    let mut header = [0u8; 80];
    header[..HEADER_TAG.len()].copy_from_slice(HEADER_TAG);
    writer.write_all(&header)?;
    writer.write_u32::<LittleEndian>(mesh.triangle_count() as u32)?;

    for tri in mesh.triangles.chunks_exact(3) {
        let v0 = mesh.vertex(tri[0] as usize);
        let v1 = mesh.vertex(tri[1] as usize);
        let v2 = mesh.vertex(tri[2] as usize);

        for component in facet_normal(v0, v1, v2) {
            writer.write_f32::<LittleEndian>(component)?;
        }
        for v in [v0, v1, v2] {
            for component in v {
                writer.write_f32::<LittleEndian>(component)?;
            }
        }
        writer.write_u16::<LittleEndian>(0)?;
    }
    Ok(())
}

/// Serializes a mesh as binary STL in memory.
pub fn encode(mesh: &IndexedMesh) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(BINARY_HEADER_SIZE + mesh.triangle_count() * BINARY_TRIANGLE_SIZE);
    // Writing into a Vec cannot fail.
    encode_into(mesh, &mut out).expect("in-memory encode");
    out
}

/// Unit normal of the triangle, zeros when the cross product degenerates.
fn facet_normal(v0: [f32; 3], v1: [f32; 3], v2: [f32; 3]) -> [f32; 3] {
    let e1 = [v1[0] - v0[0], v1[1] - v0[1], v1[2] - v0[2]];
    let e2 = [v2[0] - v0[0], v2[1] - v0[1], v2[2] - v0[2]];
    let cross = [
        e1[1] * e2[2] - e1[2] * e2[1],
        e1[2] * e2[0] - e1[0] * e2[2],
        e1[0] * e2[1] - e1[1] * e2[0],
    ];
    let len = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt();
    if len > 0.0 {
        [cross[0] / len, cross[1] / len, cross[2] / len]
    } else {
        [0.0, 0.0, 0.0]
    }
}
