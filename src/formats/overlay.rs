//! overlay binary format - the preprocessed CH graph.
//!
//! Single little-endian file: a fixed header with magic, version and counts,
//! the node/overlay/original CSR groups, length-prefixed edge geometry, and
//! a CRC-32 trailer covering every byte before it.
//!
//! The reader validates magic, version, count caps, the file size derived
//! from the counts, the CRC trailer, and every CSR invariant before the
//! graph is handed out. Count caps are checked against the actual file size
//! before any count-sized allocation, so a hostile header cannot force a
//! multi-gigabyte allocation.

use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::crc;
use crate::graph::ChGraph;

pub const MAGIC: &[u8; 8] = b"CITYPATH";
pub const FORMAT_VERSION: u32 = 2;

/// Hard caps on header counts, far above any single-region graph.
pub const MAX_NODES: u32 = 10_000_000;
pub const MAX_EDGES: u32 = 50_000_000;

const HEADER_LEN: usize = 32;

/// Load/save failures. Every variant except `Io` means the file must not be
/// used; the server refuses to start on any of them.
#[derive(Debug)]
pub enum FormatError {
    Io(std::io::Error),
    BadMagic,
    UnsupportedVersion(u32),
    CountTooLarge {
        field: &'static str,
        value: u32,
        limit: u32,
    },
    SizeMismatch {
        expected: u64,
        actual: u64,
    },
    ChecksumMismatch {
        stored: u32,
        computed: u32,
    },
    InvalidCsr(String),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::Io(err) => write!(f, "I/O error: {err}"),
            FormatError::BadMagic => write!(f, "invalid magic bytes"),
            FormatError::UnsupportedVersion(v) => {
                write!(f, "unsupported format version {v} (expected {FORMAT_VERSION})")
            }
            FormatError::CountTooLarge {
                field,
                value,
                limit,
            } => write!(f, "{field} = {value} exceeds limit {limit}"),
            FormatError::SizeMismatch { expected, actual } => {
                write!(f, "file size mismatch: expected {expected} bytes, found {actual}")
            }
            FormatError::ChecksumMismatch { stored, computed } => {
                write!(f, "CRC32 mismatch: stored={stored:08x} computed={computed:08x}")
            }
            FormatError::InvalidCsr(msg) => write!(f, "invalid CSR: {msg}"),
        }
    }
}

impl std::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FormatError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FormatError {
    fn from(err: std::io::Error) -> Self {
        FormatError::Io(err)
    }
}

/// Writer that feeds every byte through a CRC-32 digest on the way out.
struct CrcWriter<W: Write> {
    inner: W,
    digest: crc::Digest,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            digest: crc::Digest::new(),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), FormatError> {
        self.digest.update(buf);
        self.inner.write_all(buf)?;
        Ok(())
    }

    fn write_u32(&mut self, v: u32) -> Result<(), FormatError> {
        self.write_all(&v.to_le_bytes())
    }

    fn write_u32_slice(&mut self, s: &[u32]) -> Result<(), FormatError> {
        for &v in s {
            self.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    fn write_i32_slice(&mut self, s: &[i32]) -> Result<(), FormatError> {
        for &v in s {
            self.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    fn write_f64_slice(&mut self, s: &[f64]) -> Result<(), FormatError> {
        for &v in s {
            self.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    fn finish(self) -> (W, u32) {
        (self.inner, self.digest.finalize())
    }
}

/// Bounds-checked little-endian reader over a byte buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(FormatError::SizeMismatch {
                expected: end as u64,
                actual: self.buf.len() as u64,
            });
        }
        let s = &self.buf[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn read_u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u32_slice(&mut self, n: usize) -> Result<Vec<u32>, FormatError> {
        let bytes = self.take(n * 4)?;
        let mut v = Vec::with_capacity(n);
        for c in bytes.chunks_exact(4) {
            v.push(u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        }
        Ok(v)
    }

    fn read_i32_slice(&mut self, n: usize) -> Result<Vec<i32>, FormatError> {
        let bytes = self.take(n * 4)?;
        let mut v = Vec::with_capacity(n);
        for c in bytes.chunks_exact(4) {
            v.push(i32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        }
        Ok(v)
    }

    fn read_f64_slice(&mut self, n: usize) -> Result<Vec<f64>, FormatError> {
        let bytes = self.take(n * 8)?;
        let mut v = Vec::with_capacity(n);
        for c in bytes.chunks_exact(8) {
            v.push(f64::from_le_bytes([
                c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7],
            ]));
        }
        Ok(v)
    }
}

pub struct OverlayFile;

impl OverlayFile {
    /// Serializes the graph atomically: writes `<path>.tmp`, renames on
    /// success.
    pub fn write<P: AsRef<Path>>(path: P, chg: &ChGraph) -> Result<(), FormatError> {
        let path = path.as_ref();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(err) = Self::write_to(&tmp, chg) {
            let _ = fs::remove_file(&tmp);
            return Err(err);
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_to(path: &Path, chg: &ChGraph) -> Result<(), FormatError> {
        let file = fs::File::create(path)?;
        let mut w = CrcWriter::new(BufWriter::new(file));

        let num_shortcuts = chg.fwd_middle.iter().filter(|&&m| m >= 0).count() as u32
            + chg.bwd_middle.iter().filter(|&&m| m >= 0).count() as u32;

        // Header.
        w.write_all(MAGIC)?;
        w.write_u32(FORMAT_VERSION)?;
        w.write_u32(chg.num_nodes)?;
        w.write_u32(chg.orig_head.len() as u32)?;
        w.write_u32(num_shortcuts)?;
        w.write_u32(chg.fwd_head.len() as u32)?;
        w.write_u32(chg.bwd_head.len() as u32)?;

        // Node data.
        w.write_f64_slice(&chg.node_lat)?;
        w.write_f64_slice(&chg.node_lon)?;
        w.write_u32_slice(&chg.rank)?;

        // Forward upward overlay.
        w.write_u32_slice(&chg.fwd_first_out)?;
        w.write_u32_slice(&chg.fwd_head)?;
        w.write_u32_slice(&chg.fwd_weight)?;
        w.write_i32_slice(&chg.fwd_middle)?;

        // Backward upward overlay.
        w.write_u32_slice(&chg.bwd_first_out)?;
        w.write_u32_slice(&chg.bwd_head)?;
        w.write_u32_slice(&chg.bwd_weight)?;
        w.write_i32_slice(&chg.bwd_middle)?;

        // Original graph edges (for snapping and geometry).
        w.write_u32_slice(&chg.orig_first_out)?;
        w.write_u32_slice(&chg.orig_head)?;
        w.write_u32_slice(&chg.orig_weight)?;

        // Geometry, length-prefixed.
        w.write_u32(chg.geo_first_out.len() as u32)?;
        w.write_u32_slice(&chg.geo_first_out)?;
        w.write_u32(chg.geo_shape_lat.len() as u32)?;
        w.write_f64_slice(&chg.geo_shape_lat)?;
        w.write_u32(chg.geo_shape_lon.len() as u32)?;
        w.write_f64_slice(&chg.geo_shape_lon)?;

        let (mut inner, checksum) = w.finish();
        inner.write_all(&checksum.to_le_bytes())?;
        inner.flush()?;
        Ok(())
    }

    /// Deserializes and fully validates a graph file.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<ChGraph, FormatError> {
        let buf = fs::read(path)?;
        Self::parse(&buf)
    }

    fn parse(buf: &[u8]) -> Result<ChGraph, FormatError> {
        if buf.len() < HEADER_LEN + 4 {
            return Err(FormatError::SizeMismatch {
                expected: (HEADER_LEN + 4) as u64,
                actual: buf.len() as u64,
            });
        }

        let mut r = Reader::new(buf);
        let magic = r.take(8)?;
        if magic != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = r.read_u32()?;
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }

        let num_nodes = r.read_u32()?;
        let num_orig = r.read_u32()?;
        let num_shortcuts = r.read_u32()?;
        let num_fwd = r.read_u32()?;
        let num_bwd = r.read_u32()?;

        check_cap("num_nodes", num_nodes, MAX_NODES)?;
        check_cap("num_orig_edges", num_orig, MAX_EDGES)?;
        check_cap("num_fwd_edges", num_fwd, MAX_EDGES)?;
        check_cap("num_bwd_edges", num_bwd, MAX_EDGES)?;
        check_cap("num_shortcuts", num_shortcuts, MAX_EDGES)?;

        // Size derived from the counts must agree with the actual file size
        // before any count-sized allocation happens.
        let n = num_nodes as u64;
        let fixed = HEADER_LEN as u64        // header
            + 20 * n                         // lat + lon + rank
            + 3 * (4 * (n + 1))              // the three first_out arrays
            + 12 * num_fwd as u64            // head + weight + middle
            + 12 * num_bwd as u64
            + 8 * num_orig as u64; // head + weight
        let min_total = fixed + 12 + 4; // geometry prefixes + CRC trailer
        if (buf.len() as u64) < min_total {
            return Err(FormatError::SizeMismatch {
                expected: min_total,
                actual: buf.len() as u64,
            });
        }

        let geo_len = read_u32_at(buf, fixed as usize)?;
        let shape_lat_len = read_u32_at(buf, fixed as usize + 4 + geo_len as usize * 4)?;
        let shape_lon_len = read_u32_at(
            buf,
            fixed as usize + 8 + geo_len as usize * 4 + shape_lat_len as usize * 8,
        )?;
        let expected_total =
            fixed + 12 + 4 * geo_len as u64 + 8 * (shape_lat_len as u64 + shape_lon_len as u64) + 4;
        if expected_total != buf.len() as u64 {
            return Err(FormatError::SizeMismatch {
                expected: expected_total,
                actual: buf.len() as u64,
            });
        }

        // CRC covers everything before the 4-byte trailer.
        let trailer = &buf[buf.len() - 4..];
        let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = crc::checksum(&buf[..buf.len() - 4]);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch { stored, computed });
        }

        // All sizes verified; parse the body.
        let nodes = num_nodes as usize;
        let node_lat = r.read_f64_slice(nodes)?;
        let node_lon = r.read_f64_slice(nodes)?;
        let rank = r.read_u32_slice(nodes)?;

        let fwd_first_out = r.read_u32_slice(nodes + 1)?;
        let fwd_head = r.read_u32_slice(num_fwd as usize)?;
        let fwd_weight = r.read_u32_slice(num_fwd as usize)?;
        let fwd_middle = r.read_i32_slice(num_fwd as usize)?;

        let bwd_first_out = r.read_u32_slice(nodes + 1)?;
        let bwd_head = r.read_u32_slice(num_bwd as usize)?;
        let bwd_weight = r.read_u32_slice(num_bwd as usize)?;
        let bwd_middle = r.read_i32_slice(num_bwd as usize)?;

        let orig_first_out = r.read_u32_slice(nodes + 1)?;
        let orig_head = r.read_u32_slice(num_orig as usize)?;
        let orig_weight = r.read_u32_slice(num_orig as usize)?;

        let _ = r.read_u32()?;
        let geo_first_out = r.read_u32_slice(geo_len as usize)?;
        let _ = r.read_u32()?;
        let geo_shape_lat = r.read_f64_slice(shape_lat_len as usize)?;
        let _ = r.read_u32()?;
        let geo_shape_lon = r.read_f64_slice(shape_lon_len as usize)?;

        let chg = ChGraph {
            num_nodes,
            node_lat,
            node_lon,
            rank,
            fwd_first_out,
            fwd_head,
            fwd_weight,
            fwd_middle,
            bwd_first_out,
            bwd_head,
            bwd_weight,
            bwd_middle,
            orig_first_out,
            orig_head,
            orig_weight,
            geo_first_out,
            geo_shape_lat,
            geo_shape_lon,
        };

        validate(&chg, num_shortcuts)?;
        Ok(chg)
    }
}

fn check_cap(field: &'static str, value: u32, limit: u32) -> Result<(), FormatError> {
    if value > limit {
        return Err(FormatError::CountTooLarge {
            field,
            value,
            limit,
        });
    }
    Ok(())
}

fn read_u32_at(buf: &[u8], pos: usize) -> Result<u32, FormatError> {
    if pos + 4 > buf.len() {
        return Err(FormatError::SizeMismatch {
            expected: (pos + 4) as u64,
            actual: buf.len() as u64,
        });
    }
    Ok(u32::from_le_bytes([
        buf[pos],
        buf[pos + 1],
        buf[pos + 2],
        buf[pos + 3],
    ]))
}

/// Checks every CSR invariant of a loaded graph.
fn validate(chg: &ChGraph, num_shortcuts: u32) -> Result<(), FormatError> {
    let n = chg.num_nodes;
    validate_csr(
        "forward",
        n,
        &chg.fwd_first_out,
        &chg.fwd_head,
        &chg.fwd_weight,
        Some(&chg.fwd_middle),
    )?;
    validate_csr(
        "backward",
        n,
        &chg.bwd_first_out,
        &chg.bwd_head,
        &chg.bwd_weight,
        Some(&chg.bwd_middle),
    )?;
    validate_csr(
        "original",
        n,
        &chg.orig_first_out,
        &chg.orig_head,
        &chg.orig_weight,
        None,
    )?;

    let counted = chg.fwd_middle.iter().filter(|&&m| m >= 0).count() as u32
        + chg.bwd_middle.iter().filter(|&&m| m >= 0).count() as u32;
    if counted != num_shortcuts {
        return Err(FormatError::InvalidCsr(format!(
            "shortcut count mismatch: header={num_shortcuts} counted={counted}"
        )));
    }

    // Geometry indexes the original edges.
    let num_orig = chg.orig_head.len();
    if !(chg.geo_first_out.is_empty() && num_orig == 0)
        && chg.geo_first_out.len() != num_orig + 1
    {
        return Err(FormatError::InvalidCsr(format!(
            "geometry index length {} != original edges + 1 ({})",
            chg.geo_first_out.len(),
            num_orig + 1
        )));
    }
    if chg.geo_shape_lat.len() != chg.geo_shape_lon.len() {
        return Err(FormatError::InvalidCsr(
            "shape lat/lon length mismatch".to_string(),
        ));
    }
    if let Some(&last) = chg.geo_first_out.last() {
        if last as usize != chg.geo_shape_lat.len() {
            return Err(FormatError::InvalidCsr(
                "geometry index does not cover the shape arrays".to_string(),
            ));
        }
        for w in chg.geo_first_out.windows(2) {
            if w[1] < w[0] {
                return Err(FormatError::InvalidCsr(
                    "geometry index not monotone".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_csr(
    name: &str,
    num_nodes: u32,
    first_out: &[u32],
    head: &[u32],
    weight: &[u32],
    middle: Option<&[i32]>,
) -> Result<(), FormatError> {
    if first_out.len() != num_nodes as usize + 1 {
        return Err(FormatError::InvalidCsr(format!(
            "{name}: first_out length {} != num_nodes + 1 ({})",
            first_out.len(),
            num_nodes + 1
        )));
    }
    let num_edges = first_out[num_nodes as usize];
    if head.len() != num_edges as usize || weight.len() != num_edges as usize {
        return Err(FormatError::InvalidCsr(format!(
            "{name}: edge arrays ({}, {}) != first_out[num_nodes] ({num_edges})",
            head.len(),
            weight.len()
        )));
    }
    for i in 1..first_out.len() {
        if first_out[i] < first_out[i - 1] {
            return Err(FormatError::InvalidCsr(format!(
                "{name}: first_out not monotone at {i}"
            )));
        }
    }
    for (i, &h) in head.iter().enumerate() {
        if h >= num_nodes {
            return Err(FormatError::InvalidCsr(format!(
                "{name}: head[{i}] = {h} >= num_nodes ({num_nodes})"
            )));
        }
    }
    for (i, &w) in weight.iter().enumerate() {
        if w == 0 {
            return Err(FormatError::InvalidCsr(format!("{name}: weight[{i}] = 0")));
        }
    }
    if let Some(middle) = middle {
        if middle.len() != num_edges as usize {
            return Err(FormatError::InvalidCsr(format!(
                "{name}: middle length {} != edge count {num_edges}",
                middle.len()
            )));
        }
        for (i, &m) in middle.iter().enumerate() {
            if m != -1 && (m < 0 || m as u32 >= num_nodes) {
                return Err(FormatError::InvalidCsr(format!(
                    "{name}: middle[{i}] = {m} out of range"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Two nodes, one original edge 0 -> 1 with a shape point, plus the same
    /// edge in both overlays.
    fn fixture() -> ChGraph {
        ChGraph {
            num_nodes: 2,
            node_lat: vec![1.30, 1.31],
            node_lon: vec![103.80, 103.81],
            rank: vec![0, 1],
            fwd_first_out: vec![0, 1, 1],
            fwd_head: vec![1],
            fwd_weight: vec![1500],
            fwd_middle: vec![-1],
            bwd_first_out: vec![0, 1, 1],
            bwd_head: vec![1],
            bwd_weight: vec![1500],
            bwd_middle: vec![-1],
            orig_first_out: vec![0, 1, 1],
            orig_head: vec![1],
            orig_weight: vec![1500],
            geo_first_out: vec![0, 1],
            geo_shape_lat: vec![1.305],
            geo_shape_lon: vec![103.805],
        }
    }

    #[test]
    fn round_trip_is_lossless() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        let chg = fixture();
        OverlayFile::write(&path, &chg).unwrap();
        let loaded = OverlayFile::read(&path).unwrap();
        assert_eq!(loaded, chg);
    }

    #[test]
    fn rewrite_is_byte_stable() {
        let dir = tempdir().unwrap();
        let path_a = dir.path().join("a.bin");
        let path_b = dir.path().join("b.bin");
        let chg = fixture();
        OverlayFile::write(&path_a, &chg).unwrap();
        let loaded = OverlayFile::read(&path_a).unwrap();
        OverlayFile::write(&path_b, &loaded).unwrap();
        assert_eq!(fs::read(&path_a).unwrap(), fs::read(&path_b).unwrap());
    }

    #[test]
    fn empty_graph_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let chg = ChGraph::empty();
        OverlayFile::write(&path, &chg).unwrap();
        let loaded = OverlayFile::read(&path).unwrap();
        assert_eq!(loaded.num_nodes, 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        OverlayFile::write(&path, &fixture()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            OverlayFile::read(&path),
            Err(FormatError::BadMagic)
        ));
    }

    #[test]
    fn rejects_bad_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        OverlayFile::write(&path, &fixture()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[8] = 0xEE;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            OverlayFile::read(&path),
            Err(FormatError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        OverlayFile::write(&path, &fixture()).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 9]).unwrap();
        assert!(matches!(
            OverlayFile::read(&path),
            Err(FormatError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_flipped_payload_byte() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        OverlayFile::write(&path, &fixture()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        // Somewhere inside the node coordinate section.
        let mid = HEADER_LEN + 3;
        bytes[mid] ^= 0x01;
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            OverlayFile::read(&path),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejects_hostile_node_count_before_allocating() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        OverlayFile::write(&path, &fixture()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        // num_nodes field lives right after magic + version.
        bytes[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            OverlayFile::read(&path),
            Err(FormatError::CountTooLarge { field: "num_nodes", .. })
        ));
    }

    #[test]
    fn rejects_zero_weight_edge() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        let mut chg = fixture();
        chg.orig_weight[0] = 0;
        OverlayFile::write(&path, &chg).unwrap();
        assert!(matches!(
            OverlayFile::read(&path),
            Err(FormatError::InvalidCsr(_))
        ));
    }

    #[test]
    fn rejects_head_out_of_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("graph.bin");
        let mut chg = fixture();
        chg.fwd_head[0] = 7;
        OverlayFile::write(&path, &chg).unwrap();
        assert!(matches!(
            OverlayFile::read(&path),
            Err(FormatError::InvalidCsr(_))
        ));
    }
}
