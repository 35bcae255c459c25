//! Minimal NPY v1.0 codec for little-endian f64 arrays in C order.

use anyhow::{anyhow, bail, ensure, Result};
use regex::Regex;
use std::sync::OnceLock;

const MAGIC: &[u8] = b"\x93NUMPY";
const PREAMBLE: usize = MAGIC.len() + 2 + 2;

pub fn encode(shape: &[usize], data: &[f64]) -> Vec<u8> {
    let dims = match shape {
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': {dims}, }}");
    // Pad so the data starts on a 64-byte boundary; header ends with '\n'.
    let unpadded = PREAMBLE + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut out = Vec::with_capacity(PREAMBLE + header.len() + data.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn shape_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'shape':\s*\(([^)]*)\)").ok()).as_ref()
}

pub fn decode(bytes: &[u8]) -> Result<(Vec<usize>, Vec<f64>)> {
    ensure!(bytes.len() >= PREAMBLE && bytes.starts_with(MAGIC), "not an NPY file");
    ensure!(bytes[6] == 1, "unsupported NPY version {}.{}", bytes[6], bytes[7]);
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let body = PREAMBLE + header_len;
    ensure!(bytes.len() >= body, "truncated NPY header");
    let header = std::str::from_utf8(&bytes[PREAMBLE..body])?;

    if !header.contains("'descr': '<f8'") {
        bail!("only '<f8' arrays are supported");
    }
    if header.contains("'fortran_order': True") {
        bail!("fortran-ordered arrays are not supported");
    }
    let caps = shape_re()
        .and_then(|re| re.captures(header))
        .ok_or_else(|| anyhow!("NPY header has no shape"))?;
    let shape = caps[1]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| anyhow!("bad dimension '{s}': {e}")))
        .collect::<Result<Vec<_>>>()?;

    let nbytes = shape
        .iter()
        .try_fold(8usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| anyhow!("NPY shape {shape:?} overflows"))?;
    let payload = &bytes[body..];
    ensure!(
        payload.len() == nbytes,
        "expected {nbytes} data bytes, found {}",
        payload.len()
    );
    let data = payload
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            f64::from_le_bytes(b)
        })
        .collect();
    Ok((shape, data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_aligned() {
        let bytes = encode(&[2, 3], &[0.0; 6]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((PREAMBLE + header_len) % 64, 0);
        assert_eq!(bytes[PREAMBLE + header_len - 1], b'\n');
    }

    #[test]
    fn one_dimensional_shape_keeps_trailing_comma() {
        let bytes = encode(&[4], &[1.0, 2.0, 3.0, 4.0]);
        let text = String::from_utf8_lossy(&bytes[PREAMBLE..]);
        assert!(text.contains("'shape': (4,)"));
        let (shape, data) = decode(&bytes).unwrap();
        assert_eq!(shape, vec![4]);
        assert_eq!(data[3], 4.0);
    }

    #[test]
    fn huge_shape_is_an_error_not_an_overflow() {
        let mut bytes = encode(&[1], &[1.0]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let header = format!(
            "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
            usize::MAX,
            usize::MAX
        );
        let padded = format!("{header:<width$}", width = header_len - 1) + "\n";
        assert_eq!(padded.len(), header_len);
        bytes.splice(PREAMBLE..PREAMBLE + header_len, padded.into_bytes());

        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err:#}");
    }

    #[test]
    fn rejects_other_dtypes() {
        let mut bytes = encode(&[1], &[1.0]);
        let pos = bytes.windows(3).position(|w| w == b"<f8").unwrap();
        bytes[pos + 1] = b'i';
        assert!(decode(&bytes).is_err());
    }
}
