//! ID3v2 tag skipping

use pullmedia_core::{DataSource, MediaResult};
use tracing::trace;

const HEADER_LEN: u64 = 10;

/// Return the offset just past any ID3v2 tags starting at `offset`
///
/// Tags may repeat back to back; each declares a synch-safe size and an
/// optional footer.
pub fn skip_id3v2(source: &dyn DataSource, mut offset: u64) -> MediaResult<u64> {
    loop {
        let mut header = [0u8; HEADER_LEN as usize];
        let n = source.read_at(offset, &mut header)?;
        if n < header.len() || &header[..3] != b"ID3" {
            return Ok(offset);
        }
        // Version bytes are never 0xFF and size bytes keep the top bit clear.
        if header[3] == 0xFF || header[4] == 0xFF || header[6..10].iter().any(|b| b & 0x80 != 0)
        {
            return Ok(offset);
        }
        let size = header[6..10]
            .iter()
            .fold(0u64, |acc, &b| (acc << 7) | u64::from(b));
        let footer = if header[5] & 0x10 != 0 { HEADER_LEN } else { 0 };
        trace!(offset, size, "skipping ID3v2 tag");
        offset += HEADER_LEN + size + footer;
    }
}
