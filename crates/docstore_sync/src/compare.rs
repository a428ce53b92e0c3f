//! Streaming content comparison.

use std::io::{self, ErrorKind, Read};

/// Compares two optional content streams chunk by chunk.
///
/// Two missing streams are equal; a missing and a present stream are not,
/// even if the present one is empty. Reading stops at the first differing
/// chunk or as soon as one stream ends before the other.
///
/// # Errors
///
/// Returns the first read error of either stream.
pub fn streams_equal<A, B>(
    first: Option<&mut A>,
    second: Option<&mut B>,
    chunk_size: usize,
) -> io::Result<bool>
where
    A: Read + ?Sized,
    B: Read + ?Sized,
{
    let (first, second) = match (first, second) {
        (None, None) => return Ok(true),
        (Some(first), Some(second)) => (first, second),
        _ => return Ok(false),
    };

    let chunk_size = chunk_size.max(1);
    let mut buf1 = vec![0u8; chunk_size];
    let mut buf2 = vec![0u8; chunk_size];
    loop {
        let n1 = fill(first, &mut buf1)?;
        let n2 = fill(second, &mut buf2)?;
        if n1 != n2 || buf1[..n1] != buf2[..n2] {
            return Ok(false);
        }
        if n1 < chunk_size {
            // both streams ended inside this chunk
            return Ok(true);
        }
    }
}

/// Reads until `buf` is full or the stream ends; returns the bytes read.
fn fill<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out at most `step` bytes per read call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn eq(a: &[u8], b: &[u8], chunk: usize) -> bool {
        let mut a = a;
        let mut b = b;
        streams_equal(Some(&mut a), Some(&mut b), chunk).unwrap()
    }

    #[test]
    fn missing_streams() {
        assert!(streams_equal::<&[u8], &[u8]>(None, None, 16).unwrap());
        let mut empty: &[u8] = b"";
        assert!(!streams_equal::<&[u8], &[u8]>(Some(&mut empty), None, 16).unwrap());
        let mut empty: &[u8] = b"";
        assert!(!streams_equal::<&[u8], &[u8]>(None, Some(&mut empty), 16).unwrap());
    }

    #[test]
    fn last_byte_differs() {
        let a = vec![7u8; 1000];
        let mut b = a.clone();
        b[999] = 8;
        assert!(!eq(&a, &b, 64));
        assert!(!eq(&a, &b, 1000));
        assert!(eq(&a, &a.clone(), 64));
    }

    #[test]
    fn length_differs() {
        assert!(!eq(b"abc", b"abcd", 2));
        assert!(!eq(b"abcd", b"abc", 4));
        assert!(!eq(b"", b"a", 8));
        assert!(eq(b"", b"", 8));
    }

    #[test]
    fn exact_chunk_multiples() {
        let a = vec![1u8; 128];
        assert!(eq(&a, &a.clone(), 64));
        let mut longer = a.clone();
        longer.push(1);
        assert!(!eq(&a, &longer, 64));
    }

    #[test]
    fn short_reads_are_tolerated() {
        let data: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let mut a = Trickle { data: &data, step: 3 };
        let mut b = Trickle { data: &data, step: 1000 };
        assert!(streams_equal(Some(&mut a), Some(&mut b), 256).unwrap());

        let mut other = data.clone();
        other[4999] ^= 0xff;
        let mut a = Trickle { data: &data, step: 7 };
        let mut b = Trickle { data: &other, step: 1 };
        assert!(!streams_equal(Some(&mut a), Some(&mut b), 256).unwrap());
    }
}
