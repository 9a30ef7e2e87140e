//! Sliced/composite stream reader.
//!
//! Presents a sequence of N numbered blob parts as one logically contiguous
//! input stream: on first read it opens slice 0, on EOF it advances and
//! opens the next, guaranteeing in-order bytes across slices with no extra
//! copy. `open_slice` is the overridable hook -- implement [`SliceOpener`]
//! per source (restoring from a `BlobContainer` is the only implementor
//! needed here).

use std::io::Read;

use anyhow::Result;

pub trait SliceOpener: Send {
    fn open_slice(&mut self, index: usize) -> Result<Box<dyn Read + Send>>;
}

pub struct SlicedStreamReader {
    opener: Box<dyn SliceOpener>,
    num_slices: usize,
    next_index: usize,
    current: Option<Box<dyn Read + Send>>,
}

impl SlicedStreamReader {
    pub fn new(opener: Box<dyn SliceOpener>, num_slices: usize) -> Self {
        Self {
            opener,
            num_slices,
            next_index: 0,
            current: None,
        }
    }
}

impl Read for SlicedStreamReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.current.is_none() {
                if self.next_index >= self.num_slices {
                    return Ok(0);
                }
                let slice = self
                    .opener
                    .open_slice(self.next_index)
                    .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
                self.next_index += 1;
                self.current = Some(slice);
            }

            let current = self.current.as_mut().unwrap();
            let n = current.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            // current slice exhausted, advance to the next one
            self.current = None;
        }
    }
}
