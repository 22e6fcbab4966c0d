use std::io;

/// A bounded contiguous byte FIFO. Data is appended at the tail and
/// consumed from the head; the backing storage is compacted whenever a
/// writable slice is requested so that the free capacity is always one
/// contiguous run.
pub struct Buffer {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl Buffer {
    #[inline]
    pub fn new(size: usize) -> Buffer {
        Buffer {
            data: vec![0u8; size].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    /// The number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    /// Returns true in case the buffer is empty, false otherwise.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Remaining free capacity in the buffer.
    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.data.len() - self.len()
    }

    /// Slice containing data.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.head..self.tail]
    }

    /// Consume `count` bytes from the head.
    #[inline]
    pub fn move_head(&mut self, count: usize) {
        self.head += count;
        debug_assert!(self.head <= self.tail);

        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
        }
    }

    /// Extend the data region by `count` bytes previously written into
    /// the writable slice.
    #[inline]
    pub fn move_tail(&mut self, count: usize) {
        self.tail += count;
        debug_assert!(self.tail <= self.data.len());
    }

    #[inline]
    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Slice containing free capacity to be written.
    #[inline]
    pub fn write_slice(&mut self) -> &mut [u8] {
        self.compact();
        &mut self.data[self.tail..]
    }

    /// Append the supplied bytes. Returns false if they do not fit.
    #[inline]
    pub fn push(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.free_capacity() {
            return false;
        }

        self.write_slice()[..bytes.len()].copy_from_slice(bytes);
        self.move_tail(bytes.len());
        true
    }

    /// Append a single byte. Returns false if the buffer is full.
    #[inline]
    pub fn push_byte(&mut self, byte: u8) -> bool {
        self.push(&[byte])
    }

    /// Write the contents of the buffer to the supplied writer, advancing
    /// the read offset. A `WouldBlock` from the writer surfaces as-is so
    /// callers can fold it into their wait plumbing.
    #[inline]
    pub fn egress<W: io::Write>(&mut self, mut writer: W) -> io::Result<usize> {
        let orig_len = self.len();

        while !self.is_empty() {
            let write_count = writer.write(self.read_slice())?;

            if write_count == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }

            self.move_head(write_count);
        }

        Ok(orig_len)
    }

    /// Read in data from the supplied reader to the buffer. Returns the
    /// number of bytes added; stops at end-of-stream, a full buffer, or a
    /// `WouldBlock` after at least one byte arrived. A `WouldBlock` with
    /// nothing read surfaces as an error for the caller to fold.
    #[inline]
    pub fn ingress<R: io::Read>(&mut self, mut reader: R) -> io::Result<usize> {
        let orig_len = self.len();

        while self.free_capacity() > 0 {
            match reader.read(self.write_slice()) {
                Ok(0) => break,
                Ok(read_count) => self.move_tail(read_count),
                Err(err) => {
                    if err.kind() == io::ErrorKind::WouldBlock && self.len() > orig_len {
                        break;
                    }
                    return Err(err);
                }
            }
        }

        Ok(self.len() - orig_len)
    }

    #[inline]
    fn compact(&mut self) {
        if self.head > 0 {
            self.data.copy_within(self.head..self.tail, 0);
            self.tail -= self.head;
            self.head = 0;
        }
    }
}
