/// MurmurHash3, x64 128-bit variant, seed 0.
///
/// Processes 16-byte blocks as two little-endian lanes. Input is buffered so the
/// hasher can be fed in arbitrary pieces (`std::io::copy` works through the
/// `Write` impl) and still produce the one-shot digest.
const C1: u64 = 0x87c3_7b91_1142_53d5;
const C2: u64 = 0x4cf5_ad43_2745_937f;
const BLOCK: usize = 16;

pub struct Murmur3x64 {
    h1: u64,
    h2: u64,
    tail: [u8; BLOCK],
    tail_len: usize,
    total_len: u64,
}

impl Murmur3x64 {
    pub fn new() -> Self {
        Self {
            h1: 0,
            h2: 0,
            tail: [0; BLOCK],
            tail_len: 0,
            total_len: 0,
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        self.total_len += data.len() as u64;

        if self.tail_len > 0 {
            let take = (BLOCK - self.tail_len).min(data.len());
            self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&data[..take]);
            self.tail_len += take;
            data = &data[take..];
            if self.tail_len < BLOCK {
                return;
            }
            let block = self.tail;
            self.mix_block(&block);
            self.tail_len = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK);
        for block in &mut blocks {
            self.mix_block(block);
        }
        let rest = blocks.remainder();
        self.tail[..rest.len()].copy_from_slice(rest);
        self.tail_len = rest.len();
    }

    fn mix_block(&mut self, block: &[u8]) {
        let mut words = block.chunks_exact(8).map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        });
        let mut k1 = words.next().unwrap_or_default();
        let mut k2 = words.next().unwrap_or_default();

        k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
        self.h1 ^= k1;
        self.h1 = self
            .h1
            .rotate_left(27)
            .wrapping_add(self.h2)
            .wrapping_mul(5)
            .wrapping_add(0x52dc_e729);

        k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
        self.h2 ^= k2;
        self.h2 = self
            .h2
            .rotate_left(31)
            .wrapping_add(self.h1)
            .wrapping_mul(5)
            .wrapping_add(0x3849_5ab5);
    }

    /// Finish the hash: `h1` little-endian followed by `h2` little-endian.
    pub fn finish(mut self) -> [u8; 16] {
        let tail = &self.tail[..self.tail_len];

        if tail.len() > 8 {
            let mut k2: u64 = 0;
            for (i, &byte) in tail[8..].iter().enumerate() {
                k2 ^= (byte as u64) << (i * 8);
            }
            k2 = k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1);
            self.h2 ^= k2;
        }
        if !tail.is_empty() {
            let mut k1: u64 = 0;
            for (i, &byte) in tail[..tail.len().min(8)].iter().enumerate() {
                k1 ^= (byte as u64) << (i * 8);
            }
            k1 = k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2);
            self.h1 ^= k1;
        }

        let (mut h1, mut h2) = (self.h1, self.h2);
        h1 ^= self.total_len;
        h2 ^= self.total_len;
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        h1 = fmix(h1);
        h2 = fmix(h2);
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);

        let mut out = [0u8; 16];
        out[..8].copy_from_slice(&h1.to_le_bytes());
        out[8..].copy_from_slice(&h2.to_le_bytes());
        out
    }
}

impl Default for Murmur3x64 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::io::Write for Murmur3x64 {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn fmix(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// One-shot convenience over [`Murmur3x64`].
pub fn hash128(data: &[u8]) -> [u8; 16] {
    let mut hasher = Murmur3x64::new();
    hasher.update(data);
    hasher.finish()
}
