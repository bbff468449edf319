//! Rotating 8-byte magic secret used to key the packet-filter chonkle, triple-buffered as
//! current/upcoming/previous so a magic rotation pushed by the backend never causes a window of
//! packet loss: the receiver tries all three.

pub const MAGIC_BYTES: usize = 8;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct MagicValues {
    pub current: [u8; MAGIC_BYTES],
    pub upcoming: [u8; MAGIC_BYTES],
    pub previous: [u8; MAGIC_BYTES],
}

impl MagicValues {
    #[inline]
    pub fn new() -> Self {
        MagicValues::default()
    }

    /// Rotates in a fresh upcoming magic pushed by the backend: `previous <- current`,
    /// `current <- upcoming`, `upcoming <- new_magic`.
    pub fn rotate(&mut self, new_magic: [u8; MAGIC_BYTES]) {
        self.previous = self.current;
        self.current = self.upcoming;
        self.upcoming = new_magic;
    }

    /// The three magics to try, in the order the receiver should attempt them.
    #[inline]
    pub fn candidates(&self) -> [[u8; MAGIC_BYTES]; 3] {
        [self.current, self.upcoming, self.previous]
    }

    /// Adopts a triple pushed wholesale by a route-update packet, rather than rotating one
    /// value in. The server transmits all three slots explicitly so a client that missed a
    /// rotation (or just upgraded) converges in one update instead of needing several.
    pub fn set(&mut self, current: [u8; MAGIC_BYTES], upcoming: [u8; MAGIC_BYTES], previous: [u8; MAGIC_BYTES]) {
        self.current = current;
        self.upcoming = upcoming;
        self.previous = previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_shifts_all_three_slots() {
        let mut magic = MagicValues::new();
        magic.rotate([1; MAGIC_BYTES]);
        assert_eq!(magic.upcoming, [1; MAGIC_BYTES]);

        magic.rotate([2; MAGIC_BYTES]);
        assert_eq!(magic.current, [1; MAGIC_BYTES]);
        assert_eq!(magic.upcoming, [2; MAGIC_BYTES]);
        assert_eq!(magic.previous, [0; MAGIC_BYTES]);
    }
}
