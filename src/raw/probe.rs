// The linear probe sequence.
//
// The probe steps through consecutive slots from the home index. Because the
// table length is a power of two and the step is one, the sequence covers
// every slot before wrapping back to the home index.
pub struct Probe {
    // The current index in the probe sequence.
    pub i: usize,
    // The current length of the probe sequence.
    pub len: usize,
}

impl Probe {
    // Initialize the probe sequence at the home index for the given hash.
    #[inline]
    pub fn start(hash: u64, mask: usize) -> Probe {
        Probe {
            i: (hash as usize) & mask,
            len: 0,
        }
    }

    // Advance to the next slot in the probe sequence.
    #[inline]
    pub fn next(&mut self, mask: usize) {
        self.i = (self.i + 1) & mask;
        self.len += 1;
    }
}
