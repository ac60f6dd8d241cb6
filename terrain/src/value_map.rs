//! Value-to-slot mappings handed to rendering collaborators.

/// Linear rescale of a numeric domain onto integer slots
/// `[min_slot, max_slot]`, e.g. indices into a color gradient.
///
/// Out-of-domain values clamp to the end slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueMap {
    min_domain: f64,
    max_domain: f64,
    min_slot: usize,
    max_slot: usize,
}

impl ValueMap {
    pub fn new(min_domain: f64, max_domain: f64, min_slot: usize, max_slot: usize) -> Self {
        Self {
            min_domain,
            max_domain,
            min_slot,
            max_slot,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
    pub fn slot(&self, value: f64) -> usize {
        let factor = (value - self.min_domain) / (self.max_domain - self.min_domain);
        let slot = factor * (self.max_slot - self.min_slot) as f64 + self.min_slot as f64;
        slot.clamp(self.min_slot as f64, self.max_slot as f64) as usize
    }
}

/// A [`ValueMap`] with zero pinned to a designated slot, for scales
/// where "exactly zero" carries its own color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroValueMap {
    map: ValueMap,
    zero_slot: usize,
}

impl ZeroValueMap {
    pub fn new(
        min_domain: f64,
        max_domain: f64,
        min_slot: usize,
        max_slot: usize,
        zero_slot: usize,
    ) -> Self {
        Self {
            map: ValueMap::new(min_domain, max_domain, min_slot, max_slot),
            zero_slot,
        }
    }

    pub fn slot(&self, value: f64) -> usize {
        if value == 0.0 {
            self.zero_slot
        } else {
            self.map.slot(value)
        }
    }
}
