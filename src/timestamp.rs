//! Hierarchical fixed point time.
//!
//! A [`Timestamp`] counts whole seconds, 8 ns coarse cycles within the second
//! and `2^-12` fractions of a coarse cycle. All values handed out by this
//! module are normalized.

use serde::{Deserialize, Serialize};

use crate::hardware::design_parameters::{COARSE_PERIOD_PS, COARSE_PER_SECOND, FRAC_BITS};
use crate::Error;

const PS_PER_SECOND: i128 = 1_000_000_000_000;

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Seconds.
    pub utc: u64,
    /// Coarse cycles in `[0, 125_000_000)`.
    pub coarse: u32,
    /// Fraction of a coarse cycle in `[0, 4096)`.
    pub frac: u16,
}

impl Timestamp {
    pub const ZERO: Self = Self {
        utc: 0,
        coarse: 0,
        frac: 0,
    };

    /// Build a timestamp, checking the coarse and fractional ranges.
    pub fn new(utc: u64, coarse: u32, frac: u16) -> Result<Self, Error> {
        if coarse >= COARSE_PER_SECOND {
            return Err(Error::Range("coarse cycles"));
        }
        if frac as u32 >= 1 << FRAC_BITS {
            return Err(Error::Range("fraction"));
        }
        Ok(Self { utc, coarse, frac })
    }

    /// Convert a non-negative time in ps. The fraction is truncated.
    pub fn from_picoseconds(ps: i128) -> Result<Self, Error> {
        if ps < 0 {
            return Err(Error::Range("negative time"));
        }
        let period = COARSE_PERIOD_PS as i128;
        let cycles = ps / period;
        let utc = u64::try_from(cycles / COARSE_PER_SECOND as i128)
            .map_err(|_| Error::Range("time overflow"))?;
        Ok(Self {
            utc,
            coarse: (cycles % COARSE_PER_SECOND as i128) as u32,
            frac: (((ps % period) << FRAC_BITS) / period) as u16,
        })
    }

    /// The time in ps. Exact for the whole `utc` range.
    pub fn to_picoseconds(&self) -> i128 {
        let period = COARSE_PERIOD_PS as i128;
        ((self.frac as i128 * period) >> FRAC_BITS)
            + self.coarse as i128 * period
            + self.utc as i128 * PS_PER_SECOND
    }

    /// `self - other`, borrowing from the coarser fields.
    ///
    /// Fails if `other` is later than `self`.
    pub fn subtract(&self, other: &Self) -> Result<Self, Error> {
        let mut frac = self.frac as i32 - other.frac as i32;
        let mut coarse = self.coarse as i64 - other.coarse as i64;
        let mut borrow = 0;
        if frac < 0 {
            frac += 1 << FRAC_BITS;
            coarse -= 1;
        }
        if coarse < 0 {
            coarse += COARSE_PER_SECOND as i64;
            borrow = 1;
        }
        let utc = self
            .utc
            .checked_sub(other.utc)
            .and_then(|utc| utc.checked_sub(borrow))
            .ok_or(Error::Range("time difference below zero"))?;
        Ok(Self {
            utc,
            coarse: coarse as u32,
            frac: frac as u16,
        })
    }

    /// `self + other`, carrying into the coarser fields.
    pub fn add(&self, other: &Self) -> Result<Self, Error> {
        let mut frac = self.frac as u32 + other.frac as u32;
        let mut coarse = self.coarse + other.coarse;
        let mut carry = 0;
        if frac >= 1 << FRAC_BITS {
            frac -= 1 << FRAC_BITS;
            coarse += 1;
        }
        if coarse >= COARSE_PER_SECOND {
            coarse -= COARSE_PER_SECOND;
            carry = 1;
        }
        let utc = self
            .utc
            .checked_add(other.utc)
            .and_then(|utc| utc.checked_add(carry))
            .ok_or(Error::Range("time overflow"))?;
        Ok(Self {
            utc,
            coarse,
            frac: frac as u16,
        })
    }
}

/// A timestamp read back from the input timestamp buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedTimestamp {
    pub time: Timestamp,
    /// Sequence number assigned by the core, wraps at 16 bits.
    pub seq_id: u16,
    /// Source of the event, 0 for the trigger input.
    pub channel: u8,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn carries() {
        let a = Timestamp::new(0, COARSE_PER_SECOND - 1, 4095).unwrap();
        let b = Timestamp::new(0, 0, 1).unwrap();
        assert_eq!(a.add(&b).unwrap(), Timestamp::new(1, 0, 0).unwrap());
    }

    #[test]
    fn borrows() {
        let a = Timestamp::new(1, 0, 0).unwrap();
        let b = Timestamp::new(0, 0, 1).unwrap();
        assert_eq!(
            a.subtract(&b).unwrap(),
            Timestamp::new(0, COARSE_PER_SECOND - 1, 4095).unwrap()
        );
        assert!(b.subtract(&a).is_err());
    }

    #[test]
    fn ranges() {
        assert!(Timestamp::new(0, COARSE_PER_SECOND, 0).is_err());
        assert!(Timestamp::new(0, 0, 4096).is_err());
    }

    #[test]
    fn fraction_truncates() {
        // one frac unit is 1.953125 ps
        assert_eq!(Timestamp::from_picoseconds(1).unwrap().frac, 0);
        assert_eq!(Timestamp::from_picoseconds(2).unwrap().frac, 1);
        assert_eq!(Timestamp::from_picoseconds(7999).unwrap().frac, 4095);
    }

    #[test]
    fn full_utc_range() {
        let t = Timestamp::new(94_608_000, 1, 0).unwrap();
        assert_eq!(t.to_picoseconds(), 94_608_000 * PS_PER_SECOND + 8000);
        let t = Timestamp::new(u64::MAX, COARSE_PER_SECOND - 1, 0).unwrap();
        assert_eq!(Timestamp::from_picoseconds(t.to_picoseconds()), Ok(t));
        assert_eq!(
            Timestamp::from_picoseconds((u64::MAX as i128 + 1) * PS_PER_SECOND),
            Err(Error::Range("time overflow"))
        );
    }
}
