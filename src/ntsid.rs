use std::fmt::{self, Debug, Display};

/// A security identifier in its binary form.
#[derive(PartialOrd, PartialEq, Eq, Clone, Hash)]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    /// Parses `revision:u8, count:u8, authority:u48 (big-endian), count * u32 (little-endian)`.
    ///
    /// Returns `None` when `bytes` is too short for the declared sub-authority count.
    pub fn from_bytes(bytes: &[u8]) -> Option<Sid> {
        let (&revision, rest) = bytes.split_first()?;
        let (&count, rest) = rest.split_first()?;
        let (authority_bytes, rest) = rest.split_at_checked(6)?;

        // IdentifierAuthority is a 48-bit big-endian integer.
        let authority = authority_bytes
            .iter()
            .fold(0_u64, |acc, &b| (acc << 8) | u64::from(b));

        let sub_len = usize::from(count) * 4;
        let sub_bytes = rest.get(..sub_len)?;
        let sub_authorities = sub_bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        Some(Sid {
            revision,
            authority,
            sub_authorities,
        })
    }

    /// Size in bytes of the binary form.
    pub fn size(&self) -> usize {
        8 + self.sub_authorities.len() * 4
    }
}

impl Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "S-{}-{}", self.revision, self.authority)?;
        for sub in &self.sub_authorities {
            write!(f, "-{}", sub)?;
        }
        Ok(())
    }
}

impl Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}
