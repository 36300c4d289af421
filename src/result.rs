// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// Various errors
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
pub enum Error {
    /// A path already exists where a create was requested.
    Exists,
    /// A path did not resolve to an object.
    NotFound,
    /// A fixed-capacity pool is exhausted.
    NoMem,
    /// The flash has no free space and garbage collection cannot
    /// reclaim enough.
    Full,
    /// An I/O span would leave an area, or a seek went past the
    /// end of a file.
    Range,
    /// A record failed its magic or CRC check at a time when it
    /// was expected to be valid, or a structural invariant was
    /// found violated.
    Corrupt,
    /// The flash driver reported a write or erase failure.
    Flash,
    /// The flash driver reported a read failure.
    Hw,
    /// An operating-system service (pool, mutex) failed.
    Os,
    /// An unexpected record magic was encountered where a
    /// specific record type was required.
    Unexpected,
    /// Invalid arguments: bad access-flag combination, an overlong
    /// filename, or an operation on the wrong kind of object.
    BadArgs,
}

impl Error {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exists => "File or directory already exists",
            Self::NotFound => "No such file or directory",
            Self::NoMem => "Object pool exhausted",
            Self::Full => "File system full",
            Self::Range => "Offset out of range",
            Self::Corrupt => "File system corrupt",
            Self::Flash => "Flash write failure",
            Self::Hw => "Flash read failure",
            Self::Os => "OS service failure",
            Self::Unexpected => "Unexpected record type",
            Self::BadArgs => "Bad arguments",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> core::result::Result<(), fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
