//! Environment fingerprint written into the segment at create time and
//! verified on every open, per the `chainbase` design: the file holds
//! absolute offsets relative to its own base and layouts of
//! platform-sized fields, so any mismatch between the writer's and the
//! reader's build is unsafe to interpret.

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};

/// Bumped whenever the on-segment layout of a component (fingerprint,
/// lock bank, index metadata) changes incompatibly.
const LAYOUT_VERSION: u32 = 1;

/// Fixed-size, plain-old-data fingerprint. 32 bytes, `Pod` so it can be
/// read and written directly from the mapped bytes without a codec.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct Fingerprint {
    endianness: u8,
    pointer_width: u8,
    usize_width: u8,
    _reserved: u8,
    layout_version: u32,
    build_tag: [u8; 24],
}

pub const FINGERPRINT_SIZE: usize = std::mem::size_of::<Fingerprint>();

impl Fingerprint {
    /// The fingerprint of the process currently running.
    pub fn current() -> Fingerprint {
        let mut build_tag = [0u8; 24];
        let version = env!("CARGO_PKG_VERSION").as_bytes();
        let n = version.len().min(build_tag.len());
        build_tag[..n].copy_from_slice(&version[..n]);

        Fingerprint {
            endianness: if cfg!(target_endian = "little") { 0 } else { 1 },
            pointer_width: (std::mem::size_of::<usize>() * 8) as u8,
            usize_width: std::mem::size_of::<usize>() as u8,
            _reserved: 0,
            layout_version: LAYOUT_VERSION,
            build_tag,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn from_bytes(buf: &[u8]) -> Fingerprint {
        *bytemuck::from_bytes(&buf[..FINGERPRINT_SIZE])
    }

    /// Verify `self` (typically read straight out of a mapped segment)
    /// against the current process's fingerprint, byte for byte.
    pub fn verify(&self) -> Result<()> {
        if *self == Fingerprint::current() {
            Ok(())
        } else {
            Err(Error::IncompatibleBuild)
        }
    }
}
