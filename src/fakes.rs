// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test fakes.
//!
//! `MemFlash` models a NOR flash part in RAM with real NOR
//! semantics: an erased byte reads 0xff, a write can only clear
//! bits, and erase works on whole sectors.  Attempting to raise a
//! bit without an erase panics, which turns layout bugs into
//! immediate test failures instead of silent corruption.
//!
//! Clones share the underlying image, so a "power cycle" is just
//! mounting a second filesystem over a clone.  A programmable
//! write budget tears a record mid-write the way a dying board
//! would.

use crate::area::AreaDesc;
use crate::flash::Flash;
use crate::result::{Error, Result};

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

pub(crate) struct MemFlash {
    image: Rc<RefCell<Vec<u8>>>,
    /// Sector layout as (offset, length) pairs.
    sectors: Rc<Vec<(u32, u32)>>,
    /// Remaining writable bytes, if a budget is set.  Writes that
    /// exceed it apply partially and then fail.
    write_budget: Rc<RefCell<Option<usize>>>,
}

impl Clone for MemFlash {
    fn clone(&self) -> MemFlash {
        MemFlash {
            image: Rc::clone(&self.image),
            sectors: Rc::clone(&self.sectors),
            write_budget: Rc::clone(&self.write_budget),
        }
    }
}

impl MemFlash {
    /// A part with `nsectors` uniform sectors.
    pub(crate) fn uniform(nsectors: usize, sector_len: u32) -> MemFlash {
        let lens: Vec<u32> = vec![sector_len; nsectors];
        Self::with_sectors(&lens)
    }

    /// A part with the given sector lengths, laid out back to
    /// back from offset zero.
    pub(crate) fn with_sectors(lens: &[u32]) -> MemFlash {
        let mut sectors = Vec::new();
        let mut offset = 0u32;
        for &len in lens {
            sectors.push((offset, len));
            offset += len;
        }
        MemFlash {
            image: Rc::new(RefCell::new(vec![0xff; offset as usize])),
            sectors: Rc::new(sectors),
            write_budget: Rc::new(RefCell::new(None)),
        }
    }

    /// One area per sector, which is what the filesystem expects:
    /// an area must be erasable with a single sector erase.
    pub(crate) fn area_descs(&self) -> Vec<AreaDesc> {
        self.sectors
            .iter()
            .map(|&(offset, length)| AreaDesc { offset, length })
            .collect()
    }

    /// Fails writes after `bytes` more bytes have been written.
    pub(crate) fn set_write_limit(&self, bytes: usize) {
        *self.write_budget.borrow_mut() = Some(bytes);
    }

    pub(crate) fn clear_write_limit(&self) {
        *self.write_budget.borrow_mut() = None;
    }
}

impl Flash for MemFlash {
    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<()> {
        let image = self.image.borrow();
        let start = offset as usize;
        let end = start + buf.len();
        if end > image.len() {
            return Err(Error::Hw);
        }
        buf.copy_from_slice(&image[start..end]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let mut budget = self.write_budget.borrow_mut();
        let writable = match *budget {
            None => data.len(),
            Some(rem) => rem.min(data.len()),
        };

        let mut image = self.image.borrow_mut();
        let start = offset as usize;
        if start + data.len() > image.len() {
            return Err(Error::Hw);
        }
        for (i, &b) in data[..writable].iter().enumerate() {
            let old = image[start + i];
            assert_eq!(
                old & b,
                b,
                "NOR write raising bits at offset {:#x}",
                start + i
            );
            image[start + i] = old & b;
        }

        if let Some(rem) = budget.as_mut() {
            *rem -= writable;
            if writable < data.len() {
                return Err(Error::Hw);
            }
        }
        Ok(())
    }

    fn erase_sector(&mut self, offset: u32) -> Result<()> {
        let &(start, len) = self
            .sectors
            .iter()
            .find(|&&(s, l)| offset >= s && offset < s + l)
            .ok_or(Error::Hw)?;
        let mut image = self.image.borrow_mut();
        image[start as usize..(start + len) as usize].fill(0xff);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_only_clear_bits() {
        let mut flash = MemFlash::uniform(1, 64);
        flash.write(0, &[0xf0]).expect("write");
        flash.write(0, &[0x30]).expect("subset write");
        let mut b = [0u8; 1];
        flash.read(0, &mut b).expect("read");
        assert_eq!(b[0], 0x30);
    }

    #[test]
    #[should_panic(expected = "raising bits")]
    fn raising_bits_panics() {
        let mut flash = MemFlash::uniform(1, 64);
        flash.write(0, &[0x0f]).expect("write");
        let _ = flash.write(0, &[0xf0]);
    }

    #[test]
    fn erase_restores_sector() {
        let mut flash = MemFlash::uniform(2, 64);
        flash.write(70, &[0x00]).expect("write");
        flash.erase_sector(64).expect("erase");
        let mut b = [0u8; 1];
        flash.read(70, &mut b).expect("read");
        assert_eq!(b[0], 0xff);
    }

    #[test]
    fn write_budget_tears_writes() {
        let mut flash = MemFlash::uniform(1, 64);
        flash.set_write_limit(2);
        assert_eq!(flash.write(0, &[0, 0, 0, 0]).err(), Some(Error::Hw));
        let mut b = [0xffu8; 4];
        flash.read(0, &mut b).expect("read");
        assert_eq!(b, [0, 0, 0xff, 0xff]);
        assert_eq!(flash.write(8, &[0]).err(), Some(Error::Hw));
    }
}
