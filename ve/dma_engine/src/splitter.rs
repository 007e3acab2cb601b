// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Splits one caller [`Request`](crate::Request) into the hardware-sized,
//! page-respecting pieces a [`HwDescRing`](crate::ring::HwDescRing) can post.
//!
//! A single descriptor can never straddle a page boundary on either side of
//! the copy (translation only covers one page at a time) and can never
//! exceed [`HW_MAX_DESC_LEN`]. Everything else about the request — address
//! kind, pid, protection-check behavior — is copied through unchanged from
//! the endpoint it was split from.

use crate::ring::Descriptor;
use crate::{DmaError, Request, ALIGN, HW_MAX_DESC_LEN};
use ve_hal::ring_layout::Space;
use ve_hal::{Address, Translate};

pub(crate) fn plan(req: &Request, translate: &dyn Translate) -> Result<Vec<Descriptor>, DmaError> {
    let mut offset = 0u64;
    let mut out = Vec::new();
    while offset < req.length {
        let remaining = req.length - offset;
        let mut chunk = remaining.min(HW_MAX_DESC_LEN);

        let (src_phys, src_limit) = resolve(req.src, offset, translate, false)?;
        let (dst_phys, dst_limit) = resolve(req.dst, offset, translate, true)?;
        chunk = chunk.min(src_limit).min(dst_limit);
        // Addresses and the request length are all ALIGN-aligned, and page
        // sizes are multiples of ALIGN, so this floor should never actually
        // fire; it exists so a misbehaving `Translate` impl cannot wedge the
        // loop instead of returning a visible error.
        chunk -= chunk % ALIGN;
        if chunk == 0 {
            return Err(DmaError::Translation(ve_hal::HalError::Translation {
                addr: req.src.addr + offset,
                pid: req.src.pid,
                want_write: false,
            }));
        }

        out.push(Descriptor {
            src_space: Space::of(req.src.kind),
            src_pid: req.src.pid,
            src_phys,
            dst_space: Space::of(req.dst.kind),
            dst_pid: req.dst.pid,
            dst_phys,
            length: chunk,
            skip_prot_check: req.src.kind.skips_protection_check() || req.dst.kind.skips_protection_check(),
        });
        offset += chunk;
    }
    Ok(out)
}

/// Resolves one endpoint at `offset` into the request to a physical address
/// plus the number of bytes remaining before the next page boundary (or
/// `u64::MAX` for already-physical addresses, which have no page limit of
/// their own).
fn resolve(addr: Address, offset: u64, translate: &dyn Translate, want_write: bool) -> Result<(u64, u64), DmaError> {
    if addr.kind.is_virtual() {
        let t = translate.translate(addr.pid, addr.addr + offset, want_write)?;
        if want_write && !t.writable && !addr.kind.skips_protection_check() {
            return Err(DmaError::ReadOnly(addr));
        }
        let page_off = t.phys_addr % t.page_size;
        let to_boundary = t.page_size - page_off;
        Ok((t.phys_addr, to_boundary))
    } else {
        Ok((addr.addr + offset, u64::MAX - offset))
    }
}
