//! Guest-requested cache lockdown.
//!
//! The guest may pin a range of its own memory into selected cache ways. The
//! range is authorized against [`TrustWindow`](crate::TrustWindow) before any
//! cache state is touched, so a guest cannot reach secure memory through it.

use axerrno::{AxError, AxResult};
use memory_addr::{PhysAddr, VirtAddr};
use spin::Mutex;

use crate::hal::TzVmHal;
use crate::trustzone::{TrustZoneLayout, World};

/// Byte stored into every location of a range being locked.
pub const LOCKDOWN_SENTINEL: u8 = 0xa0;

/// Serializes lockdown sequences on the shared cache.
///
/// The lockdown register and the L2 cache are shared by all cores. Two
/// interleaved sequences would lock each other's lines into the wrong ways.
static LOCKDOWN_LOCK: Mutex<()> = Mutex::new(());

/// Shape of a data cache, as needed for set/way maintenance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheGeometry {
    /// Number of ways.
    pub ways: u32,
    /// Number of sets.
    pub sets: u32,
    /// Bit position of the way index in a set/way operand.
    pub way_shift: u32,
    /// Bit position of the set index in a set/way operand.
    pub set_shift: u32,
    /// Cache level, zero based.
    pub level: u32,
}

/// Level 1 data cache: 4 ways, 128 sets of 64-byte lines.
pub const L1_GEOMETRY: CacheGeometry = CacheGeometry {
    ways: 4,
    sets: 128,
    way_shift: 30,
    set_shift: 6,
    level: 0,
};

/// Level 2 unified cache: 8 ways, 512 sets of 64-byte lines.
pub const L2_GEOMETRY: CacheGeometry = CacheGeometry {
    ways: 8,
    sets: 512,
    way_shift: 29,
    set_shift: 6,
    level: 1,
};

impl CacheGeometry {
    /// Encodes the set/way operand of a maintenance operation.
    pub const fn set_way(&self, way: u32, set: u32) -> u32 {
        (way << self.way_shift) | (set << self.set_shift) | (self.level << 1)
    }

    /// All set/way operands of this cache, highest way and set first.
    pub fn set_way_operands(self) -> impl Iterator<Item = u32> {
        (0..self.ways)
            .rev()
            .flat_map(move |way| (0..self.sets).rev().map(move |set| self.set_way(way, set)))
    }
}

/// Lock masks derived from a guest way selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WayMasks {
    /// Written before the range is loaded: every way except the selected ones is locked.
    pub unlock: u32,
    /// Written after the range is loaded: the selected ways are locked.
    pub lock: u32,
}

impl WayMasks {
    /// Derives the masks from the selector in `r2`.
    pub const fn from_selector(sel: u32) -> Self {
        Self {
            unlock: !sel & 0xff,
            lock: sel,
        }
    }
}

/// Pins `len` bytes of guest memory at `va` into the ways selected by `way_mask`.
///
/// Returns the physical address of the range. Fails without touching the
/// cache if the translation aborts or any byte of `[pa, pa + len)` is not
/// owned by the guest. The range is taken as physically contiguous from the
/// translation of `va`.
pub fn cache_lock<H: TzVmHal>(
    hal: &mut H,
    layout: &TrustZoneLayout,
    va: VirtAddr,
    way_mask: u32,
    len: usize,
) -> AxResult<PhysAddr> {
    let par = hal.translate_va_to_pa(va, World::NonSecure);
    if par.faulted() {
        warn!("cache lockdown: translation of {:#x} aborted (PAR {:#x})", va, par.0);
        return Err(AxError::BadAddress);
    }

    let pa = par.reconstruct(va);
    debug!("cache lockdown: va {:#x} -> pa {:#x}", va, pa);

    let Some(alias) = layout.nw_to_virt(pa) else {
        warn!(
            "cache lockdown: {:#x} maps to {:#x}, outside the non-secure RAM [{:#x}, +{:#x})",
            va,
            pa,
            layout.window.base(),
            layout.window.size()
        );
        return Err(AxError::PermissionDenied);
    };
    if !layout.window.contains_range(pa, len) {
        warn!(
            "cache lockdown: {:#x} bytes at {:#x} run past the end of the non-secure RAM [{:#x}, +{:#x})",
            len,
            pa,
            layout.window.base(),
            layout.window.size()
        );
        return Err(AxError::PermissionDenied);
    }

    let masks = WayMasks::from_selector(way_mask);
    let flags = hal.irq_save_disable();
    let guard = LOCKDOWN_LOCK.lock();
    hal.cache_lockdown_write(masks.unlock);
    hal.cache_clean_invalidate_all();
    hal.data_sync_barrier();
    hal.write_allocate(alias, len, LOCKDOWN_SENTINEL);
    hal.cache_lockdown_write(masks.lock);
    drop(guard);
    hal.irq_restore(flags);

    info!(
        "cache lockdown: {:#x} bytes at {:#x} locked into ways {:#x}",
        len, pa, masks.lock
    );
    Ok(pa)
}
