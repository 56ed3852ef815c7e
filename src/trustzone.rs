//! Physical address authorization across the secure/non-secure boundary.

use memory_addr::{align_down_4k, align_offset_4k, PhysAddr, VirtAddr};

/// Base of the RAM assigned to the non-secure world.
pub const NONSECURE_RAM_BASE: usize = 0x8000_0000;
/// Size of the RAM assigned to the non-secure world.
pub const NONSECURE_RAM_SIZE: usize = 0x1000_0000;
/// Where the secure world maps [`NONSECURE_RAM_BASE`] into its own address space.
pub const NONSECURE_RAM_VIRT_BASE: usize = 0xe000_0000;

/// The range of physical memory owned by the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustWindow {
    base: PhysAddr,
    size: usize,
}

impl TrustWindow {
    /// Creates a window covering `[base, base + size)`.
    pub const fn new(base: usize, size: usize) -> Self {
        Self {
            base: PhysAddr::from_usize(base),
            size,
        }
    }

    /// The first address of the window.
    pub const fn base(&self) -> PhysAddr {
        self.base
    }

    /// The size of the window in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether `pa` lies inside the window.
    pub fn contains(&self, pa: PhysAddr) -> bool {
        let pa = pa.as_usize();
        let base = self.base.as_usize();
        pa >= base && pa - base < self.size
    }

    /// Whether `[pa, pa + len)` lies inside the window.
    ///
    /// An empty range is inside if `pa` is.
    pub fn contains_range(&self, pa: PhysAddr, len: usize) -> bool {
        self.contains(pa) && len <= self.size - (pa.as_usize() - self.base.as_usize())
    }
}

/// The secure world's virtual alias of the non-secure RAM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NwAlias {
    virt_base: VirtAddr,
}

impl NwAlias {
    /// Creates an alias that maps the window base to `virt_base`.
    pub const fn new(virt_base: usize) -> Self {
        Self {
            virt_base: VirtAddr::from_usize(virt_base),
        }
    }
}

/// Boot-time memory layout of the TrustZone partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrustZoneLayout {
    /// Physical memory the guest may request lockdown for.
    pub window: TrustWindow,
    /// Host alias of that memory.
    pub alias: NwAlias,
}

impl TrustZoneLayout {
    /// The layout of the board this kernel is built for.
    pub const PLATFORM: Self = Self {
        window: TrustWindow::new(NONSECURE_RAM_BASE, NONSECURE_RAM_SIZE),
        alias: NwAlias::new(NONSECURE_RAM_VIRT_BASE),
    };

    /// Translates a physical address inside the window to its host alias.
    ///
    /// Returns `None` if `pa` is not covered by the window.
    pub fn nw_to_virt(&self, pa: PhysAddr) -> Option<VirtAddr> {
        if !self.window.contains(pa) {
            return None;
        }
        let offset = pa.as_usize() - self.window.base.as_usize();
        Some(VirtAddr::from(self.alias.virt_base.as_usize() + offset))
    }
}

impl Default for TrustZoneLayout {
    fn default() -> Self {
        Self::PLATFORM
    }
}

/// The security state an address translation is performed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum World {
    /// Secure state, the host's own translation regime.
    Secure,
    /// Non-secure state, the guest's translation regime.
    NonSecure,
}

/// Raw value of the physical address register after a translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Par(pub usize);

impl Par {
    const FAULT: usize = 1 << 0;

    /// Whether the translation aborted.
    pub const fn faulted(self) -> bool {
        self.0 & Self::FAULT != 0
    }

    /// Rebuilds the physical address of `va` from this translation result.
    ///
    /// The page frame comes from the register, the page offset from `va`.
    pub fn reconstruct(self, va: VirtAddr) -> PhysAddr {
        PhysAddr::from(align_down_4k(self.0) | align_offset_4k(va.as_usize()))
    }
}
