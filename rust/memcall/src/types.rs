/// Memory protection flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryProtection {
    /// No access: any read or write faults. Used for guard pages.
    NoAccess,

    /// Read-only: memory can be read but not written.
    ReadOnly,

    /// Read-write: memory can be read and written but not executed.
    ReadWrite,
}

impl MemoryProtection {
    pub(crate) fn as_prot(self) -> libc::c_int {
        match self {
            MemoryProtection::NoAccess => libc::PROT_NONE,
            MemoryProtection::ReadOnly => libc::PROT_READ,
            MemoryProtection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        }
    }
}

/// Resource limit identifiers used with `set_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlimitResource {
    /// Maximum size of a core file.
    Core,

    /// Maximum size that may be locked into memory.
    MemLock,
}
