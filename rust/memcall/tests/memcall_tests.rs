use memcall::{alloc, free, lock, protect, set_limit, unlock, MemcallError, MemoryProtection, RlimitResource};

#[test]
fn test_cycle() {
    let buffer = alloc(32).expect("Failed to allocate memory");

    assert_eq!(buffer.len(), 32, "allocation has invalid size");
    assert!(buffer.iter().all(|&b| b == 0), "allocated memory not zeroed");

    lock(buffer).expect("Failed to lock memory");

    for byte in buffer.iter_mut() {
        *byte = 1;
        assert_eq!(*byte, 1, "read back data different to what was written");
    }

    unlock(buffer).expect("Failed to unlock memory");
    free(buffer).expect("Failed to free memory");
}

#[test]
fn test_alloc_is_page_aligned() {
    let page = memcall::page_size();
    let buffer = alloc(3 * page).expect("Failed to allocate memory");

    assert_eq!(buffer.as_ptr() as usize % page, 0, "mapping is not page aligned");

    free(buffer).expect("Failed to free memory");
}

#[test]
fn test_alloc_zero_is_rejected() {
    let err = alloc(0).expect_err("zero-length allocation should fail");
    assert!(matches!(err, MemcallError::InvalidArgument(_)), "unexpected error: {}", err);
}

#[test]
fn test_protect() {
    let page = memcall::page_size();
    let buffer = alloc(page).expect("Failed to allocate memory");

    protect(buffer, MemoryProtection::ReadWrite).expect("Failed to set ReadWrite protection");
    protect(buffer, MemoryProtection::ReadOnly).expect("Failed to set ReadOnly protection");
    protect(buffer, MemoryProtection::NoAccess).expect("Failed to set NoAccess protection");

    // free restores ReadWrite before wiping
    free(buffer).expect("Failed to free memory");
}

#[test]
fn test_empty_slices_are_noops() {
    let mut empty: [u8; 0] = [];
    lock(&mut empty).expect("lock on empty slice");
    unlock(&mut empty).expect("unlock on empty slice");
    protect(&mut empty, MemoryProtection::NoAccess).expect("protect on empty slice");
    free(&mut empty).expect("free on empty slice");
}

#[test]
fn test_page_size() {
    let size = memcall::page_size();
    assert!(size > 0, "Page size should be greater than zero");
    assert!(size.is_power_of_two(), "Page size should be a power of 2");
}

#[test]
fn test_set_memlock_limit() {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut current) };
    assert_eq!(rc, 0, "getrlimit failed");

    // Raising the soft limit up to the hard limit never needs privileges.
    let hard = current.rlim_max as u64;
    set_limit(RlimitResource::MemLock, hard).expect("Failed to set memlock limit");

    let mut updated = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut updated) };
    assert_eq!(rc, 0, "getrlimit failed");
    assert_eq!(updated.rlim_cur as u64, hard);
    assert_eq!(updated.rlim_max as u64, hard);

    let buffer = alloc(32).expect("Failed to allocate memory");
    lock(buffer).expect("Failed to lock memory under the new limit");
    unlock(buffer).expect("Failed to unlock memory");
    free(buffer).expect("Failed to free memory");
}
