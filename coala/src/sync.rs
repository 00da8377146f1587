use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read-lock, carrying on with the data if a writer panicked
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
  match lock.read() {
    | Ok(g) => g,
    | Err(p) => p.into_inner(),
  }
}

/// Write-lock, carrying on with the data if a writer panicked
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
  match lock.write() {
    | Ok(g) => g,
    | Err(p) => p.into_inner(),
  }
}
