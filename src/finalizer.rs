//! Finalizer helpers
//!
//! A finalizer is a named sentinel on an object that blocks its deletion
//! until removed. These helpers are idempotent set operations over the
//! object's finalizer list.

use kube::ResourceExt;

/// Returns true if the object carries the given finalizer
pub fn has_finalizer<K: ResourceExt>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add a finalizer to the object if not already present
///
/// Returns true if the object was modified.
pub fn add_finalizer<K: ResourceExt>(obj: &mut K, finalizer: &str) -> bool {
    if has_finalizer(obj, finalizer) {
        return false;
    }
    obj.finalizers_mut().push(finalizer.to_string());
    true
}

/// Remove a finalizer from the object if present
///
/// Returns true if the object was modified.
pub fn remove_finalizer<K: ResourceExt>(obj: &mut K, finalizer: &str) -> bool {
    let finalizers = obj.finalizers_mut();
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}
