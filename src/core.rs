use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// A 32-byte BLAKE3 hash used for fingerprinting.
///
/// In `kiln`, this serves two purposes:
/// 1. It fingerprints the canonical form of a resolved configuration, so two
///    invocations can cheaply tell whether they were configured identically.
/// 2. It identifies compiled bytecode inside an artifact set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The opaque result produced by a single task.
///
/// Under the hood the value is type-erased and reference counted, so it can be
/// handed to every dependent task without copying. Consumers recover the
/// concrete type with [`TaskValue::downcast_ref`].
#[derive(Clone)]
pub struct TaskValue {
    inner: Dynamic,
    type_name: &'static str,
}

impl TaskValue {
    pub fn new<T>(value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns the value if it holds a `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Name of the concrete type stored inside.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl Debug for TaskValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskValue({})", self.type_name)
    }
}

/// Cooperative cancellation flag shared between the caller and the runner.
///
/// Once cancelled, the runner stops scheduling new tasks; tasks that are
/// already running are allowed to finish.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// The underlying flag, suitable for registration with signal handlers.
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = Hash32::hash(b"pragma solidity 0.8.19;");
        let b = Hash32::hash(b"pragma solidity 0.8.19;");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
        assert_ne!(a, Hash32::hash(b"pragma solidity 0.8.18;"));
    }

    #[test]
    fn test_task_value_downcast() {
        let value = TaskValue::new(vec![1u8, 2, 3]);
        assert_eq!(value.downcast_ref::<Vec<u8>>(), Some(&vec![1, 2, 3]));
        assert!(value.downcast_ref::<String>().is_none());
        assert!(value.type_name().contains("Vec<u8>"));
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
