/// Cache-line padded wrapper to keep frequently-written atomics from false-sharing
/// with neighboring fields.
#[repr(align(64))]
pub(crate) struct Aligned<T>(pub(crate) T);
