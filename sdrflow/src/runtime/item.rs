/// Plain sample type that can be viewed through a byte buffer.
///
/// # Safety
///
/// Every bit pattern of `size_of::<Self>()` bytes must be a valid value of the
/// type, the type must not contain padding, and its alignment must divide its
/// size.
pub unsafe trait Item: Copy + Send + Sync + 'static {}

macro_rules! impl_item {
    ($($t:ty),*) => {
        $(
            // SAFETY: primitive integer and float types have no padding and
            // no invalid bit patterns
            unsafe impl Item for $t {}
        )*
    };
}

impl_item!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, usize, isize, f32, f64);

// SAFETY: an array of items has no padding between its elements
unsafe impl<T: Item, const N: usize> Item for [T; N] {}

pub(crate) fn cast_slice<T: Item>(bytes: &[u8]) -> &[T] {
    assert_eq!(bytes.len() % size_of::<T>(), 0);
    // SAFETY: T: Item accepts any bit pattern; alignment is checked below
    let (prefix, items, suffix) = unsafe { bytes.align_to::<T>() };
    assert!(
        prefix.is_empty() && suffix.is_empty(),
        "buffer slice is not aligned for {}",
        std::any::type_name::<T>()
    );
    items
}

pub(crate) fn cast_slice_mut<T: Item>(bytes: &mut [u8]) -> &mut [T] {
    assert_eq!(bytes.len() % size_of::<T>(), 0);
    // SAFETY: T: Item accepts any bit pattern; alignment is checked below
    let (prefix, items, suffix) = unsafe { bytes.align_to_mut::<T>() };
    assert!(
        prefix.is_empty() && suffix.is_empty(),
        "buffer slice is not aligned for {}",
        std::any::type_name::<T>()
    );
    items
}
