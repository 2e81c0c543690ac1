/// Trait for types having a constant default value. This is essentially a
/// constant version of `Default`.
///
/// Used to build `static` alarm pools without running any code at startup.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl<T: ?Sized> Init for tokenlock::SingletonTokenId<T> {
    const INIT: Self = Self::new();
}

macro_rules! impl_init {
    (
        $(
            $( #[$meta:meta] )*
            $ty:ty => $value:expr,
        )*
    ) => {
        $(
            $( #[$meta] )*
            impl Init for $ty {
                const INIT: Self = $value;
            }
        )*
    };
}

impl_init! {
    bool => false,
    u8 => 0,
    u32 => 0,
}
