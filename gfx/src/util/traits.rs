pub trait FromVk<T>: Sized {
    fn from_vk(value: T) -> Self;
}

pub trait ToGfx<T>: Sized {
    fn to_gfx(self) -> T;
}

impl<T, U> ToGfx<U> for T
where
    U: FromVk<T>,
{
    #[inline]
    fn to_gfx(self) -> U {
        U::from_vk(self)
    }
}
