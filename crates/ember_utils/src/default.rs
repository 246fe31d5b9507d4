/// An analog to [`Default::default()`] that is shorter to type.
///
/// Most useful in struct update syntax: `Foo { a, ..default() }`.
pub fn default<T: Default>() -> T {
    T::default()
}
