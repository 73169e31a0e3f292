/// Implement the handle plumbing shared by every public stream variant.
///
/// Each listed type must be a struct with a `stream: Stream` field.
macro_rules! stream_handle {
    ($($name:ident),* $(,)?) => {
        $(
            impl $crate::stream::AsStream for $name {
                #[inline]
                fn as_stream(&self) -> &$crate::stream::Stream {
                    &self.stream
                }
            }

            impl $crate::event::Emits for $name {
                #[inline]
                fn emitter(&self) -> &$crate::event::Emitter {
                    $crate::event::Emits::emitter(&self.stream)
                }

                fn listener_added(&self, event: &str) {
                    $crate::event::Emits::listener_added(&self.stream, event);
                }
            }

            impl From<$name> for $crate::stream::Stream {
                fn from(handle: $name) -> Self {
                    handle.stream
                }
            }

            impl std::fmt::Debug for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.debug_tuple(stringify!($name)).field(&self.stream).finish()
                }
            }
        )*
    };
}

pub(crate) use stream_handle;
