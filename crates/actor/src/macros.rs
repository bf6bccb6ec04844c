/// Defines a named wrapper around an actor's address.
///
/// ```ignore
/// define_actor! {
///     /// Docs for the wrapper.
///     pub actor Counter(CounterState);
/// }
/// ```
///
/// The wrapper gets a private `spawn(state, label)` constructor and an
/// `addr()` accessor, and is meant to receive `impl` blocks with the typed
/// API of the actor.
#[macro_export]
macro_rules! define_actor {
    {
        $(#[$meta:meta])*
        $v:vis actor $wrapper:ident($state:ty);
    } => {
        $(#[$meta])*
        $v struct $wrapper {
            addr: $crate::Addr<$state>,
        }

        #[allow(dead_code)]
        impl $wrapper {
            #[inline]
            fn spawn(state: $state, label: &str) -> Self {
                Self {
                    addr: $crate::Addr::spawn(state, label),
                }
            }

            #[inline]
            fn addr(&self) -> &$crate::Addr<$state> {
                &self.addr
            }
        }

        impl ::std::clone::Clone for $wrapper {
            #[inline]
            fn clone(&self) -> Self {
                Self {
                    addr: ::std::clone::Clone::clone(&self.addr),
                }
            }
        }
    };
}
