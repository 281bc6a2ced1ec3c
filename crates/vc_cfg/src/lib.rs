#![doc = include_str!("../README.md")]
#![no_std]

// -----------------------------------------------------------------------------
// switch

/// Selects the first branch whose condition is active.
///
/// A condition is either an alias defined by [`define_alias!`] or a plain
/// `#[cfg(...)]` attribute. The `_` branch is taken when nothing else matches.
///
/// # Examples
///
/// ```
/// vc_cfg::define_alias! {
///     #[cfg(all())] => always,
/// }
///
/// vc_cfg::switch! {
///     always => {
///         const VALUE: u32 = 1;
///     }
///     _ => {
///         const VALUE: u32 = 2;
///     }
/// }
///
/// assert_eq!(VALUE, 1);
/// ```
#[macro_export]
macro_rules! switch {
    ({ $($tt:tt)* }) => {{
        $crate::switch! { $($tt)* }
    }};
    (_ => { $($output:tt)* }) => {
        $($output)*
    };
    (
        $cond:path => $output:tt
        $($( $rest:tt )+)?
    ) => {
        $cond! {
            if {
                $crate::switch! { _ => $output }
            } else {
                $(
                    $crate::switch! { $($rest)+ }
                )?
            }
        }
    };
    (
        #[cfg($cfg:meta)] => $output:tt
        $($( $rest:tt )+)?
    ) => {
        #[cfg($cfg)]
        $crate::switch! { _ => $output }
        $(
            #[cfg(not($cfg))]
            $crate::switch! { $($rest)+ }
        )?
    };
}

// -----------------------------------------------------------------------------
// define_alias

/// Defines macro aliases for `#[cfg(...)]` conditions.
///
/// Every alias becomes a macro that passes its input through when the
/// condition holds and drops it otherwise. Aliases can be used as
/// conditions in [`switch!`].
///
/// # Examples
///
/// ```
/// vc_cfg::define_alias! {
///     #[cfg(any())] => never,
/// }
///
/// never! { compile_error!("never expanded"); }
///
/// assert!(!never!());
/// ```
#[macro_export]
macro_rules! define_alias {
    (
        #[cfg($meta:meta)] => $p:ident
        $(, $( $rest:tt )+)?
    ) => {
        $crate::define_alias! {
            #[cfg($meta)] => { $p }
            $(
                $($rest)+
            )?
        }
    };
    (
        #[cfg($meta:meta)] => $p:ident,
        $($( $rest:tt )+)?
    ) => {
        $crate::define_alias! {
            #[cfg($meta)] => { $p }
            $(
                $($rest)+
            )?
        }
    };
    (
        #[cfg($meta:meta)] => {
            $(#[$p_meta:meta])*
            $p:ident
        }
        $($( $rest:tt )+)?
    ) => {
        $crate::switch! {
            #[cfg($meta)] => {
                $(#[$p_meta])*
                #[doc(inline)]
                ///
                #[doc = concat!("Passes its input through because `#[cfg(", stringify!($meta), ")]` is active.")]
                pub use $crate::enabled as $p;
            }
            _ => {
                $(#[$p_meta])*
                #[doc(inline)]
                ///
                #[doc = concat!("Drops its input because `#[cfg(", stringify!($meta), ")]` is not active.")]
                pub use $crate::disabled as $p;
            }
        }

        $(
            $crate::define_alias! {
                $($rest)+
            }
        )?
    };
}

// -----------------------------------------------------------------------------
// enabled / disabled

/// Alias target for an active condition.
///
/// - `enabled!()` is `true`.
/// - `enabled! { if { a } else { b } }` expands to `a`.
/// - any other input is passed through unchanged.
#[doc(hidden)]
#[macro_export]
macro_rules! enabled {
    () => { true };
    (if { $($p:tt)* } else { $($n:tt)* }) => { $($p)* };
    ($($p:tt)*) => { $($p)* };
}

/// Alias target for an inactive condition.
///
/// - `disabled!()` is `false`.
/// - `disabled! { if { a } else { b } }` expands to `b`.
/// - any other input is dropped.
#[doc(hidden)]
#[macro_export]
macro_rules! disabled {
    () => { false };
    (if { $($p:tt)* } else { $($n:tt)* }) => { $($n)* };
    ($($p:tt)*) => {};
}
