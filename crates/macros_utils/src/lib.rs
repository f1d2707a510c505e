#[cfg(feature = "actix")]
#[doc(hidden)]
pub use actix_web as __actix;

/// Generate `pub fn routes(cfg: &mut ServiceConfig)` for a route module.
///
/// `route handler` registers an actix handler (anything annotated with
/// `#[get]`, `#[post]`, ...); `mount path::to::routes` forwards to another
/// module's generated function.
///
/// ```ignore
/// macros_utils::routes! {
///     route health_route,
///     mount users::routes,
/// }
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    (@entry $cfg:ident, route $($segment:ident)::+) => {
        $cfg.service($($segment)::+);
    };
    (@entry $cfg:ident, mount $($segment:ident)::+) => {
        $cfg.configure($($segment)::+);
    };
    ($($kind:ident $($segment:ident)::+),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::__actix::web::ServiceConfig) {
            $( $crate::routes!(@entry cfg, $kind $($segment)::+); )*
        }
    };
}
