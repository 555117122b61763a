/// Logs an action against the registry, marking it as skipped when running dry.
///
/// The first argument is anything with a `dry_run: bool` field, usually a
/// [`GcConfig`](crate::config::GcConfig).
#[macro_export]
macro_rules! notice {
    ($config:expr, $($arg:tt)*) => {
        if $config.dry_run {
            ::log::info!("DRY RUN: {}", format_args!($($arg)*));
        } else {
            ::log::info!($($arg)*);
        }
    };
}
