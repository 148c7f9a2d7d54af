/// Logs a structured line tagged with the component that emitted it.
/// Usage:
/// ```rust
/// use log::Level;
/// user_logger::logger_log!(Level::Info, "engine", "workers started");
/// user_logger::logger_log!(Level::Error, "sink", "append failed: {}", "denied");
/// ```
/// Logs like:
/// [2025-04-25T16:32:10+02:00][INFO][engine][pid=4568][tid=ThreadId(3)] workers started
#[macro_export]
macro_rules! logger_log {
    ($level:expr, $component:expr, $fmt:expr $(, $($arg:tt)+)?) => {
        log::log!(
            $level,
            concat!(
                "[{}]",                  // rfc3339 local time
                "[{}]",
                "[", $component, "]",
                "[pid={}]",
                "[tid={:?}] ",
                $fmt
            ),
            chrono::Local::now().to_rfc3339(),
            $level,
            std::process::id(),
            std::thread::current().id()
            $(, $($arg)+)?
        );
    };
}
