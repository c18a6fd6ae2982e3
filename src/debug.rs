//! Logging sink for the VM core.
//!
//! The actual device (UART, semihosting, a host terminal) is an out-of-scope
//! collaborator, same as the boot sequence or the ELF loader: on `baremetal`
//! builds the owning kernel registers one `DebugSink` during its own startup;
//! on hosted/test builds output just goes to stdout.

#[cfg(baremetal)]
use core::fmt;

/// A destination for formatted trace output. Implemented by the owning
/// kernel on real hardware; this crate never talks to a UART directly.
#[cfg(baremetal)]
pub trait DebugSink: Sync {
    fn write_str(&self, s: &str);
}

#[cfg(baremetal)]
static SINK: spin::Mutex<Option<&'static dyn DebugSink>> = spin::Mutex::new(None);

/// Registers the sink used by `print!`/`println!`/`klog!` on baremetal builds.
/// Must be called once, before the first trace line, by the surrounding kernel.
#[cfg(baremetal)]
pub fn set_sink(sink: &'static dyn DebugSink) {
    *SINK.lock() = Some(sink);
}

#[cfg(baremetal)]
struct SinkWriter;

#[cfg(baremetal)]
impl fmt::Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = *SINK.lock() {
            sink.write_str(s);
        }
        Ok(())
    }
}

#[cfg(baremetal)]
#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;
    let _ = SinkWriter.write_fmt(args);
}

#[cfg(not(baremetal))]
#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    std::print!("{}", args);
}

#[macro_export]
macro_rules! print {
    ($($args:tt)+) => ({
        $crate::debug::_print(core::format_args!($($args)+));
    });
}

#[macro_export]
macro_rules! println {
    () => ({
        print!("\r\n")
    });
    ($fmt:expr) => ({
        print!(concat!($fmt, "\r\n"))
    });
    ($fmt:expr, $($args:tt)+) => ({
        print!(concat!($fmt, "\r\n"), $($args)+)
    });
}

/// Verbose fault-path/coremap/swap tracing, compiled out unless `debug-vm` is enabled.
#[cfg(feature = "debug-vm")]
#[macro_export]
macro_rules! klog {
    ($fmt:expr) => ({
        println!(concat!("vm: ", $fmt))
    });
    ($fmt:expr, $($args:tt)+) => ({
        println!(concat!("vm: ", $fmt), $($args)+)
    });
}

#[cfg(not(feature = "debug-vm"))]
#[macro_export]
macro_rules! klog {
    ($($args:tt)+) => {{
        ()
    }};
}
