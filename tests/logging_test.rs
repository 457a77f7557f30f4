//! Global subscriber installation. Kept in its own test binary because it
//! sets the process-wide dispatcher.

use aiod::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn init_is_idempotent() {
    logging::init(TracingConfig::default()).unwrap();
    logging::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json)).unwrap();
    tracing::info!("still logging");
}
